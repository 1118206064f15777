use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    api::catalog,
    app_error::{AppError, StdResponse},
    app_state::{AppState, DbConn},
    auth,
    fulfillment::{self, CartLine},
    models::{CartEntity, CartItemEntity, CreateCartEntity, CreateCartItemEntity},
    schema::{cart_items, carts},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/customers/cart",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_cart))
            .routes(utoipa_axum::routes!(update_cart))
            .routes(utoipa_axum::routes!(clear_cart))
            .routes(utoipa_axum::routes!(add_cart_item))
            .routes(utoipa_axum::routes!(remove_cart_item))
            .route_layer(axum::middleware::from_fn(auth::customers_authorization)),
    )
}

/// One open cart per customer, created lazily on first touch.
async fn get_or_create_cart(conn: &mut DbConn<'_>, customer_id: i32) -> Result<CartEntity, AppError> {
    let existing: Option<CartEntity> = carts::table
        .filter(carts::customer_id.eq(customer_id))
        .first(conn)
        .await
        .optional()
        .context("Failed to look up cart")?;

    if let Some(cart) = existing {
        return Ok(cart);
    }

    let cart = diesel::insert_into(carts::table)
        .values(CreateCartEntity { customer_id })
        .returning(CartEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create cart")?;

    Ok(cart)
}

/// Stock/availability gate applied whenever cart contents change; checkout
/// re-runs the same checks against a fresh catalog snapshot.
async fn check_availability(
    client: reqwest::Client,
    lines: &[CartLine],
) -> Result<(), AppError> {
    if lines.is_empty() {
        return Ok(());
    }
    let ids = lines.iter().map(|line| line.product_id).collect();
    let products = catalog::get_products(client, ids).await?;
    fulfillment::price_cart(lines, &products)?;
    Ok(())
}

#[derive(Serialize, ToSchema)]
struct GetCartRes {
    pub cart: CartEntity,
    pub cart_items: Vec<CartItemEntity>,
    /// Computed from live catalog prices; only checkout freezes prices.
    pub total_price: i64,
}

/// Fetch the authenticated customer's cart, priced against the live catalog.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Get cart successfully", body = StdResponse<GetCartRes, String>)
    )
)]
async fn get_cart(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = get_or_create_cart(conn, customer_id).await?;

    let cart_items: Vec<CartItemEntity> = cart_items::table
        .filter(cart_items::cart_id.eq(cart.id))
        .get_results(conn)
        .await
        .context("Failed to get cart items")?;

    let total_price = if cart_items.is_empty() {
        0
    } else {
        let ids = cart_items.iter().map(|item| item.product_id).collect();
        let products = catalog::get_products(state.http_client, ids).await?;
        cart_items
            .iter()
            .map(|item| {
                let unit_price = products
                    .get(&item.product_id)
                    .map(|p| p.unit_price)
                    .unwrap_or(0);
                unit_price * item.quantity as i64
            })
            .sum()
    };

    Ok(StdResponse {
        data: Some(GetCartRes {
            cart,
            cart_items,
            total_price,
        }),
        message: Some("Get cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateCartReq {
    pub cart_items: Vec<UpdateCartReqCartItem>,
}

#[derive(Deserialize, ToSchema)]
struct UpdateCartReqCartItem {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Serialize, ToSchema)]
struct UpdateCartRes {
    pub deleted_items: Vec<CartItemEntity>,
    pub updated_items: Vec<CartItemEntity>,
    pub updated_cart: CartEntity,
}

/// Replace the cart's item set: listed lines are upserted, unlisted ones
/// deleted. Every line is stock-checked before any write.
#[utoipa::path(
    put,
    path = "/",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    request_body = UpdateCartReq,
    responses(
        (status = 200, description = "Updated cart successfully", body = StdResponse<UpdateCartRes, String>)
    )
)]
async fn update_cart(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Json(body): Json<UpdateCartReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let lines: Vec<CartLine> = body
        .cart_items
        .iter()
        .map(|item| CartLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    check_availability(state.http_client, &lines).await?;

    let cart = get_or_create_cart(conn, customer_id).await?;
    let cart_id = cart.id;

    let (deleted_items, updated_items, updated_cart) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let new_product_ids: Vec<i32> =
                    body.cart_items.iter().map(|item| item.product_id).collect();

                let deleted_items: Vec<CartItemEntity> = diesel::delete(
                    cart_items::table
                        .filter(cart_items::cart_id.eq(cart_id))
                        .filter(cart_items::product_id.ne_all(&new_product_ids)),
                )
                .returning(CartItemEntity::as_returning())
                .get_results(conn)
                .await
                .context("Failed to delete cart items")?;

                for item in &body.cart_items {
                    diesel::insert_into(cart_items::table)
                        .values((
                            cart_items::cart_id.eq(cart_id),
                            cart_items::product_id.eq(item.product_id),
                            cart_items::quantity.eq(item.quantity),
                        ))
                        .on_conflict((cart_items::cart_id, cart_items::product_id))
                        .do_update()
                        .set(cart_items::quantity.eq(item.quantity))
                        .execute(conn)
                        .await
                        .context("Failed to upsert cart item")?;
                }

                let updated_cart = diesel::update(carts::table.find(cart_id))
                    .set(carts::updated_at.eq(diesel::dsl::now))
                    .returning(CartEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update cart timestamp")?;

                let updated_items: Vec<CartItemEntity> = cart_items::table
                    .filter(cart_items::cart_id.eq(cart_id))
                    .get_results(conn)
                    .await
                    .context("Failed to get updated items")?;

                Ok::<(Vec<CartItemEntity>, Vec<CartItemEntity>, CartEntity), AppError>((
                    deleted_items,
                    updated_items,
                    updated_cart,
                ))
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(UpdateCartRes {
            deleted_items,
            updated_items,
            updated_cart,
        }),
        message: Some("Updated cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct AddCartItemReq {
    pub product_id: i32,
    pub quantity: i32,
}

/// Add a line to the cart, or increase an existing line's quantity. The
/// resulting quantity is stock-checked against the catalog.
#[utoipa::path(
    post,
    path = "/items",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    request_body = AddCartItemReq,
    responses(
        (status = 200, description = "Added cart item successfully", body = StdResponse<CartItemEntity, String>)
    )
)]
async fn add_cart_item(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Json(body): Json<AddCartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    if body.quantity <= 0 {
        return Err(AppError::BadRequest(format!(
            "Invalid quantity {} for product {}",
            body.quantity, body.product_id
        )));
    }

    let cart = get_or_create_cart(conn, customer_id).await?;

    let existing_quantity: Option<i32> = cart_items::table
        .find((cart.id, body.product_id))
        .select(cart_items::quantity)
        .get_result(conn)
        .await
        .optional()
        .context("Failed to look up cart item")?;

    let quantity = existing_quantity.unwrap_or(0) + body.quantity;
    check_availability(
        state.http_client,
        &[CartLine {
            product_id: body.product_id,
            quantity,
        }],
    )
    .await?;

    let item = diesel::insert_into(cart_items::table)
        .values(CreateCartItemEntity {
            cart_id: cart.id,
            product_id: body.product_id,
            quantity,
        })
        .on_conflict((cart_items::cart_id, cart_items::product_id))
        .do_update()
        .set(cart_items::quantity.eq(quantity))
        .returning(CartItemEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to upsert cart item")?;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Added cart item successfully"),
    })
}

/// Remove one line from the cart.
#[utoipa::path(
    delete,
    path = "/items/{product_id}",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    params(
        ("product_id" = i32, Path, description = "Product line to remove")
    ),
    responses(
        (status = 200, description = "Removed cart item successfully", body = StdResponse<CartItemEntity, String>)
    )
)]
async fn remove_cart_item(
    Path(product_id): Path<i32>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = get_or_create_cart(conn, customer_id).await?;

    let deleted: Option<CartItemEntity> = diesel::delete(
        cart_items::table
            .filter(cart_items::cart_id.eq(cart.id))
            .filter(cart_items::product_id.eq(product_id)),
    )
    .returning(CartItemEntity::as_returning())
    .get_result(conn)
    .await
    .optional()
    .context("Failed to delete cart item")?;

    match deleted {
        Some(item) => Ok(StdResponse {
            data: Some(item),
            message: Some("Removed cart item successfully"),
        }),
        None => Err(AppError::NotFound),
    }
}

/// Empty the cart.
#[utoipa::path(
    delete,
    path = "/",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Cleared cart successfully", body = StdResponse<Vec<CartItemEntity>, String>)
    )
)]
async fn clear_cart(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = get_or_create_cart(conn, customer_id).await?;

    let deleted_items: Vec<CartItemEntity> =
        diesel::delete(cart_items::table.filter(cart_items::cart_id.eq(cart.id)))
            .returning(CartItemEntity::as_returning())
            .get_results(conn)
            .await
            .context("Failed to clear cart")?;

    Ok(StdResponse {
        data: Some(deleted_items),
        message: Some("Cleared cart successfully"),
    })
}
