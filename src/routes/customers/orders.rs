use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
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
    app_state::AppState,
    auth,
    fulfillment::{self, CartLine, OrderStatus, ProcessAction},
    models::{
        CartEntity, CartItemEntity, CreateOrderEntity, CreateOrderItemEntity, OrderEntity,
        OrderItemEntity,
    },
    schema::{cart_items, carts, order_items, orders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/customers/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_orders))
            .routes(utoipa_axum::routes!(create_order))
            .routes(utoipa_axum::routes!(process_order))
            .route_layer(axum::middleware::from_fn(auth::customers_authorization)),
    )
}

#[derive(Serialize, ToSchema)]
struct OrderWithItemsRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
}

#[derive(Deserialize, ToSchema)]
struct ListOrdersQuery {
    /// Order-level status to filter by.
    status: Option<String>,
}

/// Fetch the authenticated customer's orders, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("status" = Option<String>, Query, description = "Filter by order-level status")
    ),
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<OrderWithItemsRes>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let status_filter = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let mut orders_query = orders::table
        .filter(orders::customer_id.eq(customer_id))
        .order_by(orders::created_at.desc())
        .into_boxed();
    if let Some(status) = status_filter {
        orders_query = orders_query.filter(orders::status.eq(status.as_str()));
    }

    let my_orders: Vec<OrderEntity> = orders_query
        .get_results(conn)
        .await
        .context("Failed to get my orders")?;

    let order_ids: Vec<i32> = my_orders.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let mut group: HashMap<i32, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    let orders_with_items: Vec<OrderWithItemsRes> = my_orders
        .into_iter()
        .map(|order| OrderWithItemsRes {
            order_items: group.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect();

    Ok(StdResponse {
        data: Some(orders_with_items),
        message: Some("Get my orders successfully"),
    })
}

/// Check out the authenticated customer's cart into a new order.
///
/// Prices, vendor ownership and stock are taken from a fresh catalog
/// snapshot; order creation and cart clearing share one transaction so a
/// failure leaves both untouched.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Created order successfully", body = StdResponse<OrderWithItemsRes, String>)
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart: Option<CartEntity> = carts::table
        .filter(carts::customer_id.eq(customer_id))
        .first(conn)
        .await
        .optional()
        .context("Failed to look up cart")?;
    let Some(cart) = cart else {
        return Err(AppError::BadRequest("Cart is empty".into()));
    };

    let lines: Vec<CartLine> = cart_items::table
        .filter(cart_items::cart_id.eq(cart.id))
        .get_results::<CartItemEntity>(conn)
        .await
        .context("Failed to get cart items")?
        .iter()
        .map(|item| CartLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    if lines.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let ids = lines.iter().map(|line| line.product_id).collect();
    let products = catalog::get_products(state.http_client, ids).await?;
    let priced = fulfillment::price_cart(&lines, &products)?;

    let cart_id = cart.id;
    let (order, created_items) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        customer_id,
                        total_amount: priced.total_amount,
                        status: OrderStatus::Pending.as_str().into(),
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                let new_items: Vec<CreateOrderItemEntity> = priced
                    .lines
                    .iter()
                    .map(|line| CreateOrderItemEntity {
                        order_id: order.id,
                        product_id: line.product_id,
                        vendor_id: line.vendor_id,
                        quantity: line.quantity,
                        unit_price: line.unit_price,
                        subtotal: line.subtotal,
                        status: OrderStatus::Pending.as_str().into(),
                    })
                    .collect();

                let created_items = diesel::insert_into(order_items::table)
                    .values(new_items)
                    .returning(OrderItemEntity::as_returning())
                    .get_results(conn)
                    .await
                    .context("Failed to create order items")?;

                diesel::delete(cart_items::table.filter(cart_items::cart_id.eq(cart_id)))
                    .execute(conn)
                    .await
                    .context("Failed to clear cart")?;

                Ok::<(OrderEntity, Vec<OrderItemEntity>), anyhow::Error>((order, created_items))
            })
        })
        .await
        .context("Transaction failed")?;

    Ok(StdResponse {
        data: Some(OrderWithItemsRes {
            order,
            order_items: created_items,
        }),
        message: Some("Created order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ProcessOrderReq {
    pub action: ProcessAction,
}

/// Submit a customer action against an order: `COMPLETE` a shipped order or
/// `CANCEL` a still-pending one. The transition applies to the order and
/// every item, or not at all.
#[utoipa::path(
    post,
    path = "/{id}/process",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to process")
    ),
    request_body = ProcessOrderReq,
    responses(
        (status = 200, description = "Processed order successfully", body = StdResponse<OrderWithItemsRes, String>)
    )
)]
async fn process_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Json(body): Json<ProcessOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (order, updated_items) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order: Option<OrderEntity> = orders::table
                    .find(id)
                    .get_result(conn)
                    .await
                    .optional()
                    .context("Failed to load order")?;
                let Some(order) = order else {
                    return Err(AppError::NotFound);
                };
                if order.customer_id != customer_id {
                    return Err(AppError::ForbiddenResource(
                        "Only the owning customer may process this order".into(),
                    ));
                }

                let current: OrderStatus = order.status.parse()?;
                let next = fulfillment::process_as_customer(body.action, current)?;

                // The status filter re-checks the precondition at write time;
                // losing a concurrent race surfaces as a conflict, not a
                // silent overwrite.
                let updated_order: Option<OrderEntity> = diesel::update(
                    orders::table
                        .find(id)
                        .filter(orders::status.eq(current.as_str())),
                )
                .set((
                    orders::status.eq(next.as_str()),
                    orders::updated_at.eq(diesel::dsl::now),
                ))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()
                .context("Failed to update order")?;
                let Some(updated_order) = updated_order else {
                    return Err(AppError::Conflict(
                        "Order has already been processed".into(),
                    ));
                };

                let updated_items: Vec<OrderItemEntity> =
                    diesel::update(order_items::table.filter(order_items::order_id.eq(id)))
                        .set((
                            order_items::status.eq(next.as_str()),
                            order_items::updated_at.eq(diesel::dsl::now),
                        ))
                        .returning(OrderItemEntity::as_returning())
                        .get_results(conn)
                        .await
                        .context("Failed to update order items")?;

                Ok::<(OrderEntity, Vec<OrderItemEntity>), AppError>((updated_order, updated_items))
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(OrderWithItemsRes {
            order,
            order_items: updated_items,
        }),
        message: Some("Processed order successfully"),
    })
}
