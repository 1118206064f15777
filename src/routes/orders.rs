use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    auth::{self, AuthUser, Role},
    fulfillment::{self, Actor},
    models::{OrderEntity, OrderItemEntity},
    schema::{order_items, orders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_order))
            .route_layer(axum::middleware::from_fn(auth::viewers_authorization)),
    )
}

#[derive(Serialize, ToSchema)]
struct GetOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
}

/// Fetch one order. Visible to the owning customer, any vendor owning at
/// least one of its items, and staff/admin accounts.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<GetOrderRes, String>)
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: Option<OrderEntity> = orders::table
        .find(id)
        .get_result(conn)
        .await
        .optional()
        .context("Failed to load order")?;
    let Some(order) = order else {
        return Err(AppError::NotFound);
    };

    let order_items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let actor = match auth_user.role {
        Role::Customer => Actor::Customer {
            customer_id: auth_user.user_id,
        },
        Role::Vendor => match auth_user.vendor_id {
            Some(vendor_id) => Actor::Vendor { vendor_id },
            None => {
                return Err(AppError::ForbiddenResource(
                    "Account has no vendor profile".into(),
                ));
            }
        },
        Role::Staff | Role::Admin => Actor::Staff,
    };

    let item_vendor_ids: Vec<i32> = order_items.iter().map(|item| item.vendor_id).collect();
    if !fulfillment::can_view_order(actor, order.customer_id, &item_vendor_ids) {
        return Err(AppError::ForbiddenResource(
            "Not allowed to view this order".into(),
        ));
    }

    Ok(StdResponse {
        data: Some(GetOrderRes { order, order_items }),
        message: Some("Get order successfully"),
    })
}
