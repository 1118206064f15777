use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    auth,
    fulfillment::{self, OrderStatus},
    models::{OrderEntity, OrderItemEntity},
    schema::{order_items, orders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/vendors/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_vendor_orders))
            .routes(utoipa_axum::routes!(ship_order))
            .route_layer(axum::middleware::from_fn(auth::vendors_authorization)),
    )
}

#[derive(Serialize, ToSchema)]
struct VendorOrderRes {
    pub order: OrderEntity,
    /// Full items array; callers only act on lines matching their vendor id.
    pub order_items: Vec<OrderItemEntity>,
    /// Status of this vendor's portion, derived from their own items.
    pub vendor_status: OrderStatus,
}

#[derive(Deserialize, ToSchema)]
struct ListVendorOrdersQuery {
    /// Item-level status of the caller's own items to filter by.
    status: Option<String>,
}

/// Fetch all orders containing at least one of the authenticated vendor's
/// items, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("status" = Option<String>, Query, description = "Filter by item-level status of the caller's items")
    ),
    responses(
        (status = 200, description = "List vendor orders", body = StdResponse<Vec<VendorOrderRes>, String>)
    )
)]
async fn get_vendor_orders(
    State(state): State<AppState>,
    Extension(vendor_id): Extension<i32>,
    Query(query): Query<ListVendorOrdersQuery>,
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

    let mut ids_query = order_items::table
        .filter(order_items::vendor_id.eq(vendor_id))
        .select(order_items::order_id)
        .distinct()
        .into_boxed();
    if let Some(status) = status_filter {
        ids_query = ids_query.filter(order_items::status.eq(status.as_str()));
    }
    let order_ids: Vec<i32> = ids_query
        .get_results(conn)
        .await
        .context("Failed to get vendor order ids")?;

    let vendor_orders: Vec<OrderEntity> = orders::table
        .filter(orders::id.eq_any(&order_ids))
        .order_by(orders::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get vendor orders")?;

    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let mut group: HashMap<i32, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    let orders_with_items: Vec<VendorOrderRes> = vendor_orders
        .into_iter()
        .map(|order| {
            let order_items = group.remove(&order.id).unwrap_or_default();
            let own_statuses: Vec<OrderStatus> = order_items
                .iter()
                .filter(|item| item.vendor_id == vendor_id)
                .map(|item| item.status.parse())
                .collect::<Result<_, _>>()?;
            Ok(VendorOrderRes {
                vendor_status: fulfillment::vendor_portion_status(&own_statuses),
                order,
                order_items,
            })
        })
        .collect::<Result<_, AppError>>()?;

    Ok(StdResponse {
        data: Some(orders_with_items),
        message: Some("Get vendor orders successfully"),
    })
}

/// Ship a pending order containing the authenticated vendor's items.
///
/// Owning one line is sufficient authority; the order-level status and every
/// item flip to SHIPPED together.
#[utoipa::path(
    post,
    path = "/{id}/ship",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to ship")
    ),
    responses(
        (status = 200, description = "Shipped order successfully", body = StdResponse<ShipOrderRes, String>)
    )
)]
async fn ship_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(vendor_id): Extension<i32>,
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

                let item_vendor_ids: Vec<i32> = order_items::table
                    .filter(order_items::order_id.eq(id))
                    .select(order_items::vendor_id)
                    .get_results(conn)
                    .await
                    .context("Failed to get order items")?;

                let current: OrderStatus = order.status.parse()?;
                let next = fulfillment::ship_as_vendor(current, vendor_id, &item_vendor_ids)?;

                // Re-checked at write time so a lost race reads as "already
                // processed" instead of overwriting the winner.
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
        data: Some(ShipOrderRes {
            order,
            order_items: updated_items,
        }),
        message: Some("Shipped order successfully"),
    })
}

#[derive(Serialize, ToSchema)]
struct ShipOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
}
