//! Order fulfillment rules.
//!
//! An order is a checkout-time snapshot of cart lines, each line owned by
//! exactly one vendor. Vendors move orders `PENDING -> SHIPPED`; the owning
//! customer moves them `SHIPPED -> COMPLETED`, or `PENDING -> CANCELLED`.
//! `COMPLETED` and `CANCELLED` are terminal. The stored order-level status is
//! flipped by the first vendor action and order-wide transitions mirror onto
//! every item; the per-vendor view is derived separately from the vendor's
//! own items (see [`vendor_portion_status`]).
//!
//! Everything here is pure; route handlers load the aggregate, call into this
//! module, and persist the outcome inside one transaction.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::catalog::CatalogProduct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(FulfillmentError::UnknownStatus(other.to_string())),
        }
    }
}

/// Actions the owning customer may submit against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessAction {
    Complete,
    Cancel,
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessAction::Complete => "COMPLETE",
            ProcessAction::Cancel => "CANCEL",
        })
    }
}

/// The caller of a read, as established by the auth layer. Each variant
/// carries only the identity relevant to its checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer { customer_id: i32 },
    Vendor { vendor_id: i32 },
    Staff,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Order has already been processed (status {0})")]
    AlreadyProcessed(OrderStatus),

    #[error("Vendor does not own any item in this order")]
    NoItemsOwned,

    #[error("Cannot {action} an order in status {status}")]
    InvalidTransition {
        action: ProcessAction,
        status: OrderStatus,
    },

    #[error("Order carries an unknown status: {0}")]
    UnknownStatus(String),
}

/// Vendor transition: `PENDING -> SHIPPED`.
///
/// Owning at least one item is sufficient authority; in a multi-vendor order
/// the whole order (and every item) flips with the first vendor's action.
/// Ownership is checked before state so a vendor outside the order always
/// gets an authorization error, never a state one.
pub fn ship_as_vendor(
    status: OrderStatus,
    vendor_id: i32,
    item_vendor_ids: &[i32],
) -> Result<OrderStatus, FulfillmentError> {
    if !item_vendor_ids.contains(&vendor_id) {
        return Err(FulfillmentError::NoItemsOwned);
    }
    match status {
        OrderStatus::Pending => Ok(OrderStatus::Shipped),
        other => Err(FulfillmentError::AlreadyProcessed(other)),
    }
}

/// Customer transition: `SHIPPED -> COMPLETED` or `PENDING -> CANCELLED`.
/// Every other action/status pair is rejected without mutation.
pub fn process_as_customer(
    action: ProcessAction,
    status: OrderStatus,
) -> Result<OrderStatus, FulfillmentError> {
    match (action, status) {
        (ProcessAction::Complete, OrderStatus::Shipped) => Ok(OrderStatus::Completed),
        (ProcessAction::Cancel, OrderStatus::Pending) => Ok(OrderStatus::Cancelled),
        (action, status) => Err(FulfillmentError::InvalidTransition { action, status }),
    }
}

/// Synthetic status of one vendor's portion of an order, derived by priority
/// from that vendor's own items: any `PENDING` wins, then any `SHIPPED`, then
/// any `COMPLETED`; only an all-cancelled portion reads `CANCELLED`.
pub fn vendor_portion_status(item_statuses: &[OrderStatus]) -> OrderStatus {
    if item_statuses.contains(&OrderStatus::Pending) {
        OrderStatus::Pending
    } else if item_statuses.contains(&OrderStatus::Shipped) {
        OrderStatus::Shipped
    } else if item_statuses.contains(&OrderStatus::Completed) {
        OrderStatus::Completed
    } else {
        OrderStatus::Cancelled
    }
}

/// Whether `actor` may read an order owned by `customer_id` whose items are
/// owned by `item_vendor_ids`.
pub fn can_view_order(actor: Actor, customer_id: i32, item_vendor_ids: &[i32]) -> bool {
    match actor {
        Actor::Customer { customer_id: id } => id == customer_id,
        Actor::Vendor { vendor_id } => item_vendor_ids.contains(&vendor_id),
        Actor::Staff => true,
    }
}

// --- Checkout pricing ---

/// One cart line as fed into checkout.
#[derive(Debug, Clone, Copy)]
pub struct CartLine {
    pub product_id: i32,
    pub quantity: i32,
}

/// A cart line priced and vendor-tagged against the catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: i32,
    pub vendor_id: i32,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub total_amount: i64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(i32),

    #[error("The vendor of product {0} is not approved")]
    VendorNotApproved(i32),

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: i32, quantity: i32 },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i32,
        requested: i32,
        available: i32,
    },
}

/// Price a cart against the catalog snapshot taken at checkout time.
///
/// Unit prices and vendor ownership are frozen into the result; the order
/// created from it never re-reads the catalog. Any failing line fails the
/// whole cart.
pub fn price_cart(
    lines: &[CartLine],
    products: &HashMap<i32, CatalogProduct>,
) -> Result<PricedCart, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity <= 0 {
            return Err(CheckoutError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }
        let product = products
            .get(&line.product_id)
            .filter(|p| p.is_sellable())
            .ok_or(CheckoutError::ProductUnavailable(line.product_id))?;
        if !product.vendor_approved() {
            return Err(CheckoutError::VendorNotApproved(line.product_id));
        }
        if line.quantity > product.stock {
            return Err(CheckoutError::InsufficientStock {
                product_id: line.product_id,
                requested: line.quantity,
                available: product.stock,
            });
        }
        priced.push(PricedLine {
            product_id: line.product_id,
            vendor_id: product.vendor_id,
            quantity: line.quantity,
            unit_price: product.unit_price,
            subtotal: product.unit_price * line.quantity as i64,
        });
    }

    let total_amount = priced.iter().map(|line| line.subtotal).sum();
    Ok(PricedCart {
        lines: priced,
        total_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved_product(id: i32, vendor_id: i32, unit_price: i64, stock: i32) -> CatalogProduct {
        CatalogProduct {
            id,
            vendor_id,
            unit_price,
            stock,
            status: "APPROVED".to_string(),
            vendor_status: "APPROVED".to_string(),
        }
    }

    fn catalog(products: Vec<CatalogProduct>) -> HashMap<i32, CatalogProduct> {
        products.into_iter().map(|p| (p.id, p)).collect()
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Shipped,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_stored_status_is_rejected() {
        assert_eq!(
            "DELIVERED".parse::<OrderStatus>(),
            Err(FulfillmentError::UnknownStatus("DELIVERED".to_string()))
        );
    }

    #[test]
    fn vendor_ships_pending_order() {
        assert_eq!(
            ship_as_vendor(OrderStatus::Pending, 7, &[7, 9]),
            Ok(OrderStatus::Shipped)
        );
    }

    #[test]
    fn second_ship_attempt_is_already_processed() {
        // First call flips the order to SHIPPED, so the retry must fail.
        let after_first = ship_as_vendor(OrderStatus::Pending, 7, &[7]).unwrap();
        assert_eq!(
            ship_as_vendor(after_first, 7, &[7]),
            Err(FulfillmentError::AlreadyProcessed(OrderStatus::Shipped))
        );
    }

    #[test]
    fn owning_vendor_gets_already_processed_on_shipped_order() {
        // A co-vendor of a shipped order is authorized but too late.
        assert_eq!(
            ship_as_vendor(OrderStatus::Shipped, 9, &[7, 9]),
            Err(FulfillmentError::AlreadyProcessed(OrderStatus::Shipped))
        );
    }

    #[test]
    fn vendor_without_items_cannot_ship() {
        assert_eq!(
            ship_as_vendor(OrderStatus::Pending, 42, &[7, 9]),
            Err(FulfillmentError::NoItemsOwned)
        );
        // Ownership is reported even when the state would also reject.
        assert_eq!(
            ship_as_vendor(OrderStatus::Shipped, 42, &[7, 9]),
            Err(FulfillmentError::NoItemsOwned)
        );
    }

    #[test]
    fn customer_completes_shipped_order() {
        assert_eq!(
            process_as_customer(ProcessAction::Complete, OrderStatus::Shipped),
            Ok(OrderStatus::Completed)
        );
    }

    #[test]
    fn customer_cancels_pending_order() {
        assert_eq!(
            process_as_customer(ProcessAction::Cancel, OrderStatus::Pending),
            Ok(OrderStatus::Cancelled)
        );
    }

    #[test]
    fn cancel_after_shipment_is_rejected() {
        assert_eq!(
            process_as_customer(ProcessAction::Cancel, OrderStatus::Shipped),
            Err(FulfillmentError::InvalidTransition {
                action: ProcessAction::Cancel,
                status: OrderStatus::Shipped,
            })
        );
    }

    #[test]
    fn complete_before_shipment_is_rejected() {
        assert_eq!(
            process_as_customer(ProcessAction::Complete, OrderStatus::Pending),
            Err(FulfillmentError::InvalidTransition {
                action: ProcessAction::Complete,
                status: OrderStatus::Pending,
            })
        );
    }

    #[test]
    fn terminal_states_accept_no_further_transition() {
        for status in [OrderStatus::Completed, OrderStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(ship_as_vendor(status, 7, &[7]).is_err());
            for action in [ProcessAction::Complete, ProcessAction::Cancel] {
                assert!(process_as_customer(action, status).is_err());
            }
        }
    }

    #[test]
    fn vendor_portion_prefers_pending_then_shipped() {
        use OrderStatus::*;
        assert_eq!(vendor_portion_status(&[Pending, Shipped]), Pending);
        assert_eq!(vendor_portion_status(&[Shipped, Completed]), Shipped);
        assert_eq!(vendor_portion_status(&[Completed, Cancelled]), Completed);
        assert_eq!(vendor_portion_status(&[Cancelled, Cancelled]), Cancelled);
    }

    #[test]
    fn view_authorization_matches_ownership() {
        let vendors = [7, 9];
        assert!(can_view_order(Actor::Customer { customer_id: 1 }, 1, &vendors));
        assert!(!can_view_order(Actor::Customer { customer_id: 2 }, 1, &vendors));
        assert!(can_view_order(Actor::Vendor { vendor_id: 9 }, 1, &vendors));
        assert!(!can_view_order(Actor::Vendor { vendor_id: 42 }, 1, &vendors));
        assert!(can_view_order(Actor::Staff, 1, &vendors));
    }

    #[test]
    fn multi_vendor_cart_totals_are_snapshotted() {
        // Two vendors, 2 x 100000 + 1 x 50000.
        let products = catalog(vec![
            approved_product(1, 7, 100_000, 10),
            approved_product(2, 9, 50_000, 5),
        ]);
        let lines = [
            CartLine {
                product_id: 1,
                quantity: 2,
            },
            CartLine {
                product_id: 2,
                quantity: 1,
            },
        ];

        let cart = price_cart(&lines, &products).unwrap();
        assert_eq!(cart.total_amount, 250_000);
        assert_eq!(cart.lines.len(), 2);
        assert_eq!(cart.lines[0].subtotal, 200_000);
        assert_eq!(cart.lines[0].vendor_id, 7);
        assert_eq!(cart.lines[1].subtotal, 50_000);
        assert_eq!(cart.lines[1].vendor_id, 9);
        assert_eq!(
            cart.total_amount,
            cart.lines.iter().map(|line| line.subtotal).sum::<i64>()
        );
    }

    #[test]
    fn empty_cart_cannot_check_out() {
        assert_eq!(
            price_cart(&[], &HashMap::new()),
            Err(CheckoutError::EmptyCart)
        );
    }

    #[test]
    fn unknown_or_unapproved_product_fails_the_cart() {
        let mut unapproved = approved_product(1, 7, 1_000, 10);
        unapproved.status = "PENDING".to_string();
        let products = catalog(vec![unapproved]);
        let line = [CartLine {
            product_id: 1,
            quantity: 1,
        }];

        assert_eq!(
            price_cart(&line, &products),
            Err(CheckoutError::ProductUnavailable(1))
        );
        assert_eq!(
            price_cart(
                &[CartLine {
                    product_id: 99,
                    quantity: 1,
                }],
                &products
            ),
            Err(CheckoutError::ProductUnavailable(99))
        );
    }

    #[test]
    fn unapproved_vendor_fails_the_cart() {
        let mut product = approved_product(1, 7, 1_000, 10);
        product.vendor_status = "REJECTED".to_string();
        let products = catalog(vec![product]);

        assert_eq!(
            price_cart(
                &[CartLine {
                    product_id: 1,
                    quantity: 1,
                }],
                &products
            ),
            Err(CheckoutError::VendorNotApproved(1))
        );
    }

    #[test]
    fn over_stock_quantity_fails_the_cart() {
        let products = catalog(vec![approved_product(1, 7, 1_000, 3)]);

        assert_eq!(
            price_cart(
                &[CartLine {
                    product_id: 1,
                    quantity: 4,
                }],
                &products
            ),
            Err(CheckoutError::InsufficientStock {
                product_id: 1,
                requested: 4,
                available: 3,
            })
        );
    }
}
