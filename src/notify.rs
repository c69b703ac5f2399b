//! Post-commit notification dispatch. Checkout calls
//! [`PostCommitDispatcher::dispatch`] strictly after its transaction
//! commits; whatever happens in here, the order stands.

use std::sync::Arc;

use diesel::prelude::*;
use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::order::Order;
use crate::models::order_item::OrderItem;
use crate::schema::orders;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("order {0} not found after commit")]
    OrderMissing(Uuid),
    #[error(transparent)]
    Db(#[from] diesel::result::Error),
    #[error("no database connection available: {0}")]
    Pool(#[from] r2d2::Error),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Everything the confirmation message needs, captured from the committed
/// order row rather than from in-flight checkout state.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub to_address: String,
    pub from_address: String,
    pub buyer_name: String,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub items: Vec<ConfirmationItem>,
}

#[derive(Debug, Clone)]
pub struct ConfirmationItem {
    pub product_name: String,
    pub unit_price: i64,
    pub quantity: i32,
}

/// Delivery seam. The storefront ships with [`LogNotifier`]; a real mailer
/// or a queue producer slots in here without touching checkout.
pub trait OrderNotifier: Send + Sync {
    fn send(&self, confirmation: &OrderConfirmation) -> Result<(), NotifyError>;
}

/// Writes confirmations to the application log instead of sending mail.
pub struct LogNotifier;

impl OrderNotifier for LogNotifier {
    fn send(&self, confirmation: &OrderConfirmation) -> Result<(), NotifyError> {
        info!(
            "order confirmation: order={} to={} from={} total={} discount={} items={}",
            confirmation.order_id,
            confirmation.to_address,
            confirmation.from_address,
            confirmation.total_amount,
            confirmation.discount_amount,
            confirmation.items.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sender address stamped on every confirmation.
    pub from_address: String,
}

pub struct PostCommitDispatcher {
    pool: DbPool,
    notifier: Arc<dyn OrderNotifier>,
    config: DispatcherConfig,
}

impl PostCommitDispatcher {
    pub fn new(pool: DbPool, notifier: Arc<dyn OrderNotifier>, config: DispatcherConfig) -> Self {
        Self {
            pool,
            notifier,
            config,
        }
    }

    /// Send the confirmation for a committed order. Failures are logged and
    /// swallowed: the order is already final, and a lost email must never
    /// look like a failed checkout.
    pub fn dispatch(&self, order_id: Uuid) {
        if let Err(e) = self.try_dispatch(order_id) {
            warn!("confirmation for order {order_id} was not sent: {e}");
        }
    }

    /// Re-read the committed order and hand its snapshot to the notifier.
    pub fn try_dispatch(&self, order_id: Uuid) -> Result<(), DispatchError> {
        let mut conn = self.pool.get()?;
        let order = orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .optional()?;
        let Some(order) = order else {
            return Err(DispatchError::OrderMissing(order_id));
        };
        let items: Vec<OrderItem> = OrderItem::belonging_to(&order).load(&mut conn)?;

        let confirmation = OrderConfirmation {
            order_id: order.id,
            to_address: order.email,
            from_address: self.config.from_address.clone(),
            buyer_name: order.buyer_name,
            total_amount: order.total_amount,
            discount_amount: order.discount_amount,
            items: items
                .into_iter()
                .map(|item| ConfirmationItem {
                    product_name: item.product_name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                })
                .collect(),
        };
        self.notifier.send(&confirmation)?;
        Ok(())
    }
}
