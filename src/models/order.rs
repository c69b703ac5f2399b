use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::orders;

/// Lifecycle of an order after checkout. New orders always start at
/// `Pending`; later transitions are an admin concern and happen elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// A committed purchase. Everything on this row is frozen at commit time:
/// the total is computed server-side under the inventory locks, and
/// `discount_amount` keeps the value that was actually applied even if the
/// promotion code's configuration changes later. Card fields are stored
/// verbatim and never validated against a real processor.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: Uuid,
    pub buyer_name: String,
    pub phone: String,
    pub email: String,
    pub postal_code: String,
    pub address: String,
    pub total_amount: i64,
    pub card_number: String,
    pub card_expiry: String,
    pub card_cvv: String,
    pub card_holder: String,
    pub status: String,
    pub promotion_code_id: Option<Uuid>,
    pub discount_amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub buyer_name: String,
    pub phone: String,
    pub email: String,
    pub postal_code: String,
    pub address: String,
    pub total_amount: i64,
    pub card_number: String,
    pub card_expiry: String,
    pub card_cvv: String,
    pub card_holder: String,
    pub status: String,
    pub promotion_code_id: Option<Uuid>,
    pub discount_amount: i64,
}
