use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::promotion_codes;

/// A single-use discount code. Once `is_used` flips to true it never flips
/// back; the flip happens inside the checkout transaction via a conditional
/// update so that concurrent claims resolve to exactly one winner.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = promotion_codes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PromotionCode {
    pub id: Uuid,
    pub code: String,
    pub discount_amount: i64,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = promotion_codes)]
pub struct NewPromotionCode {
    pub id: Uuid,
    pub code: String,
    pub discount_amount: i64,
}
