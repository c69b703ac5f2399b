use actix_web::{web, HttpResponse};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::{AppError, StoreError};
use crate::models::order::{Order, OrderStatus};
use crate::models::order_item::OrderItem;
use crate::schema::{orders, promotion_codes};

// ── Response DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    /// Absent when the product was later removed from the catalog; the
    /// snapshot fields below still describe what was bought.
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub unit_price: i64,
    pub quantity: i32,
}

/// Order confirmation view. Card fields are stored on the order row but
/// deliberately never echoed back out.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub buyer_name: String,
    pub phone: String,
    pub email: String,
    pub postal_code: String,
    pub address: String,
    pub status: String,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub promotion_code: Option<String>,
    pub created_at: String,
    pub items: Vec<OrderItemResponse>,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /orders/{id}
///
/// Returns the committed order together with its item snapshot.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let result = web::block(move || {
        let mut conn = pool.get()?;

        let order = orders::table
            .find(order_id)
            .select(Order::as_select())
            .first(&mut conn)
            .optional()?;
        let Some(order) = order else {
            return Ok::<_, StoreError>(None);
        };

        let items: Vec<OrderItem> = OrderItem::belonging_to(&order)
            .select(OrderItem::as_select())
            .load(&mut conn)?;

        // The column is free text to the database; anything we did not
        // write ourselves is corruption, not a displayable state.
        let status = OrderStatus::parse(&order.status).ok_or_else(|| {
            StoreError::Internal(format!(
                "order {order_id} has unrecognized status {:?}",
                order.status
            ))
        })?;

        let promotion_code: Option<String> = match order.promotion_code_id {
            Some(promotion_id) => promotion_codes::table
                .find(promotion_id)
                .select(promotion_codes::code)
                .first(&mut conn)
                .optional()?,
            None => None,
        };

        let item_responses: Vec<OrderItemResponse> = items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                product_name: item.product_name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();

        Ok(Some(OrderResponse {
            id: order.id,
            buyer_name: order.buyer_name,
            phone: order.phone,
            email: order.email,
            postal_code: order.postal_code,
            address: order.address,
            status: status.as_str().to_string(),
            total_amount: order.total_amount,
            discount_amount: order.discount_amount,
            promotion_code,
            created_at: order.created_at.to_rfc3339(),
            items: item_responses,
        }))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    match result {
        Some(order) => Ok(HttpResponse::Ok().json(order)),
        None => Err(AppError::NotFound),
    }
}
