use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::checkout::forms::CheckoutInput;
use crate::checkout::{CheckoutEngine, CheckoutOutcome};
use crate::errors::AppError;
use crate::promotions::PromotionRejection;
use crate::sessions::ensure_session;

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub total_amount: i64,
    pub discount_amount: i64,
}

/// POST /checkout
///
/// Converts the session's cart into an order. Success creates the order,
/// decrements stock and deletes the cart in one transaction; every refusal
/// leaves an explanation and an intact (possibly adjusted) cart behind.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutInput,
    responses(
        (status = 201, description = "Order created", body = CheckoutResponse),
        (status = 409, description = "Empty cart, stock conflict, or unusable promotion code"),
        (status = 422, description = "Invalid buyer or payment fields"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "checkout"
)]
pub async fn checkout(
    req: HttpRequest,
    engine: web::Data<CheckoutEngine>,
    body: web::Json<CheckoutInput>,
) -> Result<HttpResponse, AppError> {
    let session = ensure_session(&req);
    let token = session.token.clone();
    let input = body.into_inner();

    let outcome = web::block(move || engine.checkout(&token, &input))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(respond(outcome))
}

fn respond(outcome: CheckoutOutcome) -> HttpResponse {
    match outcome {
        CheckoutOutcome::Completed(done) => HttpResponse::Created().json(CheckoutResponse {
            order_id: done.order_id,
            total_amount: done.total_amount,
            discount_amount: done.discount_amount,
        }),
        CheckoutOutcome::EmptyCart => HttpResponse::Conflict().json(json!({
            "error": "cart is empty"
        })),
        CheckoutOutcome::InvalidInput(errors) => HttpResponse::UnprocessableEntity().json(json!({
            "error": "validation failed",
            "fields": errors
        })),
        CheckoutOutcome::StockChanged(adjustments) => HttpResponse::Conflict().json(json!({
            "error": "stock changed while you were checking out",
            "adjustments": adjustments
        })),
        CheckoutOutcome::PromotionRejected(reason) => {
            let message = match reason {
                PromotionRejection::NotFound => "promotion code not found",
                PromotionRejection::AlreadyUsed => "promotion code has already been used",
            };
            HttpResponse::Conflict().json(json!({ "error": message }))
        }
    }
}
