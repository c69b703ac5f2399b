use actix_web::HttpResponse;
use thiserror::Error;

/// Caller-visible cart rejections. These are business rules, not failures:
/// the cart is left untouched and the message is safe to show the customer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartRuleViolation {
    #[error("quantity must be a positive number")]
    NonPositiveQuantity,

    #[error("\"{product_name}\" is out of stock")]
    OutOfStock { product_name: String },

    #[error("only {available} more of \"{product_name}\" can be added")]
    ExceedsStock { product_name: String, available: i32 },
}

/// Domain-level error for everything outside the checkout engine's own
/// outcome type. Infrastructure failures collapse into `Internal`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    CartRule(#[from] CartRuleViolation),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => StoreError::NotFound,
            other => StoreError::Internal(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Internal(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::NotFound,
            StoreError::CartRule(v) => AppError::Conflict(v.to_string()),
            StoreError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::NotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Conflict(_) => HttpResponse::Conflict().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Internal(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            })),
        }
    }
}
