use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::carts::{self, CartView};
use crate::db::DbPool;
use crate::errors::{AppError, StoreError};
use crate::sessions::{ensure_session, session_cookie, Session};

// ── Request DTOs ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateLineRequest {
    pub quantity: i32,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

fn respond_with_view(
    mut builder: actix_web::HttpResponseBuilder,
    session: &Session,
    view: CartView,
) -> HttpResponse {
    // First contact mints the session; hand the cookie back with the cart.
    if session.is_new {
        builder.cookie(session_cookie(&session.token));
    }
    builder.json(view)
}

/// GET /cart
///
/// Returns the session's cart, creating an empty one on first use.
/// Displayed quantities are clamped to current stock without modifying the
/// stored lines.
#[utoipa::path(
    get,
    path = "/cart",
    responses(
        (status = 200, description = "The session's cart", body = CartView),
        (status = 500, description = "Internal server error"),
    ),
    tag = "cart"
)]
pub async fn get_cart(req: HttpRequest, pool: web::Data<DbPool>) -> Result<HttpResponse, AppError> {
    let session = ensure_session(&req);
    let token = session.token.clone();

    let view = web::block(move || {
        let mut conn = pool.get()?;
        let cart = carts::get_or_create(&mut conn, &token)?;
        carts::detail(&mut conn, cart.id)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(respond_with_view(HttpResponse::Ok(), &session, view))
}

/// POST /cart/lines
///
/// Adds a product to the cart, merging with an existing line for the same
/// product. Rejected with 409 when the requested quantity cannot be
/// satisfied by current stock.
#[utoipa::path(
    post,
    path = "/cart/lines",
    request_body = AddLineRequest,
    responses(
        (status = 201, description = "Line added, updated cart returned", body = CartView),
        (status = 404, description = "No such product"),
        (status = 409, description = "Quantity not satisfiable"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "cart"
)]
pub async fn add_line(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    body: web::Json<AddLineRequest>,
) -> Result<HttpResponse, AppError> {
    let session = ensure_session(&req);
    let token = session.token.clone();
    let body = body.into_inner();

    let view = web::block(move || {
        let mut conn = pool.get()?;
        let cart = carts::get_or_create(&mut conn, &token)?;
        carts::add_line(&mut conn, cart.id, body.product_id, body.quantity)?;
        carts::detail(&mut conn, cart.id)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(respond_with_view(HttpResponse::Created(), &session, view))
}

/// PATCH /cart/lines/{line_id}
///
/// Replaces a line's quantity. Requests above current stock are clamped
/// rather than rejected.
#[utoipa::path(
    patch,
    path = "/cart/lines/{line_id}",
    params(
        ("line_id" = Uuid, Path, description = "Cart line UUID"),
    ),
    request_body = UpdateLineRequest,
    responses(
        (status = 200, description = "Line updated, updated cart returned", body = CartView),
        (status = 404, description = "No such line in this session's cart"),
        (status = 409, description = "Quantity not satisfiable"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "cart"
)]
pub async fn update_line(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateLineRequest>,
) -> Result<HttpResponse, AppError> {
    let session = ensure_session(&req);
    let token = session.token.clone();
    let line_id = path.into_inner();
    let body = body.into_inner();

    let view = web::block(move || {
        let mut conn = pool.get()?;
        // A fresh session has no cart, so no line can belong to it.
        let Some(cart) = carts::find_by_token(&mut conn, &token)? else {
            return Err(StoreError::NotFound);
        };
        carts::update_line_quantity(&mut conn, cart.id, line_id, body.quantity)?;
        carts::detail(&mut conn, cart.id)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(view))
}

/// DELETE /cart/lines/{line_id}
///
/// Removes a line from the session's cart.
#[utoipa::path(
    delete,
    path = "/cart/lines/{line_id}",
    params(
        ("line_id" = Uuid, Path, description = "Cart line UUID"),
    ),
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "No such line in this session's cart"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "cart"
)]
pub async fn remove_line(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session = ensure_session(&req);
    let token = session.token.clone();
    let line_id = path.into_inner();

    web::block(move || {
        let mut conn = pool.get()?;
        let Some(cart) = carts::find_by_token(&mut conn, &token)? else {
            return Err(StoreError::NotFound);
        };
        carts::remove_line(&mut conn, cart.id, line_id)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}
