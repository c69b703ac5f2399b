use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "storefront_session";

/// The opaque session identity for one request. The token's structure is
/// never inspected past this boundary: carts key off it as-is.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub is_new: bool,
}

/// Resolve the caller's session, minting a fresh token when the request
/// carries none. Called once at the top of every cart/checkout handler so
/// the core never touches cookies or creates session state implicitly.
pub fn ensure_session(req: &HttpRequest) -> Session {
    match req.cookie(SESSION_COOKIE) {
        Some(cookie) if !cookie.value().trim().is_empty() => Session {
            token: cookie.value().to_string(),
            is_new: false,
        },
        _ => Session {
            token: Uuid::new_v4().simple().to_string(),
            is_new: true,
        },
    }
}

/// Cookie to attach to the response whenever `ensure_session` minted a new
/// token.
pub fn session_cookie(token: &str) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}
