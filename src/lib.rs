pub mod carts;
pub mod checkout;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod promotions;
pub mod schema;
pub mod sessions;
#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::checkout::CheckoutEngine;
use crate::notify::{DispatcherConfig, OrderNotifier, PostCommitDispatcher};

pub use db::{create_pool, DbPool};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) {
    let mut conn = pool.get().expect("Failed to get DB connection for migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run database migrations");
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::cart::get_cart,
        handlers::cart::add_line,
        handlers::cart::update_line,
        handlers::cart::remove_line,
        handlers::checkout::checkout,
        handlers::orders::get_order,
    ),
    components(schemas(
        carts::CartView,
        carts::CartLineView,
        handlers::cart::AddLineRequest,
        handlers::cart::UpdateLineRequest,
        checkout::forms::CheckoutInput,
        checkout::forms::FieldError,
        checkout::LineAdjustment,
        handlers::checkout::CheckoutResponse,
        handlers::orders::OrderResponse,
        handlers::orders::OrderItemResponse,
    )),
    tags(
        (name = "cart", description = "Session-scoped cart operations"),
        (name = "checkout", description = "Cart-to-order conversion"),
        (name = "orders", description = "Order lookup"),
    )
)]
pub struct ApiDoc;

/// Build and return an actix-web `Server` bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server.
pub fn build_server(
    pool: DbPool,
    notifier: Arc<dyn OrderNotifier>,
    config: DispatcherConfig,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    let dispatcher = PostCommitDispatcher::new(pool.clone(), notifier, config);
    let engine = web::Data::new(CheckoutEngine::new(pool.clone(), dispatcher));
    let openapi = ApiDoc::openapi();

    Ok(HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(engine.clone())
            .wrap(Logger::default())
            .service(
                web::scope("/cart")
                    .route("", web::get().to(handlers::cart::get_cart))
                    .route("/lines", web::post().to(handlers::cart::add_line))
                    .route(
                        "/lines/{line_id}",
                        web::patch().to(handlers::cart::update_line),
                    )
                    .route(
                        "/lines/{line_id}",
                        web::delete().to(handlers::cart::remove_line),
                    ),
            )
            .route("/checkout", web::post().to(handlers::checkout::checkout))
            .route("/orders/{id}", web::get().to(handlers::orders::get_order))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((host.to_string(), port))?
    .run())
}
