//! Pre-generates single-use promotion codes and prints them as CSV, one
//! `code,discount_amount` row per code.
//!
//! Usage:
//!     generate_promotion_codes          # 10 codes (default)
//!     generate_promotion_codes 25       # 25 codes

use std::env;

use dotenvy::dotenv;
use storefront::promotions;
use storefront::{create_pool, run_migrations};

fn main() {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let count: usize = env::args()
        .nth(1)
        .map(|raw| raw.parse().expect("count must be a positive integer"))
        .unwrap_or(10);
    if count == 0 {
        eprintln!("count must be at least 1");
        std::process::exit(1);
    }

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = create_pool(&database_url);
    run_migrations(&pool);

    let mut conn = pool.get().expect("Failed to get database connection");
    let issued =
        promotions::generate_codes(&mut conn, count).expect("Failed to generate promotion codes");

    println!("code,discount_amount");
    for promo in &issued {
        println!("{},{}", promo.code, promo.discount_amount);
    }
    log::info!("generated {} promotion codes", issued.len());
}
