//! Cart operations. Everything here runs in plain autocommit mode; the
//! stock checks are advisory and get re-validated under row locks at
//! checkout.

use diesel::prelude::*;
use diesel::upsert::excluded;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{CartRuleViolation, StoreError};
use crate::models::cart::{Cart, NewCart};
use crate::models::cart_line::{CartLine, NewCartLine};
use crate::models::product::Product;
use crate::schema::{cart_lines, carts, products};

/// One cart line joined with its product, quantities clamped for display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLineView {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    /// Unit price in the smallest currency unit.
    pub unit_price: i64,
    /// Quantity as stored on the line.
    pub quantity: i32,
    /// Quantity capped at current stock. Display only; the stored line is
    /// untouched.
    pub display_quantity: i32,
    pub line_total: i64,
    pub in_stock: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub cart_id: Uuid,
    pub lines: Vec<CartLineView>,
    /// Sum of the in-stock line totals.
    pub total_amount: i64,
    /// Sum of the displayed quantities across in-stock lines.
    pub total_quantity: i32,
}

/// Fetch the cart for a session token, creating it on first use. The
/// `ON CONFLICT DO NOTHING` insert makes concurrent first requests for the
/// same session converge on a single row.
pub fn get_or_create(conn: &mut PgConnection, session_token: &str) -> Result<Cart, StoreError> {
    let fresh = NewCart {
        id: Uuid::new_v4(),
        session_token: session_token.to_string(),
    };
    diesel::insert_into(carts::table)
        .values(&fresh)
        .on_conflict(carts::session_token)
        .do_nothing()
        .execute(conn)?;

    let cart = carts::table
        .filter(carts::session_token.eq(session_token))
        .first::<Cart>(conn)?;
    Ok(cart)
}

pub fn find_by_token(
    conn: &mut PgConnection,
    session_token: &str,
) -> Result<Option<Cart>, StoreError> {
    let cart = carts::table
        .filter(carts::session_token.eq(session_token))
        .first::<Cart>(conn)
        .optional()?;
    Ok(cart)
}

/// Add `quantity` of a product to the cart, merging into the existing line
/// when the product is already in it.
pub fn add_line(
    conn: &mut PgConnection,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> Result<CartLine, StoreError> {
    if quantity <= 0 {
        return Err(CartRuleViolation::NonPositiveQuantity.into());
    }

    let product = products::table.find(product_id).first::<Product>(conn)?;

    let existing: Option<CartLine> = cart_lines::table
        .filter(cart_lines::cart_id.eq(cart_id))
        .filter(cart_lines::product_id.eq(product_id))
        .first(conn)
        .optional()?;
    let already = existing.map_or(0, |line| line.quantity);

    if product.stock == 0 {
        return Err(CartRuleViolation::OutOfStock {
            product_name: product.name,
        }
        .into());
    }
    if i64::from(already) + i64::from(quantity) > i64::from(product.stock) {
        // Stock may have shrunk below what the cart already holds; the
        // headroom never reads as negative.
        return Err(CartRuleViolation::ExceedsStock {
            product_name: product.name,
            available: (product.stock - already).max(0),
        }
        .into());
    }

    let fresh = NewCartLine {
        id: Uuid::new_v4(),
        cart_id,
        product_id,
        quantity,
    };
    let line = diesel::insert_into(cart_lines::table)
        .values(&fresh)
        .on_conflict((cart_lines::cart_id, cart_lines::product_id))
        .do_update()
        .set(cart_lines::quantity.eq(cart_lines::quantity + excluded(cart_lines::quantity)))
        .get_result::<CartLine>(conn)?;
    Ok(line)
}

/// Replace a line's quantity. Requests above current stock are clamped to
/// it; a line whose product has no stock at all cannot be resized.
pub fn update_line_quantity(
    conn: &mut PgConnection,
    cart_id: Uuid,
    line_id: Uuid,
    quantity: i32,
) -> Result<CartLine, StoreError> {
    if quantity <= 0 {
        return Err(CartRuleViolation::NonPositiveQuantity.into());
    }

    let line: CartLine = cart_lines::table
        .filter(cart_lines::id.eq(line_id))
        .filter(cart_lines::cart_id.eq(cart_id))
        .first(conn)?;
    let product: Product = products::table.find(line.product_id).first(conn)?;

    if product.stock == 0 {
        return Err(CartRuleViolation::OutOfStock {
            product_name: product.name,
        }
        .into());
    }

    let stored = quantity.min(product.stock);
    let updated = diesel::update(cart_lines::table.find(line.id))
        .set(cart_lines::quantity.eq(stored))
        .get_result::<CartLine>(conn)?;
    Ok(updated)
}

/// Delete a line, scoped to the owning cart so one session cannot touch
/// another session's lines.
pub fn remove_line(conn: &mut PgConnection, cart_id: Uuid, line_id: Uuid) -> Result<(), StoreError> {
    let deleted = diesel::delete(
        cart_lines::table
            .filter(cart_lines::id.eq(line_id))
            .filter(cart_lines::cart_id.eq(cart_id)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// The cart as shown to the buyer: lines in the order they were added,
/// displayed quantities clamped to stock, out-of-stock lines excluded from
/// the total.
pub fn detail(conn: &mut PgConnection, cart_id: Uuid) -> Result<CartView, StoreError> {
    let rows: Vec<(CartLine, Product)> = cart_lines::table
        .inner_join(products::table)
        .filter(cart_lines::cart_id.eq(cart_id))
        .order(cart_lines::created_at.asc())
        .select((CartLine::as_select(), Product::as_select()))
        .load(conn)?;

    let mut lines = Vec::with_capacity(rows.len());
    let mut total = 0i64;
    let mut total_quantity = 0i32;
    for (line, product) in rows {
        let in_stock = product.stock > 0;
        let display_quantity = line.quantity.min(product.stock);
        let line_total = if in_stock {
            product.price * i64::from(display_quantity)
        } else {
            0
        };
        total += line_total;
        if in_stock {
            total_quantity += display_quantity;
        }
        lines.push(CartLineView {
            line_id: line.id,
            product_id: product.id,
            product_name: product.name,
            unit_price: product.price,
            quantity: line.quantity,
            display_quantity,
            line_total,
            in_stock,
        });
    }

    Ok(CartView {
        cart_id,
        lines,
        total_amount: total,
        total_quantity,
    })
}
