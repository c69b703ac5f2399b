//! The checkout engine: turns a cart into an order inside one database
//! transaction, holding row locks on the cart and on every product in it so
//! concurrent checkouts can never oversell or double-order.

pub mod forms;

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::cart::Cart;
use crate::models::cart_line::CartLine;
use crate::models::order::{NewOrder, OrderStatus};
use crate::models::order_item::NewOrderItem;
use crate::models::product::Product;
use crate::notify::PostCommitDispatcher;
use crate::promotions::{self, PromotionClaim, PromotionRejection};
use crate::schema::{cart_lines, carts, order_items, orders, products};

use self::forms::{CheckoutInput, FieldError, ValidatedCheckout};

/// How a checkout attempt ended. Infrastructure failures surface as
/// `StoreError`; every business-level refusal is a variant here.
#[derive(Debug)]
pub enum CheckoutOutcome {
    Completed(CompletedOrder),
    /// No cart for this session, or a cart with no lines.
    EmptyCart,
    InvalidInput(Vec<FieldError>),
    /// Stock moved between viewing the cart and checking out. The cart has
    /// been adjusted to what is actually available; no order was created.
    StockChanged(Vec<LineAdjustment>),
    PromotionRejected(PromotionRejection),
}

#[derive(Debug, Clone)]
pub struct CompletedOrder {
    pub order_id: Uuid,
    pub total_amount: i64,
    pub discount_amount: i64,
}

/// A cart line that could not be fulfilled as requested because stock ran
/// low under the buyer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LineAdjustment {
    pub line_id: Uuid,
    pub product_name: String,
    pub requested: i32,
    /// What the line was clamped to; zero means the product sold out.
    pub available: i32,
}

/// Reason the checkout transaction rolled back. `Db` covers real failures;
/// the rest are business aborts that map onto a [`CheckoutOutcome`].
enum TxnAbort {
    EmptyCart,
    StockChanged(Vec<LineAdjustment>),
    PromotionTaken,
    Db(DieselError),
}

impl From<DieselError> for TxnAbort {
    fn from(e: DieselError) -> Self {
        TxnAbort::Db(e)
    }
}

pub struct CheckoutEngine {
    pool: DbPool,
    dispatcher: PostCommitDispatcher,
}

impl CheckoutEngine {
    pub fn new(pool: DbPool, dispatcher: PostCommitDispatcher) -> Self {
        Self { pool, dispatcher }
    }

    /// Run a full checkout for the given session.
    ///
    /// The cheap refusals (empty cart, bad input, unusable promotion code)
    /// happen before any lock is taken. Everything that moves money or
    /// stock happens inside a single transaction in [`materialize`].
    pub fn checkout(
        &self,
        session_token: &str,
        input: &CheckoutInput,
    ) -> Result<CheckoutOutcome, StoreError> {
        let mut conn = self.pool.get()?;

        let Some(cart) = crate::carts::find_by_token(&mut conn, session_token)? else {
            return Ok(CheckoutOutcome::EmptyCart);
        };
        let line_count: i64 = cart_lines::table
            .filter(cart_lines::cart_id.eq(cart.id))
            .count()
            .get_result(&mut conn)?;
        if line_count == 0 {
            return Ok(CheckoutOutcome::EmptyCart);
        }

        let valid = match forms::validate(input, Utc::now().date_naive()) {
            Ok(valid) => valid,
            Err(errors) => return Ok(CheckoutOutcome::InvalidInput(errors)),
        };

        let promotion = match &valid.promotion_code {
            None => None,
            Some(code) => match promotions::tentative_claim(&mut conn, code)? {
                Ok(claim) => Some(claim),
                Err(rejection) => return Ok(CheckoutOutcome::PromotionRejected(rejection)),
            },
        };

        let result = conn.transaction::<CompletedOrder, TxnAbort, _>(|conn| {
            materialize(conn, &cart, &valid, promotion.as_ref())
        });

        match result {
            Ok(done) => {
                self.dispatcher.dispatch(done.order_id);
                Ok(CheckoutOutcome::Completed(done))
            }
            Err(TxnAbort::EmptyCart) => Ok(CheckoutOutcome::EmptyCart),
            Err(TxnAbort::StockChanged(adjustments)) => {
                // The order transaction has rolled back; these cart fixups
                // run in autocommit so they stick.
                persist_adjustments(&mut conn, &adjustments)?;
                Ok(CheckoutOutcome::StockChanged(adjustments))
            }
            Err(TxnAbort::PromotionTaken) => Ok(CheckoutOutcome::PromotionRejected(
                PromotionRejection::AlreadyUsed,
            )),
            Err(TxnAbort::Db(e)) => Err(e.into()),
        }
    }
}

/// The transactional heart of checkout. Any `Err` rolls the whole
/// transaction back.
fn materialize(
    conn: &mut PgConnection,
    cart: &Cart,
    valid: &ValidatedCheckout,
    promotion: Option<&PromotionClaim>,
) -> Result<CompletedOrder, TxnAbort> {
    // Lock the cart row first. A double submit of the same session queues
    // here and finds the cart gone once the winner commits.
    let locked_cart = carts::table
        .find(cart.id)
        .for_update()
        .first::<Cart>(conn)
        .optional()?;
    if locked_cart.is_none() {
        return Err(TxnAbort::EmptyCart);
    }

    let lines: Vec<CartLine> = cart_lines::table
        .filter(cart_lines::cart_id.eq(cart.id))
        .order(cart_lines::created_at.asc())
        .load(conn)?;
    if lines.is_empty() {
        return Err(TxnAbort::EmptyCart);
    }

    // Lock every product in ascending id order. All checkouts take product
    // locks in this same order, so none can deadlock another.
    let mut product_ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    product_ids.sort_unstable();
    let locked: Vec<Product> = products::table
        .filter(products::id.eq_any(&product_ids))
        .order(products::id.asc())
        .for_update()
        .load(conn)?;
    let by_id: HashMap<Uuid, &Product> = locked.iter().map(|p| (p.id, p)).collect();

    let mut adjustments = Vec::new();
    let mut ordered = Vec::new();
    let mut subtotal = 0i64;
    for line in &lines {
        // A product deleted mid-checkout cascades its line away; skip it.
        let Some(product) = by_id.get(&line.product_id) else {
            continue;
        };
        if line.quantity > product.stock {
            adjustments.push(LineAdjustment {
                line_id: line.id,
                product_name: product.name.clone(),
                requested: line.quantity,
                available: product.stock,
            });
            continue;
        }
        subtotal += product.price * i64::from(line.quantity);
        ordered.push((line, *product));
    }
    // One unfulfillable line aborts the whole checkout; the buyer confirms
    // the adjusted cart rather than receiving a silently partial order.
    if !adjustments.is_empty() {
        return Err(TxnAbort::StockChanged(adjustments));
    }
    if ordered.is_empty() {
        return Err(TxnAbort::EmptyCart);
    }

    let discount_amount = match promotion {
        Some(claim) => {
            if !promotions::claim(conn, claim.id)? {
                return Err(TxnAbort::PromotionTaken);
            }
            claim.discount_amount
        }
        None => 0,
    };
    // A discount larger than the subtotal floors the total at zero; the
    // code is still spent.
    let total_amount = (subtotal - discount_amount).max(0);

    let order_id = Uuid::new_v4();
    let new_order = NewOrder {
        id: order_id,
        buyer_name: valid.buyer_name.clone(),
        phone: valid.phone.clone(),
        email: valid.email.clone(),
        postal_code: valid.postal_code.clone(),
        address: valid.address.clone(),
        total_amount,
        card_number: valid.card_number.clone(),
        card_expiry: valid.card_expiry.clone(),
        card_cvv: valid.card_cvv.clone(),
        card_holder: valid.card_holder.clone(),
        status: OrderStatus::Pending.as_str().to_string(),
        promotion_code_id: promotion.map(|claim| claim.id),
        discount_amount,
    };
    diesel::insert_into(orders::table)
        .values(&new_order)
        .execute(conn)?;

    let new_items: Vec<NewOrderItem> = ordered
        .iter()
        .map(|(line, product)| NewOrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: Some(product.id),
            product_name: product.name.clone(),
            unit_price: product.price,
            quantity: line.quantity,
        })
        .collect();
    diesel::insert_into(order_items::table)
        .values(&new_items)
        .execute(conn)?;

    for (line, product) in &ordered {
        diesel::update(products::table.find(product.id))
            .set(products::stock.eq(products::stock - line.quantity))
            .execute(conn)?;
    }

    // Consuming the cart is part of the same transaction: the order and the
    // emptied cart become visible together or not at all.
    diesel::delete(carts::table.find(cart.id)).execute(conn)?;

    Ok(CompletedOrder {
        order_id,
        total_amount,
        discount_amount,
    })
}

/// Write the clamps from an aborted checkout back onto the cart, outside
/// any transaction. Sold-out lines are left in place so the buyer can see
/// and remove them; only shrunken quantities are persisted. Losing a
/// further race here only means the next attempt clamps again.
fn persist_adjustments(
    conn: &mut PgConnection,
    adjustments: &[LineAdjustment],
) -> Result<(), StoreError> {
    for adj in adjustments {
        if adj.available > 0 {
            diesel::update(cart_lines::table.find(adj.line_id))
                .set(cart_lines::quantity.eq(adj.available))
                .execute(conn)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::Order;
    use crate::models::order_item::OrderItem;
    use crate::models::promotion::PromotionCode;
    use crate::schema::promotion_codes;
    use crate::test_support::{
        checkout_input, failing_engine, recording_engine, seed_product, seed_promotion, setup_db,
        test_engine,
    };

    fn stock_of(conn: &mut PgConnection, product_id: Uuid) -> i32 {
        products::table
            .find(product_id)
            .select(products::stock)
            .first(conn)
            .expect("product stock")
    }

    fn order_count(conn: &mut PgConnection) -> i64 {
        orders::table.count().get_result(conn).expect("order count")
    }

    #[tokio::test]
    async fn checkout_materializes_the_order_atomically() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let book = seed_product(&mut conn, "Kanji Workbook", 1200, 10);
        let pen = seed_product(&mut conn, "Brush Pen", 600, 4);
        let cart = crate::carts::get_or_create(&mut conn, "happy").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, book.id, 2).expect("add book");
        crate::carts::add_line(&mut conn, cart.id, pen.id, 1).expect("add pen");

        let engine = test_engine(&pool);
        let outcome = engine.checkout("happy", &checkout_input()).expect("checkout");
        let CheckoutOutcome::Completed(done) = outcome else {
            panic!("expected a completed order, got {outcome:?}");
        };
        assert_eq!(done.total_amount, 2 * 1200 + 600);
        assert_eq!(done.discount_amount, 0);

        let order: Order = orders::table
            .find(done.order_id)
            .first(&mut conn)
            .expect("order row");
        assert_eq!(order.status, "pending");
        assert_eq!(order.total_amount, 3000);
        assert_eq!(order.buyer_name, "Hanako Sato");
        assert_eq!(order.promotion_code_id, None);

        let mut items: Vec<OrderItem> = OrderItem::belonging_to(&order)
            .load(&mut conn)
            .expect("items");
        items.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_name, "Brush Pen");
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[1].product_name, "Kanji Workbook");
        assert_eq!(items[1].unit_price, 1200);

        assert_eq!(stock_of(&mut conn, book.id), 8);
        assert_eq!(stock_of(&mut conn, pen.id), 3);
        assert!(
            crate::carts::find_by_token(&mut conn, "happy")
                .expect("lookup")
                .is_none(),
            "the cart is consumed by checkout"
        );

        // Later catalog edits must not leak into the order snapshot.
        diesel::update(products::table.find(book.id))
            .set((products::name.eq("Renamed"), products::price.eq(9999_i64)))
            .execute(&mut conn)
            .expect("rename");
        let frozen: Vec<OrderItem> = OrderItem::belonging_to(&order)
            .load(&mut conn)
            .expect("items again");
        assert!(frozen.iter().any(|i| i.product_name == "Kanji Workbook" && i.unit_price == 1200));
    }

    #[tokio::test]
    async fn empty_carts_outrank_input_validation() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let engine = test_engine(&pool);

        // No cart at all: even garbage input reports the empty cart.
        let outcome = engine
            .checkout("no-such-session", &CheckoutInput::default())
            .expect("checkout");
        assert!(matches!(outcome, CheckoutOutcome::EmptyCart));

        // A cart with no lines behaves the same with valid input.
        crate::carts::get_or_create(&mut conn, "bare").expect("cart");
        let outcome = engine.checkout("bare", &checkout_input()).expect("checkout");
        assert!(matches!(outcome, CheckoutOutcome::EmptyCart));
        assert_eq!(order_count(&mut conn), 0);
    }

    #[tokio::test]
    async fn invalid_input_leaves_everything_untouched() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Ink Stone", 3500, 2);
        let cart = crate::carts::get_or_create(&mut conn, "typo").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");

        let mut input = checkout_input();
        input.card_expiry = "01/20".to_string();
        input.phone = "123".to_string();

        let engine = test_engine(&pool);
        let outcome = engine.checkout("typo", &input).expect("checkout");
        let CheckoutOutcome::InvalidInput(errors) = outcome else {
            panic!("expected field errors, got {outcome:?}");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"card_expiry"));
        assert!(fields.contains(&"phone"));

        assert_eq!(order_count(&mut conn), 0);
        assert_eq!(stock_of(&mut conn, product.id), 2);
        assert!(crate::carts::find_by_token(&mut conn, "typo")
            .expect("lookup")
            .is_some());
    }

    #[tokio::test]
    async fn stock_conflicts_adjust_the_cart_without_ordering() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let shrunk = seed_product(&mut conn, "Washi Paper", 500, 10);
        let vanished = seed_product(&mut conn, "Gold Leaf", 4000, 10);
        let fine = seed_product(&mut conn, "Plain Brush", 300, 10);
        let cart = crate::carts::get_or_create(&mut conn, "raced").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, shrunk.id, 5).expect("add");
        crate::carts::add_line(&mut conn, cart.id, vanished.id, 1).expect("add");
        crate::carts::add_line(&mut conn, cart.id, fine.id, 1).expect("add");

        // Stock moves under the cart before the buyer checks out.
        diesel::update(products::table.find(shrunk.id))
            .set(products::stock.eq(2))
            .execute(&mut conn)
            .expect("shrink");
        diesel::update(products::table.find(vanished.id))
            .set(products::stock.eq(0))
            .execute(&mut conn)
            .expect("sell out");

        let engine = test_engine(&pool);
        let outcome = engine.checkout("raced", &checkout_input()).expect("checkout");
        let CheckoutOutcome::StockChanged(mut adjustments) = outcome else {
            panic!("expected stock adjustments, got {outcome:?}");
        };
        adjustments.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        assert_eq!(adjustments.len(), 2);
        assert_eq!(adjustments[0].product_name, "Gold Leaf");
        assert_eq!(adjustments[0].requested, 1);
        assert_eq!(adjustments[0].available, 0);
        assert_eq!(adjustments[1].product_name, "Washi Paper");
        assert_eq!(adjustments[1].requested, 5);
        assert_eq!(adjustments[1].available, 2);

        // No order, no stock movement, but the clamp stuck to the cart. The
        // sold-out line stays visible so the buyer can remove it themselves.
        assert_eq!(order_count(&mut conn), 0);
        assert_eq!(stock_of(&mut conn, shrunk.id), 2);
        assert_eq!(stock_of(&mut conn, fine.id), 10);

        let view = crate::carts::detail(&mut conn, cart.id).expect("detail");
        assert_eq!(view.lines.len(), 3);
        assert!(view
            .lines
            .iter()
            .any(|l| l.product_name == "Washi Paper" && l.quantity == 2));
        assert!(view
            .lines
            .iter()
            .any(|l| l.product_name == "Gold Leaf" && l.quantity == 1 && !l.in_stock));
        assert!(view
            .lines
            .iter()
            .any(|l| l.product_name == "Plain Brush" && l.quantity == 1));
    }

    #[tokio::test]
    async fn deleted_product_drops_out_and_the_survivors_check_out() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let kept = seed_product(&mut conn, "Sencha Tin", 1800, 5);
        let pulled = seed_product(&mut conn, "Recalled Kettle", 6000, 5);
        let cart = crate::carts::get_or_create(&mut conn, "recall").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, kept.id, 2).expect("add kept");
        crate::carts::add_line(&mut conn, cart.id, pulled.id, 1).expect("add pulled");

        // The catalog pulls a product while it sits in the cart; the cart
        // line cascades away with it.
        diesel::delete(products::table.find(pulled.id))
            .execute(&mut conn)
            .expect("pull the product");

        let engine = test_engine(&pool);
        let outcome = engine.checkout("recall", &checkout_input()).expect("checkout");
        let CheckoutOutcome::Completed(done) = outcome else {
            panic!("expected a completed order, got {outcome:?}");
        };
        assert_eq!(done.total_amount, 2 * 1800, "only the surviving line is charged");

        let order: Order = orders::table
            .find(done.order_id)
            .first(&mut conn)
            .expect("order row");
        let items: Vec<OrderItem> = OrderItem::belonging_to(&order)
            .load(&mut conn)
            .expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_name, "Sencha Tin");
        assert_eq!(stock_of(&mut conn, kept.id), 3);
    }

    #[tokio::test]
    async fn deleting_the_only_carted_product_degenerates_to_an_empty_cart() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Discontinued Fan", 2500, 5);
        let cart = crate::carts::get_or_create(&mut conn, "bereft").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");

        diesel::delete(products::table.find(product.id))
            .execute(&mut conn)
            .expect("pull the product");

        let engine = test_engine(&pool);
        let outcome = engine.checkout("bereft", &checkout_input()).expect("checkout");
        assert!(matches!(outcome, CheckoutOutcome::EmptyCart));
        assert_eq!(order_count(&mut conn), 0);
        assert!(
            crate::carts::find_by_token(&mut conn, "bereft")
                .expect("lookup")
                .is_some(),
            "the now-empty cart itself survives"
        );
    }

    #[tokio::test]
    async fn promotion_checkout_records_discount_and_consumes_the_code() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Calligraphy Set", 1500, 5);
        let promo = seed_promotion(&mut conn, "SAVE300", 300);
        let cart = crate::carts::get_or_create(&mut conn, "promo").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");

        let mut input = checkout_input();
        input.promotion_code = Some("save300".to_string());

        let (engine, recorder) = recording_engine(&pool);
        let outcome = engine.checkout("promo", &input).expect("checkout");
        let CheckoutOutcome::Completed(done) = outcome else {
            panic!("expected a completed order, got {outcome:?}");
        };
        assert_eq!(done.total_amount, 1200);
        assert_eq!(done.discount_amount, 300);

        let order: Order = orders::table
            .find(done.order_id)
            .first(&mut conn)
            .expect("order");
        assert_eq!(order.promotion_code_id, Some(promo.id));
        assert_eq!(order.discount_amount, 300);

        let spent: PromotionCode = promotion_codes::table
            .find(promo.id)
            .first(&mut conn)
            .expect("promo row");
        assert!(spent.is_used);
        assert!(spent.used_at.is_some());

        // The confirmation carries the committed snapshot.
        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        let confirmation = &sent[0];
        assert_eq!(confirmation.order_id, done.order_id);
        assert_eq!(confirmation.to_address, "hanako@example.com");
        assert_eq!(confirmation.from_address, "shop@example.test");
        assert_eq!(confirmation.total_amount, 1200);
        assert_eq!(confirmation.discount_amount, 300);
        assert_eq!(confirmation.items.len(), 1);
        assert_eq!(confirmation.items[0].product_name, "Calligraphy Set");
    }

    #[tokio::test]
    async fn oversized_discount_floors_the_total_at_zero() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Postcard", 200, 5);
        let promo = seed_promotion(&mut conn, "BIGSAVE", 1000);
        let cart = crate::carts::get_or_create(&mut conn, "floor").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 2).expect("add");

        let mut input = checkout_input();
        input.promotion_code = Some("BIGSAVE".to_string());

        let engine = test_engine(&pool);
        let outcome = engine.checkout("floor", &input).expect("checkout");
        let CheckoutOutcome::Completed(done) = outcome else {
            panic!("expected a completed order, got {outcome:?}");
        };
        assert_eq!(done.total_amount, 0, "total never goes negative");
        assert_eq!(done.discount_amount, 1000);

        let spent: PromotionCode = promotion_codes::table
            .find(promo.id)
            .first(&mut conn)
            .expect("promo row");
        assert!(spent.is_used, "the code is spent even when it overshoots");
    }

    #[tokio::test]
    async fn unusable_promotion_rejects_the_checkout() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Tea Sampler", 900, 5);
        let promo = seed_promotion(&mut conn, "SPENT99", 300);
        promotions::claim(&mut conn, promo.id).expect("pre-spend");
        let cart = crate::carts::get_or_create(&mut conn, "nocode").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");

        let engine = test_engine(&pool);

        let mut input = checkout_input();
        input.promotion_code = Some("NOCODE7".to_string());
        let outcome = engine.checkout("nocode", &input).expect("checkout");
        assert!(matches!(
            outcome,
            CheckoutOutcome::PromotionRejected(PromotionRejection::NotFound)
        ));

        input.promotion_code = Some("SPENT99".to_string());
        let outcome = engine.checkout("nocode", &input).expect("checkout");
        assert!(matches!(
            outcome,
            CheckoutOutcome::PromotionRejected(PromotionRejection::AlreadyUsed)
        ));

        // The refusal is free: nothing was ordered or consumed.
        assert_eq!(order_count(&mut conn), 0);
        assert_eq!(stock_of(&mut conn, product.id), 5);
        assert!(crate::carts::find_by_token(&mut conn, "nocode")
            .expect("lookup")
            .is_some());
    }

    #[tokio::test]
    async fn concurrent_checkouts_cannot_oversell() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Limited Figure", 8000, 3);
        for session in ["rival-a", "rival-b"] {
            let cart = crate::carts::get_or_create(&mut conn, session).expect("cart");
            crate::carts::add_line(&mut conn, cart.id, product.id, 2).expect("add");
        }

        let run = |session: &'static str| {
            let pool = pool.clone();
            tokio::task::spawn_blocking(move || {
                test_engine(&pool).checkout(session, &checkout_input())
            })
        };
        let (a, b) = tokio::join!(run("rival-a"), run("rival-b"));
        let outcomes = [
            a.expect("join").expect("checkout"),
            b.expect("join").expect("checkout"),
        ];

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, CheckoutOutcome::Completed(_)))
            .count();
        let conflicted = outcomes
            .iter()
            .filter(|o| matches!(o, CheckoutOutcome::StockChanged(_)))
            .count();
        assert_eq!(completed, 1, "exactly one buyer wins: {outcomes:?}");
        assert_eq!(conflicted, 1, "the loser sees the clamp: {outcomes:?}");

        assert_eq!(stock_of(&mut conn, product.id), 1);
        assert_eq!(order_count(&mut conn), 1);
    }

    #[tokio::test]
    async fn checkout_scramble_allocates_stock_exactly_once() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Festival Yukata", 12000, 5);
        let sessions = ["s-1", "s-2", "s-3", "s-4"];
        for session in sessions {
            let cart = crate::carts::get_or_create(&mut conn, session).expect("cart");
            crate::carts::add_line(&mut conn, cart.id, product.id, 2).expect("add");
        }

        let mut handles = Vec::new();
        for session in sessions {
            let pool = pool.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                test_engine(&pool).checkout(session, &checkout_input())
            }));
        }
        let mut completed = 0;
        let mut conflicted = 0;
        for handle in handles {
            match handle.await.expect("join").expect("checkout") {
                CheckoutOutcome::Completed(_) => completed += 1,
                CheckoutOutcome::StockChanged(_) => conflicted += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        // Five in stock, four buyers wanting two each: two full orders fit,
        // the last unit is not enough for either remaining buyer.
        assert_eq!(completed, 2);
        assert_eq!(conflicted, 2);
        assert_eq!(stock_of(&mut conn, product.id), 1);
        assert_eq!(order_count(&mut conn), 2);
    }

    #[tokio::test]
    async fn double_submit_of_one_session_creates_a_single_order() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Daruma", 2000, 10);
        let cart = crate::carts::get_or_create(&mut conn, "impatient").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");

        let run = || {
            let pool = pool.clone();
            tokio::task::spawn_blocking(move || {
                test_engine(&pool).checkout("impatient", &checkout_input())
            })
        };
        let (a, b) = tokio::join!(run(), run());
        let outcomes = [
            a.expect("join").expect("checkout"),
            b.expect("join").expect("checkout"),
        ];

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, CheckoutOutcome::Completed(_)))
            .count();
        let empty = outcomes
            .iter()
            .filter(|o| matches!(o, CheckoutOutcome::EmptyCart))
            .count();
        assert_eq!(completed, 1, "one click wins: {outcomes:?}");
        assert_eq!(empty, 1, "the duplicate finds the cart already consumed");
        assert_eq!(order_count(&mut conn), 1);
        assert_eq!(stock_of(&mut conn, product.id), 9);
    }

    #[tokio::test]
    async fn racing_promotion_claims_spend_the_code_once() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let promo = seed_promotion(&mut conn, "RACEME7", 500);
        // Separate products so the only contended row is the code itself.
        for (session, name) in [("racer-a", "Blue Vase"), ("racer-b", "Red Vase")] {
            let product = seed_product(&mut conn, name, 3000, 5);
            let cart = crate::carts::get_or_create(&mut conn, session).expect("cart");
            crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");
        }

        let run = |session: &'static str| {
            let pool = pool.clone();
            tokio::task::spawn_blocking(move || {
                let mut input = checkout_input();
                input.promotion_code = Some("RACEME7".to_string());
                test_engine(&pool).checkout(session, &input)
            })
        };
        let (a, b) = tokio::join!(run("racer-a"), run("racer-b"));
        let outcomes = [
            a.expect("join").expect("checkout"),
            b.expect("join").expect("checkout"),
        ];

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, CheckoutOutcome::Completed(_)))
            .count();
        let rejected = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    CheckoutOutcome::PromotionRejected(PromotionRejection::AlreadyUsed)
                )
            })
            .count();
        assert_eq!(completed, 1, "one checkout gets the discount: {outcomes:?}");
        assert_eq!(rejected, 1, "the other is told the code is gone");

        // The loser's whole checkout rolled back with it.
        assert_eq!(order_count(&mut conn), 1);
        let spent: PromotionCode = promotion_codes::table
            .find(promo.id)
            .first(&mut conn)
            .expect("promo row");
        assert!(spent.is_used);
    }

    #[tokio::test]
    async fn notifier_failure_does_not_unwind_the_order() {
        let (_node, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let product = seed_product(&mut conn, "Tea Cup", 800, 3);
        let cart = crate::carts::get_or_create(&mut conn, "unlucky").expect("cart");
        crate::carts::add_line(&mut conn, cart.id, product.id, 1).expect("add");

        let engine = failing_engine(&pool);
        let outcome = engine.checkout("unlucky", &checkout_input()).expect("checkout");
        let CheckoutOutcome::Completed(done) = outcome else {
            panic!("expected a completed order, got {outcome:?}");
        };

        let order: Order = orders::table
            .find(done.order_id)
            .first(&mut conn)
            .expect("the order still exists");
        assert_eq!(order.total_amount, 800);
        assert_eq!(stock_of(&mut conn, product.id), 2);
    }
}
