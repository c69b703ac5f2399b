//! Single-use promotion codes: issuing fresh codes and the two-step claim
//! used by checkout (a cheap read before the money path, an atomic flip
//! inside it).

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rand::Rng;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::promotion::{NewPromotionCode, PromotionCode};
use crate::schema::promotion_codes;

/// Alphabet for generated codes. Ambiguous glyphs (O/0, I/1) are left out
/// so a code read off a flyer types in correctly.
const CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 7;

/// Why a submitted code cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionRejection {
    NotFound,
    AlreadyUsed,
}

/// A code that looked usable when checkout started. The discount is only
/// final once [`claim`] succeeds inside the checkout transaction.
#[derive(Debug, Clone)]
pub struct PromotionClaim {
    pub id: Uuid,
    pub code: String,
    pub discount_amount: i64,
}

/// Check a normalized code without consuming it. The outer `Result` is for
/// infrastructure failures; the inner one is the business answer.
pub fn tentative_claim(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Result<PromotionClaim, PromotionRejection>, StoreError> {
    let promo = promotion_codes::table
        .filter(promotion_codes::code.eq(code))
        .first::<PromotionCode>(conn)
        .optional()?;

    let Some(promo) = promo else {
        return Ok(Err(PromotionRejection::NotFound));
    };
    if promo.is_used {
        return Ok(Err(PromotionRejection::AlreadyUsed));
    }
    Ok(Ok(PromotionClaim {
        id: promo.id,
        code: promo.code,
        discount_amount: promo.discount_amount,
    }))
}

/// Flip a code to used. The `is_used = false` guard makes the flip atomic:
/// when two orders race for the same code, exactly one sees `true` here and
/// the other gets `false` without blocking. The flip only sticks if the
/// surrounding transaction commits.
pub fn claim(conn: &mut PgConnection, promotion_id: Uuid) -> Result<bool, DieselError> {
    let updated = diesel::update(
        promotion_codes::table
            .filter(promotion_codes::id.eq(promotion_id))
            .filter(promotion_codes::is_used.eq(false)),
    )
    .set((
        promotion_codes::is_used.eq(true),
        promotion_codes::used_at.eq(Some(Utc::now())),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

/// Insert `count` fresh codes, each worth a random multiple of 100 between
/// 100 and 1000, retrying on the rare collision with an already-issued
/// code.
pub fn generate_codes(
    conn: &mut PgConnection,
    count: usize,
) -> Result<Vec<PromotionCode>, StoreError> {
    let mut issued = Vec::with_capacity(count);
    let mut attempts = 0usize;
    while issued.len() < count {
        attempts += 1;
        if attempts > count.saturating_mul(20) {
            return Err(StoreError::Internal(
                "too many code collisions, giving up".to_string(),
            ));
        }

        let candidate = NewPromotionCode {
            id: Uuid::new_v4(),
            code: random_code(),
            discount_amount: random_discount(),
        };
        match diesel::insert_into(promotion_codes::table)
            .values(&candidate)
            .get_result::<PromotionCode>(conn)
        {
            Ok(row) => issued.push(row),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(issued)
}

fn random_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| {
            let at = rng.random_range(0..CODE_CHARS.len());
            CODE_CHARS[at] as char
        })
        .collect()
}

fn random_discount() -> i64 {
    rand::rng().random_range(1..=10) * 100
}
