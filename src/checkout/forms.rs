use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Raw checkout submission as received from the client. Values are kept as
/// entered; `validate` produces the normalized form that gets stored.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CheckoutInput {
    pub buyer_name: String,
    pub phone: String,
    pub email: String,
    pub postal_code: String,
    pub address: String,
    pub card_number: String,
    pub card_expiry: String,
    pub card_cvv: String,
    pub card_holder: String,
    #[serde(default)]
    pub promotion_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Normalized buyer and payment fields, ready to be written onto an order
/// row verbatim.
#[derive(Debug, Clone)]
pub struct ValidatedCheckout {
    pub buyer_name: String,
    /// Digits only.
    pub phone: String,
    pub email: String,
    /// Exactly 7 digits.
    pub postal_code: String,
    pub address: String,
    /// Digits only.
    pub card_number: String,
    /// Zero-padded `MM/YY`.
    pub card_expiry: String,
    pub card_cvv: String,
    /// Single-spaced and uppercased.
    pub card_holder: String,
    /// Normalized 7-character code, when one was submitted.
    pub promotion_code: Option<String>,
}

/// Fold the full-width forms common in Japanese input (ＡＢＣ１２３／) to
/// their ASCII equivalents; every other character passes through unchanged.
pub(crate) fn fold_width(ch: char) -> char {
    match ch {
        '\u{ff10}'..='\u{ff19}' => char::from(b'0' + (ch as u32 - 0xff10) as u8),
        '\u{ff21}'..='\u{ff3a}' => char::from(b'A' + (ch as u32 - 0xff21) as u8),
        '\u{ff41}'..='\u{ff5a}' => char::from(b'a' + (ch as u32 - 0xff41) as u8),
        '\u{ff0f}' => '/',
        '\u{3000}' => ' ',
        _ => ch,
    }
}

fn digits_of(s: &str) -> String {
    s.chars().map(fold_width).filter(|c| c.is_ascii_digit()).collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.chars()
        .map(fold_width)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a submitted promotion code: fold width, trim, uppercase.
/// Returns `None` unless the result is exactly 7 ASCII alphanumerics.
pub fn normalize_promotion_code(raw: &str) -> Option<String> {
    let code: String = raw
        .trim()
        .chars()
        .map(fold_width)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if code.len() == 7 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}

/// Parse `MM/YY`, reject months outside 01..=12 and cards whose expiry is
/// strictly before the current month, and re-emit the zero-padded form.
fn validate_expiry(raw: &str, today: NaiveDate) -> Result<String, &'static str> {
    let folded: String = raw.trim().chars().map(fold_width).collect();
    let Some((month_part, year_part)) = folded.split_once('/') else {
        return Err("expiry must be in MM/YY format");
    };

    let month_part = month_part.trim();
    let year_part = year_part.trim();
    let well_formed = !month_part.is_empty()
        && month_part.len() <= 2
        && year_part.len() == 2
        && month_part.chars().all(|c| c.is_ascii_digit())
        && year_part.chars().all(|c| c.is_ascii_digit());
    if !well_formed {
        return Err("expiry must be in MM/YY format");
    }

    let month: u32 = month_part.parse().map_err(|_| "expiry must be in MM/YY format")?;
    let year_two: i32 = year_part.parse().map_err(|_| "expiry must be in MM/YY format")?;
    if !(1..=12).contains(&month) {
        return Err("expiry month must be between 01 and 12");
    }

    // Two-digit years are all 20xx in this storefront's lifetime.
    let year = 2000 + year_two;
    if (year, month) < (today.year(), today.month()) {
        return Err("this card has expired");
    }

    Ok(format!("{month:02}/{year_two:02}"))
}

fn field_error(field: &'static str, message: &str) -> FieldError {
    FieldError {
        field,
        message: message.to_string(),
    }
}

/// Validate and normalize a checkout submission. All field failures are
/// collected so the caller can surface them in one round trip; nothing is
/// touched in the database either way.
pub fn validate(input: &CheckoutInput, today: NaiveDate) -> Result<ValidatedCheckout, Vec<FieldError>> {
    let mut errors = Vec::new();

    let buyer_name = input.buyer_name.trim().to_string();
    if buyer_name.is_empty() {
        errors.push(field_error("buyer_name", "name is required"));
    }

    let phone = digits_of(&input.phone);
    if !(10..=11).contains(&phone.len()) {
        errors.push(field_error("phone", "phone number must be 10 or 11 digits"));
    }

    let email = input.email.trim().to_string();
    if !looks_like_email(&email) {
        errors.push(field_error("email", "enter a valid email address"));
    }

    let postal_code = digits_of(&input.postal_code);
    if postal_code.len() != 7 {
        errors.push(field_error("postal_code", "postal code must be 7 digits"));
    }

    let address = input.address.trim().to_string();
    if address.is_empty() {
        errors.push(field_error("address", "address is required"));
    }

    let card_number = digits_of(&input.card_number);
    if !(13..=19).contains(&card_number.len()) {
        errors.push(field_error("card_number", "card number must be 13 to 19 digits"));
    }

    let card_expiry = match validate_expiry(&input.card_expiry, today) {
        Ok(expiry) => expiry,
        Err(message) => {
            errors.push(field_error("card_expiry", message));
            String::new()
        }
    };

    let card_cvv: String = input.card_cvv.trim().chars().map(fold_width).collect();
    if !((3..=4).contains(&card_cvv.len()) && card_cvv.chars().all(|c| c.is_ascii_digit())) {
        errors.push(field_error("card_cvv", "security code must be 3 or 4 digits"));
    }

    let card_holder = collapse_whitespace(&input.card_holder).to_uppercase();
    if card_holder.is_empty() {
        errors.push(field_error("card_holder", "card holder name is required"));
    }

    let promotion_code = match input.promotion_code.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match normalize_promotion_code(raw) {
            Some(code) => Some(code),
            None => {
                errors.push(field_error(
                    "promotion_code",
                    "promotion codes are 7 letters or digits",
                ));
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedCheckout {
        buyer_name,
        phone,
        email,
        postal_code,
        address,
        card_number,
        card_expiry,
        card_cvv,
        card_holder,
        promotion_code,
    })
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}
