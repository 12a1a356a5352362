use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount is not a number: {0}")]
    Malformed(String),
    #[error("amount has more than two decimal places")]
    TooPrecise,
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount is too large")]
    Overflow,
}

/// Parses a user-entered amount into cents. Both `,` and `.` are accepted as
/// the decimal separator.
pub fn parse_amount(raw: &str) -> Result<i64, AmountError> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, fraction) = match normalized.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (normalized.as_str(), ""),
    };

    let malformed = || AmountError::Malformed(raw.trim().to_string());
    if normalized.starts_with('-') {
        return Err(AmountError::NotPositive);
    }
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(malformed());
    }
    if fraction.len() > 2 {
        return Err(AmountError::TooPrecise);
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError::Overflow)?
    };
    let cents: i64 = format!("{:0<2}", fraction).parse().unwrap_or(0);

    let amount = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or(AmountError::Overflow)?;

    if amount == 0 {
        return Err(AmountError::NotPositive);
    }

    Ok(amount)
}

pub fn format_cents(amount_in_cents: i64) -> String {
    let sign = if amount_in_cents < 0 { "-" } else { "" };
    let abs = amount_in_cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
