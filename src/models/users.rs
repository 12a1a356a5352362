use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ru,
    Ua,
    #[default]
    Unset,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::Ua => "ua",
            Language::Unset => "unset",
        }
    }

    /// Codes other than the known ones fall back to `ru`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "ua" => Language::Ua,
            "unset" => Language::Unset,
            _ => Language::Ru,
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        if value.is_empty() {
            return Language::Unset;
        }
        Language::from_code(&value)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub tg_id: i64,
    pub balance_in_cents: i64,
    pub referrer_id: Option<i64>,
    pub activated: bool,
    pub phone: Option<String>,
    #[sqlx(try_from = "String")]
    pub language: Language,
    pub banned: bool,
    pub last_bonus_at: Option<DateTime<Utc>>,
    pub manual_ref_count: i64,
    pub ref_withdraw_count: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(tg_id: i64, referrer_id: Option<i64>) -> Self {
        Self {
            tg_id,
            balance_in_cents: 0,
            referrer_id,
            activated: false,
            phone: None,
            language: Language::Unset,
            banned: false,
            last_bonus_at: None,
            manual_ref_count: 0,
            ref_withdraw_count: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub tg_id: i64,
    pub referrer_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Profile {
    pub tg_id: i64,
    pub balance_in_cents: i64,
    pub activated: bool,
    pub language: Language,
    pub phone: Option<String>,
    pub active_referrals: i64,
    pub manual_referrals: i64,
    pub available_cycles: i64,
    pub used_cycles: i64,
    pub referrals_to_next_cycle: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BonusClaim {
    Claimed { balance_in_cents: i64 },
    NotReady { next_claim_at: DateTime<Utc> },
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BalanceDebit {
    Debited { balance_in_cents: i64 },
    Insufficient { balance_in_cents: i64 },
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhoneBinding {
    Saved,
    InUse,
    NotFound,
}

const PHONE_PREFIXES: [&str; 3] = ["+380", "+375", "+7"];

/// Strips separators and checks the country prefix. Returns `None` for
/// numbers outside the supported regions.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 || digits.len() > 15 {
        return None;
    }

    let phone = format!("+{}", digits);
    if PHONE_PREFIXES.iter().any(|prefix| phone.starts_with(prefix)) {
        Some(phone)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_falls_back_to_ru() {
        assert_eq!(Language::from_code("en"), Language::Ru);
        assert_eq!(Language::from_code("UA"), Language::Ua);
        assert_eq!(Language::from(String::new()), Language::Unset);
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(
            normalize_phone("+380 (67) 123-45-67").as_deref(),
            Some("+380671234567")
        );
        assert_eq!(normalize_phone("79161234567").as_deref(), Some("+79161234567"));
        assert_eq!(normalize_phone("+375291234567").as_deref(), Some("+375291234567"));
        assert_eq!(normalize_phone("+14155552671"), None);
        assert_eq!(normalize_phone("+7123"), None);
    }
}
