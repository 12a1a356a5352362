use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::referrals::ReferralSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalMethod {
    Card,
    Crypto,
    ReferralCycle,
}

impl WithdrawalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalMethod::Card => "card",
            WithdrawalMethod::Crypto => "crypto",
            WithdrawalMethod::ReferralCycle => "referral_cycle",
        }
    }

    /// Ordinary methods reserve funds from the balance when the request is created.
    pub fn debits_balance(&self) -> bool {
        !matches!(self, WithdrawalMethod::ReferralCycle)
    }
}

impl TryFrom<String> for WithdrawalMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "card" => Ok(WithdrawalMethod::Card),
            "crypto" => Ok(WithdrawalMethod::Crypto),
            "referral_cycle" => Ok(WithdrawalMethod::ReferralCycle),
            other => Err(format!("unknown withdrawal method: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    New,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::New => "new",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl TryFrom<String> for WithdrawalStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "new" => Ok(WithdrawalStatus::New),
            "approved" => Ok(WithdrawalStatus::Approved),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            other => Err(format!("unknown withdrawal status: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: i64,
    pub tg_id: i64,
    #[sqlx(try_from = "String")]
    pub method: WithdrawalMethod,
    pub details: String,
    pub amount_in_cents: i64,
    #[sqlx(try_from = "String")]
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewWithdrawal {
    pub method: WithdrawalMethod,
    pub details: String,
    pub amount: String,
}

#[derive(Clone, Debug)]
pub enum WithdrawOutcome {
    Created {
        withdrawal: Withdrawal,
        balance_in_cents: i64,
    },
    BelowMinimum {
        balance_in_cents: i64,
    },
    Insufficient {
        balance_in_cents: i64,
    },
    UserNotFound,
}

#[derive(Clone, Debug)]
pub enum CycleWithdrawOutcome {
    Created {
        withdrawal: Withdrawal,
        summary: ReferralSummary,
    },
    NotEnoughCycles(ReferralSummary),
    UserNotFound,
}
