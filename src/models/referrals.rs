use serde::{Deserialize, Serialize};

/// Active referrals needed for one reward cycle.
pub const CYCLE_SIZE: i64 = 10;
/// Payout for one consumed cycle (50 units).
pub const CYCLE_REWARD_IN_CENTS: i64 = 50 * 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct ReferralSummary {
    /// Referred users with `activated = true`.
    pub active: i64,
    /// Admin-granted referrals, purely additive.
    pub manual: i64,
    /// Cycles already paid out.
    pub used_cycles: i64,
}

impl ReferralSummary {
    pub fn total(&self) -> i64 {
        self.active + self.manual
    }

    pub fn available_cycles(&self) -> i64 {
        self.total() / CYCLE_SIZE
    }

    pub fn can_withdraw_cycle(&self) -> bool {
        self.available_cycles() > self.used_cycles
    }

    /// Referrals still missing before another cycle can be withdrawn.
    pub fn remaining_to_next_cycle(&self) -> i64 {
        ((self.used_cycles + 1) * CYCLE_SIZE - self.total()).max(0)
    }
}

/// First failing precondition for referral qualification, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    UnknownUser,
    AlreadyActivated,
    NoReferrer,
    NoBonusClaimed,
    NoApprovedTask,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum Qualification {
    Qualified { referrer_id: i64 },
    Blocked { gate: Gate },
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct TopReferrer {
    pub referrer_id: i64,
    pub active_referrals: i64,
}
