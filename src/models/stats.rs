use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::users::User;

pub const USERS_PER_PAGE: i64 = 50;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Stats {
    pub total_users: i64,
    pub activated_users: i64,
    pub with_phone: i64,
    pub banned_users: i64,
    pub new_24h: i64,
    /// Whole days since the configured launch date.
    #[sqlx(default)]
    pub days_running: Option<i64>,
}

impl Stats {
    pub fn with_uptime(mut self, start_date: Option<NaiveDate>, now: DateTime<Utc>) -> Self {
        self.days_running = start_date.map(|start| days_running(start, now));
        self
    }
}

/// A launch date in the future counts as zero days.
pub fn days_running(start_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - start_date).num_days().max(0)
}

#[derive(Clone, Debug, Serialize)]
pub struct UsersPage {
    /// Zero-based page after clamping.
    pub page: i64,
    pub pages: i64,
    pub total: i64,
    pub users: Vec<User>,
}

/// Number of pages for `total` users; an empty table still has one page.
pub fn page_count(total: i64) -> i64 {
    (total.max(1) - 1) / USERS_PER_PAGE + 1
}

pub fn clamp_page(page: i64, total: i64) -> i64 {
    page.clamp(0, page_count(total) - 1)
}
