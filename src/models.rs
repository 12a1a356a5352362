pub mod channels;
pub mod referrals;
pub mod stats;
pub mod submissions;
pub mod tasks;
pub mod users;
pub mod withdrawals;
