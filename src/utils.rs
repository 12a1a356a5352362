pub mod cooldown;
pub mod money;
pub mod sessions;
