use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Channels {
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rewards {
    pub referral_bonus_in_cents: i64,
    #[serde(default = "default_daily_bonus")]
    pub daily_bonus_in_cents: i64,
    #[serde(default = "default_bonus_interval")]
    pub bonus_interval_hours: i64,
    pub min_withdraw_in_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    pub title: String,
    pub reward_in_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct Throttle {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub telegram: Telegram,
    #[serde(default)]
    pub http: Http,
    pub admins: Vec<i64>,
    #[serde(default)]
    pub channels: Channels,
    pub rewards: Rewards,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub throttle: Throttle,
    /// Launch date shown in stats as days running.
    pub start_date: Option<NaiveDate>,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("REFBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("admins")
                    .with_list_parse_key("channels.required")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_daily_bonus() -> i64 {
    30
}

fn default_bonus_interval() -> i64 {
    24
}

fn default_cooldown() -> u64 {
    2
}

fn default_session_ttl() -> u64 {
    900
}
