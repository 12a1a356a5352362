use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use super::{spawn_services, Admins, Channels, CoreConfig, Stores};
use crate::models::{
    channels::{ChannelRef, Membership},
    tasks::{Task, TaskCatalog},
};
use crate::repositories::{memory::MemoryStore, Messenger};
use crate::settings::Rewards;

pub const ADMIN_ID: i64 = 1000;
pub const REFERRAL_BONUS: i64 = 150;
pub const DAILY_BONUS: i64 = 30;
pub const MIN_WITHDRAW: i64 = 2000;

/// Messenger that records deliveries instead of talking to the platform.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(i64, String)>>,
    failing: Mutex<HashSet<i64>>,
    memberships: Mutex<HashMap<(String, i64), Membership>>,
}

impl RecordingMessenger {
    pub fn fail_for(&self, chat_id: i64) {
        self.failing.lock().unwrap().insert(chat_id);
    }

    pub fn set_membership(&self, channel: &ChannelRef, user_id: i64, membership: Membership) {
        self.memberships
            .lock()
            .unwrap()
            .insert((channel.to_string(), user_id), membership);
    }

    pub fn recipients(&self) -> Vec<i64> {
        self.sent.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn messages_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), anyhow::Error> {
        if self.failing.lock().unwrap().contains(&chat_id) {
            bail!("Forbidden: bot was blocked by the user");
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn membership(
        &self,
        channel: &ChannelRef,
        user_id: i64,
    ) -> Result<Membership, anyhow::Error> {
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .get(&(channel.to_string(), user_id))
            .copied()
            .unwrap_or(Membership::Member))
    }
}

pub fn rewards() -> Rewards {
    Rewards {
        referral_bonus_in_cents: REFERRAL_BONUS,
        daily_bonus_in_cents: DAILY_BONUS,
        bonus_interval_hours: 24,
        min_withdraw_in_cents: MIN_WITHDRAW,
    }
}

pub fn config(channels: Vec<ChannelRef>) -> CoreConfig {
    CoreConfig {
        admins: Admins::new([ADMIN_ID]),
        rewards: rewards(),
        tasks: TaskCatalog::new(vec![
            Task {
                id: "follow".to_string(),
                title: "Follow the channel".to_string(),
                reward_in_cents: 200,
            },
            Task {
                id: "review".to_string(),
                title: "Leave a review".to_string(),
                reward_in_cents: 500,
            },
        ]),
        channels,
        start_date: None,
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub messenger: Arc<RecordingMessenger>,
    pub channels: Channels,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_channels(Vec::new())
    }

    pub fn with_channels(required: Vec<ChannelRef>) -> Self {
        let store = MemoryStore::new();
        let messenger = Arc::new(RecordingMessenger::default());
        let stores = Stores {
            users: Arc::new(store.clone()),
            submissions: Arc::new(store.clone()),
            withdrawals: Arc::new(store.clone()),
        };

        let channels = spawn_services(stores, messenger.clone(), config(required));

        Self {
            store,
            messenger,
            channels,
        }
    }

    /// Best-effort notifications are delivered asynchronously; polls until
    /// `chat_id` has received `count` messages or the deadline passes.
    pub async fn wait_for_messages(&self, chat_id: i64, count: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let messages = self.messenger.messages_to(chat_id);
            if messages.len() >= count || tokio::time::Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
