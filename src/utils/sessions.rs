use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::models::withdrawals::WithdrawalMethod;

/// Where a user currently is in a multi-step dialog.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum Conversation {
    AwaitingWithdrawalMethod,
    AwaitingWithdrawalDetails {
        method: WithdrawalMethod,
    },
    AwaitingWithdrawalAmount {
        method: WithdrawalMethod,
        details: String,
    },
    AwaitingTaskProof {
        task_id: String,
    },
}

struct Session {
    conversation: Conversation,
    touched_at: Instant,
}

/// Conversation state keyed by user id. Entries older than the TTL are
/// treated as absent and removed by `purge_expired`.
#[derive(Clone)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Arc<DashMap<i64, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, user_id: i64) -> Option<Conversation> {
        let expired = match self.sessions.get(&user_id) {
            Some(session) if session.touched_at.elapsed() < self.ttl => {
                return Some(session.conversation.clone())
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.sessions
                .remove_if(&user_id, |_, s| s.touched_at.elapsed() >= self.ttl);
        }
        None
    }

    pub fn set(&self, user_id: i64, conversation: Conversation) {
        self.sessions.insert(
            user_id,
            Session {
                conversation,
                touched_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self, user_id: i64) -> Option<Conversation> {
        self.sessions
            .remove(&user_id)
            .map(|(_, session)| session.conversation)
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.touched_at.elapsed() < self.ttl);
        before - self.sessions.len()
    }

    pub fn start_purge_task(&self, every: Duration) {
        let store = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;

                let purged = store.purge_expired();
                if purged > 0 {
                    log::debug!("Purged {} expired conversation sessions.", purged);
                }
            }
        });
    }
}
