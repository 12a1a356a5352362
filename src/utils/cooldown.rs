use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry, DashMap};

/// Advisory per-user throttle. State lives in memory only and is lost on
/// restart, so nothing that guards money may rely on it.
pub struct Cooldown {
    window: Duration,
    last_action: DashMap<i64, Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_action: DashMap::new(),
        }
    }

    /// Records an action for `user_id` unless the previous one is still
    /// inside the window.
    pub fn try_acquire(&self, user_id: i64) -> bool {
        self.try_acquire_at(user_id, Instant::now())
    }

    fn try_acquire_at(&self, user_id: i64, now: Instant) -> bool {
        match self.last_action.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < self.window {
                    return false;
                }
                entry.insert(now);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    pub fn prune(&self) -> usize {
        let before = self.last_action.len();
        let window = self.window;
        self.last_action
            .retain(|_, last| last.elapsed() < window);
        before - self.last_action.len()
    }
}
