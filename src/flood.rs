//! Message-rate tracking per `(chat, user)`.
//!
//! Windows live only in memory and are lost on restart. The detector holds no
//! policy of its own; limits come in with each call.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

use crate::policy::{FloodPolicy, PunishMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodDecision {
    None,
    Punish(PunishMode),
}

#[derive(Debug, Clone, Copy)]
struct FloodWindow {
    count: u32,
    window_start: OffsetDateTime,
    last_seen: OffsetDateTime,
}

#[derive(Default)]
pub struct FloodDetector {
    windows: Mutex<HashMap<(i64, i64), FloodWindow>>,
}

impl FloodDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one message. The message that brings the count to the limit is
    /// the one that gets punished, and the count starts over from zero.
    pub fn record_and_check(
        &self,
        chat_id: i64,
        user_id: i64,
        now: OffsetDateTime,
        policy: &FloodPolicy,
    ) -> FloodDecision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry((chat_id, user_id)).or_insert(FloodWindow {
            count: 0,
            window_start: now,
            last_seen: now,
        });

        if now - window.window_start > Duration::seconds(i64::from(policy.window_secs)) {
            window.count = 0;
            window.window_start = now;
        }
        window.count += 1;
        window.last_seen = now;

        if window.count >= policy.limit {
            window.count = 0;
            return FloodDecision::Punish(policy.mode);
        }
        FloodDecision::None
    }

    /// Drops windows that have not seen a message for longer than `max_idle`.
    pub fn evict_stale(&self, now: OffsetDateTime, max_idle: Duration) -> usize {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| now - w.last_seen <= max_idle);
        before - windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
