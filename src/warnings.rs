//! Warning counters and escalation.
//!
//! The counter increment, the limit lookup and the reset on escalation happen
//! inside a single locked update of the `warnings` namespace. The engine only
//! decides; carrying out the punishment is up to the caller, and the counter
//! stays reset even if that fails.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::policy::{self, warn_limit_in, PunishMode, WarnPolicy};
use crate::rules::user_key;
use crate::store::{Namespace, Store};

const WARNS_SUFFIX: &str = "warns";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarnOutcome {
    /// Count after this warning. Equals `limit` when escalated, even though
    /// the stored counter is already back at zero.
    pub new_count: u32,
    pub limit: u32,
    pub escalated: bool,
    pub mode: PunishMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarnStatus {
    pub count: u32,
    pub limit: u32,
}

#[derive(Clone)]
pub struct WarningEngine {
    store: Arc<Store>,
}

fn stored_count(map: &crate::store::Snapshot, key: &str) -> u32 {
    map.get(key)
        .and_then(Value::as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

impl WarningEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn warn(&self, chat_id: i64, user_id: i64) -> WarnOutcome {
        let key = user_key(chat_id, user_id, WARNS_SUFFIX);
        // Mode is read outside the update; only the limit decides the transition.
        let mode = self.policy(chat_id).mode;
        self.store.modify(Namespace::Warnings, |map| {
            let limit = warn_limit_in(map, chat_id);
            let new_count = stored_count(map, &key).saturating_add(1);
            let escalated = new_count >= limit;
            map.insert(key.clone(), json!(if escalated { 0 } else { new_count }));
            WarnOutcome {
                new_count,
                limit,
                escalated,
                mode,
            }
        })
    }

    pub fn reset(&self, chat_id: i64, user_id: i64) {
        self.store.set(
            Namespace::Warnings,
            &user_key(chat_id, user_id, WARNS_SUFFIX),
            0,
        );
    }

    pub fn get(&self, chat_id: i64, user_id: i64) -> WarnStatus {
        let key = user_key(chat_id, user_id, WARNS_SUFFIX);
        let count = self.store.get_or::<u32>(Namespace::Warnings, &key, 0);
        WarnStatus {
            count,
            limit: self.policy(chat_id).limit,
        }
    }

    pub fn policy(&self, chat_id: i64) -> WarnPolicy {
        policy::warn_policy(&self.store, chat_id)
    }

    pub fn set_limit(&self, chat_id: i64, limit: u32) {
        policy::set_warn_limit(&self.store, chat_id, limit);
    }

    pub fn set_mode(&self, chat_id: i64, mode: PunishMode) {
        policy::set_warn_mode(&self.store, chat_id, mode);
    }
}
