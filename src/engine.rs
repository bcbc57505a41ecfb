//! Per-message moderation flow.
//!
//! ```text
//! RECEIVED -> FLOOD_CHECK (skipped for admins) -> PUNISH                  => Punish
//!                                              -> OK -> command?          => Done
//!                                                    -> FILTER_MATCH hit  => Reply
//!                                                    -> FILTER_MATCH miss => Done
//! ```
//!
//! Everything here is synchronous and may block on store I/O; async callers
//! run it on the blocking pool.

use std::sync::Arc;

use log::{debug, info};
use time::OffsetDateTime;

use crate::filters::FilterMatcher;
use crate::flood::{FloodDecision, FloodDetector};
use crate::policy::{self, ChatPolicy, PunishMode};
use crate::rules::{RuleIndex, RuleKind};
use crate::store::Store;
use crate::warnings::WarningEngine;
use crate::welcome::WelcomeSettings;

#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub chat_id: i64,
    pub user_id: i64,
    pub text: &'a str,
    /// Resolved by the caller; the engine cannot ask the transport.
    pub sender_is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Done,
    Reply(String),
    Punish(PunishMode),
}

pub fn is_command(text: &str) -> bool {
    text.starts_with('/')
}

/// Name of a `#note` lookup at the start of a message.
pub fn hashtag_name(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('#')?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

pub struct ModerationEngine {
    store: Arc<Store>,
    rules: RuleIndex,
    flood: FloodDetector,
    warnings: WarningEngine,
    filters: FilterMatcher,
    welcome: WelcomeSettings,
}

impl ModerationEngine {
    pub fn new(store: Arc<Store>) -> Self {
        let rules = RuleIndex::new(store.clone());
        Self {
            flood: FloodDetector::new(),
            warnings: WarningEngine::new(store.clone()),
            filters: FilterMatcher::new(rules.clone()),
            welcome: WelcomeSettings::new(store.clone()),
            rules,
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn rules(&self) -> &RuleIndex {
        &self.rules
    }

    pub fn flood(&self) -> &FloodDetector {
        &self.flood
    }

    pub fn warnings(&self) -> &WarningEngine {
        &self.warnings
    }

    pub fn welcome(&self) -> &WelcomeSettings {
        &self.welcome
    }

    pub fn policy(&self, chat_id: i64) -> ChatPolicy {
        ChatPolicy::load(&self.store, chat_id)
    }

    pub fn on_message(&self, msg: &InboundMessage<'_>, now: OffsetDateTime) -> Verdict {
        if !msg.sender_is_admin {
            let flood = policy::flood_policy(&self.store, msg.chat_id);
            if flood.enabled {
                if let FloodDecision::Punish(mode) =
                    self.flood
                        .record_and_check(msg.chat_id, msg.user_id, now, &flood)
                {
                    info!(
                        "flood chat_id={} user_id={} limit={} window={}s mode={}",
                        msg.chat_id, msg.user_id, flood.limit, flood.window_secs, mode
                    );
                    return Verdict::Punish(mode);
                }
            }
        }

        if is_command(msg.text) {
            return Verdict::Done;
        }

        match self.filters.find_match(msg.chat_id, msg.text) {
            Some(payload) => {
                debug!("filter hit chat_id={} user_id={}", msg.chat_id, msg.user_id);
                Verdict::Reply(payload)
            }
            None => Verdict::Done,
        }
    }

    pub fn hashtag_note(&self, chat_id: i64, text: &str) -> Option<String> {
        let name = hashtag_name(text)?;
        self.rules.get(RuleKind::Note, chat_id, name)
    }
}
