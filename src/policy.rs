//! Per-chat moderation policy.
//!
//! Flood settings live in the `settings` namespace and warning settings in the
//! `warnings` namespace, next to the counters they govern. Every field is
//! optional on disk; a missing or malformed value means the default.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::chat_key;
use crate::store::{Namespace, Store};

pub const DEFAULT_FLOOD_LIMIT: u32 = 5;
pub const DEFAULT_FLOOD_WINDOW_SECS: u32 = 5;
pub const DEFAULT_FLOOD_MODE: PunishMode = PunishMode::Mute;
pub const DEFAULT_WARN_LIMIT: u32 = 3;
pub const DEFAULT_WARN_MODE: PunishMode = PunishMode::Ban;

const FLOOD_ENABLED: &str = "flood_enabled";
const FLOOD_LIMIT: &str = "flood_limit";
const FLOOD_TIME: &str = "flood_time";
const FLOOD_MODE: &str = "flood_mode";
const WARN_LIMIT: &str = "warn_limit";
const WARN_MODE: &str = "warn_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishMode {
    Mute,
    Kick,
    Ban,
}

impl PunishMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PunishMode::Mute => "mute",
            PunishMode::Kick => "kick",
            PunishMode::Ban => "ban",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            PunishMode::Mute => "muted",
            PunishMode::Kick => "kicked",
            PunishMode::Ban => "banned",
        }
    }
}

impl fmt::Display for PunishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PunishMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mute" => Ok(PunishMode::Mute),
            "kick" => Ok(PunishMode::Kick),
            "ban" => Ok(PunishMode::Ban),
            other => Err(anyhow!("unknown mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodPolicy {
    pub enabled: bool,
    pub limit: u32,
    pub window_secs: u32,
    pub mode: PunishMode,
}

impl Default for FloodPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: DEFAULT_FLOOD_LIMIT,
            window_secs: DEFAULT_FLOOD_WINDOW_SECS,
            mode: DEFAULT_FLOOD_MODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarnPolicy {
    pub limit: u32,
    pub mode: PunishMode,
}

impl Default for WarnPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_WARN_LIMIT,
            mode: DEFAULT_WARN_MODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatPolicy {
    pub flood: FloodPolicy,
    pub warn: WarnPolicy,
}

impl ChatPolicy {
    pub fn load(store: &Store, chat_id: i64) -> Self {
        Self {
            flood: flood_policy(store, chat_id),
            warn: warn_policy(store, chat_id),
        }
    }
}

fn positive(store: &Store, ns: Namespace, key: &str, default: u32) -> u32 {
    match store.get_or::<i64>(ns, key, default as i64) {
        n if n >= 1 && n <= u32::MAX as i64 => n as u32,
        n => {
            warn!("policy: ignoring out-of-range {}={} in {}", key, n, ns);
            default
        }
    }
}

pub fn flood_policy(store: &Store, chat_id: i64) -> FloodPolicy {
    let ns = Namespace::Settings;
    FloodPolicy {
        enabled: store.get_or(ns, &chat_key(chat_id, FLOOD_ENABLED), true),
        limit: positive(store, ns, &chat_key(chat_id, FLOOD_LIMIT), DEFAULT_FLOOD_LIMIT),
        window_secs: positive(
            store,
            ns,
            &chat_key(chat_id, FLOOD_TIME),
            DEFAULT_FLOOD_WINDOW_SECS,
        ),
        mode: store.get_or(ns, &chat_key(chat_id, FLOOD_MODE), DEFAULT_FLOOD_MODE),
    }
}

pub fn warn_policy(store: &Store, chat_id: i64) -> WarnPolicy {
    WarnPolicy {
        limit: positive(
            store,
            Namespace::Warnings,
            &chat_key(chat_id, WARN_LIMIT),
            DEFAULT_WARN_LIMIT,
        ),
        mode: store.get_or(
            Namespace::Warnings,
            &chat_key(chat_id, WARN_MODE),
            DEFAULT_WARN_MODE,
        ),
    }
}

/// Reads the warn limit out of an already locked `warnings` snapshot.
pub(crate) fn warn_limit_in(map: &crate::store::Snapshot, chat_id: i64) -> u32 {
    map.get(&chat_key(chat_id, WARN_LIMIT))
        .and_then(Value::as_i64)
        .filter(|n| *n >= 1 && *n <= u32::MAX as i64)
        .map(|n| n as u32)
        .unwrap_or(DEFAULT_WARN_LIMIT)
}

pub fn set_flood_enabled(store: &Store, chat_id: i64, enabled: bool) {
    store.set(Namespace::Settings, &chat_key(chat_id, FLOOD_ENABLED), enabled);
}

pub fn set_flood_limit(store: &Store, chat_id: i64, limit: u32) {
    store.set(Namespace::Settings, &chat_key(chat_id, FLOOD_LIMIT), limit);
}

pub fn set_flood_window(store: &Store, chat_id: i64, secs: u32) {
    store.set(Namespace::Settings, &chat_key(chat_id, FLOOD_TIME), secs);
}

pub fn set_flood_mode(store: &Store, chat_id: i64, mode: PunishMode) {
    store.set(Namespace::Settings, &chat_key(chat_id, FLOOD_MODE), mode);
}

pub fn set_warn_limit(store: &Store, chat_id: i64, limit: u32) {
    store.set(Namespace::Warnings, &chat_key(chat_id, WARN_LIMIT), limit);
}

pub fn set_warn_mode(store: &Store, chat_id: i64, mode: PunishMode) {
    store.set(Namespace::Warnings, &chat_key(chat_id, WARN_MODE), mode);
}
