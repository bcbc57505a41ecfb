use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_FLOOD_EVICT_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StoreBackend::Json),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(anyhow!("unknown store backend '{}' (expected json or sqlite)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    /// Flood windows idle for longer than this are evicted; also the sweep interval.
    pub flood_evict_after: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = get("TG_BOT_TOKEN").context("Missing TG_BOT_TOKEN")?;

        let data_dir = get("MODBOT_DATA_DIR")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let store_backend = match get("MODBOT_STORE_BACKEND") {
            Some(v) => v.parse().context("Invalid MODBOT_STORE_BACKEND")?,
            None => StoreBackend::default(),
        };

        let evict_secs = match get("MODBOT_FLOOD_EVICT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .context("Invalid MODBOT_FLOOD_EVICT_SECS")?,
            None => DEFAULT_FLOOD_EVICT_SECS,
        };

        Ok(Self {
            bot_token,
            data_dir: PathBuf::from(data_dir),
            store_backend,
            flood_evict_after: Duration::from_secs(evict_secs.max(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let cfg = Config::from_lookup(lookup(&[("TG_BOT_TOKEN", "123:abc")])).unwrap();
        assert_eq!(cfg.bot_token, "123:abc");
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.store_backend, StoreBackend::Json);
        assert_eq!(cfg.flood_evict_after, Duration::from_secs(600));
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("TG_BOT_TOKEN"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("TG_BOT_TOKEN", "t"),
            ("MODBOT_DATA_DIR", "/var/lib/modbot"),
            ("MODBOT_STORE_BACKEND", "SQLite"),
            ("MODBOT_FLOOD_EVICT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/modbot"));
        assert_eq!(cfg.store_backend, StoreBackend::Sqlite);
        assert_eq!(cfg.flood_evict_after, Duration::from_secs(30));
    }

    #[test]
    fn bad_backend_is_rejected() {
        assert!(Config::from_lookup(lookup(&[
            ("TG_BOT_TOKEN", "t"),
            ("MODBOT_STORE_BACKEND", "redis"),
        ]))
        .is_err());
    }
}
