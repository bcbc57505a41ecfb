//! Durable key-value store partitioned into namespaces.
//!
//! Every namespace is held in memory as one snapshot and persisted as a whole
//! on each change. A per-namespace mutex is held across the full
//! read-modify-write cycle, so callers in one process never lose updates.
//! I/O failures are retried with jittered backoff and then degrade to an empty
//! read or a dropped write; nothing here returns an error to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, warn};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::StoreBackend;

mod json_dir;
mod sqlite;

pub use json_dir::JsonDirBackend;
pub use sqlite::SqliteBackend;

/// Full contents of one namespace. Ordered, so key listings are lexicographic.
pub type Snapshot = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Notes,
    Welcome,
    Filters,
    Warnings,
    Settings,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Notes,
        Namespace::Welcome,
        Namespace::Filters,
        Namespace::Warnings,
        Namespace::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Notes => "notes",
            Namespace::Welcome => "welcome",
            Namespace::Filters => "filters",
            Namespace::Warnings => "warnings",
            Namespace::Settings => "settings",
        }
    }

    fn index(self) -> usize {
        match self {
            Namespace::Notes => 0,
            Namespace::Welcome => 1,
            Namespace::Filters => 2,
            Namespace::Warnings => 3,
            Namespace::Settings => 4,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw persistence for namespace snapshots.
///
/// `read` returns `Ok(None)` when nothing was ever stored for the namespace.
/// Any `Err` is treated as transient and retried by the [`Store`].
pub trait Backend: Send + Sync {
    fn read(&self, ns: Namespace) -> Result<Option<String>>;
    fn write(&self, ns: Namespace, snapshot: &str) -> Result<()>;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    // Ceiling doubles per attempt; the actual wait is drawn between base and ceiling.
    fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(8))
            .min(self.max_delay);
        if ceiling <= self.base_delay {
            return ceiling;
        }
        let lo = self.base_delay.as_millis() as u64;
        let hi = ceiling.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

#[derive(Debug, Default)]
struct StoreMetrics {
    retries: AtomicU64,
    failed_loads: AtomicU64,
    dropped_writes: AtomicU64,
    recovered_namespaces: AtomicU64,
}

/// Point-in-time copy of the store's recoverable-error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub retries: u64,
    pub failed_loads: u64,
    pub dropped_writes: u64,
    pub recovered_namespaces: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Store {
    backend: Box<dyn Backend>,
    retry: RetryPolicy,
    // `None` until the namespace has been loaded successfully.
    spaces: [Mutex<Option<Snapshot>>; 5],
    metrics: StoreMetrics,
}

impl Store {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_retry(backend, RetryPolicy::default())
    }

    pub fn with_retry(backend: impl Backend + 'static, retry: RetryPolicy) -> Self {
        Self {
            backend: Box::new(backend),
            retry,
            spaces: std::array::from_fn(|_| Mutex::new(None)),
            metrics: StoreMetrics::default(),
        }
    }

    /// Opens the configured backend rooted at `data_dir`.
    pub fn open(kind: StoreBackend, data_dir: &Path) -> Result<Self> {
        let store = match kind {
            StoreBackend::Json => Self::new(JsonDirBackend::new(data_dir)?),
            StoreBackend::Sqlite => Self::new(SqliteBackend::open(data_dir.join("modbot.sqlite"))?),
        };
        debug!("store opened: {}", store.backend.describe());
        Ok(store)
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            retries: self.metrics.retries.load(Ordering::Relaxed),
            failed_loads: self.metrics.failed_loads.load(Ordering::Relaxed),
            dropped_writes: self.metrics.dropped_writes.load(Ordering::Relaxed),
            recovered_namespaces: self.metrics.recovered_namespaces.load(Ordering::Relaxed),
        }
    }

    pub fn get(&self, ns: Namespace, key: &str) -> Option<Value> {
        self.read(ns, |map| map.get(key).cloned())
    }

    /// Typed read. Absent keys and values of the wrong shape yield `default`.
    pub fn get_or<T: DeserializeOwned>(&self, ns: Namespace, key: &str, default: T) -> T {
        let Some(value) = self.get(ns, key) else {
            return default;
        };
        match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("store: {}/{} has an unexpected shape ({}); using default", ns, key, e);
                default
            }
        }
    }

    pub fn set<T: Serialize>(&self, ns: Namespace, key: &str, value: T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                bump(&self.metrics.dropped_writes);
                error!("store: cannot serialize value for {}/{}: {}", ns, key, e);
                return;
            }
        };
        self.modify(ns, |map| {
            map.insert(key.to_string(), value);
        });
    }

    pub fn delete(&self, ns: Namespace, key: &str) {
        self.modify(ns, |map| {
            map.remove(key);
        });
    }

    /// Removes every key starting with `prefix` in one write. Returns how many went.
    pub fn delete_prefix(&self, ns: Namespace, prefix: &str) -> usize {
        self.modify(ns, |map| {
            let before = map.len();
            map.retain(|k, _| !k.starts_with(prefix));
            before - map.len()
        })
    }

    pub fn list_keys(&self, ns: Namespace) -> Vec<String> {
        self.read(ns, |map| map.keys().cloned().collect())
    }

    pub fn contains(&self, ns: Namespace, key: &str) -> bool {
        self.read(ns, |map| map.contains_key(key))
    }

    /// Runs `f` over the namespace under its lock and persists the result once.
    ///
    /// If persisting fails after all retries the change is dropped and the
    /// in-memory snapshot stays as it was. `f`'s return value is handed back
    /// either way.
    pub fn modify<R>(&self, ns: Namespace, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut slot = self.lock(ns);
        let Some(current) = self.ensure_loaded(ns, &mut slot) else {
            let mut scratch = Snapshot::new();
            let out = f(&mut scratch);
            if !scratch.is_empty() {
                bump(&self.metrics.dropped_writes);
                error!("store: namespace {} is unavailable, dropping update", ns);
            }
            return out;
        };

        let mut next = current.clone();
        let out = f(&mut next);
        if next != *current {
            if self.persist(ns, &next) {
                *current = next;
            } else {
                bump(&self.metrics.dropped_writes);
                error!("store: giving up writing namespace {}, update dropped", ns);
            }
        }
        out
    }

    fn read<R>(&self, ns: Namespace, f: impl FnOnce(&Snapshot) -> R) -> R {
        let mut slot = self.lock(ns);
        match self.ensure_loaded(ns, &mut slot) {
            Some(map) => f(map),
            None => f(&Snapshot::new()),
        }
    }

    fn lock(&self, ns: Namespace) -> MutexGuard<'_, Option<Snapshot>> {
        self.spaces[ns.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_loaded<'a>(
        &self,
        ns: Namespace,
        slot: &'a mut Option<Snapshot>,
    ) -> Option<&'a mut Snapshot> {
        if slot.is_none() {
            *slot = self.load(ns);
        }
        slot.as_mut()
    }

    // A failed load is not cached: the next access tries again.
    fn load(&self, ns: Namespace) -> Option<Snapshot> {
        let Some(raw) = self.retrying(ns, "load", || self.backend.read(ns)) else {
            bump(&self.metrics.failed_loads);
            error!("store: giving up loading namespace {}, serving empty result", ns);
            return None;
        };

        match raw {
            None => {
                debug!("store: creating empty namespace {}", ns);
                self.persist(ns, &Snapshot::new());
                Some(Snapshot::new())
            }
            Some(text) => match serde_json::from_str::<Snapshot>(&text) {
                Ok(map) => Some(map),
                Err(e) => {
                    bump(&self.metrics.recovered_namespaces);
                    warn!("store: namespace {} is malformed ({}), resetting it to empty", ns, e);
                    self.persist(ns, &Snapshot::new());
                    Some(Snapshot::new())
                }
            },
        }
    }

    fn persist(&self, ns: Namespace, map: &Snapshot) -> bool {
        let text = match serde_json::to_string_pretty(map) {
            Ok(t) => t,
            Err(e) => {
                error!("store: cannot serialize namespace {}: {}", ns, e);
                return false;
            }
        };
        self.retrying(ns, "write", || self.backend.write(ns, &text))
            .is_some()
    }

    fn retrying<T>(&self, ns: Namespace, op: &str, mut f: impl FnMut() -> Result<T>) -> Option<T> {
        let attempts = self.retry.attempts.max(1);
        for attempt in 0..attempts {
            match f() {
                Ok(v) => return Some(v),
                Err(e) => {
                    warn!(
                        "store: {} of {} failed (attempt {}/{}): {:#}",
                        op,
                        ns,
                        attempt + 1,
                        attempts,
                        e
                    );
                    if attempt + 1 < attempts {
                        bump(&self.metrics.retries);
                        thread::sleep(self.retry.delay(attempt));
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};

    use super::{Backend, Namespace, RetryPolicy, Store};

    /// In-memory backend that can be told to fail the next N reads or writes.
    #[derive(Default)]
    pub struct MemoryBackend {
        pub files: Mutex<HashMap<&'static str, String>>,
        pub failing_reads: AtomicU32,
        pub failing_writes: AtomicU32,
        pub writes: AtomicU32,
    }

    impl MemoryBackend {
        pub fn with_file(ns: Namespace, contents: &str) -> Self {
            let backend = Self::default();
            backend
                .files
                .lock()
                .unwrap()
                .insert(ns.as_str(), contents.to_string());
            backend
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl Backend for std::sync::Arc<MemoryBackend> {
        fn read(&self, ns: Namespace) -> Result<Option<String>> {
            if take_failure(&self.failing_reads) {
                return Err(anyhow!("{} is locked", ns));
            }
            Ok(self.files.lock().unwrap().get(ns.as_str()).cloned())
        }

        fn write(&self, ns: Namespace, snapshot: &str) -> Result<()> {
            if take_failure(&self.failing_writes) {
                return Err(anyhow!("{} is locked", ns));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .insert(ns.as_str(), snapshot.to_string());
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    pub fn memory_store() -> Store {
        Store::with_retry(
            std::sync::Arc::new(MemoryBackend::default()),
            RetryPolicy::immediate(5),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::{memory_store, MemoryBackend};
    use super::*;

    fn store_over(backend: &Arc<MemoryBackend>) -> Store {
        Store::with_retry(backend.clone(), RetryPolicy::immediate(5))
    }

    #[test]
    fn absent_key_yields_default() {
        let store = memory_store();
        assert_eq!(store.get(Namespace::Notes, "1_missing"), None);
        assert_eq!(store.get_or(Namespace::Settings, "1_flood_limit", 5i64), 5);
        assert!(store.get_or(Namespace::Welcome, "1_enabled", true));
        assert!(!store.contains(Namespace::Notes, "1_missing"));
    }

    #[test]
    fn set_then_get_returns_value() {
        let store = memory_store();
        store.set(Namespace::Notes, "1_rules", "be nice");
        store.set(Namespace::Warnings, "1_2_warns", 2);
        store.set(Namespace::Settings, "1_flood_enabled", false);

        assert_eq!(store.get(Namespace::Notes, "1_rules"), Some(json!("be nice")));
        assert_eq!(store.get_or(Namespace::Warnings, "1_2_warns", 0i64), 2);
        assert!(!store.get_or(Namespace::Settings, "1_flood_enabled", true));
    }

    #[test]
    fn wrong_shape_falls_back_to_default() {
        let store = memory_store();
        store.set(Namespace::Settings, "1_flood_limit", "lots");
        assert_eq!(store.get_or(Namespace::Settings, "1_flood_limit", 5i64), 5);
    }

    #[test]
    fn every_write_persists_whole_namespace() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend);
        store.set(Namespace::Filters, "1_a", "x");
        store.set(Namespace::Filters, "1_b", "y");

        let files = backend.files.lock().unwrap();
        let snap: Snapshot = serde_json::from_str(&files["filters"]).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["1_a"], json!("x"));
    }

    #[test]
    fn delete_of_absent_key_does_not_write() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend);
        store.set(Namespace::Notes, "1_a", "x");
        let writes = backend.writes.load(Ordering::SeqCst);

        store.delete(Namespace::Notes, "1_zzz");
        assert_eq!(backend.writes.load(Ordering::SeqCst), writes);

        store.delete(Namespace::Notes, "1_a");
        assert!(!store.contains(Namespace::Notes, "1_a"));
    }

    #[test]
    fn list_keys_is_lexicographic() {
        let store = memory_store();
        for k in ["1_zeta", "1_alpha", "1_mid"] {
            store.set(Namespace::Filters, k, "v");
        }
        assert_eq!(
            store.list_keys(Namespace::Filters),
            vec!["1_alpha", "1_mid", "1_zeta"]
        );
    }

    #[test]
    fn delete_prefix_only_touches_that_chat() {
        let store = memory_store();
        store.set(Namespace::Notes, "-100_a", "1");
        store.set(Namespace::Notes, "-100_b", "2");
        store.set(Namespace::Notes, "-1001_a", "3");
        store.set(Namespace::Notes, "7_a", "4");

        assert_eq!(store.delete_prefix(Namespace::Notes, "-100_"), 2);
        assert_eq!(store.list_keys(Namespace::Notes), vec!["-1001_a", "7_a"]);
    }

    #[test]
    fn malformed_snapshot_is_reset_to_empty() {
        let backend = Arc::new(MemoryBackend::with_file(Namespace::Warnings, "{not json"));
        let store = store_over(&backend);

        assert!(store.list_keys(Namespace::Warnings).is_empty());
        assert_eq!(store.metrics().recovered_namespaces, 1);
        assert_eq!(backend.files.lock().unwrap()["warnings"].trim(), "{}");

        store.set(Namespace::Warnings, "1_2_warns", 1);
        assert_eq!(store.get_or(Namespace::Warnings, "1_2_warns", 0i64), 1);
    }

    #[test]
    fn non_object_snapshot_counts_as_malformed() {
        let backend = Arc::new(MemoryBackend::with_file(Namespace::Notes, "[1, 2, 3]"));
        let store = store_over(&backend);
        assert!(store.list_keys(Namespace::Notes).is_empty());
        assert_eq!(store.metrics().recovered_namespaces, 1);
    }

    #[test]
    fn transient_read_failures_are_retried() {
        let backend = Arc::new(MemoryBackend::with_file(Namespace::Notes, r#"{"1_a": "x"}"#));
        backend.failing_reads.store(3, Ordering::SeqCst);
        let store = store_over(&backend);

        assert_eq!(store.get(Namespace::Notes, "1_a"), Some(json!("x")));
        assert_eq!(store.metrics().retries, 3);
        assert_eq!(store.metrics().failed_loads, 0);
    }

    #[test]
    fn exhausted_read_serves_empty_and_is_not_cached() {
        let backend = Arc::new(MemoryBackend::with_file(Namespace::Notes, r#"{"1_a": "x"}"#));
        backend.failing_reads.store(5, Ordering::SeqCst);
        let store = store_over(&backend);

        assert_eq!(store.get(Namespace::Notes, "1_a"), None);
        assert_eq!(store.metrics().failed_loads, 1);

        // The backend has recovered; the next access loads the real data.
        assert_eq!(store.get(Namespace::Notes, "1_a"), Some(json!("x")));
    }

    #[test]
    fn update_against_unloadable_namespace_is_dropped() {
        let backend = Arc::new(MemoryBackend::with_file(Namespace::Notes, r#"{"1_a": "x"}"#));
        backend.failing_reads.store(5, Ordering::SeqCst);
        let store = store_over(&backend);

        store.set(Namespace::Notes, "1_b", "y");
        assert_eq!(store.metrics().dropped_writes, 1);
        assert_eq!(
            backend.files.lock().unwrap()["notes"],
            r#"{"1_a": "x"}"#,
            "existing data must not be overwritten"
        );
    }

    #[test]
    fn exhausted_write_drops_update_and_keeps_memory_consistent() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend);
        store.set(Namespace::Settings, "1_flood_limit", 4);

        backend.failing_writes.store(5, Ordering::SeqCst);
        store.set(Namespace::Settings, "1_flood_limit", 9);

        assert_eq!(store.get_or(Namespace::Settings, "1_flood_limit", 0i64), 4);
        assert_eq!(store.metrics().dropped_writes, 1);
        assert_eq!(store.metrics().retries, 4);
    }

    #[test]
    fn modify_is_atomic_across_threads() {
        let store = Arc::new(memory_store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.modify(Namespace::Warnings, |map| {
                            let n = map.get("1_2_warns").and_then(Value::as_i64).unwrap_or(0);
                            map.insert("1_2_warns".into(), json!(n + 1));
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_or(Namespace::Warnings, "1_2_warns", 0i64), 200);
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let d = policy.delay(attempt);
            assert!(d >= Duration::from_millis(100), "{:?}", d);
            assert!(d <= Duration::from_millis(400), "{:?}", d);
        }
        assert_eq!(RetryPolicy::immediate(5).delay(3), Duration::ZERO);
    }
}
