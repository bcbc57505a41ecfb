//! Per-chat notes and filters on top of the store.
//!
//! Entries are stored under `"{chat_id}_{name}"`; names are case-folded on the
//! way in so lookups are case-insensitive.

use std::sync::Arc;

use serde_json::Value;

use crate::store::{Namespace, Store};

pub fn chat_key(chat_id: i64, name: &str) -> String {
    format!("{}_{}", chat_id, name)
}

pub fn user_key(chat_id: i64, user_id: i64, suffix: &str) -> String {
    format!("{}_{}_{}", chat_id, user_id, suffix)
}

/// Prefix shared by every key of one chat. The trailing `_` keeps `-100`
/// from matching `-1001`.
pub fn chat_prefix(chat_id: i64) -> String {
    format!("{}_", chat_id)
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Note,
    Filter,
}

impl RuleKind {
    pub fn namespace(self) -> Namespace {
        match self {
            RuleKind::Note => Namespace::Notes,
            RuleKind::Filter => Namespace::Filters,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RuleKind::Note => "note",
            RuleKind::Filter => "filter",
        }
    }
}

#[derive(Clone)]
pub struct RuleIndex {
    store: Arc<Store>,
}

impl RuleIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn save(&self, kind: RuleKind, chat_id: i64, name: &str, payload: &str) {
        let key = chat_key(chat_id, &normalize_name(name));
        self.store.set(kind.namespace(), &key, payload);
    }

    pub fn get(&self, kind: RuleKind, chat_id: i64, name: &str) -> Option<String> {
        let key = chat_key(chat_id, &normalize_name(name));
        match self.store.get(kind.namespace(), &key)? {
            Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// `(name, payload)` pairs for one chat, ordered by name.
    pub fn entries(&self, kind: RuleKind, chat_id: i64) -> Vec<(String, String)> {
        let prefix = chat_prefix(chat_id);
        let ns = kind.namespace();
        self.store
            .list_keys(ns)
            .into_iter()
            .filter_map(|key| {
                let name = key.strip_prefix(&prefix)?.to_string();
                match self.store.get(ns, &key)? {
                    Value::String(s) => Some((name, s)),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn names(&self, kind: RuleKind, chat_id: i64) -> Vec<String> {
        let prefix = chat_prefix(chat_id);
        self.store
            .list_keys(kind.namespace())
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Returns false when there was nothing to remove.
    pub fn remove(&self, kind: RuleKind, chat_id: i64, name: &str) -> bool {
        let key = chat_key(chat_id, &normalize_name(name));
        let ns = kind.namespace();
        if !self.store.contains(ns, &key) {
            return false;
        }
        self.store.delete(ns, &key);
        true
    }

    pub fn clear(&self, kind: RuleKind, chat_id: i64) -> usize {
        self.store
            .delete_prefix(kind.namespace(), &chat_prefix(chat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::memory_store;

    fn index() -> RuleIndex {
        RuleIndex::new(Arc::new(memory_store()))
    }

    #[test]
    fn key_helpers() {
        assert_eq!(chat_key(-100, "rules"), "-100_rules");
        assert_eq!(user_key(-100, 42, "warns"), "-100_42_warns");
        assert_eq!(chat_prefix(7), "7_");
    }

    #[test]
    fn names_are_case_folded() {
        let idx = index();
        idx.save(RuleKind::Note, 1, "Rules", "be kind");
        assert_eq!(idx.get(RuleKind::Note, 1, "RULES").as_deref(), Some("be kind"));
        assert_eq!(idx.names(RuleKind::Note, 1), vec!["rules"]);
    }

    #[test]
    fn resave_overwrites() {
        let idx = index();
        idx.save(RuleKind::Filter, 1, "hi", "hello");
        idx.save(RuleKind::Filter, 1, "hi", "hey there");
        assert_eq!(
            idx.entries(RuleKind::Filter, 1),
            vec![("hi".to_string(), "hey there".to_string())]
        );
    }

    #[test]
    fn notes_and_filters_do_not_mix() {
        let idx = index();
        idx.save(RuleKind::Note, 1, "x", "note");
        assert_eq!(idx.get(RuleKind::Filter, 1, "x"), None);
    }

    #[test]
    fn remove_reports_absence() {
        let idx = index();
        idx.save(RuleKind::Note, 1, "a", "1");
        assert!(idx.remove(RuleKind::Note, 1, "A"));
        assert!(!idx.remove(RuleKind::Note, 1, "a"));
    }

    #[test]
    fn clear_is_prefix_isolated() {
        let idx = index();
        idx.save(RuleKind::Filter, -100, "a", "1");
        idx.save(RuleKind::Filter, -100, "b", "2");
        idx.save(RuleKind::Filter, -1001, "a", "3");
        idx.save(RuleKind::Note, -100, "keep", "4");

        assert_eq!(idx.clear(RuleKind::Filter, -100), 2);
        assert!(idx.names(RuleKind::Filter, -100).is_empty());
        assert_eq!(idx.names(RuleKind::Filter, -1001), vec!["a"]);
        assert_eq!(idx.names(RuleKind::Note, -100), vec!["keep"]);
    }

    #[test]
    fn entries_are_sorted_by_name() {
        let idx = index();
        for name in ["zebra", "apple", "mango"] {
            idx.save(RuleKind::Filter, 5, name, name);
        }
        let names: Vec<_> = idx
            .entries(RuleKind::Filter, 5)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["apple", "mango", "zebra"]);
    }
}
