//! Keyword filters: the first keyword that appears as a whole word in a
//! message decides the reply.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::warn;
use regex::Regex;

use crate::rules::{RuleIndex, RuleKind};

pub struct FilterMatcher {
    rules: RuleIndex,
    /// Compiled patterns per chat, trimmed to the chat's current keywords.
    patterns: Mutex<HashMap<i64, HashMap<String, Regex>>>,
}

/// Bounded on both sides by a non-word character or the edge of the text.
fn keyword_pattern(keyword: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?:\W|^){}(?:\W|$)", regex::escape(keyword)))
}

impl FilterMatcher {
    pub fn new(rules: RuleIndex) -> Self {
        Self {
            rules,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Payload of the first matching filter, in keyword order.
    pub fn find_match(&self, chat_id: i64, text: &str) -> Option<String> {
        let entries = self.rules.entries(RuleKind::Filter, chat_id);
        let mut all = self
            .patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            all.remove(&chat_id);
            return None;
        }

        let patterns = all.entry(chat_id).or_default();
        patterns.retain(|k, _| entries.iter().any(|(keyword, _)| keyword == k));

        let text = text.to_lowercase();
        entries
            .into_iter()
            .find(|(keyword, _)| matches(patterns, keyword, &text))
            .map(|(_, payload)| payload)
    }
}

fn matches(patterns: &mut HashMap<String, Regex>, keyword: &str, lowered: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if !patterns.contains_key(keyword) {
        match keyword_pattern(keyword) {
            Ok(re) => {
                patterns.insert(keyword.to_string(), re);
            }
            Err(e) => {
                warn!("filters: cannot compile pattern for '{}': {}", keyword, e);
                return false;
            }
        }
    }
    patterns
        .get(keyword)
        .is_some_and(|re| re.is_match(lowered))
}
