use std::sync::Arc;

use crate::rules::chat_key;
use crate::store::{Namespace, Store};

pub const DEFAULT_WELCOME: &str = "Hello {mention}, welcome to {chat}!";
pub const DEFAULT_RULES: &str = "No rules have been set for this group yet.";

/// A chat member as seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Member {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl Member {
    pub fn mention(&self) -> String {
        match &self.username {
            Some(u) => format!("@{}", u),
            None => self.first_name.clone(),
        }
    }
}

/// Fills `{first} {last} {mention} {username} {id} {chat}` in one pass, so a
/// name that itself contains a placeholder is not expanded again. Unknown
/// placeholders are left as written.
pub fn render(template: &str, member: &Member, chat_title: &str) -> String {
    let username = member
        .username
        .as_ref()
        .map(|u| format!("@{}", u))
        .unwrap_or_else(|| "No username".to_string());
    let vars = [
        ("{first}", member.first_name.clone()),
        ("{last}", member.last_name.clone().unwrap_or_default()),
        ("{mention}", member.mention()),
        ("{username}", username),
        ("{id}", member.id.to_string()),
        ("{chat}", chat_title.to_string()),
    ];

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match vars.iter().find(|(k, _)| tail.starts_with(k)) {
            Some((k, v)) => {
                out.push_str(v);
                rest = &tail[k.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Clone)]
pub struct WelcomeSettings {
    store: Arc<Store>,
}

impl WelcomeSettings {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn enabled(&self, chat_id: i64) -> bool {
        self.store
            .get_or(Namespace::Welcome, &chat_key(chat_id, "enabled"), true)
    }

    pub fn set_enabled(&self, chat_id: i64, enabled: bool) {
        self.store
            .set(Namespace::Welcome, &chat_key(chat_id, "enabled"), enabled);
    }

    pub fn template(&self, chat_id: i64) -> String {
        self.store.get_or(
            Namespace::Welcome,
            &chat_key(chat_id, "welcome"),
            DEFAULT_WELCOME.to_string(),
        )
    }

    pub fn set_template(&self, chat_id: i64, text: &str) {
        self.store
            .set(Namespace::Welcome, &chat_key(chat_id, "welcome"), text);
    }

    pub fn reset_template(&self, chat_id: i64) {
        self.store
            .delete(Namespace::Welcome, &chat_key(chat_id, "welcome"));
    }

    pub fn rules(&self, chat_id: i64) -> String {
        self.store.get_or(
            Namespace::Welcome,
            &chat_key(chat_id, "rules"),
            DEFAULT_RULES.to_string(),
        )
    }

    pub fn set_rules(&self, chat_id: i64, text: &str) {
        self.store
            .set(Namespace::Welcome, &chat_key(chat_id, "rules"), text);
    }

    /// Greetings for the humans among `joined`; empty when disabled.
    pub fn greetings(&self, chat_id: i64, chat_title: &str, joined: &[Member]) -> Vec<String> {
        if !self.enabled(chat_id) {
            return Vec::new();
        }
        let template = self.template(chat_id);
        joined
            .iter()
            .filter(|m| !m.is_bot)
            .map(|m| render(&template, m, chat_title))
            .collect()
    }
}
