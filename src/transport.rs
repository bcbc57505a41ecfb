//! The chat platform as seen by the bot layer.

use anyhow::Result;
use async_trait::async_trait;

use crate::policy::PunishMode;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn is_admin(&self, chat_id: i64, user_id: i64) -> Result<bool>;
    async fn is_self_admin(&self, chat_id: i64) -> Result<bool>;
    async fn mute(&self, chat_id: i64, user_id: i64) -> Result<()>;
    async fn unmute(&self, chat_id: i64, user_id: i64) -> Result<()>;
    /// Removes the user but lets them join again.
    async fn kick(&self, chat_id: i64, user_id: i64) -> Result<()>;
    async fn ban(&self, chat_id: i64, user_id: i64) -> Result<()>;
    async fn unban(&self, chat_id: i64, user_id: i64) -> Result<()>;
    /// Grants the usual moderator rights.
    async fn promote(&self, chat_id: i64, user_id: i64) -> Result<()>;
    async fn demote(&self, chat_id: i64, user_id: i64) -> Result<()>;
    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<()>;
    async fn unpin(&self, chat_id: i64, message_id: i32) -> Result<()>;
    async fn unpin_all(&self, chat_id: i64) -> Result<()>;
    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()>;
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Mute,
    Unmute,
    Kick,
    Ban,
    Unban,
    Promote,
    Demote,
}

impl Action {
    pub fn verb(self) -> &'static str {
        match self {
            Action::Mute => "mute",
            Action::Unmute => "unmute",
            Action::Kick => "kick",
            Action::Ban => "ban",
            Action::Unban => "unban",
            Action::Promote => "promote",
            Action::Demote => "demote",
        }
    }

    pub async fn apply<T: Transport + ?Sized>(
        self,
        transport: &T,
        chat_id: i64,
        user_id: i64,
    ) -> Result<()> {
        match self {
            Action::Mute => transport.mute(chat_id, user_id).await,
            Action::Unmute => transport.unmute(chat_id, user_id).await,
            Action::Kick => transport.kick(chat_id, user_id).await,
            Action::Ban => transport.ban(chat_id, user_id).await,
            Action::Unban => transport.unban(chat_id, user_id).await,
            Action::Promote => transport.promote(chat_id, user_id).await,
            Action::Demote => transport.demote(chat_id, user_id).await,
        }
    }
}

/// Operations on messages rather than members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOp {
    Pin(i32),
    Unpin(i32),
    UnpinAll,
    Purge(Vec<i32>),
}

impl MessageOp {
    /// What the bot does, as in "failed to pin message".
    pub fn describe(&self) -> &'static str {
        match self {
            MessageOp::Pin(_) => "pin message",
            MessageOp::Unpin(_) => "unpin message",
            MessageOp::UnpinAll => "unpin all messages",
            MessageOp::Purge(_) => "purge messages",
        }
    }

    /// The right the bot needs, as in "permission to pin messages".
    pub fn right(&self) -> &'static str {
        match self {
            MessageOp::Pin(_) => "pin messages",
            MessageOp::Unpin(_) | MessageOp::UnpinAll => "unpin messages",
            MessageOp::Purge(_) => "purge messages",
        }
    }

    pub async fn apply<T: Transport + ?Sized>(&self, transport: &T, chat_id: i64) -> Result<()> {
        match self {
            MessageOp::Pin(id) => transport.pin(chat_id, *id).await,
            MessageOp::Unpin(id) => transport.unpin(chat_id, *id).await,
            MessageOp::UnpinAll => transport.unpin_all(chat_id).await,
            MessageOp::Purge(ids) => transport.delete_messages(chat_id, ids).await,
        }
    }
}

impl From<PunishMode> for Action {
    fn from(mode: PunishMode) -> Self {
        match mode {
            PunishMode::Mute => Action::Mute,
            PunishMode::Kick => Action::Kick,
            PunishMode::Ban => Action::Ban,
        }
    }
}
