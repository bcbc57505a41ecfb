use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dotenvy::dotenv;
use log::{error, info, warn};
use teloxide::prelude::*;
use teloxide::types::{ChatPermissions, MessageId, User};

use modbot::bot::{self, App, IncomingMessage};
use modbot::commands::Replied;
use modbot::config::Config;
use modbot::engine::ModerationEngine;
use modbot::store::Store;
use modbot::transport::Transport;
use modbot::welcome::Member;

struct TeloxideTransport {
    bot: Bot,
    me: UserId,
}

fn user_id(id: i64) -> UserId {
    UserId(id as u64)
}

#[async_trait]
impl Transport for TeloxideTransport {
    async fn is_admin(&self, chat_id: i64, user: i64) -> Result<bool> {
        let member = self.bot.get_chat_member(ChatId(chat_id), user_id(user)).await?;
        Ok(member.kind.is_privileged())
    }

    async fn is_self_admin(&self, chat_id: i64) -> Result<bool> {
        self.is_admin(chat_id, self.me.0 as i64).await
    }

    async fn mute(&self, chat_id: i64, user: i64) -> Result<()> {
        self.bot
            .restrict_chat_member(ChatId(chat_id), user_id(user), ChatPermissions::empty())
            .await?;
        Ok(())
    }

    async fn unmute(&self, chat_id: i64, user: i64) -> Result<()> {
        self.bot
            .restrict_chat_member(ChatId(chat_id), user_id(user), ChatPermissions::all())
            .await?;
        Ok(())
    }

    async fn kick(&self, chat_id: i64, user: i64) -> Result<()> {
        self.bot.ban_chat_member(ChatId(chat_id), user_id(user)).await?;
        self.bot.unban_chat_member(ChatId(chat_id), user_id(user)).await?;
        Ok(())
    }

    async fn ban(&self, chat_id: i64, user: i64) -> Result<()> {
        self.bot.ban_chat_member(ChatId(chat_id), user_id(user)).await?;
        Ok(())
    }

    async fn unban(&self, chat_id: i64, user: i64) -> Result<()> {
        self.bot.unban_chat_member(ChatId(chat_id), user_id(user)).await?;
        Ok(())
    }

    async fn promote(&self, chat_id: i64, user: i64) -> Result<()> {
        self.bot
            .promote_chat_member(ChatId(chat_id), user_id(user))
            .can_change_info(true)
            .can_delete_messages(true)
            .can_restrict_members(true)
            .can_invite_users(true)
            .can_pin_messages(true)
            .can_manage_video_chats(true)
            .await?;
        Ok(())
    }

    async fn demote(&self, chat_id: i64, user: i64) -> Result<()> {
        // No rights granted means a plain member again.
        self.bot
            .promote_chat_member(ChatId(chat_id), user_id(user))
            .can_change_info(false)
            .can_delete_messages(false)
            .can_restrict_members(false)
            .can_invite_users(false)
            .can_pin_messages(false)
            .can_manage_video_chats(false)
            .await?;
        Ok(())
    }

    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .pin_chat_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn unpin(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .unpin_chat_message(ChatId(chat_id))
            .message_id(MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn unpin_all(&self, chat_id: i64) -> Result<()> {
        self.bot.unpin_all_chat_messages(ChatId(chat_id)).await?;
        Ok(())
    }

    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()> {
        // The Bot API takes at most 100 ids per call.
        for chunk in message_ids.chunks(100) {
            self.bot
                .delete_messages(ChatId(chat_id), chunk.iter().map(|&id| MessageId(id)))
                .await?;
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }
}

fn member_from(u: &User) -> Member {
    Member {
        id: u.id.0 as i64,
        first_name: u.first_name.clone(),
        last_name: u.last_name.clone(),
        username: u.username.clone(),
        is_bot: u.is_bot,
    }
}

fn incoming_from(msg: &Message) -> IncomingMessage {
    IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        chat_title: msg.chat.title().unwrap_or("this group").to_string(),
        sender: msg.from.as_ref().map(member_from),
        text: msg.text().map(|t| t.to_string()),
        replied: msg.reply_to_message().map(|r| Replied {
            message_id: r.id.0,
            sender: r.from.as_ref().map(member_from),
            text: r.text().or_else(|| r.caption()).map(|t| t.to_string()),
        }),
        new_members: msg
            .new_chat_members()
            .map(|users| users.iter().map(member_from).collect())
            .unwrap_or_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    let config = Config::from_env()?;
    let store = Store::open(config.store_backend, &config.data_dir)?;
    info!("Store: {}", store.describe());

    let bot = Bot::new(config.bot_token.clone());
    let me = bot.get_me().await?;
    info!("Bot started as @{}", me.username());

    let app = App::new(ModerationEngine::new(Arc::new(store))).with_username(me.username());
    let transport = Arc::new(TeloxideTransport {
        bot: bot.clone(),
        me: me.id,
    });

    let sweeper = app.clone();
    let idle = config.flood_evict_after;
    let max_idle = time::Duration::seconds(idle.as_secs() as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(idle);
        loop {
            ticker.tick().await;
            if let Err(e) = bot::evict_flood_windows(&sweeper, max_idle).await {
                warn!("flood eviction failed: {:?}", e);
            }
        }
    });

    let handler = dptree::entry().branch(
        Update::filter_message()
            .branch(
                dptree::filter(|m: Message| m.chat.is_group() || m.chat.is_supergroup())
                    .endpoint(
                        |transport: Arc<TeloxideTransport>, app: App, msg: Message| async move {
                            if let Err(e) =
                                bot::handle_group_message(transport.as_ref(), &app, incoming_from(&msg))
                                    .await
                            {
                                error!("group handler error: {:?}", e);
                            }
                            Ok::<(), anyhow::Error>(())
                        },
                    ),
            )
            .branch(
                dptree::filter(|m: Message| m.chat.is_private()).endpoint(
                    |transport: Arc<TeloxideTransport>, msg: Message| async move {
                        if let Err(e) =
                            bot::handle_private_message(transport.as_ref(), incoming_from(&msg)).await
                        {
                            error!("private handler error: {:?}", e);
                        }
                        Ok::<(), anyhow::Error>(())
                    },
                ),
            ),
    );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app, transport])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
