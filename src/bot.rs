//! Async message handling on top of the synchronous engine.
//!
//! Engine calls may block on store I/O, so they run on the blocking pool.
//! Platform calls go through [`Transport`] and their failures are reported
//! back to the chat as text.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio::task;

use crate::commands::{
    help_text, resolve_target, ActRequest, CommandRegistry, Ctx, Effect, Invocation,
    MessageRequest, Replied,
};
use crate::engine::{InboundMessage, ModerationEngine, Verdict};
use crate::policy::PunishMode;
use crate::transport::Transport;
use crate::welcome::Member;

/// A platform message reduced to what moderation looks at.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub chat_title: String,
    /// Absent for channel posts and anonymous admins.
    pub sender: Option<Member>,
    pub text: Option<String>,
    pub replied: Option<Replied>,
    pub new_members: Vec<Member>,
}

#[derive(Clone)]
pub struct App {
    engine: Arc<ModerationEngine>,
    commands: Arc<CommandRegistry>,
    /// Commands addressed to another `@bot` are ignored.
    username: Option<Arc<str>>,
}

impl App {
    pub fn new(engine: ModerationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            commands: Arc::new(CommandRegistry::new()),
            username: None,
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(Arc::from(username));
        self
    }

    pub fn engine(&self) -> &Arc<ModerationEngine> {
        &self.engine
    }
}

pub async fn engine_call<T, F>(engine: &Arc<ModerationEngine>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ModerationEngine) -> T + Send + 'static,
{
    let engine = engine.clone();
    task::spawn_blocking(move || f(engine.as_ref()))
        .await
        .context("engine task join failed")
}

async fn send<T: Transport + ?Sized>(transport: &T, chat_id: i64, text: &str) -> Result<()> {
    transport
        .send_text(chat_id, text)
        .await
        .with_context(|| format!("send_text failed chat_id={}", chat_id))
}

pub async fn handle_group_message<T: Transport + ?Sized>(
    transport: &T,
    app: &App,
    msg: IncomingMessage,
) -> Result<()> {
    let chat_id = msg.chat_id;

    if !msg.new_members.is_empty() {
        return greet(transport, app, msg).await;
    }

    let Some(sender) = msg.sender.clone() else {
        return Ok(());
    };

    let sender_is_admin = match transport.is_admin(chat_id, sender.id).await {
        Ok(v) => v,
        Err(e) => {
            warn!("admin lookup failed chat_id={} user_id={}: {:?}", chat_id, sender.id, e);
            false
        }
    };

    let text = msg.text.clone().unwrap_or_default();
    let now = OffsetDateTime::now_utc();
    let user_id = sender.id;
    let engine_text = text.clone();
    let verdict = engine_call(&app.engine, move |e| {
        e.on_message(
            &InboundMessage {
                chat_id,
                user_id,
                text: &engine_text,
                sender_is_admin,
            },
            now,
        )
    })
    .await?;

    let invocation = Invocation::parse(&text);
    debug!(
        "chat_id={} user_id={} admin={} verdict={:?}",
        chat_id, user_id, sender_is_admin, verdict
    );

    match verdict {
        Verdict::Punish(mode) => punish_for_flood(transport, chat_id, sender, mode).await,
        Verdict::Reply(payload) => send(transport, chat_id, &payload).await,
        Verdict::Done => match invocation {
            Some(inv) => run_command(transport, app, &msg, sender, sender_is_admin, inv).await,
            None => {
                let note = engine_call(&app.engine, move |e| e.hashtag_note(chat_id, &text)).await?;
                match note {
                    Some(content) => send(transport, chat_id, &content).await,
                    None => Ok(()),
                }
            }
        },
    }
}

/// Private chats only get the command overview.
pub async fn handle_private_message<T: Transport + ?Sized>(
    transport: &T,
    msg: IncomingMessage,
) -> Result<()> {
    let Some(inv) = msg.text.as_deref().and_then(Invocation::parse) else {
        return Ok(());
    };
    if inv.name != "start" && inv.name != "help" {
        return Ok(());
    }
    let text = format!(
        "Hi! I moderate group chats: flood protection, warnings, notes, keyword filters and welcome messages.\nAdd me to a group as an admin to get started.\n\n{}",
        help_text()
    );
    send(transport, msg.chat_id, &text).await
}

async fn greet<T: Transport + ?Sized>(transport: &T, app: &App, msg: IncomingMessage) -> Result<()> {
    let chat_id = msg.chat_id;
    let greetings = engine_call(&app.engine, move |e| {
        e.welcome()
            .greetings(chat_id, &msg.chat_title, &msg.new_members)
    })
    .await?;
    for text in greetings {
        send(transport, chat_id, &text).await?;
    }
    Ok(())
}

async fn punish_for_flood<T: Transport + ?Sized>(
    transport: &T,
    chat_id: i64,
    sender: Member,
    mode: PunishMode,
) -> Result<()> {
    let req = ActRequest {
        action: mode.into(),
        success: format!(
            "🛑 {} has been {} for flooding!",
            sender.mention(),
            mode.past_tense()
        ),
        target: sender,
        preamble: None,
    };
    let text = carry_out(transport, chat_id, &req).await;
    send(transport, chat_id, &text).await
}

/// Attempts the action and returns the text describing what happened.
async fn carry_out<T: Transport + ?Sized>(transport: &T, chat_id: i64, req: &ActRequest) -> String {
    let verb = req.action.verb();
    let user_id = req.target.id;

    let status = match transport.is_self_admin(chat_id).await {
        Ok(true) => match req.action.apply(transport, chat_id, user_id).await {
            Ok(()) => {
                info!("{} chat_id={} user_id={}", verb, chat_id, user_id);
                req.success.clone()
            }
            Err(e) => {
                warn!("{} failed chat_id={} user_id={}: {:?}", verb, chat_id, user_id, e);
                format!("Failed to {} user: {}", verb, e)
            }
        },
        Ok(false) => format!("I don't have permission to {} users!", verb),
        Err(e) => {
            warn!("self admin lookup failed chat_id={}: {:?}", chat_id, e);
            format!("Failed to {} user: {}", verb, e)
        }
    };

    match &req.preamble {
        Some(p) => format!("{}\n\n{}", p, status),
        None => status,
    }
}

async fn run_command<T: Transport + ?Sized>(
    transport: &T,
    app: &App,
    msg: &IncomingMessage,
    sender: Member,
    sender_is_admin: bool,
    inv: Invocation,
) -> Result<()> {
    let chat_id = msg.chat_id;
    if inv.is_for_other_bot(app.username.as_deref()) {
        debug!("command /{} is for another bot chat_id={}", inv.name, chat_id);
        return Ok(());
    }
    let Some(spec) = app.commands.resolve(&inv.name) else {
        debug!("unknown command /{} chat_id={}", inv.name, chat_id);
        return Ok(());
    };

    if !spec.permission.allows(sender_is_admin, !inv.args.is_empty()) {
        return send(
            transport,
            chat_id,
            &format!("You need to be an admin to use /{}!", spec.name),
        )
        .await;
    }

    let Some((target, rest)) = resolve_target(spec.target, &sender, msg.replied.as_ref(), &inv.args)
    else {
        return send(
            transport,
            chat_id,
            &format!("I can't find that user.\nUsage: {}", spec.usage),
        )
        .await;
    };
    let rest = rest.to_vec();

    if spec.protect_target {
        if let Some(t) = &target {
            let refusal = match transport.is_admin(chat_id, t.id).await {
                Ok(false) => None,
                Ok(true) => Some(format!("I can't {} an admin!", spec.name)),
                Err(e) => {
                    warn!("target admin lookup failed chat_id={} user_id={}: {:?}", chat_id, t.id, e);
                    Some("I couldn't verify that user's admin status, try again.".to_string())
                }
            };
            if let Some(text) = refusal {
                return send(transport, chat_id, &text).await;
            }
        }
    }

    let replied = msg.replied.clone();
    let tail = inv.tail;
    let message_id = msg.message_id;
    let effect = engine_call(&app.engine, move |e| {
        let ctx = Ctx {
            chat_id,
            message_id,
            sender: &sender,
            target: target.as_ref(),
            args: &rest,
            tail: &tail,
            replied: replied.as_ref(),
        };
        (spec.handler)(e, &ctx)
    })
    .await?;

    match effect {
        Effect::Reply(text) => send(transport, chat_id, &text).await,
        Effect::Act(req) => {
            let text = carry_out(transport, chat_id, &req).await;
            send(transport, chat_id, &text).await
        }
        Effect::Messages(req) => {
            let text = carry_out_on_messages(transport, chat_id, &req).await;
            send(transport, chat_id, &text).await
        }
    }
}

async fn carry_out_on_messages<T: Transport + ?Sized>(
    transport: &T,
    chat_id: i64,
    req: &MessageRequest,
) -> String {
    match transport.is_self_admin(chat_id).await {
        Ok(true) => match req.op.apply(transport, chat_id).await {
            Ok(()) => {
                info!("{} chat_id={}", req.op.describe(), chat_id);
                req.success.clone()
            }
            Err(e) => {
                warn!("{} failed chat_id={}: {:?}", req.op.describe(), chat_id, e);
                format!("Failed to {}: {}", req.op.describe(), e)
            }
        },
        Ok(false) => format!("I don't have permission to {}!", req.op.right()),
        Err(e) => {
            warn!("self admin lookup failed chat_id={}: {:?}", chat_id, e);
            format!("Failed to {}: {}", req.op.describe(), e)
        }
    }
}

/// Drops flood windows idle for longer than `max_idle`.
pub async fn evict_flood_windows(app: &App, max_idle: time::Duration) -> Result<usize> {
    let now = OffsetDateTime::now_utc();
    let evicted = engine_call(&app.engine, move |e| e.flood().evict_stale(now, max_idle)).await?;
    if evicted > 0 {
        debug!("flood: evicted {} idle windows", evicted);
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy;
    use crate::rules::RuleKind;
    use crate::store::testing::memory_store;
    use crate::transport::fake::FakeTransport;

    const CHAT: i64 = -100;

    fn app() -> App {
        App::new(ModerationEngine::new(Arc::new(memory_store())))
    }

    fn member(id: i64, name: &str) -> Member {
        Member {
            id,
            first_name: name.into(),
            ..Default::default()
        }
    }

    fn text_from(sender: Member, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: CHAT,
            message_id: 12,
            chat_title: "Rustaceans".into(),
            sender: Some(sender),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn reply_from(sender: Member, text: &str, to: Member) -> IncomingMessage {
        IncomingMessage {
            replied: Some(Replied {
                message_id: 10,
                sender: Some(to),
                text: Some("original".into()),
            }),
            ..text_from(sender, text)
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_change_settings() {
        let (t, app) = (FakeTransport::new(), app());
        handle_group_message(&t, &app, text_from(member(5, "Eve"), "/setflood 2"))
            .await
            .unwrap();
        assert_eq!(t.sent_texts(), vec!["You need to be an admin to use /setflood!"]);
        assert_eq!(app.engine().policy(CHAT).flood.limit, policy::DEFAULT_FLOOD_LIMIT);
    }

    #[tokio::test]
    async fn non_admin_can_view_flood_settings() {
        let (t, app) = (FakeTransport::new(), app());
        handle_group_message(&t, &app, text_from(member(5, "Eve"), "/flood"))
            .await
            .unwrap();
        assert!(t.sent_texts()[0].starts_with("Flood protection is currently enabled."));
    }

    #[tokio::test]
    async fn flood_mutes_the_sender() {
        let (t, app) = (FakeTransport::new(), app());
        policy::set_flood_limit(app.engine().store(), CHAT, 2);

        for _ in 0..2 {
            handle_group_message(&t, &app, text_from(member(5, "Eve"), "spam"))
                .await
                .unwrap();
        }
        assert_eq!(t.action_names(), vec!["mute"]);
        assert_eq!(t.sent_texts(), vec!["🛑 Eve has been muted for flooding!"]);
    }

    #[tokio::test]
    async fn flood_without_bot_rights_is_reported() {
        let (t, app) = (FakeTransport::new(), app());
        *t.self_admin.lock().unwrap() = false;
        policy::set_flood_limit(app.engine().store(), CHAT, 1);

        handle_group_message(&t, &app, text_from(member(5, "Eve"), "spam"))
            .await
            .unwrap();
        assert!(t.action_names().is_empty());
        assert_eq!(t.sent_texts(), vec!["I don't have permission to mute users!"]);
    }

    #[tokio::test]
    async fn admins_are_not_flood_checked() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        policy::set_flood_limit(app.engine().store(), CHAT, 1);
        handle_group_message(&t, &app, text_from(member(1, "Ada"), "hello"))
            .await
            .unwrap();
        assert!(t.action_names().is_empty());
        assert!(t.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn filter_reply_is_sent() {
        let (t, app) = (FakeTransport::new(), app());
        app.engine()
            .rules()
            .save(RuleKind::Filter, CHAT, "hello", "Hi there!");
        handle_group_message(&t, &app, text_from(member(5, "Eve"), "Hello all"))
            .await
            .unwrap();
        assert_eq!(t.sent_texts(), vec!["Hi there!"]);
    }

    #[tokio::test]
    async fn hashtag_fetches_note() {
        let (t, app) = (FakeTransport::new(), app());
        app.engine()
            .rules()
            .save(RuleKind::Note, CHAT, "faq", "Read the wiki");
        handle_group_message(&t, &app, text_from(member(5, "Eve"), "#faq"))
            .await
            .unwrap();
        assert_eq!(t.sent_texts(), vec!["Read the wiki"]);
    }

    #[tokio::test]
    async fn warn_by_reply_escalates_to_ban() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        app.engine().warnings().set_limit(CHAT, 2);
        let eve = member(5, "Eve");

        handle_group_message(&t, &app, reply_from(member(1, "Ada"), "/warn", eve.clone()))
            .await
            .unwrap();
        handle_group_message(&t, &app, reply_from(member(1, "Ada"), "/warn spam", eve))
            .await
            .unwrap();

        let sent = t.sent_texts();
        assert_eq!(sent[0], "⚠️ Eve has been warned! (1/2)");
        assert!(sent[1].starts_with("⚠️ Eve has been warned! (2/2)\nReason: spam"));
        assert!(sent[1].ends_with("User has been banned!"));
        assert_eq!(*t.actions.lock().unwrap(), vec![("ban".to_string(), CHAT, 5)]);
        assert_eq!(app.engine().warnings().get(CHAT, 5).count, 0);
    }

    #[tokio::test]
    async fn admins_cannot_be_warned_or_banned() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        t.make_admin(CHAT, 2);
        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/ban 2"))
            .await
            .unwrap();
        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/warn 2"))
            .await
            .unwrap();
        assert_eq!(t.sent_texts(), vec!["I can't ban an admin!", "I can't warn an admin!"]);
        assert!(t.action_names().is_empty());
        assert_eq!(app.engine().warnings().get(CHAT, 2).count, 0);
    }

    #[tokio::test]
    async fn unverifiable_target_is_left_alone() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        t.make_admin(CHAT, 2);
        t.unreachable.lock().unwrap().insert(2);

        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/ban 2"))
            .await
            .unwrap();
        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/warn 2"))
            .await
            .unwrap();

        assert!(t.action_names().is_empty());
        assert_eq!(
            t.sent_texts(),
            vec![
                "I couldn't verify that user's admin status, try again.",
                "I couldn't verify that user's admin status, try again.",
            ]
        );
        assert_eq!(app.engine().warnings().get(CHAT, 2).count, 0);
    }

    #[tokio::test]
    async fn commands_for_another_bot_are_ignored() {
        let t = FakeTransport::new();
        let app = app().with_username("ModBot");
        t.make_admin(CHAT, 1);

        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/ban@OtherBot 9"))
            .await
            .unwrap();
        assert!(t.action_names().is_empty());
        assert!(t.sent_texts().is_empty());

        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/ban@modbot 9"))
            .await
            .unwrap();
        assert_eq!(t.action_names(), vec!["ban"]);
    }

    #[tokio::test]
    async fn purge_deletes_from_reply_to_command() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        handle_group_message(&t, &app, reply_from(member(1, "Ada"), "/purge", member(5, "Eve")))
            .await
            .unwrap();
        let deleted: Vec<i64> = t.actions.lock().unwrap().iter().map(|(_, _, id)| *id).collect();
        assert_eq!(deleted, vec![10, 11, 12]);
        assert_eq!(t.sent_texts(), vec!["Purged 3 messages!"]);
    }

    #[tokio::test]
    async fn pin_without_bot_rights_is_reported() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        *t.self_admin.lock().unwrap() = false;
        handle_group_message(&t, &app, reply_from(member(1, "Ada"), "/pin", member(5, "Eve")))
            .await
            .unwrap();
        assert!(t.action_names().is_empty());
        assert_eq!(t.sent_texts(), vec!["I don't have permission to pin messages!"]);
    }

    #[tokio::test]
    async fn promote_calls_transport() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        handle_group_message(&t, &app, reply_from(member(1, "Ada"), "/promote", member(5, "Eve")))
            .await
            .unwrap();
        assert_eq!(*t.actions.lock().unwrap(), vec![("promote".to_string(), CHAT, 5)]);
        assert_eq!(t.sent_texts(), vec!["Promoted Eve to admin!"]);
    }

    #[tokio::test]
    async fn missing_target_shows_usage() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/kick"))
            .await
            .unwrap();
        assert_eq!(
            t.sent_texts(),
            vec!["I can't find that user.\nUsage: /kick <user> [reason]"]
        );
    }

    #[tokio::test]
    async fn failed_action_is_reported() {
        let (t, app) = (FakeTransport::new(), app());
        t.make_admin(CHAT, 1);
        *t.fail_actions.lock().unwrap() = true;
        handle_group_message(&t, &app, text_from(member(1, "Ada"), "/mute 9"))
            .await
            .unwrap();
        assert_eq!(
            t.sent_texts(),
            vec!["Failed to mute user: not enough rights to mute chat member"]
        );
    }

    #[tokio::test]
    async fn new_members_are_greeted() {
        let (t, app) = (FakeTransport::new(), app());
        let bot = Member {
            is_bot: true,
            ..member(8, "Helper")
        };
        let msg = IncomingMessage {
            chat_id: CHAT,
            chat_title: "Rustaceans".into(),
            new_members: vec![member(5, "Eve"), bot],
            ..Default::default()
        };
        handle_group_message(&t, &app, msg).await.unwrap();
        assert_eq!(t.sent_texts(), vec!["Hello Eve, welcome to Rustaceans!"]);
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let (t, app) = (FakeTransport::new(), app());
        handle_group_message(&t, &app, text_from(member(5, "Eve"), "/play despacito"))
            .await
            .unwrap();
        assert!(t.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn private_start_shows_help() {
        let t = FakeTransport::new();
        let msg = IncomingMessage {
            chat_id: 5,
            text: Some("/start".into()),
            ..Default::default()
        };
        handle_private_message(&t, msg).await.unwrap();
        assert!(t.sent_texts()[0].contains("/warn <user> [reason]"));
    }

    #[tokio::test]
    async fn eviction_drops_idle_windows() {
        let app = app();
        let now = OffsetDateTime::now_utc();
        let policy = app.engine().policy(CHAT).flood;
        app.engine()
            .flood()
            .record_and_check(CHAT, 5, now - time::Duration::hours(1), &policy);
        let evicted = evict_flood_windows(&app, time::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(app.engine().flood().tracked(), 0);
    }
}
