//! Group commands.
//!
//! Commands are listed in one static table and indexed by name once at
//! startup. A handler is a plain function over the engine: it updates state
//! and says what should happen next, and the async bot layer performs any
//! platform action that follows.

use std::collections::HashMap;

use log::{info, warn};

use crate::engine::ModerationEngine;
use crate::policy::{self, PunishMode};
use crate::rules::{normalize_name, RuleKind};
use crate::transport::{Action, MessageOp};
use crate::welcome::{Member, DEFAULT_WELCOME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
    /// Everything after the command word, leading whitespace removed.
    pub tail: String,
    /// The `@bot` suffix, if any.
    pub addressee: Option<String>,
}

impl Invocation {
    /// Parses `/name@bot arg1 arg2 ...`. Returns `None` for non-commands.
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.strip_prefix('/')?;
        let (head, tail) = match body.find(char::is_whitespace) {
            Some(i) => (&body[..i], body[i..].trim()),
            None => (body, ""),
        };
        let (name, addressee) = match head.split_once('@') {
            Some((name, bot)) => (name, Some(bot.to_string())),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_lowercase(),
            args: tail.split_whitespace().map(str::to_string).collect(),
            tail: tail.to_string(),
            addressee,
        })
    }

    /// True when the command names another bot. Without a known own
    /// username every command is taken as ours.
    pub fn is_for_other_bot(&self, own_username: Option<&str>) -> bool {
        match (&self.addressee, own_username) {
            (Some(to), Some(me)) => !to.eq_ignore_ascii_case(me),
            _ => false,
        }
    }
}

fn after_first_word(s: &str) -> Option<&str> {
    let s = s.trim_start();
    let i = s.find(char::is_whitespace)?;
    let rest = s[i..].trim();
    (!rest.is_empty()).then_some(rest)
}

/// The message a command was sent in reply to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Replied {
    pub message_id: i32,
    pub sender: Option<Member>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Anyone,
    Admin,
    /// Anyone may look, only admins may pass arguments.
    AdminToChange,
}

impl Permission {
    pub fn allows(self, sender_is_admin: bool, has_args: bool) -> bool {
        match self {
            Permission::Anyone => true,
            Permission::Admin => sender_is_admin,
            Permission::AdminToChange => sender_is_admin || !has_args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRule {
    NoTarget,
    Required,
    OrSender,
}

pub struct Ctx<'a> {
    pub chat_id: i64,
    /// The command message itself.
    pub message_id: i32,
    pub sender: &'a Member,
    pub target: Option<&'a Member>,
    /// Arguments left once a target id has been taken from the front.
    pub args: &'a [String],
    pub tail: &'a str,
    pub replied: Option<&'a Replied>,
}

impl Ctx<'_> {
    fn reason(&self) -> Option<String> {
        (!self.args.is_empty()).then(|| self.args.join(" "))
    }

    fn replied_text(&self) -> Option<&str> {
        self.replied.and_then(|r| r.text.as_deref())
    }
}

/// A platform action to attempt, and what to say about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActRequest {
    pub action: Action,
    pub target: Member,
    /// Sent ahead of the outcome line whatever the outcome.
    pub preamble: Option<String>,
    pub success: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRequest {
    pub op: MessageOp,
    pub success: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Reply(String),
    Act(ActRequest),
    Messages(MessageRequest),
}

fn reply(text: impl Into<String>) -> Effect {
    Effect::Reply(text.into())
}

pub type Handler = fn(&ModerationEngine, &Ctx<'_>) -> Effect;

pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub about: &'static str,
    pub permission: Permission,
    pub target: TargetRule,
    /// Refuse when the target is a chat admin.
    pub protect_target: bool,
    pub handler: Handler,
}

const fn cmd(
    name: &'static str,
    usage: &'static str,
    about: &'static str,
    permission: Permission,
    handler: Handler,
) -> CommandSpec {
    CommandSpec {
        name,
        usage,
        about,
        permission,
        target: TargetRule::NoTarget,
        protect_target: false,
        handler,
    }
}

const fn targeted(
    name: &'static str,
    usage: &'static str,
    about: &'static str,
    target: TargetRule,
    protect_target: bool,
    handler: Handler,
) -> CommandSpec {
    CommandSpec {
        name,
        usage,
        about,
        permission: Permission::Admin,
        target,
        protect_target,
        handler,
    }
}

static COMMANDS: &[CommandSpec] = &[
    cmd("save", "/save <name> <text>", "Save a note (or reply to a message)", Permission::Admin, save_note),
    cmd("get", "/get <name>", "Show a note (also #name)", Permission::Anyone, get_note),
    cmd("notes", "/notes", "List saved notes", Permission::Anyone, list_notes),
    cmd("clear", "/clear <name>", "Delete a note", Permission::Admin, clear_note),
    cmd("clearall", "/clearall confirm", "Delete every note in this chat", Permission::Admin, clear_all_notes),
    cmd("filter", "/filter <keyword> <reply>", "Add a keyword filter", Permission::Admin, add_filter),
    cmd("filters", "/filters", "List active filters", Permission::Anyone, list_filters),
    cmd("stop", "/stop <keyword>", "Remove a filter", Permission::Admin, stop_filter),
    cmd("stopall", "/stopall confirm", "Remove every filter in this chat", Permission::Admin, stop_all_filters),
    targeted("warn", "/warn <user> [reason]", "Warn a user", TargetRule::Required, true, warn_user),
    CommandSpec {
        permission: Permission::Anyone,
        ..targeted("warns", "/warns [user]", "Show a user's warnings", TargetRule::OrSender, false, check_warns)
    },
    targeted("resetwarns", "/resetwarns <user>", "Reset a user's warnings", TargetRule::Required, false, reset_warns),
    cmd("warnlimit", "/warnlimit [number]", "Show or set the warning limit", Permission::AdminToChange, warn_limit),
    cmd("warnmode", "/warnmode [ban|kick|mute]", "Show or set the warning mode", Permission::AdminToChange, warn_mode),
    cmd("setflood", "/setflood <number>", "Messages allowed per time frame", Permission::Admin, set_flood),
    cmd("setfloodtime", "/setfloodtime <seconds>", "Flood detection time frame", Permission::Admin, set_flood_time),
    cmd("setfloodmode", "/setfloodmode <mute|kick|ban>", "Flood punishment", Permission::Admin, set_flood_mode),
    cmd("flood", "/flood [on|off]", "Show or toggle flood protection", Permission::AdminToChange, flood_settings),
    cmd("welcome", "/welcome [on|off]", "Show or toggle welcome messages", Permission::Admin, welcome_settings),
    cmd("setwelcome", "/setwelcome <text>", "Set the welcome template", Permission::Admin, set_welcome),
    cmd("resetwelcome", "/resetwelcome", "Restore the default welcome", Permission::Admin, reset_welcome),
    cmd("setrules", "/setrules <text>", "Set the group rules", Permission::Admin, set_rules),
    cmd("rules", "/rules", "Show the group rules", Permission::Anyone, show_rules),
    targeted("ban", "/ban <user> [reason]", "Ban a user", TargetRule::Required, true, ban_user),
    targeted("unban", "/unban <user>", "Unban a user", TargetRule::Required, false, unban_user),
    targeted("kick", "/kick <user> [reason]", "Kick a user", TargetRule::Required, true, kick_user),
    targeted("mute", "/mute <user> [reason]", "Mute a user", TargetRule::Required, true, mute_user),
    targeted("unmute", "/unmute <user>", "Unmute a user", TargetRule::Required, false, unmute_user),
    targeted("promote", "/promote <user>", "Make a user admin", TargetRule::Required, false, promote_user),
    targeted("demote", "/demote <user>", "Take admin rights away", TargetRule::Required, false, demote_user),
    cmd("pin", "/pin (reply)", "Pin the replied message", Permission::Admin, pin_message),
    cmd("unpin", "/unpin (reply)", "Unpin the replied message", Permission::Admin, unpin_message),
    cmd("unpinall", "/unpinall", "Unpin every pinned message", Permission::Admin, unpin_all),
    cmd("purge", "/purge (reply)", "Delete everything from the replied message on", Permission::Admin, purge),
    cmd("help", "/help", "Show this list", Permission::Anyone, help),
    cmd("stats", "/stats", "Store health and flood tracking", Permission::Admin, stats),
];

pub struct CommandRegistry {
    by_name: HashMap<&'static str, &'static CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut by_name = HashMap::new();
        for spec in COMMANDS {
            if by_name.insert(spec.name, spec).is_some() {
                warn!("commands: /{} registered twice, keeping the last one", spec.name);
            }
        }
        info!("commands: {} registered", by_name.len());
        Self { by_name }
    }

    pub fn resolve(&self, name: &str) -> Option<&'static CommandSpec> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

pub fn help_text() -> String {
    let mut out = String::from("Available commands:\n\n");
    for spec in COMMANDS {
        out.push_str(&format!("{} - {}\n", spec.usage, spec.about));
    }
    out.push_str("\n<user> is a reply to their message or their numeric id.");
    out
}

/// Picks the target from the replied-to message, else a leading numeric id.
/// `None` means a required target is missing.
pub fn resolve_target<'a>(
    rule: TargetRule,
    sender: &Member,
    replied: Option<&Replied>,
    args: &'a [String],
) -> Option<(Option<Member>, &'a [String])> {
    if rule == TargetRule::NoTarget {
        return Some((None, args));
    }
    if let Some(m) = replied.and_then(|r| r.sender.clone()) {
        return Some((Some(m), args));
    }
    if let Some(id) = args
        .first()
        .and_then(|a| a.parse::<i64>().ok())
        .filter(|id| *id > 0)
    {
        let member = Member {
            id,
            first_name: id.to_string(),
            ..Default::default()
        };
        return Some((Some(member), &args[1..]));
    }
    match rule {
        TargetRule::OrSender => Some((Some(sender.clone()), args)),
        _ => None,
    }
}

enum NumberArg {
    Missing,
    Invalid,
    TooSmall,
    Ok(u32),
}

fn positive_arg(args: &[String]) -> NumberArg {
    let Some(raw) = args.first() else {
        return NumberArg::Missing;
    };
    match raw.parse::<i64>() {
        Err(_) => NumberArg::Invalid,
        Ok(n) if n < 1 => NumberArg::TooSmall,
        Ok(n) => u32::try_from(n).map_or(NumberArg::Invalid, NumberArg::Ok),
    }
}

fn on_off(arg: &str) -> Option<bool> {
    match arg.to_lowercase().as_str() {
        "on" | "yes" | "enable" => Some(true),
        "off" | "no" | "disable" => Some(false),
        _ => None,
    }
}

fn target_of<'a>(ctx: &'a Ctx<'_>) -> &'a Member {
    ctx.target.unwrap_or(ctx.sender)
}

// --- notes & filters ---

fn save_rule(kind: RuleKind, e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let label = kind.label();
    let Some(name) = ctx.args.first().map(|n| normalize_name(n)) else {
        return match kind {
            RuleKind::Note => reply("Please provide a name for the note!"),
            RuleKind::Filter => reply("Please provide a keyword for the filter!"),
        };
    };
    let content = match ctx.replied {
        Some(_) => match ctx.replied_text() {
            Some(t) => t.to_string(),
            None => return reply(format!("I can only save text messages as {}s!", label)),
        },
        None => match after_first_word(ctx.tail) {
            Some(c) => c.to_string(),
            None => {
                return reply(format!(
                    "Please provide content for the {} or reply to a message!",
                    label
                ))
            }
        },
    };
    e.rules().save(kind, ctx.chat_id, &name, &content);
    match kind {
        RuleKind::Note => reply(format!("Note '{}' saved successfully!", name)),
        RuleKind::Filter => reply(format!("Filter for '{}' added successfully!", name)),
    }
}

fn save_note(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    save_rule(RuleKind::Note, e, ctx)
}

fn add_filter(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    save_rule(RuleKind::Filter, e, ctx)
}

fn get_note(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let Some(name) = ctx.args.first().map(|n| normalize_name(n)) else {
        return reply("Please provide a name for the note!");
    };
    match e.rules().get(RuleKind::Note, ctx.chat_id, &name) {
        Some(content) => reply(content),
        None => reply(format!("Note '{}' not found!", name)),
    }
}

fn list_notes(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let names = e.rules().names(RuleKind::Note, ctx.chat_id);
    if names.is_empty() {
        return reply("No notes saved in this chat!");
    }
    let mut out = String::from("Saved notes:\n\n");
    for name in names {
        out.push_str(&format!("- {}\n", name));
    }
    out.push_str("\nYou can get a note by using /get notename or #notename");
    reply(out)
}

fn list_filters(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let names = e.rules().names(RuleKind::Filter, ctx.chat_id);
    if names.is_empty() {
        return reply("No filters active in this chat!");
    }
    let mut out = String::from("Active filters:\n\n");
    for name in names {
        out.push_str(&format!("- {}\n", name));
    }
    reply(out.trim_end())
}

fn clear_note(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let Some(name) = ctx.args.first().map(|n| normalize_name(n)) else {
        return reply("Please provide a name for the note to delete!");
    };
    if e.rules().remove(RuleKind::Note, ctx.chat_id, &name) {
        reply(format!("Note '{}' deleted successfully!", name))
    } else {
        reply(format!("Note '{}' not found!", name))
    }
}

fn stop_filter(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let Some(name) = ctx.args.first().map(|n| normalize_name(n)) else {
        return reply("Please provide a keyword for the filter to remove!");
    };
    if e.rules().remove(RuleKind::Filter, ctx.chat_id, &name) {
        reply(format!("Filter '{}' removed successfully!", name))
    } else {
        reply(format!("Filter '{}' not found!", name))
    }
}

fn confirmed(ctx: &Ctx<'_>) -> bool {
    ctx.args
        .first()
        .is_some_and(|a| a.eq_ignore_ascii_case("confirm"))
}

fn clear_all_notes(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    if !confirmed(ctx) {
        return reply(
            "This deletes ALL notes in this chat and cannot be undone.\nSend /clearall confirm to proceed.",
        );
    }
    let n = e.rules().clear(RuleKind::Note, ctx.chat_id);
    reply(format!("Deleted {} notes from this chat!", n))
}

fn stop_all_filters(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    if !confirmed(ctx) {
        return reply(
            "This removes ALL filters in this chat and cannot be undone.\nSend /stopall confirm to proceed.",
        );
    }
    let n = e.rules().clear(RuleKind::Filter, ctx.chat_id);
    reply(format!("Removed {} filters from this chat!", n))
}

// --- warnings ---

fn warn_user(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let target = target_of(ctx);
    let out = e.warnings().warn(ctx.chat_id, target.id);

    let mut text = format!(
        "⚠️ {} has been warned! ({}/{})",
        target.mention(),
        out.new_count,
        out.limit
    );
    if let Some(reason) = ctx.reason() {
        text.push_str(&format!("\nReason: {}", reason));
    }
    if !out.escalated {
        return reply(text);
    }

    text.push_str(&format!(
        "\n\nUser has reached the warning limit and will be {}!",
        out.mode.past_tense()
    ));
    Effect::Act(ActRequest {
        action: out.mode.into(),
        target: target.clone(),
        preamble: Some(text),
        success: format!("User has been {}!", out.mode.past_tense()),
    })
}

fn check_warns(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let target = target_of(ctx);
    let status = e.warnings().get(ctx.chat_id, target.id);
    reply(format!(
        "{} has {}/{} warnings.",
        target.mention(),
        status.count,
        status.limit
    ))
}

fn reset_warns(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let target = target_of(ctx);
    e.warnings().reset(ctx.chat_id, target.id);
    reply(format!("Warnings for {} have been reset.", target.mention()))
}

fn warn_limit(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match positive_arg(ctx.args) {
        NumberArg::Missing => reply(format!(
            "Current warning limit: {}\n\nUse /warnlimit [number] to set a new limit.",
            e.warnings().policy(ctx.chat_id).limit
        )),
        NumberArg::Invalid => reply("Please provide a valid number for the warning limit!"),
        NumberArg::TooSmall => reply("Warning limit must be at least 1!"),
        NumberArg::Ok(n) => {
            e.warnings().set_limit(ctx.chat_id, n);
            reply(format!("Warning limit has been set to {}.", n))
        }
    }
}

fn warn_mode(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let Some(arg) = ctx.args.first() else {
        return reply(format!(
            "Current warning mode: {}\n\nUse /warnmode [mode] to set a new mode.\nAvailable modes: ban, kick, mute",
            e.warnings().policy(ctx.chat_id).mode
        ));
    };
    match arg.parse::<PunishMode>() {
        Ok(mode) => {
            e.warnings().set_mode(ctx.chat_id, mode);
            reply(format!("Warning mode has been set to {}.", mode))
        }
        Err(_) => reply("Invalid mode! Available modes: ban, kick, mute"),
    }
}

// --- flood ---

fn reenable_flood(e: &ModerationEngine, chat_id: i64) {
    if !policy::flood_policy(e.store(), chat_id).enabled {
        policy::set_flood_enabled(e.store(), chat_id, true);
    }
}

fn set_flood(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match positive_arg(ctx.args) {
        NumberArg::Missing => reply("Please provide a number for the flood limit!"),
        NumberArg::Invalid => reply("Please provide a valid number for the flood limit!"),
        NumberArg::TooSmall => reply("Flood limit must be at least 1!"),
        NumberArg::Ok(n) => {
            policy::set_flood_limit(e.store(), ctx.chat_id, n);
            reenable_flood(e, ctx.chat_id);
            reply(format!("Flood limit has been set to {} messages.", n))
        }
    }
}

fn set_flood_time(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match positive_arg(ctx.args) {
        NumberArg::Missing => reply("Please provide a number of seconds for the flood time frame!"),
        NumberArg::Invalid => {
            reply("Please provide a valid number of seconds for the flood time frame!")
        }
        NumberArg::TooSmall => reply("Flood time must be at least 1 second!"),
        NumberArg::Ok(n) => {
            policy::set_flood_window(e.store(), ctx.chat_id, n);
            reenable_flood(e, ctx.chat_id);
            reply(format!("Flood time frame has been set to {} seconds.", n))
        }
    }
}

fn set_flood_mode(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let Some(arg) = ctx.args.first() else {
        return reply(
            "Please provide a mode for flood punishment!\n\nAvailable modes: mute, kick, ban",
        );
    };
    match arg.parse::<PunishMode>() {
        Ok(mode) => {
            policy::set_flood_mode(e.store(), ctx.chat_id, mode);
            reply(format!("Flood punishment mode has been set to {}.", mode))
        }
        Err(_) => reply("Invalid mode! Available modes: mute, kick, ban"),
    }
}

fn flood_settings(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match ctx.args.first().and_then(|a| on_off(a)) {
        Some(true) => {
            policy::set_flood_enabled(e.store(), ctx.chat_id, true);
            return reply("Flood protection has been enabled!");
        }
        Some(false) => {
            policy::set_flood_enabled(e.store(), ctx.chat_id, false);
            return reply("Flood protection has been disabled!");
        }
        None => {}
    }

    let p = e.policy(ctx.chat_id).flood;
    reply(format!(
        "Flood protection is currently {}.\n\n\
Current settings:\n\
- Limit: {} messages\n\
- Time frame: {} seconds\n\
- Mode: {}\n\n\
Use /setflood [number] to set the message limit.\n\
Use /setfloodtime [seconds] to set the time frame.\n\
Use /flood on/off to enable/disable flood protection.",
        if p.enabled { "enabled" } else { "disabled" },
        p.limit,
        p.window_secs,
        p.mode
    ))
}

// --- welcome ---

fn welcome_settings(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match ctx.args.first().and_then(|a| on_off(a)) {
        Some(true) => {
            e.welcome().set_enabled(ctx.chat_id, true);
            return reply("Welcome messages are now enabled!");
        }
        Some(false) => {
            e.welcome().set_enabled(ctx.chat_id, false);
            return reply("Welcome messages are now disabled!");
        }
        None => {}
    }
    let w = e.welcome();
    reply(format!(
        "Welcome messages are currently {}.\n\n\
Current welcome message:\n\n{}\n\n\
Use /setwelcome [text] to set a custom welcome message.\n\
Use /resetwelcome to reset to default welcome message.\n\
Use /welcome on/off to enable/disable welcome messages.",
        if w.enabled(ctx.chat_id) { "enabled" } else { "disabled" },
        w.template(ctx.chat_id)
    ))
}

fn set_welcome(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let text = ctx
        .replied_text()
        .or((!ctx.tail.is_empty()).then_some(ctx.tail));
    let Some(text) = text else {
        return reply(
            "Please provide a welcome message text or reply to a message.\n\n\
Variables you can use:\n\
- {first} - User's first name\n\
- {last} - User's last name\n\
- {mention} - Mention the user\n\
- {username} - User's username\n\
- {id} - User's ID\n\
- {chat} - Chat name",
        );
    };
    e.welcome().set_template(ctx.chat_id, text);
    reply("Welcome message has been set successfully!")
}

fn reset_welcome(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    e.welcome().reset_template(ctx.chat_id);
    reply(format!(
        "Welcome message has been reset to default:\n\n{}",
        DEFAULT_WELCOME
    ))
}

fn set_rules(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let text = ctx
        .replied_text()
        .or((!ctx.tail.is_empty()).then_some(ctx.tail));
    match text {
        Some(t) => {
            e.welcome().set_rules(ctx.chat_id, t);
            reply("Group rules have been updated!")
        }
        None => reply("Please provide the rules text or reply to a message!"),
    }
}

fn show_rules(e: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    reply(format!("Group rules:\n\n{}", e.welcome().rules(ctx.chat_id)))
}

// --- direct admin actions ---

fn act(ctx: &Ctx<'_>, action: Action, success: String) -> Effect {
    let mut success = success;
    if let Some(reason) = ctx.reason() {
        success.push_str(&format!("\nReason: {}", reason));
    }
    Effect::Act(ActRequest {
        action,
        target: target_of(ctx).clone(),
        preamble: None,
        success,
    })
}

fn ban_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Ban, format!("Banned {} from the group!", target_of(ctx).mention()))
}

fn unban_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Unban, format!("Unbanned {}!", target_of(ctx).mention()))
}

fn kick_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Kick, format!("Kicked {} from the group!", target_of(ctx).mention()))
}

fn mute_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Mute, format!("Muted {}!", target_of(ctx).mention()))
}

fn unmute_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Unmute, format!("Unmuted {}!", target_of(ctx).mention()))
}

fn promote_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Promote, format!("Promoted {} to admin!", target_of(ctx).mention()))
}

fn demote_user(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    act(ctx, Action::Demote, format!("Demoted {} to regular user!", target_of(ctx).mention()))
}

// --- messages ---

fn on_messages(op: MessageOp, success: impl Into<String>) -> Effect {
    Effect::Messages(MessageRequest {
        op,
        success: success.into(),
    })
}

fn pin_message(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match ctx.replied {
        Some(r) => on_messages(MessageOp::Pin(r.message_id), "Message pinned!"),
        None => reply("Reply to a message to pin it!"),
    }
}

fn unpin_message(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    match ctx.replied {
        Some(r) => on_messages(MessageOp::Unpin(r.message_id), "Message unpinned!"),
        None => reply("Reply to a message to unpin it!"),
    }
}

fn unpin_all(_: &ModerationEngine, _: &Ctx<'_>) -> Effect {
    on_messages(MessageOp::UnpinAll, "All messages unpinned!")
}

/// Everything from the replied message up to and including the command.
fn purge(_: &ModerationEngine, ctx: &Ctx<'_>) -> Effect {
    let Some(r) = ctx.replied else {
        return reply("Reply to a message to start purging from!");
    };
    let ids: Vec<i32> = (r.message_id..=ctx.message_id).collect();
    if ids.is_empty() {
        return reply("Reply to a message to start purging from!");
    }
    let n = ids.len();
    on_messages(MessageOp::Purge(ids), format!("Purged {} messages!", n))
}

// --- misc ---

fn help(_: &ModerationEngine, _: &Ctx<'_>) -> Effect {
    reply(help_text())
}

fn stats(e: &ModerationEngine, _: &Ctx<'_>) -> Effect {
    let m = e.store().metrics();
    reply(format!(
        "📊 Stats\n\n\
Store: {}\n\
Retried I/O: {}\n\
Failed loads: {}\n\
Dropped writes: {}\n\
Recovered namespaces: {}\n\
Tracked flood windows: {}",
        e.store().describe(),
        m.retries,
        m.failed_loads,
        m.dropped_writes,
        m.recovered_namespaces,
        e.flood().tracked()
    ))
}
