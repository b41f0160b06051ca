// discord/interactions.rs — Slash command and button handlers
//
//   /consent            deferred ephemeral reply with the consent explanation
//                       and a Give/Withdraw button matching the user's state
//   button give         register, then refresh the user's rank
//   button withdraw     retract (deletes collected messages)
//   /collect password   password gate, then history ingestion + rank batch
//
// Users only ever see fixed strings. Errors go to the log with the identity
// reduced to a hash prefix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use consentkeeper_core::{
    hash_identity, hash_prefix, ConsentRegistry, EngineError, EngineResult, IngestPipeline, RankResolver,
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use super::commands::{COLLECT_COMMAND, CONSENT_COMMAND, PASSWORD_OPTION};
use super::history::channel_history;
use super::roles::GuildRoleSnapshot;
use super::DiscordRest;

// ── User-facing text ───────────────────────────────────────────────────

pub const CONSENT_MESSAGE: &str = "**Why we're asking for consent**\n\
    You're invited to contribute messages from this channel to a fully anonymized study. \
    The goal is to analyze trends by rank for coaching insights.\n\n\
    **We collect**\n\
    - Message text\n\
    - Rank (if tagged)\n\
    - Encrypted message and user IDs (so you can withdraw consent)\n\n\
    Use the buttons below to opt in or out at any time.";
pub const ALREADY_CONSENTED_MESSAGE: &str =
    "✅ You're already on the consent list. You can retract your consent below.";
pub const NOT_CONSENTED_MESSAGE: &str =
    "ℹ️ You haven't consented yet. Click below if you'd like to participate.";
pub const CONSENT_CONFIRMATION: &str = "✅ Thanks! You've been added to the consent registry.";
pub const RETRACT_CONFIRMATION: &str = "Your consent has been retracted";
pub const GENERIC_ERROR: &str = "An error occurred while processing your request. Please try again later.";
pub const RETRACT_ERROR: &str =
    "An error occurred while processing your retraction. Please try again later.";
pub const WRONG_PASSWORD: &str = "❌ Incorrect password. Access denied.";
pub const COLLECT_BUSY: &str = "A collection run is already in progress.";
pub const COLLECT_STARTED: &str = "Collecting messages...";
pub const COLLECT_FAILED: &str = "⚠️ Message collection failed. Check the bot logs.";
pub const COLLECT_NO_CONTENT: &str = "⚠️ Collection stopped: the bot cannot read message content. \
    Enable the Message Content intent in the Developer Portal (Bot → Privileged Gateway Intents).";

pub const GIVE_CONSENT_ID: &str = "consent:give";
pub const WITHDRAW_CONSENT_ID: &str = "consent:withdraw";

// ── Interaction payload ────────────────────────────────────────────────

const INTERACTION_APPLICATION_COMMAND: u8 = 2;
const INTERACTION_MESSAGE_COMPONENT: u8 = 3;

const RESPONSE_CHANNEL_MESSAGE: u8 = 4;
const RESPONSE_DEFERRED_CHANNEL_MESSAGE: u8 = 5;
const RESPONSE_UPDATE_MESSAGE: u8 = 7;

const FLAG_EPHEMERAL: u64 = 1 << 6;

const BUTTON_STYLE_SUCCESS: u8 = 3;
const BUTTON_STYLE_DANGER: u8 = 4;

#[derive(Debug, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub member: Option<InteractionMember>,
    #[serde(default)]
    pub user: Option<InteractionUser>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionMember {
    pub user: InteractionUser,
}

#[derive(Debug, Deserialize)]
pub struct InteractionUser {
    pub id: String,
}

impl Interaction {
    /// Guild interactions carry `member.user`, DMs carry `user`.
    pub fn user_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .map(|m| m.user.id.as_str())
            .or_else(|| self.user.as_ref().map(|u| u.id.as_str()))
    }

    fn option_str(&self, name: &str) -> Option<&str> {
        self.data
            .as_ref()?
            .options
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value.as_ref())
            .and_then(Value::as_str)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Consent,
    Collect { password: &'a str },
    GiveConsent,
    WithdrawConsent,
    Unknown,
}

pub fn route(interaction: &Interaction) -> Route<'_> {
    let Some(data) = interaction.data.as_ref() else {
        return Route::Unknown;
    };
    match interaction.kind {
        INTERACTION_APPLICATION_COMMAND => match data.name.as_deref() {
            Some(CONSENT_COMMAND) => Route::Consent,
            Some(COLLECT_COMMAND) => Route::Collect { password: interaction.option_str(PASSWORD_OPTION).unwrap_or("") },
            _ => Route::Unknown,
        },
        INTERACTION_MESSAGE_COMPONENT => match data.custom_id.as_deref() {
            Some(GIVE_CONSENT_ID) => Route::GiveConsent,
            Some(WITHDRAW_CONSENT_ID) => Route::WithdrawConsent,
            _ => Route::Unknown,
        },
        _ => Route::Unknown,
    }
}

// ── Response bodies ────────────────────────────────────────────────────

fn consent_button(registered: bool) -> Value {
    let (label, style, custom_id) = if registered {
        ("Withdraw Consent", BUTTON_STYLE_DANGER, WITHDRAW_CONSENT_ID)
    } else {
        ("Give Consent", BUTTON_STYLE_SUCCESS, GIVE_CONSENT_ID)
    };
    json!([{
        "type": 1,
        "components": [{ "type": 2, "style": style, "label": label, "custom_id": custom_id }],
    }])
}

/// Follow-up body for `/consent`.
pub fn consent_prompt(registered: bool) -> Value {
    let content = if registered {
        ALREADY_CONSENTED_MESSAGE.to_string()
    } else {
        format!("{}\n\n{}", NOT_CONSENTED_MESSAGE, CONSENT_MESSAGE)
    };
    json!({ "content": content, "flags": FLAG_EPHEMERAL, "components": consent_button(registered) })
}

pub fn ephemeral(content: &str) -> Value {
    json!({ "content": content, "flags": FLAG_EPHEMERAL })
}

fn callback(kind: u8, data: Value) -> Value {
    json!({ "type": kind, "data": data })
}

/// Replace the button message's text and remove its buttons.
fn update_message(content: &str) -> Value {
    callback(RESPONSE_UPDATE_MESSAGE, json!({ "content": content, "components": [] }))
}

pub fn password_matches(given: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(given.as_bytes().ct_eq(expected.as_bytes()))
}

// ── Handlers ───────────────────────────────────────────────────────────

/// Everything an interaction handler needs. One instance per process.
pub struct BotContext {
    pub rest: DiscordRest,
    pub registry: ConsentRegistry,
    pub pipeline: IngestPipeline,
    pub resolver: RankResolver,
    pub guild_id: String,
    pub channel_id: String,
    pub collect_password: String,
    collect_running: AtomicBool,
}

/// Clears the running flag when a collection run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BotContext {
    pub fn new(
        rest: DiscordRest,
        registry: ConsentRegistry,
        resolver: RankResolver,
        guild_id: String,
        channel_id: String,
        collect_password: String,
    ) -> Self {
        BotContext {
            rest,
            pipeline: IngestPipeline::new(registry.clone()),
            registry,
            resolver,
            guild_id,
            channel_id,
            collect_password,
            collect_running: AtomicBool::new(false),
        }
    }

    async fn respond(&self, interaction: &Interaction, body: Value) -> EngineResult<()> {
        let path = format!("/interactions/{}/{}/callback", interaction.id, interaction.token);
        self.rest.post(&path, &body).await.map(|_| ())
    }

    async fn follow_up(&self, interaction: &Interaction, body: Value) -> EngineResult<()> {
        let path = format!("/webhooks/{}/{}", interaction.application_id, interaction.token);
        self.rest.post(&path, &body).await.map(|_| ())
    }

    /// Role snapshot for the resolver; skipped when no tiers are configured.
    async fn role_snapshot(&self) -> EngineResult<GuildRoleSnapshot> {
        if self.resolver.tiers().is_empty() {
            return Ok(GuildRoleSnapshot::empty());
        }
        GuildRoleSnapshot::fetch(&self.rest, &self.guild_id)
            .await
            .map_err(|e| EngineError::RoleLookup(e.to_string()))
    }
}

pub async fn handle(ctx: Arc<BotContext>, interaction: Interaction) {
    let Some(user_id) = interaction.user_id().map(str::to_string) else {
        warn!("[discord] Interaction {} without a user, ignored", interaction.id);
        return;
    };

    let result = match route(&interaction) {
        Route::Consent => handle_consent(&ctx, &interaction, &user_id).await,
        Route::GiveConsent => handle_give(&ctx, &interaction, &user_id).await,
        Route::WithdrawConsent => handle_withdraw(&ctx, &interaction, &user_id).await,
        Route::Collect { password } => handle_collect(&ctx, &interaction, password).await,
        Route::Unknown => {
            warn!("[discord] Unhandled interaction type {}", interaction.kind);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(
            "[discord] Interaction for {} failed: {}",
            hash_prefix(&hash_identity(&user_id)),
            e
        );
    }
}

async fn handle_consent(ctx: &BotContext, interaction: &Interaction, user_id: &str) -> EngineResult<()> {
    ctx.respond(interaction, callback(RESPONSE_DEFERRED_CHANNEL_MESSAGE, json!({ "flags": FLAG_EPHEMERAL })))
        .await?;

    match ctx.registry.status(user_id) {
        Ok(registered) => ctx.follow_up(interaction, consent_prompt(registered)).await,
        Err(e) => {
            ctx.follow_up(interaction, ephemeral(GENERIC_ERROR)).await?;
            Err(e)
        }
    }
}

async fn handle_give(ctx: &BotContext, interaction: &Interaction, user_id: &str) -> EngineResult<()> {
    if let Err(e) = ctx.registry.register(user_id) {
        error!("[discord] CRITICAL: consent registration failed at UI level: {}", e);
        return ctx.respond(interaction, callback(RESPONSE_CHANNEL_MESSAGE, ephemeral(GENERIC_ERROR))).await;
    }
    ctx.respond(interaction, update_message(CONSENT_CONFIRMATION)).await?;

    // Rank lookup happens after the acknowledgement; Discord allows 3s.
    let user_hash = hash_identity(user_id);
    let refreshed = match ctx.role_snapshot().await {
        Ok(snapshot) => ctx.resolver.update_rank(ctx.registry.store(), &user_hash, &snapshot).await,
        Err(e) => Err(e),
    };
    if let Err(e) = refreshed {
        warn!("[discord] Rank refresh for {} failed: {}", hash_prefix(&user_hash), e);
    }
    Ok(())
}

async fn handle_withdraw(ctx: &BotContext, interaction: &Interaction, user_id: &str) -> EngineResult<()> {
    match ctx.registry.retract(user_id) {
        Ok(_) => ctx.respond(interaction, update_message(RETRACT_CONFIRMATION)).await,
        Err(e) => {
            error!("[discord] CRITICAL: consent retraction failed at UI level: {}", e);
            ctx.respond(interaction, callback(RESPONSE_CHANNEL_MESSAGE, ephemeral(RETRACT_ERROR))).await
        }
    }
}

async fn handle_collect(ctx: &BotContext, interaction: &Interaction, password: &str) -> EngineResult<()> {
    if !password_matches(password, &ctx.collect_password) {
        warn!("[discord] /collect rejected: wrong password");
        return ctx.respond(interaction, callback(RESPONSE_CHANNEL_MESSAGE, ephemeral(WRONG_PASSWORD))).await;
    }
    if ctx
        .collect_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return ctx.respond(interaction, callback(RESPONSE_CHANNEL_MESSAGE, ephemeral(COLLECT_BUSY))).await;
    }
    let _guard = RunGuard(&ctx.collect_running);

    ctx.respond(interaction, callback(RESPONSE_DEFERRED_CHANNEL_MESSAGE, json!({ "flags": FLAG_EPHEMERAL })))
        .await?;
    ctx.follow_up(interaction, ephemeral(COLLECT_STARTED)).await?;

    info!("[discord] Collection run started for channel {}", ctx.channel_id);
    match run_collection(ctx).await {
        Ok(inserted) => {
            let done = format!("Message collection complete. {} new messages stored.", inserted);
            ctx.follow_up(interaction, ephemeral(&done)).await
        }
        Err(e) => {
            error!("[discord] CRITICAL: collection run failed: {}", e);
            let text = match e {
                EngineError::MissingContentAccess(_) => COLLECT_NO_CONTENT,
                _ => COLLECT_FAILED,
            };
            ctx.follow_up(interaction, ephemeral(text)).await
        }
    }
}

/// Ingest the configured channel, then re-rank every consented user.
async fn run_collection(ctx: &BotContext) -> EngineResult<usize> {
    let source = channel_history(ctx.rest.clone(), ctx.channel_id.clone());
    let inserted = ctx.pipeline.collect(source).await?;

    let snapshot = ctx.role_snapshot().await?;
    ctx.resolver.batch_update_ranks(ctx.registry.store(), &snapshot).await?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(value: Value) -> Interaction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn routes_commands_and_buttons() {
        let consent = interaction(json!({
            "id": "1", "application_id": "9", "type": 2, "token": "t",
            "data": { "name": "consent" },
            "member": { "user": { "id": "42" } },
        }));
        assert_eq!(route(&consent), Route::Consent);
        assert_eq!(consent.user_id(), Some("42"));

        let collect = interaction(json!({
            "id": "1", "application_id": "9", "type": 2, "token": "t",
            "data": { "name": "collect", "options": [{ "name": "password", "type": 3, "value": "pw" }] },
            "user": { "id": "7" },
        }));
        assert_eq!(route(&collect), Route::Collect { password: "pw" });
        assert_eq!(collect.user_id(), Some("7"));

        let give = interaction(json!({
            "id": "1", "application_id": "9", "type": 3, "token": "t",
            "data": { "custom_id": GIVE_CONSENT_ID, "component_type": 2 },
        }));
        assert_eq!(route(&give), Route::GiveConsent);
        assert_eq!(give.user_id(), None);

        let ping = interaction(json!({ "id": "1", "application_id": "9", "type": 1, "token": "t" }));
        assert_eq!(route(&ping), Route::Unknown);
    }

    #[test]
    fn consent_prompt_matches_state() {
        let not_yet = consent_prompt(false);
        assert!(not_yet["content"].as_str().unwrap().starts_with(NOT_CONSENTED_MESSAGE));
        assert_eq!(not_yet["components"][0]["components"][0]["custom_id"], GIVE_CONSENT_ID);
        assert_eq!(not_yet["components"][0]["components"][0]["style"], BUTTON_STYLE_SUCCESS);
        assert_eq!(not_yet["flags"], FLAG_EPHEMERAL);

        let already = consent_prompt(true);
        assert_eq!(already["content"], ALREADY_CONSENTED_MESSAGE);
        assert_eq!(already["components"][0]["components"][0]["label"], "Withdraw Consent");
    }

    #[test]
    fn password_check() {
        assert!(password_matches("hunter2", "hunter2"));
        assert!(!password_matches("hunter", "hunter2"));
        assert!(!password_matches("", ""));
    }

    #[test]
    fn run_guard_clears_flag() {
        let flag = AtomicBool::new(true);
        {
            let _g = RunGuard(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
