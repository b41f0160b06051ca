// discord/gateway.rs — Gateway WebSocket loop
//
// Hello (op 10) → Identify (op 2) → heartbeat task → dispatch loop.
// READY carries the application id used to register guild commands;
// INTERACTION_CREATE events are handed to their own task so heartbeats keep
// flowing while a long /collect run is in progress.
//
// Close codes 4004 (bad token), 4013 and 4014 (intents) need operator action
// and stop the bot. Everything else reconnects with escalating backoff.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use consentkeeper_core::{EngineError, EngineResult};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::interactions::{self, BotContext, Interaction};
use super::{channel_err, commands};

const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Maximum consecutive reconnect attempts before giving up entirely.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// A session shorter than this counts as a quick drop when it ends cleanly.
const STABLE_SESSION: Duration = Duration::from_secs(60);

const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

// Gateway intents.
const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MEMBERS: u64 = 1 << 1;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

/// GUILD_MEMBERS and MESSAGE_CONTENT are privileged and must be enabled in
/// the Developer Portal (Bot → Privileged Gateway Intents).
pub const INTENTS: u64 = INTENT_GUILDS | INTENT_GUILD_MEMBERS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT;

// Opcodes.
const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    d: Option<serde_json::Value>,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadyEvent {
    user: ReadyUser,
    application: ReadyApplication,
}

#[derive(Debug, Deserialize)]
struct ReadyUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ReadyApplication {
    id: String,
}

/// Aborts the heartbeat task when the session ends or is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the bridge until a fatal error or the reconnect attempts run out.
pub async fn run(ctx: Arc<BotContext>, token: String) -> EngineResult<()> {
    let mut reconnect_attempt: u32 = 0;
    let mut quick_drops: u32 = 0;
    loop {
        let started = Instant::now();
        match run_session(&ctx, &token).await {
            Ok(()) => {
                reconnect_attempt = 0;
                quick_drops = next_quick_drops(quick_drops, started.elapsed());
                let delay = crate::http::reconnect_delay(quick_drops).await;
                info!("[discord] Session ended, reconnecting after {}ms", delay.as_millis());
            }
            Err(e) if e.is_fatal() => {
                error!("[discord] Fatal: {} — stopping (fix configuration and restart)", e);
                return Err(e);
            }
            Err(e) => {
                reconnect_attempt += 1;
                if reconnect_attempt > MAX_RECONNECT_ATTEMPTS {
                    error!("[discord] Max reconnect attempts ({}) reached — giving up", MAX_RECONNECT_ATTEMPTS);
                    return Err(e);
                }
                error!("[discord] Bridge error: {} — reconnecting", e);
                let delay = crate::http::reconnect_delay(reconnect_attempt - 1).await;
                warn!("[discord] Reconnecting after {}ms backoff (attempt {})", delay.as_millis(), reconnect_attempt);
            }
        }
    }
}

/// Backoff step for a cleanly ended session. Every Identify spends the daily
/// identify quota, so repeated short sessions escalate the delay.
fn next_quick_drops(previous: u32, lasted: Duration) -> u32 {
    if lasted >= STABLE_SESSION {
        0
    } else {
        (previous + 1).min(MAX_RECONNECT_ATTEMPTS)
    }
}

fn close_code_error(code: u16, reason: &str) -> Option<EngineError> {
    match code {
        4004 => Some(EngineError::Config(
            "Invalid bot token (4004). Check DISCORD_TOKEN at discord.com/developers.".into(),
        )),
        4013 | 4014 => Some(EngineError::Config(format!(
            "Disallowed intents ({}). Enable Server Members and Message Content intents in the \
             Developer Portal → Bot → Privileged Gateway Intents.",
            code
        ))),
        1000 | 0 => None,
        _ => Some(channel_err(format!("Gateway closed: code={} {}", code, reason))),
    }
}

fn identify_payload(token: &str) -> serde_json::Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "consentkeeper",
                "device": "consentkeeper"
            }
        }
    })
}

fn heartbeat_payload(sequence: i64) -> serde_json::Value {
    let seq = if sequence < 0 { serde_json::Value::Null } else { json!(sequence) };
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// One gateway session. `Ok(())` means Discord closed cleanly or asked for
/// a reconnect.
async fn run_session(ctx: &Arc<BotContext>, token: &str) -> EngineResult<()> {
    let (ws_stream, _) = connect_async(DISCORD_GATEWAY_URL).await.map_err(channel_err)?;
    let (write, mut read) = ws_stream.split();

    let hello = read
        .next()
        .await
        .ok_or_else(|| channel_err("Gateway closed before Hello"))?
        .map_err(channel_err)?;
    let hello_payload: GatewayPayload = serde_json::from_str(hello.to_text().map_err(channel_err)?)?;
    if hello_payload.op != OP_HELLO {
        return Err(channel_err(format!("Expected Hello (op 10), got op {}", hello_payload.op)));
    }
    let heartbeat_interval = hello_payload
        .d
        .as_ref()
        .and_then(|d| d["heartbeat_interval"].as_u64())
        .unwrap_or(DEFAULT_HEARTBEAT_MS);
    info!("[discord] Connected to gateway, heartbeat_interval={}ms", heartbeat_interval);

    let write = Arc::new(tokio::sync::Mutex::new(write));
    write
        .lock()
        .await
        .send(WsMessage::Text(identify_payload(token).to_string()))
        .await
        .map_err(channel_err)?;

    // Last sequence number seen; -1 until the first dispatch.
    let sequence = Arc::new(AtomicI64::new(-1));

    let hb_write = write.clone();
    let hb_sequence = sequence.clone();
    let _heartbeat = AbortOnDrop(tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(heartbeat_interval)).await;
            let hb = heartbeat_payload(hb_sequence.load(Ordering::Relaxed));
            if let Err(e) = hb_write.lock().await.send(WsMessage::Text(hb.to_string())).await {
                warn!("[discord] Heartbeat send failed: {}", e);
                break;
            }
        }
    }));

    while let Some(msg_result) = read.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(e) => return Err(channel_err(format!("WS read error: {}", e))),
        };

        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((0u16, String::new()));
                return match close_code_error(code, &reason) {
                    Some(e) => Err(e),
                    None => {
                        info!("[discord] Gateway closed normally (code={})", code);
                        Ok(())
                    }
                };
            }
            _ => continue,
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                debug!("[discord] Unparseable gateway frame: {}", e);
                continue;
            }
        };
        if let Some(s) = payload.s {
            sequence.store(s as i64, Ordering::Relaxed);
        }

        match payload.op {
            OP_DISPATCH => dispatch(ctx, payload.t.as_deref().unwrap_or(""), payload.d).await,
            OP_HEARTBEAT => {
                let hb = heartbeat_payload(sequence.load(Ordering::Relaxed));
                write.lock().await.send(WsMessage::Text(hb.to_string())).await.map_err(channel_err)?;
            }
            OP_HEARTBEAT_ACK => {}
            OP_RECONNECT => {
                info!("[discord] Gateway requested reconnect");
                return Ok(());
            }
            OP_INVALID_SESSION => {
                let resumable = payload.d.as_ref().and_then(|d| d.as_bool()).unwrap_or(false);
                warn!("[discord] Invalid session (resumable={})", resumable);
                return Err(channel_err("Invalid session — Discord rejected the connection"));
            }
            _ => {}
        }
    }

    Ok(())
}

async fn dispatch(ctx: &Arc<BotContext>, event: &str, data: Option<serde_json::Value>) {
    let Some(d) = data else { return };
    match event {
        "READY" => match serde_json::from_value::<ReadyEvent>(d) {
            Ok(ready) => {
                info!("[discord] Ready as {} ({})", ready.user.username, ready.user.id);
                if let Err(e) = commands::register(&ctx.rest, &ready.application.id, &ctx.guild_id).await {
                    error!("[discord] Slash command sync failed: {}", e);
                }
            }
            Err(e) => warn!("[discord] Malformed READY: {}", e),
        },
        "INTERACTION_CREATE" => match serde_json::from_value::<Interaction>(d) {
            Ok(interaction) => {
                tokio::spawn(interactions::handle(ctx.clone(), interaction));
            }
            Err(e) => warn!("[discord] Malformed interaction: {}", e),
        },
        _ => {}
    }
}
