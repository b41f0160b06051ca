// ConsentKeeper — Discord Bridge
//
// Outbound-only connection to Discord: a gateway WebSocket for interaction
// events and the REST API for everything else.
//
//   gateway       — Hello/Identify/heartbeat loop, dispatch, reconnect
//   commands      — guild slash-command registration
//   interactions  — /consent, /collect and consent button handlers
//   history       — channel history as a lazy chronological stream
//   roles         — guild role membership for the rank resolver
//
// Shared REST client with one automatic rate-limit retry lives here.

pub mod commands;
pub mod gateway;
pub mod history;
pub mod interactions;
pub mod roles;

use consentkeeper_core::{EngineError, EngineResult};
use log::warn;
use serde_json::{json, Value};

pub(crate) const DISCORD_API: &str = "https://discord.com/api/v10";

pub(crate) fn channel_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::channel("discord", e.to_string())
}

/// Authorized Discord REST client. Cheap to clone.
#[derive(Clone)]
pub struct DiscordRest {
    client: reqwest::Client,
    auth: String,
    base: String,
}

impl DiscordRest {
    pub fn new(token: &str) -> Self {
        Self::with_base(token, DISCORD_API)
    }

    pub fn with_base(token: &str, base: &str) -> Self {
        DiscordRest {
            client: reqwest::Client::new(),
            auth: format!("Bot {}", token),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn get(&self, path: &str) -> EngineResult<Value> {
        self.request(reqwest::Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> EngineResult<Value> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> EngineResult<Value> {
        self.request(reqwest::Method::PATCH, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> EngineResult<Value> {
        self.request(reqwest::Method::PUT, path, Some(body)).await
    }

    /// Send one API request, retrying once when Discord answers 429.
    pub async fn request(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> EngineResult<Value> {
        let url = format!("{}{}", self.base, path);

        let (status, text) = self.send(method.clone(), &url, body).await?;
        let (status, text) = if status == 429 {
            let wait = crate::http::rate_limit_wait(&text);
            warn!("[discord] Rate limited on {}, waiting {:.1}s", path, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            let (status2, text2) = self.send(method, &url, body).await?;
            if !(200..300).contains(&status2) {
                return Err(channel_err(format!(
                    "API {} (after retry): {}",
                    status2,
                    truncate(&text2, 300)
                )));
            }
            (status2, text2)
        } else {
            (status, text)
        };

        if status == 204 {
            return Ok(json!({ "ok": true }));
        }
        if !(200..300).contains(&status) {
            return Err(channel_err(format!("API {}: {}", status, truncate(&text, 300))));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn send(&self, method: reqwest::Method, url: &str, body: Option<&Value>) -> EngineResult<(u16, String)> {
        let mut req = self
            .client
            .request(method, url)
            .header("Authorization", &self.auth)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.map_err(|e| channel_err(format!("HTTP error: {}", e)))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 300), "short");
        assert_eq!(truncate("ééé", 3), "é");
    }

    #[test]
    fn base_url_is_normalized() {
        let rest = DiscordRest::with_base("t", "http://localhost:9/api/");
        assert_eq!(rest.base, "http://localhost:9/api");
        assert_eq!(rest.auth, "Bot t");
    }
}
