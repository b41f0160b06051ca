// discord/commands.rs — Guild slash commands
//
// Registered with a bulk overwrite on every READY, so the guild always
// carries exactly these two commands.

use consentkeeper_core::EngineResult;
use log::info;
use serde_json::{json, Value};

use super::DiscordRest;

pub const CONSENT_COMMAND: &str = "consent";
pub const COLLECT_COMMAND: &str = "collect";
pub const PASSWORD_OPTION: &str = "password";

/// Discord application command option type for strings.
const OPTION_STRING: u8 = 3;

pub fn definitions() -> Value {
    json!([
        {
            "name": CONSENT_COMMAND,
            "type": 1,
            "description": "Manage your consent for message collection.",
        },
        {
            "name": COLLECT_COMMAND,
            "type": 1,
            "description": "Collects messages from channel",
            "options": [{
                "type": OPTION_STRING,
                "name": PASSWORD_OPTION,
                "description": "Password required to execute command.",
                "required": true,
            }],
        },
    ])
}

pub async fn register(rest: &DiscordRest, application_id: &str, guild_id: &str) -> EngineResult<()> {
    let path = format!("/applications/{}/guilds/{}/commands", application_id, guild_id);
    rest.put(&path, &definitions()).await?;
    info!("[discord] Slash commands synced to guild {}", guild_id);
    Ok(())
}
