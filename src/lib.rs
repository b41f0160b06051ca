// ConsentKeeper — Discord bot
// Thin platform layer over consentkeeper-core: configuration, logging, and
// the Discord gateway/REST bridge.

pub mod config;
pub mod discord;
pub mod http;
pub mod logging;

use std::sync::Arc;

use consentkeeper_core::{ConsentRegistry, EngineResult, RankResolver, Store};
use log::info;

use crate::config::BotConfig;
use crate::discord::interactions::BotContext;
use crate::discord::DiscordRest;

/// Open the store, assemble the handlers, and run the gateway bridge until
/// it stops on a fatal error.
pub async fn run(config: BotConfig) -> EngineResult<()> {
    let cipher = Arc::new(config.cipher()?);
    let store = Arc::new(Store::open(&config.database_path)?);
    let tiers = config.rank_tiers()?;
    info!(
        "[config] guild={} channel={} tiers={} db={}",
        config.guild_id,
        config.channel_id,
        tiers.len(),
        config.database_path.display()
    );

    let registry = ConsentRegistry::new(store, cipher);
    let ctx = Arc::new(BotContext::new(
        DiscordRest::new(&config.discord_token),
        registry,
        RankResolver::new(tiers),
        config.guild_id.clone(),
        config.channel_id.clone(),
        config.collect_password.clone(),
    ));

    discord::gateway::run(ctx, config.discord_token.clone()).await
}
