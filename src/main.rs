use consentkeeper::config::BotConfig;
use log::{error, info};

#[tokio::main]
async fn main() {
    let config = match BotConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("consentkeeper: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = consentkeeper::logging::init(config.logfile_path.as_deref()) {
        eprintln!("consentkeeper: {}", e);
        std::process::exit(2);
    }

    info!("[config] ConsentKeeper starting");
    tokio::select! {
        result = consentkeeper::run(config) => {
            if let Err(e) = result {
                error!("CRITICAL: bot stopped: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("[discord] Interrupted, shutting down");
        }
    }
}
