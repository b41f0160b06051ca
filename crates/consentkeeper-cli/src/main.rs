mod commands;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "consentkeeper", version, about = "Operator tools for the ConsentKeeper bot")]
struct Cli {
    /// Emit JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and its tables (no-op if they already exist).
    InitDb {
        #[arg(long, env = "DATABASE_PATH")]
        db: Option<PathBuf>,
    },
    /// Print a fresh 256-bit ENCRYPTION_KEY (64 hex characters).
    Keygen,
    /// Show record counts and the rank distribution.
    Stats {
        #[arg(long, env = "DATABASE_PATH")]
        db: Option<PathBuf>,
    },
    /// List the consent audit log with decrypted user IDs.
    Audit {
        #[arg(long, env = "DATABASE_PATH")]
        db: Option<PathBuf>,
        #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
        key: String,
    },
    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::InitDb { db } => commands::init_db(&commands::resolve_db(db), cli.json),
        Commands::Keygen => commands::keygen(cli.json),
        Commands::Stats { db } => commands::stats(&commands::resolve_db(db), cli.json),
        Commands::Audit { db, key } => commands::audit(&commands::resolve_db(db), &key, cli.json),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "consentkeeper", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_audit_with_key() {
        let cli = Cli::try_parse_from(["consentkeeper", "--json", "audit", "--db", "x.db", "--key", "ab"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Audit { db, key } => {
                assert_eq!(db, Some(PathBuf::from("x.db")));
                assert_eq!(key, "ab");
            }
            _ => panic!("expected audit"),
        }
    }
}
