// ConsentKeeper — Logger setup
//
// env_logger with a fixed line format:
//   2025-01-31 12:00:00 [INFO] consentkeeper_core::registry: [registry] ...
// Default level is debug; RUST_LOG overrides. With LOGFILE_PATH set, every
// record goes to stderr and is appended to the file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use consentkeeper_core::EngineResult;
use env_logger::{Builder, Env, Target};

const DEFAULT_FILTER: &str = "debug";

/// Writes every buffer to stderr and to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // stderr is best effort; the file is the durable copy.
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

pub fn format_line(timestamp: &str, level: log::Level, target: &str, message: &std::fmt::Arguments<'_>) -> String {
    format!("{} [{}] {}: {}", timestamp, level, target, message)
}

/// Install the global logger. Call once, before anything logs.
pub fn init(logfile: Option<&Path>) -> EngineResult<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER));
    builder.format(|buf, record| {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        writeln!(buf, "{}", format_line(&ts, record.level(), record.target(), record.args()))
    });
    // Dependency chatter stays at info even under the debug default.
    for noisy in ["tungstenite", "tokio_tungstenite", "reqwest", "hyper", "hyper_util", "rustls"] {
        builder.filter_module(noisy, log::LevelFilter::Info);
    }

    if let Some(path) = logfile {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }

    builder
        .try_init()
        .map_err(|e| consentkeeper_core::EngineError::Config(format!("logger already installed: {}", e)))
}
