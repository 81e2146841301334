use pdf_chat_core::Settings;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE: &str = "pdf_bot.log";

/// Logs to stderr and appends plain-text lines to `{log_dir}/pdf_bot.log`.
/// `RUST_LOG` wins over the configured `log_level`.
pub fn init(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter()));

    fs::create_dir_all(&settings.log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(settings.log_dir.join(LOG_FILE))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()?;

    Ok(())
}
