//! Logging initialization for the credits binary.
//!
//! Filter priority:
//! 1. CLI flags (`-v/-q`)
//! 2. `RUST_LOG`
//! 3. the default filter passed in

use anyhow::Result;
use clap_verbosity_flag::{LogLevel, Verbosity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "classbook_credits=info";

pub fn init_logging<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> Result<()> {
    let filter = if verbosity.is_present() {
        EnvFilter::try_new(verbosity.log_level_filter().to_string())?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
