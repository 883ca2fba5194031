use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;

mod parse;
pub use parse::*;

mod table;
pub use table::*;

mod cli;
pub use cli::*;

/// Installs a stderr `tracing` subscriber at the given level (`off`,
/// `error`, `warn`, `info`, `debug` or `trace`).
///
/// Only the first successful call installs a subscriber; later calls are
/// accepted and ignored.
pub fn init_logging(level: &str) -> Result<()> {
    let filter: LevelFilter = level
        .parse()
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let _ = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Ok(())
}
