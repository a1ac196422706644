//! studycache - command-line front end for Focus ISEP progress tracking
//! and the offline cache.

mod app;
mod commands;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use studycache_core::Config;

use app::App;

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix inside `<cache dir>/logs`
const LOG_FILE_PREFIX: &str = "studycache.log";

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). Logs go to stderr and,
/// when `log_dir` is given, to a daily rolling file. Keep the returned guard
/// alive so buffered file output is flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> Config {
    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config ({}), using defaults", e);
            Config::default()
        }
    };
    config.apply_env();
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = load_config();
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    let guard = init_tracing(Some(&cache_dir.join("logs")));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let routes = commands::routes();
    let command = match commands::parse(&routes, &args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}\n", message);
            eprint!("{}", commands::USAGE);
            std::process::exit(2);
        }
    };

    info!(command = ?command, "studycache starting");
    let mut app = App::new(config, cache_dir).await?;
    if let Err(e) = app.run(command).await {
        warn!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        drop(guard);
        std::process::exit(1);
    }

    drop(guard);
    Ok(())
}
