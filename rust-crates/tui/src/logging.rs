use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const DEFAULT_LOG_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "guess-game.log";

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Routes `tracing` output to a daily file under `<data-dir>/logs`; the
/// terminal is owned by the UI. Keep the guard alive until exit or buffered
/// lines are lost.
pub fn init(data_dir: &Path) -> Result<WorkerGuard> {
    let dir = log_dir(data_dir);
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    Ok(guard)
}
