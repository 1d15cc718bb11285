use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sends tracing output to a daily rolling file under `logs/`. Keep the
/// returned guard alive until exit or buffered lines are lost.
pub fn initialize_logging() -> WorkerGuard {
    // Stdout belongs to the console driver
    if let Err(e) = std::fs::create_dir_all("logs") {
        eprintln!("could not create logs directory: {e}");
    }

    let file_appender = tracing_appender::rolling::daily("logs", "wfc-scout.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging initialized, writing to logs/wfc-scout.log");
    guard
}
