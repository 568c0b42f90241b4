use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with both console and file output
pub fn init_diagnostics(log_dir: &Path) -> WorkerGuard {
    if !log_dir.exists() {
        let _ = std::fs::create_dir_all(log_dir);
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "brandcam.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(fmt::layer().with_writer(std::io::stdout)) // Console output
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false)) // File output
        .init();

    tracing::info!("Diagnostics initialized. Logs: {:?}", log_dir);

    guard
}
