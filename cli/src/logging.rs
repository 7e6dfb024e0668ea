use crate::utils::env_paths::EnvPaths;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging: a daily rolling file under `data/logs` plus stderr.
///
/// Console output goes to stderr so command output on stdout stays parseable.
pub fn init_logging(
    env_paths: &EnvPaths,
    default_level: &str,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = env_paths.logs_path();
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("marc")
        .filename_suffix("log")
        .build(&logs_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Local offset lookup fails in some multi-threaded environments
    let timer = OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
        OffsetTime::new(
            time::UtcOffset::UTC,
            time::format_description::well_known::Rfc3339,
        )
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_timer(timer.clone())
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(timer)
                .with_target(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    tracing::debug!("Log files are being written to: {:?}", logs_dir);

    Ok(guard)
}
