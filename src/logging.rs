//! Structured logging setup: console output, plus a rolling file mirror
//! when `--log-path` is given.

use std::path::Path;

use tracing_subscriber::{layer::Identity, prelude::*};

/// Initialize logging. The filter comes from `RUST_LOG` with an `info`
/// fallback.
pub fn init(log_path: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(true));

    if let Some(dir) = log_path {
        if let Some(file_layer) = build_file_layer(dir) {
            let _ = registry.with(file_layer).try_init();
            return;
        }
    }

    let _ = registry.with(Identity::new()).try_init();
}

fn build_file_layer<S>(dir: &Path) -> Option<impl tracing_subscriber::Layer<S>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if std::fs::create_dir_all(dir).is_err() {
        eprintln!(
            "Failed to create log directory '{}', continuing with console logs",
            dir.display()
        );
        return None;
    }

    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        dir,
        "mpn-relay-server.log",
    );
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    // Keep guard alive for process lifetime
    let _leaked: &'static _ = Box::leak(Box::new(file_guard));

    Some(
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking),
    )
}
