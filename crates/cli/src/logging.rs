//! Tracing setup: stderr for the operator, plus a debug log per `play` session.

use std::fs::File;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// File written into the screenshot directory for each session.
pub const SESSION_LOG: &str = "session.log";

/// HTTP internals stay out of the session log even at debug level.
const SESSION_LOG_FILTER: &str = "debug,hyper=info,hyper_util=info,h2=info,reqwest=info,rustls=info";

/// Install the global subscriber.
///
/// With `session_dir` set, every debug event is also written to
/// `<session_dir>/session.log`, truncated at start. Keep the returned guard
/// alive until exit or the tail of the log is lost.
pub fn init(verbose: bool, session_dir: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { "info" };
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)));

    match session_dir {
        Some(dir) => {
            let (file_layer, guard) = session_layer(dir)?;
            tracing_subscriber::registry().with(stderr).with(file_layer).init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            Ok(None)
        }
    }
}

/// Debug-level layer writing to a fresh `session.log` in `dir`.
pub fn session_layer<S>(dir: &Path) -> std::io::Result<(impl Layer<S> + Send + Sync + 'static, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let file = File::create(dir.join(SESSION_LOG))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new(SESSION_LOG_FILTER));
    Ok((layer, guard))
}
