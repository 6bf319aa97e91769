use std::env;

use tracing::Dispatch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;
use tsdns_service::config::{Config, LogFormat};
use tsdns_service::logging::{build_dispatch, default_filter};

/// Installs the global subscriber and returns it, so the server can log to it explicitly.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Safety
/// May set `RUST_BACKTRACE` through [`std::env::set_var`], so this must be called before any
/// other thread is started.
pub unsafe fn init_logging(config: &Config) -> Dispatch {
    if config.logging.enable_backtraces {
        // SAFETY: upheld by the caller.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let rust_log =
        env::var("RUST_LOG").unwrap_or_else(|_| default_filter(config.logging.level).to_string());

    let format = resolve_format(config.logging.format, console::user_attended());
    let dispatch = build_dispatch(format, &rust_log, std::io::stdout);
    dispatch.clone().init();
    dispatch
}

/// Picks a concrete format for [`LogFormat::Auto`] depending on whether a user is watching.
fn resolve_format(format: LogFormat, attended: bool) -> LogFormat {
    match (format, attended) {
        (LogFormat::Auto, true) => LogFormat::Pretty,
        (LogFormat::Auto, false) => LogFormat::Simplified,
        (format, _) => format,
    }
}

/// Reports a fatal error through the logger, falling back to `stderr` while errors are not
/// being logged.
pub fn ensure_log_error(error: &anyhow::Error) {
    let logged = tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current();

    if logged {
        tracing::error!("{error:?}");
    } else {
        eprintln!("{error:?}");
    }
}
