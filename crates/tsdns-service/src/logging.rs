//! Construction of the `tracing` subscriber used as the server's logger.
//!
//! The server does not log through a bespoke logger interface. Anything implementing
//! [`tracing::Subscriber`] can be handed to
//! [`ServerBuilder::with_logger`](crate::server::ServerBuilder::with_logger), and
//! [`build_dispatch`] creates the one the `tsdns` binary uses.

use sentry::integrations::tracing::EventFilter;
use tracing::Dispatch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

use crate::config::LogFormat;

/// Returns the default `RUST_LOG` style filter for a log level.
///
/// Debug and trace output is restricted to the tsdns crates.
pub fn default_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => "INFO,tsdns=DEBUG,tsdns_service=DEBUG",
        LevelFilter::TRACE => "INFO,tsdns=TRACE,tsdns_service=TRACE",
    }
}

/// Builds a subscriber writing to `make_writer` in the given format.
///
/// [`LogFormat::Auto`] must be resolved by the caller, it is treated as
/// [`LogFormat::Simplified`] here. Events at or above `INFO` are additionally forwarded to
/// sentry as logs, errors also as sentry events.
pub fn build_dispatch<W>(format: LogFormat, env_filter: &str, make_writer: W) -> Dispatch
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(make_writer);

    let fmt_layer = match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Auto | LogFormat::Simplified => layer.compact().with_ansi(false).boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    }
    .with_filter(EnvFilter::new(env_filter));

    let sentry_layer =
        sentry::integrations::tracing::layer().event_filter(|md| match *md.level() {
            tracing::Level::ERROR => EventFilter::Event | EventFilter::Log,
            tracing::Level::WARN | tracing::Level::INFO => EventFilter::Log,
            tracing::Level::DEBUG | tracing::Level::TRACE => EventFilter::Ignore,
        });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sentry_layer)
        .into()
}
