//! Statsd reporting for the cache and the query server.
//!
//! Metrics are a no-op until [`configure`] has been called with a statsd address. All metrics are
//! emitted through the [`metric!`](crate::metric) macro:
//!
//! | name                    | type    | tags     |
//! |-------------------------|---------|----------|
//! | `server.starting`       | counter |          |
//! | `accept.error`          | counter |          |
//! | `query.received`        | counter |          |
//! | `query.hit`             | counter |          |
//! | `query.miss`            | counter |          |
//! | `query.timeout`         | counter |          |
//! | `cache.reload`          | counter | `result` |
//! | `cache.records`         | gauge   |          |
//! | `cache.reload.duration` | timer   |          |

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

use crate::config::Metrics;

static CLIENT: OnceLock<MetricsClient> = OnceLock::new();

#[doc(hidden)]
pub mod prelude {
    pub use cadence::prelude::*;
}

/// A statsd client that attaches the configured custom tags to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    statsd: StatsdClient,
    tags: Vec<(String, String)>,
}

impl MetricsClient {
    /// The underlying statsd client.
    pub fn statsd(&self) -> &StatsdClient {
        &self.statsd
    }

    /// Adds the custom tags to `metric` and sends it.
    pub fn send<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.tags
            .iter()
            .fold(metric, |metric, (tag, value)| metric.with_tag(tag, value))
            .send()
    }
}

/// Starts reporting metrics to the statsd server in `config`.
///
/// Does nothing if no statsd server is configured. Only the first successful call installs a
/// client, it stays in place for the lifetime of the process.
pub fn configure(config: &Metrics) -> Result<()> {
    let Some(ref host) = config.statsd else {
        return Ok(());
    };

    let addrs: Vec<SocketAddr> = host
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve statsd host {host}"))?
        .collect();
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket)?;

    let client = MetricsClient {
        statsd: StatsdClient::from_sink(&config.prefix, sink),
        tags: config
            .custom_tags
            .iter()
            .map(|(tag, value)| (tag.clone(), value.clone()))
            .collect(),
    };

    match CLIENT.set(client) {
        Ok(()) => tracing::info!(prefix = %config.prefix, "reporting metrics to statsd at {}", host),
        Err(_) => tracing::warn!("statsd client was already configured"),
    }
    Ok(())
}

/// Invokes `f` with the installed client, or returns the default if metrics are disabled.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CLIENT.get().map(f).unwrap_or_default()
}

/// Emits a metric.
///
/// ```ignore
/// metric!(counter("query.hit") += 1);
/// metric!(counter("cache.reload") += 1, "result" => "ok");
/// metric!(gauge("cache.records") = 42);
/// metric!(timer("cache.reload.duration") = start.elapsed());
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send count_with_tags, $id, $value $(, $k => $v)*)
    };
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $id, $value $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags, $id, $value $(, $k => $v)*)
    };

    (@send $method:ident, $id:expr, $value:expr $(, $k:expr => $v:expr)*) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(client.statsd().$method($id, $value)$(.with_tag($k, $v))*);
        })
    }};
}
