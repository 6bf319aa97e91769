use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::Dispatch;

use super::Server;
use crate::config::{Config, DEFAULT_PORT};
use crate::repository::RecordRepository;

/// An error building a [`Server`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),
    #[error("repository is required")]
    MissingRepository,
    #[error("refresh interval must not be zero")]
    InvalidRefreshInterval,
    #[error("no tokio runtime available to run the server on")]
    NoRuntime,
}

#[derive(Debug)]
pub(super) struct Settings {
    pub address: SocketAddr,
    pub repository: Option<Arc<dyn RecordRepository>>,
    pub logger: Option<Dispatch>,
    pub refresh_interval: Duration,
    pub query_timeout: Option<Duration>,
    pub runtime: Option<Handle>,
}

/// Accumulates the configuration of a [`Server`].
///
/// The first invalid setting is remembered and turns every following configuration call into a
/// no-op, the error is reported by [`build`](Self::build). No background work is started before
/// `build` succeeds.
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
/// use tsdns_service::repository::FileRepository;
/// use tsdns_service::server::ServerBuilder;
///
/// let repository = FileRepository::open("/var/lib/tsdns/records.json").await?;
/// let server = ServerBuilder::new("0.0.0.0")
///     .with_repository(Arc::new(repository))
///     .build()?;
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServerBuilder {
    settings: Result<Settings, BuildError>,
}

impl ServerBuilder {
    /// Starts configuring a server listening on `ip` and the default port.
    ///
    /// `ip` must be the wildcard address `0.0.0.0` or any valid IPv4 or IPv6 address.
    pub fn new(ip: &str) -> Self {
        let settings = match ip.parse::<IpAddr>() {
            Ok(ip) => Ok(Settings {
                address: SocketAddr::new(ip, DEFAULT_PORT),
                repository: None,
                logger: None,
                refresh_interval: Duration::from_secs(30),
                query_timeout: Some(Duration::from_secs(10)),
                runtime: None,
            }),
            Err(_) => Err(BuildError::InvalidAddress(ip.to_owned())),
        };
        Self { settings }
    }

    /// Applies the server related parts of a loaded [`Config`].
    pub fn from_config(config: &Config, repository: Arc<dyn RecordRepository>) -> Self {
        Self::new(&config.bind_ip)
            .with_port(config.port)
            .with_repository(repository)
            .with_refresh_interval(config.refresh_interval)
            .with_query_timeout(config.query_timeout)
    }

    fn configure(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        if let Ok(settings) = &mut self.settings {
            f(settings);
        }
        self
    }

    /// Sets the port to listen on. Port `0` picks a free port when binding.
    pub fn with_port(self, port: u16) -> Self {
        self.configure(|settings| settings.address.set_port(port))
    }

    /// Sets the repository records are stored in. Required.
    pub fn with_repository(self, repository: Arc<dyn RecordRepository>) -> Self {
        self.configure(|settings| settings.repository = Some(repository))
    }

    /// Sets the subscriber all server tasks log to.
    ///
    /// Without a logger, events go to whichever subscriber is the default where the server's
    /// futures are polled, usually the global one.
    pub fn with_logger(self, logger: impl Into<Dispatch>) -> Self {
        let logger = logger.into();
        self.configure(|settings| settings.logger = Some(logger))
    }

    /// Sets how often the cache is reloaded in the background. Defaults to 30 seconds.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            if self.settings.is_ok() {
                self.settings = Err(BuildError::InvalidRefreshInterval);
            }
            return self;
        }
        self.configure(|settings| settings.refresh_interval = interval)
    }

    /// Sets how long a client may take to send its query. Defaults to 10 seconds.
    pub fn with_query_timeout(self, timeout: Option<Duration>) -> Self {
        self.configure(|settings| settings.query_timeout = timeout)
    }

    /// Sets the runtime background tasks and connection handlers are spawned on.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn with_runtime(self, runtime: Handle) -> Self {
        self.configure(|settings| settings.runtime = Some(runtime))
    }

    /// Validates the configuration, creates the server and starts its cache refresher.
    pub fn build(self) -> Result<Server, BuildError> {
        let mut settings = self.settings?;

        let repository = settings
            .repository
            .take()
            .ok_or(BuildError::MissingRepository)?;
        let runtime = match settings.runtime.take() {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };

        Ok(Server::launch(settings, repository, runtime))
    }

    /// Like [`build`](Self::build), but panics if the configuration is invalid.
    pub fn must_build(self) -> Server {
        match self.build() {
            Ok(server) => server,
            Err(err) => panic!("failed to build server: {err}"),
        }
    }
}
