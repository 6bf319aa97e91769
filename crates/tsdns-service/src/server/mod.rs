//! The query server and its lifecycle.
//!
//! A [`Server`] is created through a [`ServerBuilder`]. Building starts the background cache
//! refresher, [`Server::start`] loads the cache and serves queries until [`Server::close`] is
//! called.
//!
//! Concurrency model:
//!
//!  - Every accepted connection is handled by its own task. Handlers only share the
//!    [`RecordCache`], which they access under its read lock for a single lookup.
//!  - The refresher task and every record mutation reload the cache. Reloads are the only
//!    writers of the cache.
//!  - Closing cancels a single [`CancellationToken`] which stops the refresher and the accept
//!    loop. Connections that are already being handled are not interrupted.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument};

use crate::cache::RecordCache;
use crate::protocol::{MAX_QUERY_SIZE, parse_query, render_response};
use crate::refresher::run_refresher;
use crate::repository::{RecordRepository, RepositoryError};
use crate::types::{NewRecord, Record};

mod builder;

pub use builder::{BuildError, ServerBuilder};
use builder::Settings;

/// An error that stops [`Server::start`] or [`Server::serve`].
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to load the record cache")]
    InitialLoad(#[source] RepositoryError),
    #[error("the server has been closed")]
    Closed,
}

#[derive(Debug)]
struct Inner {
    address: SocketAddr,
    repository: Arc<dyn RecordRepository>,
    cache: Arc<RecordCache>,
    logger: Option<Dispatch>,
    runtime: Handle,
    query_timeout: Option<Duration>,
    shutdown: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // stop the refresher if the server was never closed
        self.shutdown.cancel();
    }
}

/// A running name resolution server.
///
/// This is a cheap handle, clones refer to the same server.
#[derive(Clone, Debug)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Creates the server from validated settings and spawns its refresher.
    fn launch(
        settings: Settings,
        repository: Arc<dyn RecordRepository>,
        runtime: Handle,
    ) -> Self {
        let server = Self {
            inner: Arc::new(Inner {
                address: settings.address,
                repository,
                cache: Arc::new(RecordCache::new()),
                logger: settings.logger,
                runtime,
                query_timeout: settings.query_timeout,
                shutdown: CancellationToken::new(),
                refresher: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };

        let refresher = server.spawn(run_refresher(
            Arc::clone(&server.inner.cache),
            Arc::clone(&server.inner.repository),
            settings.refresh_interval,
            server.inner.shutdown.clone(),
        ));
        *server.lock_refresher() = Some(refresher);

        server
    }

    fn lock_refresher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns a task that logs to the configured logger.
    fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.inner.logger {
            Some(logger) => self
                .inner
                .runtime
                .spawn(future.with_subscriber(logger.clone())),
            None => self.inner.runtime.spawn(future),
        }
    }

    /// Runs a future in the current task, logging to the configured logger.
    async fn logged<F: Future>(&self, future: F) -> F::Output {
        match &self.inner.logger {
            Some(logger) => future.with_subscriber(logger.clone()).await,
            None => future.await,
        }
    }

    /// The configured listen address.
    pub fn address(&self) -> SocketAddr {
        self.inner.address
    }

    /// The in-memory record cache.
    pub fn cache(&self) -> &RecordCache {
        &self.inner.cache
    }

    /// The repository records are stored in.
    pub fn repository(&self) -> &Arc<dyn RecordRepository> {
        &self.inner.repository
    }

    /// Resolves a domain from the cache.
    pub fn resolve(&self, domain: &str) -> Option<Record> {
        self.inner.cache.lookup(domain)
    }

    /// Binds the configured address and serves queries until the server is closed.
    pub async fn start(&self) -> Result<(), ServeError> {
        let address = self.inner.address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServeError::Bind { address, source })?;
        self.serve(listener).await
    }

    /// Loads the cache and serves queries on `listener` until the server is closed.
    ///
    /// Failing to load the cache initially is an error, no queries are accepted in that case.
    /// Errors accepting connections are logged and do not stop the server.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServeError> {
        self.logged(self.accept_loop(listener)).await
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<(), ServeError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ServeError::Closed);
        }

        metric!(counter("server.starting") += 1);
        let records = self
            .inner
            .cache
            .reload(self.inner.repository.as_ref())
            .await
            .map_err(ServeError::InitialLoad)?;

        match listener.local_addr() {
            Ok(address) => tracing::info!(records, "tsdns server started at {}", address),
            Err(_) => tracing::info!(records, "tsdns server started"),
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let cache = Arc::clone(&self.inner.cache);
                    let timeout = self.inner.query_timeout;
                    let span = tracing::debug_span!("query", %peer);
                    self.spawn(handle_query(cache, stream, timeout).instrument(span));
                }
                Err(err) => {
                    metric!(counter("accept.error") += 1);
                    let dynerr: &(dyn std::error::Error + Send + Sync) = &err;
                    tracing::error!(error = dynerr, "failed to accept connection");
                    if !accept_backoff(&self.inner.shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("stopped accepting connections");
        Ok(())
    }

    /// Reloads the cache from the repository.
    pub async fn reload(&self) -> Result<usize, RepositoryError> {
        self.logged(self.inner.cache.reload(self.inner.repository.as_ref()))
            .await
    }

    /// Adds a record without an instance and makes it resolvable immediately.
    pub async fn add_record(
        &self,
        domain: impl Into<String>,
        target: impl Into<String>,
        port: u16,
    ) -> Result<Record, RepositoryError> {
        self.add_instance_record(0, domain, target, port).await
    }

    /// Adds a record belonging to `instance_id` and makes it resolvable immediately.
    pub async fn add_instance_record(
        &self,
        instance_id: i64,
        domain: impl Into<String>,
        target: impl Into<String>,
        port: u16,
    ) -> Result<Record, RepositoryError> {
        let record = NewRecord::new(domain, target, port).with_instance(instance_id);
        let record = self.inner.repository.create(record).await?;
        self.reload().await?;
        Ok(record)
    }

    /// Deletes the record for `domain` and stops resolving it immediately.
    pub async fn remove_record(&self, domain: &str) -> Result<(), RepositoryError> {
        self.inner.repository.delete(domain).await?;
        self.reload().await?;
        Ok(())
    }

    /// Deletes all records of an instance and returns how many were deleted.
    pub async fn remove_instance_records(&self, instance_id: i64) -> Result<usize, RepositoryError> {
        let deleted = self
            .inner
            .repository
            .delete_by_instance_id(instance_id)
            .await?;
        self.reload().await?;
        Ok(deleted)
    }

    /// Shuts the server down.
    ///
    /// This stops the refresher and the accept loop, waits for the refresher to exit and closes
    /// the repository. Connections already being handled run to completion. Closing an already
    /// closed server does nothing.
    ///
    /// If closing the repository fails, the server counts as not closed and a later call retries.
    pub async fn close(&self) -> Result<(), RepositoryError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.logged(async {
            tracing::info!("shutting down tsdns server");
            self.inner.shutdown.cancel();

            let refresher = self.lock_refresher().take();
            if let Some(refresher) = refresher {
                if let Err(err) = refresher.await {
                    let dynerr: &dyn std::error::Error = &err;
                    tracing::error!(error = dynerr, "cache refresher failed");
                }
            }

            self.inner.repository.close().await?;
            self.inner.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
    }
}

/// How long the accept loop pauses after failing to accept a connection.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Waits before the next accept after an error, such as running out of file descriptors.
///
/// Returns `false` if the server was closed in the meantime.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

/// Answers the single query sent on `stream`.
///
/// Reading and writing failures silently drop the connection.
async fn handle_query(cache: Arc<RecordCache>, mut stream: TcpStream, timeout: Option<Duration>) {
    let mut buf = [0; MAX_QUERY_SIZE];

    let read = stream.read(&mut buf);
    let read = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, read).await {
            Ok(read) => read,
            Err(_) => {
                metric!(counter("query.timeout") += 1);
                tracing::debug!("client did not send a query in time");
                return;
            }
        },
        None => read.await,
    };
    let len = match read {
        Ok(len) => len,
        Err(err) => {
            tracing::debug!(error = %err, "failed to read query");
            return;
        }
    };

    let Some(domain) = parse_query(&buf[..len]) else {
        return;
    };
    metric!(counter("query.received") += 1);
    tracing::debug!("Query received: {}", domain);

    let record = cache.lookup(&domain);
    let response = render_response(record.as_ref());
    match record {
        Some(record) => {
            metric!(counter("query.hit") += 1);
            tracing::debug!("Record found: {} -> {}", domain, record.response());
        }
        None => {
            metric!(counter("query.miss") += 1);
            tracing::debug!("Record not found: {}", domain);
        }
    }

    if let Err(err) = stream.write_all(&response).await {
        tracing::debug!(error = %err, "failed to write response");
        return;
    }
    if let Err(err) = stream.shutdown().await {
        tracing::debug!(error = %err, "failed to shut down connection");
    }
}
