//! Helpers for testing the query server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. Otherwise the directory is deleted while a file repository
//!    still writes into it.
//!
//!  - When using [`TestServer`], call [`TestServer::shutdown`] at the end of the test to close
//!    the server and its repository. Dropping it aborts serving without closing.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use tsdns_service::repository::{MemoryRepository, RecordRepository};
use tsdns_service::server::{ServeError, Server, ServerBuilder};
use tsdns_service::types::NewRecord;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `tsdns_service` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("tsdns_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// The records used by most server tests.
pub fn fixture_records() -> Vec<NewRecord> {
    vec![
        NewRecord::new("svc-a", "10.0.0.1", 8080),
        NewRecord::new("svc-b", "10.0.0.2", 0),
        NewRecord::new("voice.example.com", "ts.example.com", 9987).with_instance(3),
    ]
}

/// Creates a memory repository containing the given records.
pub async fn memory_repository(records: Vec<NewRecord>) -> Arc<MemoryRepository> {
    let repository = Arc::new(MemoryRepository::new());
    for record in records {
        repository.create(record).await.unwrap();
    }
    repository
}

/// Sends a raw query to a server and returns the full response.
///
/// An empty `payload` only closes the sending half of the connection.
pub async fn query(addr: SocketAddr, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    if payload.is_empty() {
        stream.shutdown().await?;
    } else {
        stream.write_all(payload).await?;
    }

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response from server"))??;
    Ok(response)
}

/// A [`Server`] serving on a random localhost port.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`.
#[derive(Debug)]
pub struct TestServer {
    pub server: Server,
    pub addr: SocketAddr,
    handle: Option<JoinHandle<Result<(), ServeError>>>,
}

impl TestServer {
    /// Builds a server with default settings on top of `repository` and starts serving.
    pub async fn new(repository: Arc<dyn RecordRepository>) -> Self {
        let server = ServerBuilder::new("127.0.0.1")
            .with_repository(repository)
            .build()
            .unwrap();
        Self::serve(server).await
    }

    /// Starts serving an already built server.
    pub async fn serve(server: Server) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });

        Self {
            server,
            addr,
            handle: Some(handle),
        }
    }

    /// Sends a query and returns the response.
    pub async fn query(&self, payload: &str) -> Vec<u8> {
        query(self.addr, payload.as_bytes()).await.unwrap()
    }

    /// Sends a query and returns the response as a string.
    pub async fn resolve(&self, domain: &str) -> String {
        String::from_utf8(self.query(domain).await).unwrap()
    }

    /// Closes the server and returns the result of serving.
    pub async fn shutdown(mut self) -> Result<(), ServeError> {
        self.server.close().await.unwrap();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap(),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Collects formatted log output in memory.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// A subscriber writing everything at `DEBUG` or above into this capture.
    pub fn dispatch(&self) -> tracing::Dispatch {
        let capture = self.clone();
        fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_ansi(false)
            .with_writer(move || capture.clone())
            .finish()
            .into()
    }

    /// Everything logged so far.
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
