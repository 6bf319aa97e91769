use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tsdns_service::repository::{MemoryRepository, RecordRepository, RepositoryError};
use tsdns_service::server::{ServeError, ServerBuilder};
use tsdns_service::types::{NewRecord, Record};
use tsdns_test::{LogCapture, TestServer, memory_repository};

async fn listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).await.unwrap()
}

#[tokio::test]
async fn test_close_stops_serving() {
    tsdns_test::setup();
    let repo = memory_repository(tsdns_test::fixture_records()).await;
    let server = TestServer::new(repo.clone()).await;
    let addr = server.addr;
    assert_eq!(server.resolve("svc-a").await, "10.0.0.1:8080");

    // serving ends cleanly once closed
    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(repo.find().await, Err(RepositoryError::Closed)));
    assert!(tsdns_test::query(addr, b"svc-a").await.is_err());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    tsdns_test::setup();
    let server = ServerBuilder::new("127.0.0.1")
        .with_repository(Arc::new(MemoryRepository::new()))
        .build()
        .unwrap();

    server.close().await.unwrap();
    server.close().await.unwrap();
    server.clone().close().await.unwrap();
}

/// A memory repository whose first `close` fails.
#[derive(Debug, Default)]
struct FailingCloseRepository {
    inner: MemoryRepository,
    close_attempts: AtomicUsize,
}

#[async_trait]
impl RecordRepository for FailingCloseRepository {
    async fn find(&self) -> Result<Vec<Record>, RepositoryError> {
        self.inner.find().await
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Record, RepositoryError> {
        self.inner.find_by_domain(domain).await
    }

    async fn create(&self, record: NewRecord) -> Result<Record, RepositoryError> {
        self.inner.create(record).await
    }

    async fn delete(&self, domain: &str) -> Result<(), RepositoryError> {
        self.inner.delete(domain).await
    }

    async fn delete_by_instance_id(&self, instance_id: i64) -> Result<usize, RepositoryError> {
        self.inner.delete_by_instance_id(instance_id).await
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        if self.close_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(io::Error::other("disk full").into());
        }
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_close_retries_failed_repository_close() {
    tsdns_test::setup();
    let repo = Arc::new(FailingCloseRepository::default());
    let server = ServerBuilder::new("127.0.0.1")
        .with_repository(repo.clone())
        .build()
        .unwrap();

    let err = server.close().await.unwrap_err();
    assert!(matches!(err, RepositoryError::Io(_)));

    server.close().await.unwrap();
    assert_eq!(repo.close_attempts.load(Ordering::SeqCst), 2);
    assert!(matches!(repo.find().await, Err(RepositoryError::Closed)));

    // once closed successfully, further calls do nothing
    server.close().await.unwrap();
    assert_eq!(repo.close_attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_serve_after_close() {
    tsdns_test::setup();
    let server = ServerBuilder::new("127.0.0.1")
        .with_repository(Arc::new(MemoryRepository::new()))
        .build()
        .unwrap();
    server.close().await.unwrap();

    let err = server.serve(listener().await).await.unwrap_err();
    assert!(matches!(err, ServeError::Closed));
}

#[tokio::test]
async fn test_initial_load_failure() {
    tsdns_test::setup();
    let repo = memory_repository(tsdns_test::fixture_records()).await;
    let server = ServerBuilder::new("127.0.0.1")
        .with_repository(repo.clone())
        .build()
        .unwrap();

    repo.close().await.unwrap();
    let err = server.serve(listener().await).await.unwrap_err();
    assert!(matches!(
        err,
        ServeError::InitialLoad(RepositoryError::Closed)
    ));
    assert!(server.cache().is_empty());

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_start_bind_failure() {
    tsdns_test::setup();
    let taken = listener().await;
    let port = taken.local_addr().unwrap().port();

    let server = ServerBuilder::new("127.0.0.1")
        .with_port(port)
        .with_repository(Arc::new(MemoryRepository::new()))
        .build()
        .unwrap();

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServeError::Bind { address, .. } if address.port() == port));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_start_and_close() {
    tsdns_test::setup();
    let repo = memory_repository(tsdns_test::fixture_records()).await;
    // reserve a free port and release it for the server
    let port = listener().await.local_addr().unwrap().port();

    let server = ServerBuilder::new("127.0.0.1")
        .with_port(port)
        .with_repository(repo)
        .build()
        .unwrap();
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let addr = server.address();
    let mut response = None;
    for _ in 0..50 {
        if let Ok(bytes) = tsdns_test::query(addr, b"svc-b").await {
            response = Some(bytes);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(response.as_deref(), Some(&b"10.0.0.2"[..]));

    server.close().await.unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_custom_logger() {
    tsdns_test::setup();
    let capture = LogCapture::default();
    let repo = memory_repository(tsdns_test::fixture_records()).await;
    let server = ServerBuilder::new("127.0.0.1")
        .with_repository(repo)
        .with_logger(capture.dispatch())
        .build()
        .unwrap();
    let server = TestServer::serve(server).await;

    assert_eq!(server.resolve("svc-x").await, "404\n");
    server.shutdown().await.unwrap();

    let logs = capture.contents();
    assert!(logs.contains("tsdns server started"), "{logs}");
    assert!(logs.contains("Record not found: svc-x"), "{logs}");
    assert!(logs.contains("shutting down tsdns server"), "{logs}");
}

#[tokio::test]
async fn test_failed_store_write_keeps_cache() {
    tsdns_test::setup();
    let repo = memory_repository(tsdns_test::fixture_records()).await;
    let server = TestServer::new(repo.clone()).await;

    repo.close().await.unwrap();
    let err = server
        .server
        .add_record("svc-new", "10.0.0.9", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Closed));

    let err = server.server.remove_record("svc-a").await.unwrap_err();
    assert!(matches!(err, RepositoryError::Closed));

    // queries keep being answered from the last snapshot
    assert_eq!(server.resolve("svc-a").await, "10.0.0.1:8080");
    assert_eq!(server.resolve("svc-new").await, "404\n");
    assert_eq!(server.server.cache().len(), 3);

    server.shutdown().await.unwrap();
}
