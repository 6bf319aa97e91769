//! Contract tests that every repository backend has to pass.

use std::sync::Arc;

use tsdns_service::repository::{
    FileRepository, MemoryRepository, RecordRepository, RepositoryConfig, RepositoryError,
};
use tsdns_service::types::NewRecord;
use tsdns_test::TempDir;

/// Runs the given contract against a fresh instance of every backend.
macro_rules! contract {
    ($name:ident, $body:path) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory() {
                tsdns_test::setup();
                $body(Arc::new(MemoryRepository::new())).await;
            }

            #[tokio::test]
            async fn file() {
                tsdns_test::setup();
                let dir = tsdns_test::tempdir();
                let repo = open_file(&dir).await;
                $body(repo).await;
            }
        }
    };
}

async fn open_file(dir: &TempDir) -> Arc<dyn RecordRepository> {
    Arc::new(
        FileRepository::open(dir.path().join("records.json"))
            .await
            .unwrap(),
    )
}

async fn domains(repo: &dyn RecordRepository) -> Vec<String> {
    let mut domains: Vec<_> = repo
        .find()
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.domain)
        .collect();
    domains.sort();
    domains
}

async fn create_assigns_fields(repo: Arc<dyn RecordRepository>) {
    let record = repo
        .create(NewRecord::new("svc-a", "10.0.0.1", 8080).with_instance(7))
        .await
        .unwrap();

    assert!(record.id > 0);
    assert_eq!(record.instance_id, 7);
    assert_eq!(record.domain, "svc-a");
    assert_eq!(record.target, "10.0.0.1");
    assert_eq!(record.port, 8080);
    assert_eq!(record.created_at, record.updated_at);
    assert!(record.is_live());

    assert_eq!(repo.find_by_domain("svc-a").await.unwrap(), record);
}
contract!(create, create_assigns_fields);

async fn find_excludes_tombstones(repo: Arc<dyn RecordRepository>) {
    repo.create(NewRecord::new("svc-a", "10.0.0.1", 0))
        .await
        .unwrap();
    repo.create(NewRecord::new("svc-b", "10.0.0.2", 0))
        .await
        .unwrap();
    repo.delete("svc-a").await.unwrap();

    assert_eq!(domains(repo.as_ref()).await, ["svc-b"]);
    let err = repo.find_by_domain("svc-a").await.unwrap_err();
    assert!(err.is_not_found());
}
contract!(tombstones, find_excludes_tombstones);

async fn delete_missing_is_not_found(repo: Arc<dyn RecordRepository>) {
    let err = repo.delete("svc-x").await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(ref domain) if domain == "svc-x"));
}
contract!(delete_missing, delete_missing_is_not_found);

async fn create_conflicts_with_live_domain(repo: Arc<dyn RecordRepository>) {
    repo.create(NewRecord::new("svc-a", "10.0.0.1", 0))
        .await
        .unwrap();

    let err = repo
        .create(NewRecord::new("svc-a", "10.0.0.9", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));
    assert_eq!(repo.find_by_domain("svc-a").await.unwrap().target, "10.0.0.1");

    // after deleting, the domain is free again
    repo.delete("svc-a").await.unwrap();
    let record = repo
        .create(NewRecord::new("svc-a", "10.0.0.9", 0))
        .await
        .unwrap();
    assert_eq!(repo.find_by_domain("svc-a").await.unwrap(), record);
}
contract!(conflict, create_conflicts_with_live_domain);

async fn create_rejects_invalid(repo: Arc<dyn RecordRepository>) {
    let err = repo
        .create(NewRecord::new("svc a", "10.0.0.1", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Invalid(_)));

    let err = repo
        .create(NewRecord::new("a".repeat(600), "10.0.0.1", 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Invalid("domain must not exceed 512 bytes")
    ));

    assert!(repo.find().await.unwrap().is_empty());
}
contract!(invalid, create_rejects_invalid);

async fn delete_by_instance(repo: Arc<dyn RecordRepository>) {
    repo.create(NewRecord::new("svc-a", "10.0.0.1", 0).with_instance(7))
        .await
        .unwrap();
    repo.create(NewRecord::new("svc-b", "10.0.0.2", 0).with_instance(7))
        .await
        .unwrap();
    repo.create(NewRecord::new("svc-c", "10.0.0.3", 0).with_instance(8))
        .await
        .unwrap();

    assert_eq!(repo.delete_by_instance_id(7).await.unwrap(), 2);
    assert_eq!(domains(repo.as_ref()).await, ["svc-c"]);

    // already deleted records are not counted again
    assert_eq!(repo.delete_by_instance_id(7).await.unwrap(), 0);
}
contract!(instance, delete_by_instance);

async fn delete_by_unknown_instance(repo: Arc<dyn RecordRepository>) {
    repo.create(NewRecord::new("svc-a", "10.0.0.1", 0).with_instance(1))
        .await
        .unwrap();

    assert_eq!(repo.delete_by_instance_id(42).await.unwrap(), 0);
    assert_eq!(domains(repo.as_ref()).await, ["svc-a"]);
}
contract!(unknown_instance, delete_by_unknown_instance);

async fn closed_repository(repo: Arc<dyn RecordRepository>) {
    repo.create(NewRecord::new("svc-a", "10.0.0.1", 0))
        .await
        .unwrap();
    repo.close().await.unwrap();
    repo.close().await.unwrap();

    assert!(matches!(repo.find().await, Err(RepositoryError::Closed)));
    assert!(matches!(
        repo.create(NewRecord::new("svc-b", "10.0.0.2", 0)).await,
        Err(RepositoryError::Closed)
    ));
    assert!(matches!(
        repo.delete("svc-a").await,
        Err(RepositoryError::Closed)
    ));
}
contract!(closed, closed_repository);

#[tokio::test]
async fn test_open_from_config() {
    let dir = tsdns_test::tempdir();
    let path = dir.path().join("store.json");

    let config = RepositoryConfig::File { path: path.clone() };
    let repo = config.open().await.unwrap();
    repo.create(NewRecord::new("svc-a", "10.0.0.1", 0))
        .await
        .unwrap();
    repo.close().await.unwrap();
    assert!(path.is_file());

    let repo = config.open().await.unwrap();
    assert_eq!(domains(repo.as_ref()).await, ["svc-a"]);

    let repo = RepositoryConfig::Memory.open().await.unwrap();
    assert!(repo.find().await.unwrap().is_empty());
}
