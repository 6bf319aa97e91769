use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tsdns_service::cache::RecordCache;
use tsdns_service::repository::{RecordRepository, RepositoryError};
use tsdns_service::types::{NewRecord, Record};

const DOMAINS: i64 = 64;

/// A read-only repository returning a different generation of every record on each `find`.
#[derive(Debug, Default)]
struct AlternatingRepository {
    generation: AtomicU64,
}

impl AlternatingRepository {
    fn records(generation: u64) -> Vec<Record> {
        let now = Utc::now();
        (1..=DOMAINS)
            .map(|id| Record {
                id,
                instance_id: 0,
                domain: format!("svc-{id}"),
                target: format!("gen-{generation}"),
                port: 0,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .collect()
    }
}

#[async_trait]
impl RecordRepository for AlternatingRepository {
    async fn find(&self) -> Result<Vec<Record>, RepositoryError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        Ok(Self::records(generation % 2))
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Record, RepositoryError> {
        Err(RepositoryError::NotFound(domain.to_owned()))
    }

    async fn create(&self, _record: NewRecord) -> Result<Record, RepositoryError> {
        Err(RepositoryError::Invalid("read only"))
    }

    async fn delete(&self, domain: &str) -> Result<(), RepositoryError> {
        Err(RepositoryError::NotFound(domain.to_owned()))
    }

    async fn delete_by_instance_id(&self, _instance_id: i64) -> Result<usize, RepositoryError> {
        Ok(0)
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_partial_reload() {
    tsdns_test::setup();
    let repo = Arc::new(AlternatingRepository::default());
    let cache = Arc::new(RecordCache::new());
    cache.reload(repo.as_ref()).await.unwrap();

    let mut readers = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        readers.spawn(async move {
            for _ in 0..500 {
                let snapshot = cache.snapshot();
                assert_eq!(snapshot.len(), DOMAINS as usize);

                let target = &snapshot["svc-1"].target;
                assert!(snapshot.values().all(|record| &record.target == target));

                // single lookups always hit, whichever snapshot they see
                assert!(cache.lookup("svc-32").is_some());
                tokio::task::yield_now().await;
            }
        });
    }

    let mut reloaders = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let repo = Arc::clone(&repo);
        reloaders.spawn(async move {
            for _ in 0..50 {
                cache.reload(repo.as_ref()).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
    }

    while let Some(result) = readers.join_next().await {
        result.unwrap();
    }
    while let Some(result) = reloaders.join_next().await {
        result.unwrap();
    }

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.len(), DOMAINS as usize);
    let target = &snapshot["svc-1"].target;
    assert!(snapshot.values().all(|record| &record.target == target));
    assert_eq!(repo.generation.load(Ordering::Relaxed), 201);
    // reloads are serialized, so the last read from the repository is the one installed
    assert_eq!(target, "gen-0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutations_through_server() {
    tsdns_test::setup();
    let server = tsdns_test::TestServer::new(Arc::new(
        tsdns_service::repository::MemoryRepository::new(),
    ))
    .await;

    let mut writers = tokio::task::JoinSet::new();
    for instance in 1..=4_i64 {
        let srv = server.server.clone();
        writers.spawn(async move {
            for i in 0..10 {
                let domain = format!("svc-{instance}-{i}");
                srv.add_instance_record(instance, domain, "10.0.0.1", 0)
                    .await
                    .unwrap();
            }
        });
    }
    while let Some(result) = writers.join_next().await {
        result.unwrap();
    }

    assert_eq!(server.server.cache().len(), 40);
    assert_eq!(server.resolve("svc-3-9").await, "10.0.0.1");

    assert_eq!(server.server.remove_instance_records(2).await.unwrap(), 10);
    assert_eq!(server.server.cache().len(), 30);
    assert_eq!(server.resolve("svc-2-0").await, "404\n");

    server.shutdown().await.unwrap();
}
