use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::table::RecordTable;
use super::{RecordRepository, RepositoryError};
use crate::types::{NewRecord, Record};

/// A repository that keeps all records in process memory.
///
/// Nothing is persisted, so this is mostly useful for tests and throwaway deployments.
#[derive(Debug)]
pub struct MemoryRepository {
    /// `None` once the repository has been closed.
    table: RwLock<Option<RecordTable>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Some(RecordTable::default())),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&RecordTable) -> R) -> Result<R, RepositoryError> {
        let guard = self.table.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f).ok_or(RepositoryError::Closed)
    }

    fn write<R>(&self, f: impl FnOnce(&mut RecordTable) -> R) -> Result<R, RepositoryError> {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        guard.as_mut().map(f).ok_or(RepositoryError::Closed)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn find(&self) -> Result<Vec<Record>, RepositoryError> {
        self.read(RecordTable::find)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Record, RepositoryError> {
        self.read(|table| table.find_by_domain(domain))?
    }

    async fn create(&self, record: NewRecord) -> Result<Record, RepositoryError> {
        self.write(|table| table.create(record))?
    }

    async fn delete(&self, domain: &str) -> Result<(), RepositoryError> {
        self.write(|table| table.delete(domain))?
    }

    async fn delete_by_instance_id(&self, instance_id: i64) -> Result<usize, RepositoryError> {
        self.write(|table| table.delete_by_instance_id(instance_id))
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
