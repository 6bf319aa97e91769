use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::RepositoryError;
use crate::types::{NewRecord, Record};

/// The in-process record table backing the bundled repositories.
///
/// This holds live records and tombstones alike, in insertion order. It is also the exact
/// format persisted by the [`FileRepository`](super::FileRepository).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(super) struct RecordTable {
    next_id: i64,
    records: Vec<Record>,
}

impl RecordTable {
    fn live(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|record| record.is_live())
    }

    pub fn find(&self) -> Vec<Record> {
        self.live().cloned().collect()
    }

    pub fn find_by_domain(&self, domain: &str) -> Result<Record, RepositoryError> {
        self.live()
            .find(|record| record.domain == domain)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(domain.to_owned()))
    }

    pub fn create(&mut self, record: NewRecord) -> Result<Record, RepositoryError> {
        record.validate().map_err(RepositoryError::Invalid)?;
        if self.live().any(|existing| existing.domain == record.domain) {
            return Err(RepositoryError::Conflict(record.domain));
        }

        self.next_id += 1;
        let record = record.into_record(self.next_id, Utc::now());
        self.records.push(record.clone());
        Ok(record)
    }

    pub fn delete(&mut self, domain: &str) -> Result<(), RepositoryError> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.is_live() && record.domain == domain)
            .ok_or_else(|| RepositoryError::NotFound(domain.to_owned()))?;
        record.tombstone(Utc::now());
        Ok(())
    }

    pub fn delete_by_instance_id(&mut self, instance_id: i64) -> usize {
        let now = Utc::now();
        let mut deleted = 0;
        for record in &mut self.records {
            if record.is_live() && record.instance_id == instance_id {
                record.tombstone(now);
                deleted += 1;
            }
        }
        deleted
    }

    /// All stored records including tombstones.
    #[cfg(test)]
    pub fn all(&self) -> &[Record] {
        &self.records
    }
}
