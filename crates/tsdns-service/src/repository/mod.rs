//! Durable storage of [`Record`]s.
//!
//! The [`RecordRepository`] trait is the capability contract every storage backend has to
//! satisfy. The cache relies on all backends agreeing on the following semantics:
//!
//!  - Deleting a record turns it into a tombstone instead of removing it.
//!  - [`find`](RecordRepository::find) and [`find_by_domain`](RecordRepository::find_by_domain)
//!    only ever return live records.
//!  - At most one live record exists per domain. Creating a second one fails with
//!    [`RepositoryError::Conflict`].
//!
//! Two backends ship with this crate: [`MemoryRepository`] and [`FileRepository`]. Both are
//! built on the same in-process table, so they are guaranteed to behave identically.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{NewRecord, Record};

mod file;
mod memory;
mod table;

pub use file::FileRepository;
pub use memory::MemoryRepository;

/// An error returned by a [`RecordRepository`].
///
/// The variants keep the kind of failure intact, so callers can tell an absent record apart
/// from an unavailable store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// There is no live record for the domain.
    #[error("record not found: {0}")]
    NotFound(String),
    /// A live record for the domain already exists.
    #[error("a live record already exists for domain {0}")]
    Conflict(String),
    /// The record was rejected before reaching the store.
    #[error("invalid record: {0}")]
    Invalid(&'static str),
    /// The store could not be read or written.
    #[error("storage i/o failed")]
    Io(#[from] io::Error),
    /// The stored data could not be encoded or decoded.
    #[error("failed to encode or decode records")]
    Encoding(#[from] serde_json::Error),
    /// The repository has been closed.
    #[error("repository is closed")]
    Closed,
}

impl RepositoryError {
    /// Whether this error means that the requested record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The capability contract implemented by every storage backend.
///
/// Implementations are responsible for their own internal synchronization: the server shares a
/// single repository between the cache refresher and every caller issuing writes.
#[async_trait]
pub trait RecordRepository: Send + Sync + fmt::Debug {
    /// Returns all live records.
    async fn find(&self) -> Result<Vec<Record>, RepositoryError>;

    /// Returns the live record for `domain`.
    async fn find_by_domain(&self, domain: &str) -> Result<Record, RepositoryError>;

    /// Persists a new record and returns it with its identifier and timestamps assigned.
    async fn create(&self, record: NewRecord) -> Result<Record, RepositoryError>;

    /// Tombstones the live record for `domain`.
    async fn delete(&self, domain: &str) -> Result<(), RepositoryError>;

    /// Tombstones all live records of an instance and returns how many were affected.
    ///
    /// Matching no records at all is not an error.
    async fn delete_by_instance_id(&self, instance_id: i64) -> Result<usize, RepositoryError>;

    /// Releases the resources held by the backend.
    ///
    /// All further operations fail with [`RepositoryError::Closed`]. Closing twice is a no-op.
    async fn close(&self) -> Result<(), RepositoryError>;
}

/// Selects and configures the storage backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RepositoryConfig {
    /// Keep records in memory only. Everything is lost on restart.
    Memory,
    /// Persist records as JSON into a single file.
    File {
        /// Path to the store file. It is created on the first write.
        path: PathBuf,
    },
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("tsdns.json"),
        }
    }
}

impl RepositoryConfig {
    /// Opens the configured backend.
    pub async fn open(&self) -> Result<Arc<dyn RecordRepository>, RepositoryError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryRepository::new()),
            Self::File { path } => Arc::new(FileRepository::open(path).await?),
        })
    }
}
