//! The record data model shared by all repositories, the cache and the query server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::MAX_QUERY_SIZE;

/// A stored mapping from a domain key to a target host and optional port.
///
/// Records are never physically removed by a repository. Deleting a record sets
/// [`deleted_at`](Self::deleted_at), which turns it into a tombstone that is kept for
/// auditing but is invisible to every read path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Surrogate identifier assigned by the repository.
    pub id: i64,
    /// Grouping key used to remove all records of one logical owner at once.
    pub instance_id: i64,
    /// The lookup key. Unique among live records.
    pub domain: String,
    /// Destination host or address.
    pub target: String,
    /// Destination port, `0` meaning that only the host is returned.
    pub port: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the record has been deleted.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Whether this record has not been deleted.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Renders the answer sent to clients resolving this record.
    ///
    /// This is either `target` or `target:port`, without any trailing delimiter.
    pub fn response(&self) -> String {
        if self.port == 0 {
            self.target.clone()
        } else {
            format!("{}:{}", self.target, self.port)
        }
    }

    /// Marks the record as deleted at the given time.
    pub(crate) fn tombstone(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.deleted_at = Some(now);
    }
}

/// The caller supplied part of a [`Record`].
///
/// The repository assigns the identifier and timestamps when the record is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    #[serde(default)]
    pub instance_id: i64,
    pub domain: String,
    pub target: String,
    #[serde(default)]
    pub port: u16,
}

impl NewRecord {
    pub fn new(domain: impl Into<String>, target: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: 0,
            domain: domain.into(),
            target: target.into(),
            port,
        }
    }

    /// Assigns the record to the given instance.
    pub fn with_instance(mut self, instance_id: i64) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Checks that the record can be stored and later resolved.
    ///
    /// Queries are whitespace-trimmed before lookup and read up to [`MAX_QUERY_SIZE`] bytes, so
    /// a domain that is empty, contains whitespace or is longer than that could never be resolved.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.domain.trim().is_empty() {
            return Err("domain must not be empty");
        }
        if self.domain.chars().any(char::is_whitespace) {
            return Err("domain must not contain whitespace");
        }
        if self.domain.len() > MAX_QUERY_SIZE {
            return Err("domain must not exceed 512 bytes");
        }
        if self.target.trim().is_empty() {
            return Err("target must not be empty");
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: i64, now: DateTime<Utc>) -> Record {
        Record {
            id,
            instance_id: self.instance_id,
            domain: self.domain,
            target: self.target,
            port: self.port,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
