use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::table::RecordTable;
use super::{RecordRepository, RepositoryError};
use crate::types::{NewRecord, Record};

/// A repository persisting all records as JSON into a single file.
///
/// The complete table is held in memory and written out after every mutation. Writes go to a
/// sibling temporary file first which is then renamed over the store, so the store on disk is
/// always either the previous or the new state.
///
/// A mutation is applied to a copy of the table and only becomes visible once that copy was
/// persisted successfully.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    /// `None` once the repository has been closed.
    table: Mutex<Option<RecordTable>>,
}

impl FileRepository {
    /// Opens the store at `path`.
    ///
    /// A missing file is treated as an empty store. Missing parent directories are created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();

        let table = match tokio::fs::read(&path).await {
            Ok(contents) => serde_json::from_slice(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                RecordTable::default()
            }
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %path.display(), "opened record store");

        Ok(Self {
            path,
            table: Mutex::new(Some(table)),
        })
    }

    /// The path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| "tsdns".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn persist(&self, table: &RecordTable) -> Result<(), RepositoryError> {
        let contents = serde_json::to_vec_pretty(table)?;
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn read<R>(&self, f: impl FnOnce(&RecordTable) -> R) -> Result<R, RepositoryError> {
        let guard = self.table.lock().await;
        guard.as_ref().map(f).ok_or(RepositoryError::Closed)
    }

    /// Applies `f` to a copy of the table, persists the copy and then replaces the table.
    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut RecordTable) -> Result<R, RepositoryError>,
    ) -> Result<R, RepositoryError> {
        let mut guard = self.table.lock().await;
        let table = guard.as_ref().ok_or(RepositoryError::Closed)?;

        let mut updated = table.clone();
        let result = f(&mut updated)?;
        self.persist(&updated).await?;

        *guard = Some(updated);
        Ok(result)
    }
}

#[async_trait]
impl RecordRepository for FileRepository {
    async fn find(&self) -> Result<Vec<Record>, RepositoryError> {
        self.read(RecordTable::find).await
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Record, RepositoryError> {
        self.read(|table| table.find_by_domain(domain)).await?
    }

    async fn create(&self, record: NewRecord) -> Result<Record, RepositoryError> {
        self.mutate(|table| table.create(record)).await
    }

    async fn delete(&self, domain: &str) -> Result<(), RepositoryError> {
        self.mutate(|table| table.delete(domain)).await
    }

    async fn delete_by_instance_id(&self, instance_id: i64) -> Result<usize, RepositoryError> {
        self.mutate(|table| Ok(table.delete_by_instance_id(instance_id)))
            .await
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        let mut guard = self.table.lock().await;
        if let Some(table) = guard.as_ref() {
            self.persist(table).await?;
            *guard = None;
            tracing::debug!(path = %self.path.display(), "closed record store");
        }
        Ok(())
    }
}
