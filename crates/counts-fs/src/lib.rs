//! Implementation of count storage as a CBOR snapshot file on disk.
//!
//! The whole table is held in memory and rewritten after every merged
//! batch. The new snapshot is written next to the target and renamed over
//! it, so a crash mid-write leaves the previous snapshot intact. A batch is
//! only visible in memory once its snapshot has been written.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use logcount_analysis::{AggregationDimension, GroupKey, ReduceOutput};
use logcount_counts::{CountFilter, CountRecord, CountStore, CountTable, UpsertReport};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Count store persisted to a single file.
#[derive(Clone, Debug)]
pub struct FsCountStore {
    path: PathBuf,
    table: Arc<Mutex<CountTable>>,
}

impl FsCountStore {
    /// Opens the store at `path`, loading the existing snapshot if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();

        let table = match fs::read(&path).await {
            Ok(data) => ciborium::from_reader::<CountTable, _>(data.as_slice())
                .map_err(|e| Error::Deserialize(e.to_string()))?,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => CountTable::new(),
            Err(e) => return Err(Error::Io("error reading snapshot", e)),
        };

        if table.is_empty() {
            info!(path = %path.display(), "opened empty count store");
        } else {
            info!(path = %path.display(), records = table.len(), "opened count store");
        }

        Ok(Self {
            path,
            table: Arc::new(Mutex::new(table)),
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_snapshot(&self, table: &CountTable) -> Result<(), Error> {
        let mut data = Vec::new();
        ciborium::into_writer(table, &mut data).map_err(|e| Error::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Io("error creating directory", e))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &data)
            .await
            .map_err(|e| Error::Io("error writing snapshot", e))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::Io("error replacing snapshot", e))?;

        debug!(bytes = data.len(), records = table.len(), "wrote count snapshot");

        Ok(())
    }
}

#[async_trait]
impl CountStore for FsCountStore {
    type Error = Error;

    async fn upsert_counts(&self, outputs: &[ReduceOutput]) -> Result<UpsertReport, Self::Error> {
        if outputs.is_empty() {
            return Ok(UpsertReport::default());
        }

        let now = Utc::now();
        let mut table = self.table.lock().await;

        let mut updated = table.clone();
        let report = updated.apply(outputs, now);

        self.write_snapshot(&updated).await?;
        *table = updated;

        Ok(report)
    }

    async fn get(&self, key: &GroupKey) -> Result<Option<CountRecord>, Self::Error> {
        Ok(self.table.lock().await.get(key).cloned())
    }

    async fn query(&self, filter: &CountFilter) -> Result<Vec<CountRecord>, Self::Error> {
        Ok(self.table.lock().await.query(filter))
    }

    async fn top(
        &self,
        dimension: AggregationDimension,
        limit: usize,
    ) -> Result<Vec<CountRecord>, Self::Error> {
        Ok(self.table.lock().await.top(dimension, limit))
    }
}
