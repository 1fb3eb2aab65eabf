use std::path::Path;
use std::sync::Arc;

use gs_tsid::Tsid;

use crate::{DriverError, RawRecord, StorageDriver};

/// Production storage driver backed by RocksDB. Blocking calls are offloaded
/// to `spawn_blocking` so a slow disk read never stalls the Tokio runtime
/// (spec §5: reads are "potentially blocking but synchronous from the
/// caller's point of view").
pub struct RocksDriver {
    db: Arc<rocksdb::DB>,
}

impl RocksDriver {
    /// Open (or create) the database directory, matching the
    /// `create_if_missing`/`create_missing_column_families` defaults used
    /// elsewhere in this stack for local RocksDB stores.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DriverError> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = rocksdb::DB::open(&opts, dir.as_ref()).map_err(|source| DriverError::Read {
            tsid: Tsid::parse("Lopen").unwrap(),
            source: source.into(),
        })?;

        Ok(RocksDriver { db: Arc::new(db) })
    }
}

#[async_trait::async_trait]
impl StorageDriver for RocksDriver {
    async fn read(&self, tsid: &Tsid) -> Result<Option<RawRecord>, DriverError> {
        let db = self.db.clone();
        let tsid = *tsid;
        tokio::task::spawn_blocking(move || {
            let bytes = db.get(tsid.as_bytes()).map_err(|source| DriverError::Read {
                tsid,
                source: source.into(),
            })?;
            bytes
                .map(|bytes| {
                    serde_json::from_slice::<RawRecord>(&bytes).map_err(|source| DriverError::Read {
                        tsid,
                        source: source.into(),
                    })
                })
                .transpose()
        })
        .await
        .expect("rocksdb read task panicked")
    }

    async fn write(&self, records: Vec<RawRecord>) -> Result<(), DriverError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut batch = rocksdb::WriteBatch::default();
            for record in &records {
                let bytes = serde_json::to_vec(record).map_err(|source| DriverError::Write {
                    tsid: record.tsid,
                    source: source.into(),
                })?;
                batch.put(record.tsid.as_bytes(), bytes);
            }
            db.write(batch).map_err(|source| DriverError::Write {
                tsid: records.first().map(|r| r.tsid).unwrap_or(Tsid::parse("Lbatch").unwrap()),
                source: source.into(),
            })
        })
        .await
        .expect("rocksdb write task panicked")
    }

    async fn delete(&self, tsid: &Tsid) -> Result<(), DriverError> {
        let db = self.db.clone();
        let tsid = *tsid;
        tokio::task::spawn_blocking(move || {
            db.delete(tsid.as_bytes()).map_err(|source| DriverError::Delete {
                tsid,
                source: source.into(),
            })
        })
        .await
        .expect("rocksdb delete task panicked")
    }

    async fn close(&self) -> Result<(), DriverError> {
        // RocksDB closes on drop; nothing to flush explicitly beyond that.
        Ok(())
    }
}
