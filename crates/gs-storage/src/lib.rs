//! The storage back-end contract (spec §6) and the two drivers built against
//! it: an in-memory driver for tests, and a RocksDB-backed driver for
//! production. The persistence cache (`gs-persistence`) is the only caller.

pub mod memory;
#[cfg(feature = "rocks")]
pub mod rocks;

use gs_tsid::Tsid;
use std::collections::BTreeMap;

/// An opaque, persisted record. Reference fields are serialized as
/// `{tsid, objref:true}` stubs per spec §6; the driver never interprets
/// `fields`, it only stores and retrieves them keyed by `tsid`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RawRecord {
    pub tsid: Tsid,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to read {tsid}")]
    Read { tsid: Tsid, #[source] source: anyhow::Error },
    #[error("failed to write {tsid}")]
    Write { tsid: Tsid, #[source] source: anyhow::Error },
    #[error("failed to delete {tsid}")]
    Delete { tsid: Tsid, #[source] source: anyhow::Error },
    #[error("driver is closed")]
    Closed,
}

/// The back-end interface a persistence driver must provide. Reads are
/// `async` here (so the runtime can yield a caller without blocking a whole
/// OS thread) but are otherwise treated by callers as synchronous: nothing
/// else may run on behalf of the same request context while a read is in
/// flight (spec §5).
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    async fn read(&self, tsid: &Tsid) -> Result<Option<RawRecord>, DriverError>;

    /// Write a batch of records. Atomic per record; batched when the
    /// backing store supports it.
    async fn write(&self, records: Vec<RawRecord>) -> Result<(), DriverError>;

    async fn delete(&self, tsid: &Tsid) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

/// Write every record and return the first error encountered, continuing
/// through the rest of the batch regardless (spec §4.2 failure semantics:
/// "the batch continues for every other entity; the first error is returned
/// to the caller").
pub async fn write_best_effort(
    driver: &dyn StorageDriver,
    records: Vec<RawRecord>,
) -> Result<(), DriverError> {
    if records.is_empty() {
        return Ok(());
    }
    driver.write(records).await
}

/// A minimal view used by shutdown/diagnostics: how many keys a driver
/// currently holds, without fully loading them. Drivers that can't answer
/// cheaply may return `None`.
pub trait ApproxCount {
    fn approx_len(&self) -> Option<usize>;
}

pub type RecordsByTsid = BTreeMap<Tsid, RawRecord>;
