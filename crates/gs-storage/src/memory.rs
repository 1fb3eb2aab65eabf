use std::sync::Mutex;

use gs_tsid::Tsid;

use crate::{ApproxCount, DriverError, RawRecord, RecordsByTsid, StorageDriver};

/// An in-process storage driver backed by a `Mutex<BTreeMap>`. Used in tests
/// and examples; never intended for production (spec §6 treats the real
/// back-end as a pluggable external collaborator).
#[derive(Default)]
pub struct MemoryDriver {
    records: Mutex<RecordsByTsid>,
    closed: Mutex<bool>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), DriverError> {
        if *self.closed.lock().unwrap() {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl StorageDriver for MemoryDriver {
    async fn read(&self, tsid: &Tsid) -> Result<Option<RawRecord>, DriverError> {
        self.check_open()?;
        Ok(self.records.lock().unwrap().get(tsid).cloned())
    }

    async fn write(&self, records: Vec<RawRecord>) -> Result<(), DriverError> {
        self.check_open()?;
        let mut guard = self.records.lock().unwrap();
        for record in records {
            guard.insert(record.tsid, record);
        }
        Ok(())
    }

    async fn delete(&self, tsid: &Tsid) -> Result<(), DriverError> {
        self.check_open()?;
        self.records.lock().unwrap().remove(tsid);
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

impl ApproxCount for MemoryDriver {
    fn approx_len(&self) -> Option<usize> {
        Some(self.records.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(tsid: &str, value: i64) -> RawRecord {
        let mut fields = serde_json::Map::new();
        fields.insert("value".into(), json!(value));
        RawRecord { tsid: Tsid::parse(tsid).unwrap(), fields }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let driver = MemoryDriver::new();
        driver.write(vec![record("Labc", 7)]).await.unwrap();

        let got = driver.read(&Tsid::parse("Labc").unwrap()).await.unwrap().unwrap();
        assert_eq!(got.fields["value"], json!(7));
    }

    #[tokio::test]
    async fn missing_read_is_none() {
        let driver = MemoryDriver::new();
        assert!(driver.read(&Tsid::parse("Lzzz").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let driver = MemoryDriver::new();
        let tsid = Tsid::parse("Labc").unwrap();
        driver.write(vec![record("Labc", 1)]).await.unwrap();
        driver.delete(&tsid).await.unwrap();
        assert!(driver.read(&tsid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_driver_rejects_operations() {
        let driver = MemoryDriver::new();
        driver.close().await.unwrap();
        let err = driver.write(vec![record("Labc", 1)]).await.unwrap_err();
        assert!(matches!(err, DriverError::Closed));
    }
}
