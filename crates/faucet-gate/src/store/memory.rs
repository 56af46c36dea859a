//! In-process record store. Contents are lost on restart.

use super::RecordStore;
use crate::clock::DayWindow;
use crate::error::{GateError, GateResult};
use crate::gate::QuotaDimension;
use crate::record::{DisbursementRecord, NewDisbursement};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<DisbursementRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> GateResult<RwLockReadGuard<'_, Vec<DisbursementRecord>>> {
        self.records
            .read()
            .map_err(|_| GateError::StorageUnavailable("record lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, record: NewDisbursement) -> GateResult<DisbursementRecord> {
        let mut records = self
            .records
            .write()
            .map_err(|_| GateError::StorageUnavailable("record lock poisoned".to_string()))?;

        let id = records.last().map(|r| r.id + 1).unwrap_or(1);
        let record = record.into_record(id);
        records.push(record.clone());

        debug!("Stored disbursement #{} in memory", id);
        Ok(record)
    }

    fn sum_in_window(
        &self,
        dimension: QuotaDimension,
        address: &str,
        window: &DayWindow,
    ) -> GateResult<u64> {
        let total = self
            .read()?
            .iter()
            .filter(|r| dimension.address_of(r) == address && window.contains(r.timestamp))
            .fold(0u64, |acc, r| acc.saturating_add(r.amount));
        Ok(total)
    }

    fn records_for(
        &self,
        dimension: QuotaDimension,
        address: &str,
    ) -> GateResult<Vec<DisbursementRecord>> {
        let mut matching: Vec<_> = self
            .read()?
            .iter()
            .filter(|r| dimension.address_of(r) == address)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(matching)
    }

    fn len(&self) -> GateResult<usize> {
        Ok(self.read()?.len())
    }
}
