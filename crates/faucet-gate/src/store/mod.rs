//! Append-only persistence for disbursement records.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::clock::DayWindow;
use crate::error::GateResult;
use crate::gate::QuotaDimension;
use crate::record::{DisbursementRecord, NewDisbursement};

/// Storage backend for disbursement records.
///
/// `append` must be all-or-nothing: after an error no trace of the record may
/// be visible to `sum_in_window`. Serializing writers per quota key is the
/// gate's job, not the store's.
pub trait RecordStore: Send + Sync {
    /// Persist a record, assigning it the next id
    fn append(&self, record: NewDisbursement) -> GateResult<DisbursementRecord>;

    /// Total amount recorded for `address` along `dimension` inside `window`
    fn sum_in_window(
        &self,
        dimension: QuotaDimension,
        address: &str,
        window: &DayWindow,
    ) -> GateResult<u64>;

    /// Every record for `address` along `dimension`, newest first
    fn records_for(
        &self,
        dimension: QuotaDimension,
        address: &str,
    ) -> GateResult<Vec<DisbursementRecord>>;

    /// Number of stored records
    fn len(&self) -> GateResult<usize>;

    fn is_empty(&self) -> GateResult<bool> {
        Ok(self.len()? == 0)
    }
}
