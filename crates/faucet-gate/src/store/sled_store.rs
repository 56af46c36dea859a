//! Durable record store on top of sled.
//!
//! Layout:
//! - `disbursements`: big-endian id -> bincode record
//! - `by_identity` / `by_destination`: `address \0 time id` -> big-endian amount
//!
//! Time in index keys is milliseconds with the sign bit flipped, so byte order
//! matches chronological order and a day window is one range scan.

use super::RecordStore;
use crate::clock::DayWindow;
use crate::error::{GateError, GateResult};
use crate::gate::QuotaDimension;
use crate::record::{DisbursementRecord, NewDisbursement};
use chrono::{DateTime, Utc};
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use tracing::{debug, info};

pub struct SledStore {
    db: Db,
    records: Tree,
    by_identity: Tree,
    by_destination: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("records", &self.records.len())
            .finish()
    }
}

impl SledStore {
    /// Create or open the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> GateResult<Self> {
        info!("Opening disbursement database at: {}", path.as_ref().display());

        let db = sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(64 * 1024 * 1024)
            .open()?;

        let records = db.open_tree("disbursements")?;
        let by_identity = db.open_tree("by_identity")?;
        let by_destination = db.open_tree("by_destination")?;

        Ok(Self {
            db,
            records,
            by_identity,
            by_destination,
        })
    }

    fn index(&self, dimension: QuotaDimension) -> &Tree {
        match dimension {
            QuotaDimension::Identity => &self.by_identity,
            QuotaDimension::Destination => &self.by_destination,
        }
    }

    fn load(&self, id_key: &[u8]) -> GateResult<DisbursementRecord> {
        let bytes = self.records.get(id_key)?.ok_or_else(|| {
            GateError::StorageUnavailable("index points at a missing record".to_string())
        })?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

fn sortable_millis(t: DateTime<Utc>) -> [u8; 8] {
    ((t.timestamp_millis() as u64) ^ (1u64 << 63)).to_be_bytes()
}

fn address_prefix(address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 1);
    key.extend_from_slice(address.as_bytes());
    key.push(0);
    key
}

fn index_key(address: &str, timestamp: DateTime<Utc>, id: u64) -> Vec<u8> {
    let mut key = address_prefix(address);
    key.extend_from_slice(&sortable_millis(timestamp));
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn window_bound(address: &str, t: DateTime<Utc>) -> Vec<u8> {
    let mut key = address_prefix(address);
    key.extend_from_slice(&sortable_millis(t));
    key
}

/// True when `key` is an index key of exactly `prefix`'s address
fn is_exact_key(key: &[u8], prefix: &[u8]) -> bool {
    key.len() == prefix.len() + 16
}

fn read_u64(bytes: &[u8]) -> GateResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| GateError::StorageUnavailable("malformed index entry".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

impl RecordStore for SledStore {
    fn append(&self, record: NewDisbursement) -> GateResult<DisbursementRecord> {
        // generate_id starts at 0; records are numbered from 1
        let id = self.db.generate_id()? + 1;
        let record = record.into_record(id);

        let id_key = id.to_be_bytes();
        let value = bincode::serialize(&record)?;
        let amount = record.amount.to_be_bytes();
        let identity_key = index_key(&record.identity_address, record.timestamp, id);
        let destination_key = index_key(&record.destination_address, record.timestamp, id);

        let result: TransactionResult<(), ()> = (&self.records, &self.by_identity, &self.by_destination)
            .transaction(|(records, by_identity, by_destination)| {
                records.insert(&id_key[..], value.as_slice())?;
                by_identity.insert(identity_key.as_slice(), &amount[..])?;
                by_destination.insert(destination_key.as_slice(), &amount[..])?;
                Ok(())
            });

        result.map_err(|e| match e {
            TransactionError::Storage(e) => GateError::from(e),
            TransactionError::Abort(()) => {
                GateError::StorageUnavailable("record transaction aborted".to_string())
            }
        })?;
        self.db.flush()?;

        debug!("Stored disbursement #{} for identity {}", id, record.identity_address);
        Ok(record)
    }

    fn sum_in_window(
        &self,
        dimension: QuotaDimension,
        address: &str,
        window: &DayWindow,
    ) -> GateResult<u64> {
        let start = window_bound(address, window.start);
        let end = window_bound(address, window.end);

        let prefix = address_prefix(address);
        let mut total = 0u64;
        for item in self.index(dimension).range(start..end) {
            let (key, value) = item?;
            if !is_exact_key(&key, &prefix) {
                continue;
            }
            total = total.saturating_add(read_u64(&value)?);
        }
        Ok(total)
    }

    fn records_for(
        &self,
        dimension: QuotaDimension,
        address: &str,
    ) -> GateResult<Vec<DisbursementRecord>> {
        let prefix = address_prefix(address);
        let mut records = Vec::new();

        for item in self.index(dimension).scan_prefix(&prefix).rev() {
            let (key, _) = item?;
            if !is_exact_key(&key, &prefix) {
                continue;
            }
            let id_key = &key[key.len() - 8..];
            records.push(self.load(id_key)?);
        }
        Ok(records)
    }

    fn len(&self) -> GateResult<usize> {
        Ok(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn disbursement(identity: &str, destination: &str, amount: u64, ts: &str) -> NewDisbursement {
        NewDisbursement {
            identity_address: identity.to_string(),
            destination_address: destination.to_string(),
            amount,
            timestamp: at(ts),
            transaction_hash: Some("0xfeed".to_string()),
        }
    }

    fn utc_window(ts: &str) -> DayWindow {
        DayWindow::containing(at(ts), FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn test_sortable_millis_orders_pre_epoch() {
        assert!(sortable_millis(at("1969-12-31T23:59:59Z")) < sortable_millis(at("1970-01-01T00:00:00Z")));
        assert!(sortable_millis(at("2024-03-10T00:00:00Z")) < sortable_millis(at("2024-03-10T00:00:00.001Z")));
    }

    #[test]
    fn test_append_and_sum() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SledStore::open(dir.path().join("db"))?;

        let first = store.append(disbursement("A", "D", 30, "2024-03-10T00:00:00Z"))?;
        let second = store.append(disbursement("A", "E", 25, "2024-03-10T23:59:59Z"))?;
        store.append(disbursement("A", "D", 50, "2024-03-11T00:00:00Z"))?;
        store.append(disbursement("AB", "D", 7, "2024-03-10T10:00:00Z"))?;

        assert!(second.id > first.id);
        assert_eq!(store.len()?, 4);

        let window = utc_window("2024-03-10T12:00:00Z");
        assert_eq!(store.sum_in_window(QuotaDimension::Identity, "A", &window)?, 55);
        assert_eq!(store.sum_in_window(QuotaDimension::Identity, "AB", &window)?, 7);
        assert_eq!(store.sum_in_window(QuotaDimension::Destination, "D", &window)?, 37);
        assert_eq!(store.sum_in_window(QuotaDimension::Destination, "E", &window)?, 25);

        let next_day = utc_window("2024-03-11T12:00:00Z");
        assert_eq!(store.sum_in_window(QuotaDimension::Identity, "A", &next_day)?, 50);

        Ok(())
    }

    #[test]
    fn test_addresses_sharing_a_prefix_stay_apart() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SledStore::open(dir.path().join("db"))?;

        store.append(disbursement("A", "D", 10, "2024-03-10T01:00:00Z"))?;
        store.append(disbursement("A\0B", "D", 20, "2024-03-10T02:00:00Z"))?;

        let records = store.records_for(QuotaDimension::Identity, "A")?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, 10);

        let window = utc_window("2024-03-10T12:00:00Z");
        assert_eq!(store.sum_in_window(QuotaDimension::Identity, "A", &window)?, 10);

        Ok(())
    }

    #[test]
    fn test_records_survive_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db");

        {
            let store = SledStore::open(&path)?;
            store.append(disbursement("A", "D", 10, "2024-03-10T01:00:00Z"))?;
            store.append(disbursement("A", "D", 20, "2024-03-10T02:00:00Z"))?;
        }

        let store = SledStore::open(&path)?;
        let records = store.records_for(QuotaDimension::Identity, "A")?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].amount, 20);
        assert_eq!(records[1].amount, 10);
        assert_eq!(records[0].transaction_hash.as_deref(), Some("0xfeed"));

        let third = store.append(disbursement("A", "D", 5, "2024-03-10T03:00:00Z"))?;
        assert!(third.id > records[0].id);

        Ok(())
    }
}
