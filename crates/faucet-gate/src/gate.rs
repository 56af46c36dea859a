//! The disbursement gate: daily quota checks and atomic recording.
//!
//! Every quota evaluation runs while holding the per-key locks of both the
//! identity and the destination, so check-then-append is a single critical
//! section per key. Locks are always taken in key order.

use crate::clock::{Clock, DayWindow};
use crate::error::{GateError, GateResult};
use crate::record::{Claim, DisbursementRecord};
use crate::store::RecordStore;
use crate::transfer::TransferExecutor;
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// One of the two independent quota dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    Identity,
    Destination,
}

impl QuotaDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaDimension::Identity => "identity",
            QuotaDimension::Destination => "destination",
        }
    }

    /// The address a record is keyed by along this dimension
    pub fn address_of<'a>(&self, record: &'a DisbursementRecord) -> &'a str {
        match self {
            QuotaDimension::Identity => &record.identity_address,
            QuotaDimension::Destination => &record.destination_address,
        }
    }
}

/// Daily caps for each dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub per_identity: u64,
    pub per_destination: u64,
}

impl QuotaLimits {
    pub fn uniform(limit: u64) -> Self {
        Self {
            per_identity: limit,
            per_destination: limit,
        }
    }

    pub fn for_dimension(&self, dimension: QuotaDimension) -> u64 {
        match dimension {
            QuotaDimension::Identity => self.per_identity,
            QuotaDimension::Destination => self.per_destination,
        }
    }
}

/// Why a claim was turned away
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub dimension: QuotaDimension,
    pub would_be_total: u64,
    pub limit: u64,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self.dimension {
            QuotaDimension::Identity => "identity quota exceeded",
            QuotaDimension::Destination => "destination quota exceeded",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: would be {} against a daily limit of {}",
            self.reason(),
            self.would_be_total,
            self.limit
        )
    }
}

/// Outcome of an eligibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected(Rejection),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }

    fn into_result(self) -> GateResult<()> {
        match self {
            Decision::Admitted => Ok(()),
            Decision::Rejected(rejection) => Err(GateError::QuotaExceeded(rejection)),
        }
    }
}

/// Usage of one quota key inside a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionUsage {
    pub address: String,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// Today's usage for an identity / destination pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub window: DayWindow,
    pub identity: DimensionUsage,
    pub destination: DimensionUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct QuotaKey {
    dimension: QuotaDimension,
    address: String,
}

/// Per-key async mutexes, created on demand
#[derive(Debug, Default)]
struct KeyLocks {
    locks: DashMap<QuotaKey, Arc<Mutex<()>>>,
}

/// Held locks for one claim; released on drop
struct ClaimGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    async fn acquire(&self, claim: &Claim) -> ClaimGuard {
        let mut keys = vec![
            QuotaKey {
                dimension: QuotaDimension::Identity,
                address: claim.identity_address().to_string(),
            },
            QuotaKey {
                dimension: QuotaDimension::Destination,
                address: claim.destination_address().to_string(),
            },
        ];
        keys.sort();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            // Clone the Arc out so no DashMap shard lock is held across the await
            let lock = self.locks.entry(key).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }

        ClaimGuard { _guards: guards }
    }

    /// Drop lock entries nobody is holding or waiting on
    fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Counters exposed on the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    pub records: usize,
    pub active_lock_keys: usize,
}

/// Eligibility and quota gate in front of the token transfer
pub struct DisbursementGate {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    limits: QuotaLimits,
    locks: KeyLocks,
}

impl fmt::Debug for DisbursementGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisbursementGate")
            .field("offset", &self.offset)
            .field("limits", &self.limits)
            .field("lock_keys", &self.locks.len())
            .finish()
    }
}

impl DisbursementGate {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
        limits: QuotaLimits,
    ) -> Self {
        Self {
            store,
            clock,
            offset,
            limits,
            locks: KeyLocks::default(),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// The day window that is current according to the gate's clock
    pub fn today(&self) -> DayWindow {
        DayWindow::containing(self.clock.now(), self.offset)
    }

    /// Decide whether `claim` fits today's quotas. Never writes.
    pub async fn check_eligibility(&self, claim: &Claim) -> GateResult<Decision> {
        let _guard = self.locks.acquire(claim).await;
        let decision = self.evaluate(claim, &self.today())?;

        match &decision {
            Decision::Admitted => debug!(
                "Admitted {} -> {} for {}",
                claim.identity_address(),
                claim.destination_address(),
                claim.amount()
            ),
            Decision::Rejected(rejection) => info!(
                "Rejected {} -> {}: {}",
                claim.identity_address(),
                claim.destination_address(),
                rejection
            ),
        }
        Ok(decision)
    }

    /// Append a completed disbursement.
    ///
    /// The quota of the day containing `timestamp` (default: now) is
    /// re-evaluated under the key locks; a record that would overshoot
    /// either limit is refused with `QuotaExceeded` and nothing is written.
    /// Timestamps later than the clock's now are refused.
    pub async fn record_disbursement(
        &self,
        claim: &Claim,
        timestamp: Option<DateTime<Utc>>,
        transaction_hash: Option<String>,
    ) -> GateResult<DisbursementRecord> {
        let now = self.clock.now();
        let timestamp = timestamp.unwrap_or(now);
        if timestamp > now {
            return Err(GateError::InvalidArgument(format!(
                "timestamp {} is in the future",
                timestamp.to_rfc3339()
            )));
        }
        let window = DayWindow::containing(timestamp, self.offset);

        let _guard = self.locks.acquire(claim).await;
        self.evaluate(claim, &window)?.into_result()?;

        let record = self
            .store
            .append(claim.to_disbursement(timestamp, transaction_hash))?;

        info!(
            "Recorded disbursement #{}: {} -> {} amount {}",
            record.id, record.identity_address, record.destination_address, record.amount
        );
        Ok(record)
    }

    /// Check, transfer, and record as one critical section.
    ///
    /// The transfer is bounded by `timeout` and never retried. A failed or
    /// timed-out transfer leaves no record behind. The record is stamped with
    /// the instant the quota was evaluated at, so it always lands in the
    /// window that was checked, even when confirmation crosses midnight.
    pub async fn claim(
        &self,
        claim: &Claim,
        executor: &dyn TransferExecutor,
        timeout: Duration,
    ) -> GateResult<DisbursementRecord> {
        let _guard = self.locks.acquire(claim).await;
        let evaluated_at = self.clock.now();
        let window = DayWindow::containing(evaluated_at, self.offset);
        self.evaluate(claim, &window)?.into_result()?;

        let transaction_hash = match tokio::time::timeout(
            timeout,
            executor.transfer(claim.destination_address(), claim.amount()),
        )
        .await
        {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => {
                warn!("Transfer to {} failed: {}", claim.destination_address(), e);
                return Err(match e {
                    GateError::UpstreamTransferFailed(_) | GateError::InvalidArgument(_) => e,
                    other => GateError::UpstreamTransferFailed(other.to_string()),
                });
            }
            Err(_) => {
                warn!(
                    "Transfer to {} timed out after {:?}",
                    claim.destination_address(),
                    timeout
                );
                return Err(GateError::UpstreamTransferFailed(format!(
                    "transfer timed out after {:?}",
                    timeout
                )));
            }
        };

        let record = self
            .store
            .append(claim.to_disbursement(evaluated_at, Some(transaction_hash.clone())))
            .map_err(|e| {
                error!(
                    "Transfer {} to {} succeeded but could not be recorded: {}",
                    transaction_hash,
                    claim.destination_address(),
                    e
                );
                e
            })?;

        info!(
            "Claim #{} completed: {} -> {} amount {} (tx: {})",
            record.id,
            record.identity_address,
            record.destination_address,
            record.amount,
            transaction_hash
        );
        Ok(record)
    }

    /// Used and remaining amounts for today
    pub async fn usage(&self, identity_address: &str, destination_address: &str) -> GateResult<QuotaUsage> {
        let window = self.today();
        let usage_of = |dimension: QuotaDimension, address: &str| -> GateResult<DimensionUsage> {
            let used = self.store.sum_in_window(dimension, address, &window)?;
            let limit = self.limits.for_dimension(dimension);
            Ok(DimensionUsage {
                address: address.to_string(),
                used,
                limit,
                remaining: limit.saturating_sub(used),
            })
        };

        Ok(QuotaUsage {
            window,
            identity: usage_of(QuotaDimension::Identity, identity_address)?,
            destination: usage_of(QuotaDimension::Destination, destination_address)?,
        })
    }

    /// Records for `address` along `dimension`, newest first, at most `limit`
    pub async fn history(
        &self,
        dimension: QuotaDimension,
        address: &str,
        limit: usize,
    ) -> GateResult<Vec<DisbursementRecord>> {
        let mut records = self.store.records_for(dimension, address)?;
        records.truncate(limit);
        Ok(records)
    }

    /// Release lock entries for idle keys
    pub fn prune_idle_locks(&self) -> usize {
        let pruned = self.locks.prune();
        if pruned > 0 {
            debug!("Pruned {} idle quota locks", pruned);
        }
        pruned
    }

    pub fn stats(&self) -> GateResult<GateStats> {
        Ok(GateStats {
            records: self.store.len()?,
            active_lock_keys: self.locks.len(),
        })
    }

    /// Both sums are computed before either comparison so a rejection is
    /// always based on a complete view. Caller must hold the key locks.
    fn evaluate(&self, claim: &Claim, window: &DayWindow) -> GateResult<Decision> {
        let identity_used =
            self.store
                .sum_in_window(QuotaDimension::Identity, claim.identity_address(), window)?;
        let destination_used = self.store.sum_in_window(
            QuotaDimension::Destination,
            claim.destination_address(),
            window,
        )?;

        let checks = [
            (QuotaDimension::Identity, identity_used),
            (QuotaDimension::Destination, destination_used),
        ];
        for (dimension, used) in checks {
            let limit = self.limits.for_dimension(dimension);
            let would_be_total = used.saturating_add(claim.amount());
            if would_be_total > limit {
                return Ok(Decision::Rejected(Rejection {
                    dimension,
                    would_be_total,
                    limit,
                }));
            }
        }

        Ok(Decision::Admitted)
    }
}
