//! Faucet Gate - eligibility and daily-quota gate for token faucets
//!
//! Before tokens are released to a wallet the gate:
//! 1. Optionally verifies the claiming identity's score against a threshold
//! 2. Enforces a daily quota per identity and per destination address
//! 3. Records the disbursement so concurrent claims cannot overshoot a quota
//!
//! Quota checks and record appends for the same identity or destination are
//! serialized through per-key locks held across check, transfer and record.

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod record;
pub mod scorer;
pub mod store;
pub mod transfer;

pub use config::GateConfig;
pub use error::{GateError, GateResult};
pub use gate::{Decision, DisbursementGate, QuotaDimension, QuotaLimits, Rejection};
pub use record::{Claim, DisbursementRecord};
