//! Token transfer execution.
//!
//! The gate only needs a transaction hash back once a transfer has landed.
//! [`EvmTransfer`] is the alloy-backed implementation for native-token faucets.

use crate::config::TransferConfig;
use crate::error::{GateError, GateResult};
use alloy::{
    network::ReceiptResponse,
    primitives::{utils::format_units, Address, U256},
    providers::{Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use std::str::FromStr;
use tracing::{debug, info};

/// Moves funds once the gate has admitted a claim
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Send `amount` whole tokens to `destination` and wait for confirmation.
    /// Returns the transaction hash.
    async fn transfer(&self, destination: &str, amount: u64) -> GateResult<String>;

    /// Reject destinations this executor cannot pay out to
    fn validate_destination(&self, address: &str) -> GateResult<()>;

    /// Verify the executor can currently reach its chain
    async fn health_check(&self) -> GateResult<()>;
}

/// Native-token transfers on an EVM chain
pub struct EvmTransfer {
    faucet_address: Address,
    decimals: u8,
    min_faucet_balance: U256,
    provider: Box<dyn Provider>,
}

impl std::fmt::Debug for EvmTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmTransfer")
            .field("faucet_address", &self.faucet_address)
            .field("decimals", &self.decimals)
            .field("min_faucet_balance", &self.min_faucet_balance)
            .finish()
    }
}

impl EvmTransfer {
    /// Create a transfer executor from configuration. Makes no network calls.
    pub fn new(config: &TransferConfig) -> GateResult<Self> {
        let private_key = config
            .private_key
            .strip_prefix("0x")
            .unwrap_or(&config.private_key);
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| GateError::Internal(anyhow::anyhow!("Invalid private key: {}", e)))?;
        let faucet_address = signer.address();

        let url = url::Url::parse(&config.rpc_url)
            .map_err(|e| GateError::Internal(anyhow::anyhow!("Invalid RPC URL: {}", e)))?;
        let wallet = alloy::network::EthereumWallet::from(signer);
        let provider = Box::new(ProviderBuilder::new().wallet(wallet).connect_http(url));

        let min_faucet_balance = to_base_units(config.min_faucet_balance, config.token_decimals)?;

        Ok(Self {
            faucet_address,
            decimals: config.token_decimals,
            min_faucet_balance,
            provider,
        })
    }

    pub fn faucet_address(&self) -> Address {
        self.faucet_address
    }

    fn display(&self, value: U256) -> String {
        format_units(value, self.decimals).unwrap_or_else(|_| value.to_string())
    }

    /// Ensure the faucet keeps `min_faucet_balance` after sending `outgoing`
    async fn check_faucet_balance(&self, outgoing: U256) -> GateResult<()> {
        let balance = self
            .provider
            .get_balance(self.faucet_address)
            .await
            .map_err(|e| GateError::UpstreamTransferFailed(format!("Failed to get faucet balance: {}", e)))?;

        let required = self.min_faucet_balance.saturating_add(outgoing);
        if balance < required {
            return Err(GateError::UpstreamTransferFailed(format!(
                "Faucet balance {} is below required {}",
                self.display(balance),
                self.display(required)
            )));
        }

        debug!(
            "Faucet balance check passed: {} (required: {})",
            self.display(balance),
            self.display(required)
        );
        Ok(())
    }
}

/// Scale whole tokens to base units (wei for 18 decimals)
pub fn to_base_units(amount: u64, decimals: u8) -> GateResult<U256> {
    U256::from(10u64)
        .checked_pow(U256::from(decimals))
        .and_then(|scale| U256::from(amount).checked_mul(scale))
        .ok_or_else(|| {
            GateError::InvalidArgument(format!(
                "amount {} with {} decimals overflows",
                amount, decimals
            ))
        })
}

/// Parse an EVM address, mapping failure to a field-level error
pub fn parse_evm_address(address: &str) -> GateResult<Address> {
    Address::from_str(address)
        .map_err(|_| GateError::InvalidArgument(format!("invalid destination address: {}", address)))
}

#[async_trait]
impl TransferExecutor for EvmTransfer {
    async fn transfer(&self, destination: &str, amount: u64) -> GateResult<String> {
        let to = parse_evm_address(destination)?;
        let value = to_base_units(amount, self.decimals)?;

        self.check_faucet_balance(value).await?;

        info!("Sending {} to {}", self.display(value), to);

        let tx_request = alloy::rpc::types::TransactionRequest::default()
            .from(self.faucet_address)
            .to(to)
            .value(value);

        let pending_tx = self
            .provider
            .send_transaction(tx_request)
            .await
            .map_err(|e| GateError::UpstreamTransferFailed(format!("Failed to send transaction: {}", e)))?;

        let tx_hash = *pending_tx.tx_hash();
        debug!("Transaction {} submitted, waiting for receipt", tx_hash);

        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|e| GateError::UpstreamTransferFailed(format!("Transaction {} not confirmed: {}", tx_hash, e)))?;

        if !ReceiptResponse::status(&receipt) {
            return Err(GateError::UpstreamTransferFailed(format!(
                "Transaction {} reverted",
                tx_hash
            )));
        }

        info!("Transaction confirmed: {} ({} to {})", tx_hash, self.display(value), to);
        Ok(format!("{:#x}", tx_hash))
    }

    fn validate_destination(&self, address: &str) -> GateResult<()> {
        parse_evm_address(address).map(|_| ())
    }

    async fn health_check(&self) -> GateResult<()> {
        let block = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| GateError::UpstreamTransferFailed(format!("RPC unreachable: {}", e)))?;
        debug!("Transfer RPC healthy at block {}", block);
        Ok(())
    }
}
