//! Capability to reach the chain: sign and submit transactions, read state, wait for finality.
//!
//! Every component receives a [`ChainClient`] explicitly. [`AlloyChainClient`] talks to a JSON-RPC
//! node through an `alloy` provider, the simulated chain in [`crate::testing`] backs the tests.

use std::time::Duration;

use alloy::{
    network::{ReceiptResponse, TransactionBuilder},
    primitives::{Address, Bytes, TxHash, B256, U256},
    providers::{
        PendingTransactionBuilder, PendingTransactionError, Provider, WalletProvider,
        WatchTxError,
    },
    rpc::types::TransactionRequest,
    sol_types::SolCall,
    transports::TransportError,
};
use async_trait::async_trait;
use vault_contract_adapter::evm::decode_revert;

use crate::error::{AbiError, ChainError, DeployError};

/// A transaction to sign and broadcast. `to == None` creates a contract from `input`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
}

impl TxRequest {
    pub fn call(to: Address, input: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            input: input.into(),
            value: U256::ZERO,
        }
    }

    pub fn create(creation_code: Bytes) -> Self {
        Self {
            to: None,
            input: creation_code,
            value: U256::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: bool,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

/// How long, and for how many confirmations, to wait for a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinalityPolicy {
    pub confirmations: u64,
    pub timeout: Duration,
}

impl Default for FinalityPolicy {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account signing every transaction sent through this client.
    fn signer_address(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Execute a read-only call against the latest state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Sign and broadcast, returning as soon as the node accepted the transaction.
    ///
    /// A transaction the node can tell will revert is rejected with [`ChainError::Reverted`]
    /// and never broadcast.
    async fn send(&self, tx: TxRequest) -> Result<TxHash, ChainError>;

    /// Wait until `tx_hash` is mined with the required confirmations.
    ///
    /// Fails with [`ChainError::Unconfirmed`] once the timeout elapses.
    async fn wait(&self, tx_hash: TxHash, finality: FinalityPolicy) -> Result<Receipt, ChainError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError>;

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError>;
}

/// Send a transaction and suspend until it reaches finality.
///
/// A mined transaction with a failed status is reported as [`ChainError::Reverted`].
pub async fn send_and_confirm<C>(
    client: &C,
    tx: TxRequest,
    finality: FinalityPolicy,
) -> Result<Receipt, ChainError>
where
    C: ChainClient + ?Sized,
{
    let tx_hash = client.send(tx).await?;
    tracing::info!(%tx_hash, "waiting for tx to be mined");
    let receipt = client.wait(tx_hash, finality).await?;
    if !receipt.status {
        tracing::error!(%tx_hash, "tx reverted");
        return Err(ChainError::Reverted {
            tx_hash: Some(tx_hash),
            reason: None,
            data: None,
        });
    }
    tracing::info!(gas_used = receipt.gas_used, %tx_hash, "tx mined");
    Ok(receipt)
}

/// Call a view function through its `sol!` binding.
pub async fn call_view<C, T>(client: &C, to: Address, call: T) -> Result<T::Return, DeployError>
where
    C: ChainClient + ?Sized,
    T: SolCall + Send,
{
    let output = client.call(to, call.abi_encode().into()).await?;
    T::abi_decode_returns(&output, true)
        .map_err(|err| AbiError::Decoding(format!("{}: {err}", T::SIGNATURE)).into())
}

/// [`ChainClient`] over an `alloy` provider holding the signing wallet.
#[derive(Clone, Debug)]
pub struct AlloyChainClient<P> {
    provider: P,
}

impl<P> AlloyChainClient<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> ChainClient for AlloyChainClient<P>
where
    P: Provider + WalletProvider + Send + Sync,
{
    fn signer_address(&self) -> Address {
        self.provider.default_signer_address()
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider.get_chain_id().await.map_err(classify)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider.call(tx).await.map_err(classify)
    }

    async fn send(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let mut request = TransactionRequest::default()
            .with_input(tx.input)
            .with_value(tx.value);
        request = match tx.to {
            Some(to) => request.with_to(to),
            None => request.into_create(),
        };
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(classify)?;
        Ok(*pending.tx_hash())
    }

    async fn wait(&self, tx_hash: TxHash, finality: FinalityPolicy) -> Result<Receipt, ChainError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_required_confirmations(finality.confirmations)
            .with_timeout(Some(finality.timeout))
            .get_receipt()
            .await
            .map_err(|err| match err {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    ChainError::Unconfirmed(tx_hash)
                },
                PendingTransactionError::TransportError(err) => classify(err),
                err => ChainError::Rpc(err.to_string()),
            })?;
        Ok(Receipt {
            tx_hash: receipt.transaction_hash(),
            status: receipt.status(),
            contract_address: receipt.contract_address(),
            gas_used: receipt.gas_used(),
            block_number: receipt.block_number(),
        })
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        self.provider.get_code_at(address).await.map_err(classify)
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
        let value = self
            .provider
            .get_storage_at(address, U256::from_be_bytes(slot.0))
            .await
            .map_err(classify)?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }
}

/// Tell reverts (carrying revert data, or reported as such by the node) from transport failures.
fn classify(err: TransportError) -> ChainError {
    if let Some(payload) = err.as_error_resp() {
        if let Some(data) = payload.as_revert_data() {
            return ChainError::Reverted {
                tx_hash: None,
                reason: Some(decode_revert(&data)),
                data: Some(data),
            };
        }
        if payload.message.contains("revert") {
            return ChainError::Reverted {
                tx_hash: None,
                reason: Some(payload.message.to_string()),
                data: None,
            };
        }
    }
    ChainError::Rpc(err.to_string())
}
