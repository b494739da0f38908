use crate::{
    Error,
    Result,
};
use alloy_primitives::{
    Address,
    B256,
    Bytes,
};
use alloy_sol_types::SolCall;
use std::time::Duration;
use tokio::time;
use tracing::debug;

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Read-only contract call, executed against latest state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// State-changing call submitted from `from`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

impl TransactionReceipt {
    pub fn is_reverted(&self) -> bool {
        self.status == ReceiptStatus::Reverted
    }
}

/// How long to wait for a submitted transaction to be included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiptPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }
}

/// Capability to talk to a chain endpoint.
///
/// Implementations work on raw calldata; the free functions in this module
/// layer ABI encoding on top.
pub trait ChainClient {
    fn chain_id(&self) -> impl Future<Output = Result<u64>>;

    fn call(&self, request: CallRequest) -> impl Future<Output = Result<Bytes>>;

    fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> impl Future<Output = Result<B256>>;

    /// `None` while the transaction is still pending.
    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<TransactionReceipt>>>;
}

pub async fn read_contract<C: ChainClient, T: SolCall>(
    client: &C,
    to: Address,
    from: Option<Address>,
    call: &T,
) -> Result<T::Return> {
    let data = client
        .call(CallRequest {
            from,
            to,
            data: call.abi_encode().into(),
        })
        .await?;
    Ok(T::abi_decode_returns(&data, true)?)
}

/// Dry-runs a call as `from` and returns what it would produce, without
/// submitting anything.
pub async fn simulate_contract<C: ChainClient, T: SolCall>(
    client: &C,
    to: Address,
    from: Address,
    call: &T,
) -> Result<T::Return> {
    debug!(%to, %from, function = T::SIGNATURE, "simulating contract call");
    read_contract(client, to, Some(from), call).await
}

pub async fn write_contract<C: ChainClient, T: SolCall>(
    client: &C,
    to: Address,
    from: Address,
    call: &T,
) -> Result<B256> {
    let hash = client
        .send_transaction(TransactionRequest {
            from,
            to,
            data: call.abi_encode().into(),
        })
        .await?;
    debug!(%to, %from, function = T::SIGNATURE, tx = %hash, "transaction submitted");
    Ok(hash)
}

pub async fn wait_for_transaction_receipt<C: ChainClient>(
    client: &C,
    hash: B256,
    policy: ReceiptPolicy,
) -> Result<TransactionReceipt> {
    let poll = async {
        loop {
            if let Some(receipt) = client.transaction_receipt(hash).await? {
                return Ok::<_, Error>(receipt);
            }
            time::sleep(policy.poll_interval).await;
        }
    };
    match time::timeout(policy.timeout, poll).await {
        Ok(receipt) => receipt,
        Err(_) => Err(Error::ReceiptTimeout(hash)),
    }
}
