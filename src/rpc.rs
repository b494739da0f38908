//! HTTP JSON-RPC transport: a [`ChainClient`] for any Ethereum node and a
//! [`WalletProvider`] backed by the accounts the node manages.

use crate::{
    Error,
    Result,
    chain::{
        CallRequest,
        ChainClient,
        ReceiptStatus,
        TransactionReceipt,
        TransactionRequest,
    },
    config::ChainParams,
    payment::PaymentTokenDetails,
    wallet::{
        WalletEvent,
        WalletEventSender,
        WalletProvider,
    },
};
use alloy_primitives::{
    Address,
    B256,
    Bytes,
};
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tracing::{
    debug,
    trace,
    warn,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Serialize)]
struct CallParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<Address>,
    to: Address,
    data: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptDto {
    transaction_hash: B256,
    status: Option<String>,
    block_number: Option<String>,
}

/// Decodes a JSON-RPC response body into `T`, surfacing error objects as
/// [`Error::Rpc`].
pub fn parse_response<T: DeserializeOwned>(method: &str, body: &[u8]) -> Result<T> {
    let response: RpcResponse = serde_json::from_slice(body)
        .map_err(|e| Error::unexpected(method, format!("invalid json-rpc envelope: {e}")))?;
    if let Some(error) = response.error {
        return Err(Error::rpc(method, Some(error.code), error.message));
    }
    let result = response.result.unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|e| Error::unexpected(method, e.to_string()))
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(method: &str, raw: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .filter(|d| !d.is_empty())
        .ok_or_else(|| Error::unexpected(method, format!("not a hex quantity: {raw:?}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::unexpected(method, format!("bad quantity {raw:?}: {e}")))
}

/// `null` means the transaction is still pending.
pub fn parse_receipt(method: &str, raw: Value) -> Result<Option<TransactionReceipt>> {
    if raw.is_null() {
        return Ok(None);
    }
    let dto: ReceiptDto =
        serde_json::from_value(raw).map_err(|e| Error::unexpected(method, e.to_string()))?;
    let status = dto
        .status
        .as_deref()
        .map(|raw| parse_quantity(method, raw))
        .transpose()?;
    let status = match status {
        Some(1) => ReceiptStatus::Success,
        Some(_) => ReceiptStatus::Reverted,
        None => {
            return Err(Error::unexpected(
                method,
                "receipt without status (pre-byzantium chain)",
            ));
        }
    };
    let block_number = dto
        .block_number
        .as_deref()
        .map(|n| parse_quantity(method, n))
        .transpose()?;
    Ok(Some(TransactionReceipt {
        transaction_hash: dto.transaction_hash,
        status,
        block_number,
    }))
}

#[derive(Clone, Debug)]
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, method, %params, "json-rpc request");
        let res = self
            .http
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;
        let status = res.status();
        let body = res.bytes().await?;
        if !status.is_success() {
            return Err(Error::rpc(
                method,
                None,
                format!("http {status}: {}", String::from_utf8_lossy(&body)),
            ));
        }
        parse_response(method, &body)
    }
}

impl ChainClient for JsonRpcClient {
    async fn chain_id(&self) -> Result<u64> {
        let raw: String = self.request("eth_chainId", json!([])).await?;
        parse_quantity("eth_chainId", &raw)
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes> {
        let params = CallParams {
            from: request.from,
            to: request.to,
            data: request.data,
        };
        self.request("eth_call", json!([params, "latest"])).await
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<B256> {
        let params = CallParams {
            from: Some(request.from),
            to: request.to,
            data: request.data,
        };
        self.request("eth_sendTransaction", json!([params])).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let raw: Value = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        parse_receipt("eth_getTransactionReceipt", raw)
    }
}

#[derive(Default)]
struct Observed {
    accounts: Option<Vec<Address>>,
    chain_id: Option<u64>,
}

#[derive(Default)]
struct WatchState {
    listeners: Vec<WalletEventSender>,
    observed: Observed,
}

/// Wallet whose accounts live in the node behind the endpoint, such as a
/// development node with unlocked accounts.
///
/// HTTP has no push channel, so account and chain changes are detected by
/// [`RpcWallet::poll_changes`].
#[derive(Clone)]
pub struct RpcWallet {
    client: JsonRpcClient,
    token_image: Option<String>,
    watch: Arc<Mutex<WatchState>>,
}

impl RpcWallet {
    pub fn new(client: JsonRpcClient) -> Self {
        Self {
            client,
            token_image: None,
            watch: Arc::new(Mutex::new(WatchState::default())),
        }
    }

    pub fn with_token_image(mut self, image: Option<String>) -> Self {
        self.token_image = image;
        self
    }

    fn watch_state(&self) -> Result<std::sync::MutexGuard<'_, WatchState>> {
        self.watch
            .lock()
            .map_err(|_| Error::unexpected("wallet", "watch state poisoned"))
    }

    fn remember_accounts(&self, accounts: &[Address]) -> Result<()> {
        self.watch_state()?.observed.accounts = Some(accounts.to_vec());
        Ok(())
    }

    fn remember_chain(&self, chain_id: u64) -> Result<()> {
        self.watch_state()?.observed.chain_id = Some(chain_id);
        Ok(())
    }

    /// Compares the node's accounts and chain with what the wallet last
    /// reported and notifies subscribers of each difference.
    pub async fn poll_changes(&self) -> Result<usize> {
        let accounts: Vec<Address> = self.client.request("eth_accounts", json!([])).await?;
        let chain_id = self.client.chain_id().await?;

        let mut state = self.watch_state()?;
        let mut events = Vec::new();
        match &state.observed.accounts {
            Some(previous) if *previous != accounts => {
                events.push(WalletEvent::AccountsChanged(accounts.clone()));
            }
            _ => {}
        }
        match state.observed.chain_id {
            Some(previous) if previous != chain_id => {
                events.push(WalletEvent::ChainChanged(chain_id));
            }
            _ => {}
        }
        state.observed.accounts = Some(accounts);
        state.observed.chain_id = Some(chain_id);

        for event in &events {
            debug!(?event, "wallet change detected");
            state
                .listeners
                .retain(|listener| listener.send(event.clone()).is_ok());
        }
        Ok(events.len())
    }
}

impl WalletProvider for RpcWallet {
    type Client = JsonRpcClient;

    async fn detect(&self) -> bool {
        match self.client.chain_id().await {
            Ok(_) => true,
            Err(e) => {
                warn!(url = self.client.url(), error = %e, "wallet endpoint unreachable");
                false
            }
        }
    }

    fn read_client(&self, chain: &ChainParams) -> Result<Self::Client> {
        let url = chain.primary_rpc_url().ok_or(Error::ProviderUnavailable)?;
        JsonRpcClient::new(url)
    }

    fn write_client(&self, _chain: &ChainParams) -> Result<Self::Client> {
        Ok(self.client.clone())
    }

    async fn get_addresses(&self) -> Result<Vec<Address>> {
        let accounts: Vec<Address> = self.client.request("eth_accounts", json!([])).await?;
        self.remember_accounts(&accounts)?;
        Ok(accounts)
    }

    async fn request_addresses(&self) -> Result<Vec<Address>> {
        let accounts: Vec<Address> =
            match self
                .client
                .request::<Vec<Address>>("eth_requestAccounts", json!([]))
                .await
            {
                Err(Error::Rpc {
                    code: Some(METHOD_NOT_FOUND),
                    ..
                }) => self.client.request("eth_accounts", json!([])).await?,
                other => other?,
            };
        self.remember_accounts(&accounts)?;
        Ok(accounts)
    }

    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self.client.chain_id().await?;
        self.remember_chain(chain_id)?;
        Ok(chain_id)
    }

    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Bytes> {
        let message = Bytes::copy_from_slice(message);
        self.client
            .request("personal_sign", json!([message, account]))
            .await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let _: Value = self
            .client
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": format!("{chain_id:#x}") }]),
            )
            .await?;
        Ok(())
    }

    async fn add_chain(&self, chain: &ChainParams) -> Result<()> {
        let explorers: Vec<&str> = chain.block_explorer_url.iter().map(String::as_str).collect();
        let _: Value = self
            .client
            .request(
                "wallet_addEthereumChain",
                json!([{
                    "chainId": chain.chain_id_hex(),
                    "chainName": chain.chain_name,
                    "rpcUrls": chain.rpc_urls,
                    "nativeCurrency": {
                        "name": chain.native_currency.name,
                        "symbol": chain.native_currency.symbol,
                        "decimals": chain.native_currency.decimals,
                    },
                    "blockExplorerUrls": explorers,
                }]),
            )
            .await?;
        Ok(())
    }

    async fn watch_asset(&self, token: &PaymentTokenDetails) -> Result<bool> {
        let mut options = json!({
            "address": token.address,
            "symbol": token.symbol,
            "decimals": token.decimals,
        });
        if let Some(image) = &self.token_image {
            options["image"] = json!(image);
        }
        self.client
            .request(
                "wallet_watchAsset",
                json!({ "type": "ERC20", "options": options }),
            )
            .await
    }

    fn subscribe(&self, sink: WalletEventSender) {
        let Ok(mut state) = self.watch_state() else {
            return;
        };
        if !state.listeners.iter().any(|l| l.same_channel(&sink)) {
            state.listeners.push(sink);
        }
    }
}
