//! In-memory wallet and chain used by unit and integration tests.
//!
//! [`SimulatedChain`] plays both the injected wallet and the node behind it,
//! running a small model of the game and payment token contracts.

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
    config::{
        ApprovalPolicy,
        ChainParams,
        ContractAddresses,
        GameConfig,
        NativeCurrency,
        SignerConfig,
    },
    contracts::{
        IERC20,
        IGame,
    },
    notify::{
        Notice,
        NoticeLevel,
        Notifier,
    },
    payment::PaymentTokenDetails,
    signer::{
        LocalKeySigner,
        MessageSigner,
    },
    wallet::{
        Connection,
        WalletEvent,
        WalletEventSender,
        WalletProvider,
    },
};
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
    keccak256,
};
use alloy_sol_types::SolCall;
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::Notify;

pub const TEST_CHAIN_ID: u64 = 31337;
const PLAYER_KEY_BYTE: u8 = 0x42;

pub fn test_chain_params() -> ChainParams {
    ChainParams {
        chain_id: TEST_CHAIN_ID,
        chain_name: "Arcade Devnet".to_string(),
        rpc_urls: vec!["http://127.0.0.1:8545".to_string()],
        native_currency: NativeCurrency {
            name: "Ether".to_string(),
            symbol: "ETH".to_string(),
            decimals: 18,
        },
        block_explorer_url: Some("https://explorer.arcade.test".to_string()),
    }
}

pub fn test_contracts() -> ContractAddresses {
    ContractAddresses {
        game: Address::repeat_byte(0x6a),
        payment_token: Address::repeat_byte(0x70),
    }
}

/// Config pointing at the simulated chain, with millisecond receipt polling.
pub fn test_config() -> GameConfig {
    GameConfig {
        chain: test_chain_params(),
        contracts: test_contracts(),
        approval: ApprovalPolicy::default(),
        signer: SignerConfig::Wallet,
        receipt_poll_interval_ms: 1,
        receipt_timeout_secs: 5,
        token_image_url: None,
    }
}

pub fn player_key() -> LocalKeySigner {
    let mut secret = [0u8; 32];
    secret[31] = PLAYER_KEY_BYTE;
    LocalKeySigner::from_secret(&secret).expect("valid test key")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletRequest {
    GetAccounts,
    RequestAccounts,
    ChainId,
    Sign(Address),
    SwitchChain(u64),
    AddChain(u64),
    WatchAsset(Address),
}

/// One entry in the simulated chain's history, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainCall {
    Read(&'static str),
    Write(&'static str),
    Wallet(WalletRequest),
}

/// Lets a test hold a read at the point it reaches the node.
#[derive(Clone, Default)]
pub struct PauseHandle {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl PauseHandle {
    pub async fn reached(&self) {
        self.reached.notified().await
    }

    pub fn release(&self) {
        self.release.notify_one()
    }
}

struct State {
    provider_present: bool,
    accounts: Vec<Address>,
    authorized: bool,
    reject_account_requests: bool,
    accept_watch_asset: bool,
    wallet_chain: u64,
    known_chains: HashSet<u64>,
    listeners: Vec<WalletEventSender>,
    contracts: ContractAddresses,
    scoreboard: Vec<(U256, Address)>,
    scoreboard_frozen: bool,
    winnings: Vec<U256>,
    last_winnings_count: Option<U256>,
    last_submission: Option<IGame::submitScoreCall>,
    prize_pool: Vec<U256>,
    free_plays: HashSet<Address>,
    plays: HashMap<Address, u64>,
    allowances: HashMap<(Address, Address), U256>,
    reverting_writes: HashSet<&'static str>,
    failing_reads: HashSet<&'static str>,
    paused_reads: HashMap<&'static str, PauseHandle>,
    paused_watch_asset: Option<PauseHandle>,
    receipts: HashMap<B256, ReceiptStatus>,
    nonce: u64,
    history: Vec<ChainCall>,
}

#[derive(Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    /// A wallet on the target chain with the player already authorized.
    pub fn new() -> Self {
        let state = State {
            provider_present: true,
            accounts: vec![player_key().address()],
            authorized: true,
            reject_account_requests: false,
            accept_watch_asset: true,
            wallet_chain: TEST_CHAIN_ID,
            known_chains: HashSet::from([1, TEST_CHAIN_ID]),
            listeners: Vec::new(),
            contracts: test_contracts(),
            scoreboard: Vec::new(),
            scoreboard_frozen: false,
            winnings: Vec::new(),
            last_winnings_count: None,
            last_submission: None,
            prize_pool: vec![U256::from(500u64), U256::from(250u64), U256::from(100u64)],
            free_plays: HashSet::new(),
            plays: HashMap::new(),
            allowances: HashMap::new(),
            reverting_writes: HashSet::new(),
            failing_reads: HashSet::new(),
            paused_reads: HashMap::new(),
            paused_watch_asset: None,
            receipts: HashMap::new(),
            nonce: 0,
            history: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("simulated chain state poisoned")
    }

    pub fn player(&self) -> Address {
        player_key().address()
    }

    pub fn contracts(&self) -> ContractAddresses {
        self.state().contracts
    }

    pub fn chain_id_now(&self) -> u64 {
        self.state().wallet_chain
    }

    /// Live context for the player, as a fresh session would hold it.
    pub fn connection(&self) -> Connection<SimulatedChain> {
        Connection {
            generation: 1,
            address: self.player(),
            chain_id: self.chain_id_now(),
            public: self.clone(),
            wallet: self.clone(),
        }
    }

    pub fn history(&self) -> Vec<ChainCall> {
        self.state().history.clone()
    }

    /// Contract reads and writes only.
    pub fn calls(&self) -> Vec<ChainCall> {
        self.history()
            .into_iter()
            .filter(|c| !matches!(c, ChainCall::Wallet(_)))
            .collect()
    }

    pub fn wallet_requests(&self) -> Vec<WalletRequest> {
        self.history()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::Wallet(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn reads_of(&self, function: &str) -> usize {
        self.history()
            .iter()
            .filter(|c| matches!(c, ChainCall::Read(name) if *name == function))
            .count()
    }

    pub fn writes_of(&self, function: &str) -> usize {
        self.history()
            .iter()
            .filter(|c| matches!(c, ChainCall::Write(name) if *name == function))
            .count()
    }

    pub fn remove_provider(&self) {
        self.state().provider_present = false;
    }

    pub fn revoke_authorization(&self) {
        self.state().authorized = false;
    }

    pub fn reject_account_requests(&self) {
        self.state().reject_account_requests = true;
    }

    pub fn decline_watch_asset(&self) {
        self.state().accept_watch_asset = false;
    }

    /// Switches the active account and notifies listeners.
    pub fn change_account(&self, account: Address) {
        let mut state = self.state();
        state.accounts = vec![account];
        emit(&mut state, WalletEvent::AccountsChanged(vec![account]));
    }

    /// Moves the wallet without notifying, as if it started there.
    pub fn set_wallet_chain(&self, chain_id: u64) {
        let mut state = self.state();
        state.known_chains.insert(chain_id);
        state.wallet_chain = chain_id;
    }

    /// Moves the wallet the way a user would, notifying listeners.
    pub fn user_switches_chain(&self, chain_id: u64) {
        let mut state = self.state();
        state.known_chains.insert(chain_id);
        state.wallet_chain = chain_id;
        emit(&mut state, WalletEvent::ChainChanged(chain_id));
    }

    pub fn add_known_chain(&self, chain_id: u64) {
        self.state().known_chains.insert(chain_id);
    }

    pub fn forget_chain(&self, chain_id: u64) {
        self.state().known_chains.remove(&chain_id);
    }

    pub fn set_winnings(&self, winnings: Vec<U256>) {
        self.state().winnings = winnings;
    }

    pub fn last_winnings_count(&self) -> Option<U256> {
        self.state().last_winnings_count
    }

    pub fn set_scoreboard(&self, scores: Vec<U256>, players: Vec<Address>) {
        self.state().scoreboard = scores.into_iter().zip(players).collect();
    }

    pub fn scoreboard(&self) -> Vec<(U256, Address)> {
        self.state().scoreboard.clone()
    }

    /// Submissions are recorded but no longer replace the stored board.
    pub fn freeze_scoreboard(&self) {
        self.state().scoreboard_frozen = true;
    }

    pub fn last_submission(&self) -> Option<IGame::submitScoreCall> {
        self.state().last_submission.clone()
    }

    pub fn set_prize_pool(&self, pool: Vec<U256>) {
        self.state().prize_pool = pool;
    }

    pub fn grant_free_play(&self, player: Address) {
        self.state().free_plays.insert(player);
    }

    pub fn has_free_played(&self, player: Address) -> bool {
        self.state().free_plays.contains(&player)
    }

    pub fn plays_of(&self, player: Address) -> u64 {
        self.state().plays.get(&player).copied().unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address) -> U256 {
        let state = self.state();
        let spender = state.contracts.game;
        state
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_allowance(&self, owner: Address, amount: U256) {
        let mut state = self.state();
        let spender = state.contracts.game;
        state.allowances.insert((owner, spender), amount);
    }

    /// Transactions calling `function` are mined but revert.
    pub fn revert_writes_of(&self, function: &'static str) {
        self.state().reverting_writes.insert(function);
    }

    pub fn fail_reads_of(&self, function: &'static str) {
        self.state().failing_reads.insert(function);
    }

    /// Holds the next read of `function` until the handle is released.
    pub fn pause_reads_of(&self, function: &'static str) -> PauseHandle {
        let handle = PauseHandle::default();
        self.state().paused_reads.insert(function, handle.clone());
        handle
    }

    /// Holds the next watch-asset prompt until the handle is released.
    pub fn pause_watch_asset(&self) -> PauseHandle {
        let handle = PauseHandle::default();
        self.state().paused_watch_asset = Some(handle.clone());
        handle
    }

    fn record_wallet(&self, request: WalletRequest) {
        self.state().history.push(ChainCall::Wallet(request));
    }
}

fn emit(state: &mut State, event: WalletEvent) {
    state
        .listeners
        .retain(|listener| listener.send(event.clone()).is_ok());
}

fn function_name(contracts: &ContractAddresses, to: Address, data: &[u8]) -> Result<&'static str> {
    let selector = data
        .get(..4)
        .ok_or_else(|| Error::rpc("eth_call", Some(-32602), "calldata shorter than a selector"))?;
    let known: &[([u8; 4], &'static str)] = if to == contracts.game {
        &[
            (IGame::getWinningsCall::SELECTOR, "getWinnings"),
            (IGame::scoresCall::SELECTOR, "scores"),
            (IGame::submitScoreCall::SELECTOR, "submitScore"),
            (IGame::freePlaysCall::SELECTOR, "freePlays"),
            (IGame::freePlayCall::SELECTOR, "freePlay"),
            (IGame::playCall::SELECTOR, "play"),
            (IGame::getPrizePoolCall::SELECTOR, "getPrizePool"),
        ]
    } else if to == contracts.payment_token {
        &[
            (IERC20::nameCall::SELECTOR, "name"),
            (IERC20::symbolCall::SELECTOR, "symbol"),
            (IERC20::decimalsCall::SELECTOR, "decimals"),
            (IERC20::allowanceCall::SELECTOR, "allowance"),
            (IERC20::approveCall::SELECTOR, "approve"),
        ]
    } else {
        return Err(Error::rpc("eth_call", Some(-32000), format!("no contract at {to}")));
    };
    known
        .iter()
        .find(|(known, _)| known.as_slice() == selector)
        .map(|(_, name)| *name)
        .ok_or_else(|| Error::rpc("eth_call", Some(-32000), "execution reverted: unknown selector"))
}

fn reverted(reason: &str) -> Error {
    Error::rpc("eth_call", Some(3), format!("execution reverted: {reason}"))
}

impl State {
    fn execute_read(&mut self, name: &str, from: Option<Address>, data: &[u8]) -> Result<Vec<u8>> {
        let encoded = match name {
            "getWinnings" => {
                let call = IGame::getWinningsCall::abi_decode(data, true)?;
                if call.signature.len() != 65 {
                    return Err(reverted("bad signature"));
                }
                self.last_winnings_count = Some(call.count);
                IGame::getWinningsCall::abi_encode_returns(&(self.winnings.clone(),))
            }
            "scores" => {
                let (scores, players): (Vec<U256>, Vec<Address>) =
                    self.scoreboard.iter().copied().unzip();
                IGame::scoresCall::abi_encode_returns(&(scores, players))
            }
            "freePlays" => {
                let call = IGame::freePlaysCall::abi_decode(data, true)?;
                IGame::freePlaysCall::abi_encode_returns(&(self.free_plays.contains(&call.player),))
            }
            "getPrizePool" => IGame::getPrizePoolCall::abi_encode_returns(&(self.prize_pool.clone(),)),
            "name" => IERC20::nameCall::abi_encode_returns(&("Play Token".to_string(),)),
            "symbol" => IERC20::symbolCall::abi_encode_returns(&("PLAY".to_string(),)),
            "decimals" => IERC20::decimalsCall::abi_encode_returns(&(18u8,)),
            "allowance" => {
                let call = IERC20::allowanceCall::abi_decode(data, true)?;
                let remaining = self
                    .allowances
                    .get(&(call.owner, call.spender))
                    .copied()
                    .unwrap_or_default();
                IERC20::allowanceCall::abi_encode_returns(&(remaining,))
            }
            other => {
                // state-changing functions can still be simulated
                self.apply_write(other, from.unwrap_or_default(), data, false)?;
                Vec::new()
            }
        };
        Ok(encoded)
    }

    /// Runs a transaction body. With `commit` unset only the checks run.
    fn apply_write(&mut self, name: &str, from: Address, data: &[u8], commit: bool) -> Result<()> {
        match name {
            "submitScore" => {
                let call = IGame::submitScoreCall::abi_decode(data, true)?;
                if call.scores.len() != call.players.len() || call.signature.len() != 65 {
                    return Err(reverted("invalid submission"));
                }
                if commit {
                    if !self.scoreboard_frozen {
                        self.scoreboard = call
                            .scores
                            .iter()
                            .copied()
                            .zip(call.players.iter().copied())
                            .collect();
                    }
                    self.last_submission = Some(call);
                }
            }
            "freePlay" => {
                if self.free_plays.contains(&from) {
                    return Err(reverted("free play already claimed"));
                }
                if commit {
                    self.free_plays.insert(from);
                }
            }
            "play" => {
                let spender = self.contracts.game;
                let allowance = self
                    .allowances
                    .get(&(from, spender))
                    .copied()
                    .unwrap_or_default();
                if allowance.is_zero() {
                    return Err(reverted("insufficient allowance"));
                }
                if commit {
                    *self.plays.entry(from).or_default() += 1;
                }
            }
            "approve" => {
                let call = IERC20::approveCall::abi_decode(data, true)?;
                if commit {
                    self.allowances.insert((from, call.spender), call.amount);
                }
            }
            other => return Err(reverted(&format!("{other} is not a transaction"))),
        }
        Ok(())
    }
}

impl ChainClient for SimulatedChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.state().wallet_chain)
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes> {
        let (name, pause) = {
            let mut state = self.state();
            let name = function_name(&state.contracts, request.to, &request.data)?;
            state.history.push(ChainCall::Read(name));
            (name, state.paused_reads.remove(name))
        };
        if let Some(pause) = pause {
            pause.reached.notify_one();
            pause.release.notified().await;
        }
        let mut state = self.state();
        if state.failing_reads.contains(name) {
            return Err(Error::rpc("eth_call", Some(-32000), "header not found"));
        }
        Ok(state.execute_read(name, request.from, &request.data)?.into())
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<B256> {
        let mut state = self.state();
        let name = function_name(&state.contracts, request.to, &request.data)?;
        state.history.push(ChainCall::Write(name));
        state.nonce += 1;
        let hash = keccak256(state.nonce.to_be_bytes());
        let status = if state.reverting_writes.contains(name)
            || state
                .apply_write(name, request.from, &request.data, true)
                .is_err()
        {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Success
        };
        state.receipts.insert(hash, status);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let state = self.state();
        Ok(state.receipts.get(&hash).map(|status| TransactionReceipt {
            transaction_hash: hash,
            status: *status,
            block_number: Some(state.nonce),
        }))
    }
}

impl WalletProvider for SimulatedChain {
    type Client = SimulatedChain;

    async fn detect(&self) -> bool {
        self.state().provider_present
    }

    fn read_client(&self, _chain: &ChainParams) -> Result<Self::Client> {
        Ok(self.clone())
    }

    fn write_client(&self, _chain: &ChainParams) -> Result<Self::Client> {
        Ok(self.clone())
    }

    async fn get_addresses(&self) -> Result<Vec<Address>> {
        self.record_wallet(WalletRequest::GetAccounts);
        let state = self.state();
        Ok(if state.authorized {
            state.accounts.clone()
        } else {
            Vec::new()
        })
    }

    async fn request_addresses(&self) -> Result<Vec<Address>> {
        self.record_wallet(WalletRequest::RequestAccounts);
        let mut state = self.state();
        if state.reject_account_requests {
            return Ok(Vec::new());
        }
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        self.record_wallet(WalletRequest::ChainId);
        Ok(self.state().wallet_chain)
    }

    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Bytes> {
        self.record_wallet(WalletRequest::Sign(account));
        MessageSigner::sign_message(&player_key(), account, message).await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        self.record_wallet(WalletRequest::SwitchChain(chain_id));
        let mut state = self.state();
        if !state.known_chains.contains(&chain_id) {
            return Err(Error::rpc(
                "wallet_switchEthereumChain",
                Some(crate::error::UNRECOGNIZED_CHAIN_CODE),
                format!("Unrecognized chain ID {chain_id:#x}"),
            ));
        }
        if state.wallet_chain != chain_id {
            state.wallet_chain = chain_id;
            emit(&mut state, WalletEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    async fn add_chain(&self, chain: &ChainParams) -> Result<()> {
        self.record_wallet(WalletRequest::AddChain(chain.chain_id));
        self.state().known_chains.insert(chain.chain_id);
        Ok(())
    }

    async fn watch_asset(&self, token: &PaymentTokenDetails) -> Result<bool> {
        self.record_wallet(WalletRequest::WatchAsset(token.address));
        let pause = self.state().paused_watch_asset.take();
        if let Some(pause) = pause {
            pause.reached.notify_one();
            pause.release.notified().await;
        }
        Ok(self.state().accept_watch_asset)
    }

    fn subscribe(&self, sink: WalletEventSender) {
        let mut state = self.state();
        if !state.listeners.iter().any(|l| l.same_channel(&sink)) {
            state.listeners.push(sink);
        }
    }
}

/// Keeps every notice for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices poisoned").clone()
    }

    pub fn messages_at(&self, level: NoticeLevel) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().expect("notices poisoned").push(notice);
    }
}
