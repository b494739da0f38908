//! Session-level coordinator the front-end talks to.
//!
//! Every user operation runs under a single-slot operation lock, snapshots
//! the current [`Connection`] and only writes its results back if the session
//! generation is still the one it started with. Wallet identity changes reset
//! the session without waiting for the lock, so an operation that was in
//! flight at the time finishes against the old connection and its result is
//! dropped.

use crate::{
    Error,
    Result,
    chain::{
        ChainClient,
        ReceiptPolicy,
        read_contract,
        wait_for_transaction_receipt,
        write_contract,
    },
    claims::{
        ClaimOrchestrator,
        ClaimReceipt,
    },
    config::GameConfig,
    contracts::IGame,
    leaderboard::{
        LeaderboardEntry,
        build_leaderboard,
    },
    notify::{
        Notice,
        Notifier,
    },
    payment::{
        PaymentGuard,
        PaymentTokenDetails,
    },
    ranking::rank_entries,
    signer::MessageSigner,
    wallet::{
        ConnectOutcome,
        ConnectStep,
        Connection,
        SessionPhase,
        WalletEvent,
        WalletEventReceiver,
        WalletProvider,
        WalletSession,
        ensure_correct_chain,
        watch_payment_token,
    },
};
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use tokio::sync::{
    Mutex,
    MutexGuard,
    mpsc,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

const CLAIM_SUCCESS: &str =
    "Successfully claimed winnings please check your wallet for latest balances";
const CLAIM_REVERTED: &str = "Something went wrong while submitting scores";
const FREE_PLAY_SUCCESS: &str = "Successfully claimed free play token";
const FREE_PLAY_REVERTED: &str = "Something went wrong while claiming free play";
const APPROVAL_SUCCESS: &str = "Successfully approved payment token";
const PAID_PLAY_SUCCESS: &str = "Game starting";
const PAID_PLAY_REVERTED: &str = "Something went wrong while starting the game";
const TOKEN_DETAILS_FAILED: &str = "Unable to load Payment Token Details";
const TOKEN_WATCHED: &str = "Play token was added successfully";
const TOKEN_NOT_WATCHED: &str =
    "To play the game and track rewards please add the play token manually";

/// Chain- and account-dependent state cached for the current session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GameState {
    pub payment_token: Option<PaymentTokenDetails>,
    pub prize_pool: Vec<U256>,
    pub winnings: Vec<U256>,
    /// Local player's score from the last finished game.
    pub score: U256,
    /// Items collected in the last finished game, sent with the winnings query.
    pub collected: U256,
    pub can_play: bool,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub last_claim: Option<B256>,
}

/// Held for the duration of an operation; clears the loading flag on drop,
/// whichever way the operation exits.
struct Busy<'a> {
    _slot: MutexGuard<'a, ()>,
    loading: &'a AtomicBool,
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.loading.store(false, Ordering::SeqCst);
    }
}

pub struct GameSessionController<W: WalletProvider, S, N> {
    config: GameConfig,
    session: Mutex<WalletSession<W>>,
    game: Mutex<GameState>,
    events: Mutex<WalletEventReceiver>,
    claims: ClaimOrchestrator<S>,
    payments: PaymentGuard,
    notifier: N,
    operation: Mutex<()>,
    loading: AtomicBool,
}

impl<W, S, N> GameSessionController<W, S, N>
where
    W: WalletProvider,
    S: MessageSigner,
    N: Notifier,
{
    pub fn new(config: GameConfig, provider: W, signer: S, notifier: N) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let receipts = config.receipt_policy();
        let session = WalletSession::new(provider, config.chain.clone(), events_tx);
        let claims = ClaimOrchestrator::new(config.contracts.game, signer, receipts);
        let payments = PaymentGuard::new(config.contracts, config.approval, receipts);
        Self {
            config,
            session: Mutex::new(session),
            game: Mutex::new(GameState::default()),
            events: Mutex::new(events_rx),
            claims,
            payments,
            notifier,
            operation: Mutex::new(()),
            loading: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.lock().await.phase()
    }

    pub async fn address(&self) -> Option<Address> {
        self.session.lock().await.address()
    }

    pub async fn chain_id(&self) -> Option<u64> {
        self.session.lock().await.chain_id()
    }

    pub async fn generation(&self) -> u64 {
        self.session.lock().await.generation()
    }

    pub async fn game_state(&self) -> GameState {
        self.game.lock().await.clone()
    }

    pub async fn winnings(&self) -> Vec<U256> {
        self.game.lock().await.winnings.clone()
    }

    pub async fn prize_pool(&self) -> Vec<U256> {
        self.game.lock().await.prize_pool.clone()
    }

    pub async fn payment_token(&self) -> Option<PaymentTokenDetails> {
        self.game.lock().await.payment_token.clone()
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.game.lock().await.leaderboard.clone()
    }

    pub async fn can_play(&self) -> bool {
        self.game.lock().await.can_play
    }

    /// Stores the outcome of a finished game for the next winnings query and
    /// claim.
    pub async fn record_game_result(&self, score: U256, collected: U256) {
        let mut game = self.game.lock().await;
        game.score = score;
        game.collected = collected;
    }

    async fn busy(&self) -> Busy<'_> {
        let slot = self.operation.lock().await;
        self.loading.store(true, Ordering::SeqCst);
        Busy {
            _slot: slot,
            loading: &self.loading,
        }
    }

    async fn connection(&self) -> Result<Connection<W::Client>> {
        self.session
            .lock()
            .await
            .connection()
            .cloned()
            .ok_or(Error::NotConnected)
    }

    /// Applies `update` only while the session that produced it is current.
    async fn commit(&self, generation: u64, update: impl FnOnce(&mut GameState)) -> bool {
        let session = self.session.lock().await;
        if session.generation() != generation {
            debug!(
                generation,
                current = session.generation(),
                "discarding result from superseded session"
            );
            return false;
        }
        let mut game = self.game.lock().await;
        update(&mut game);
        true
    }

    async fn clear_game_state(&self) {
        *self.game.lock().await = GameState::default();
    }

    fn report_failure(&self, operation: &str, err: &Error, reverted_message: &str) {
        match err {
            e if e.is_precondition() => {
                self.notifier.notify(Notice::error(e.to_string()));
            }
            Error::Reverted(tx) => {
                warn!(operation, %tx, "transaction reverted");
                self.notifier.notify(Notice::error(reverted_message));
            }
            e => error!(operation, error = %e, "operation failed"),
        }
    }

    /// Connects, or disconnects when already connected.
    ///
    /// The wallet is moved to the target chain before any game contract is
    /// read, then chain id, prize pool and payment token details are loaded
    /// together.
    pub async fn connect_wallet(&self) -> ConnectOutcome {
        let _busy = self.busy().await;
        let step = self.session.lock().await.begin_connect();
        let attempt = match step {
            ConnectStep::Done(outcome) => {
                if outcome == ConnectOutcome::Disconnected {
                    self.clear_game_state().await;
                }
                return outcome;
            }
            ConnectStep::Pending(attempt) => attempt,
        };
        let generation = attempt.generation();
        let established = attempt.establish().await;
        let finished = self
            .session
            .lock()
            .await
            .finish_connect(generation, established);
        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "wallet connection failed");
                return ConnectOutcome::Failed;
            }
        };
        if !matches!(outcome, ConnectOutcome::Connected { .. }) {
            return outcome;
        }
        self.commit(generation, |game| *game = GameState::default()).await;

        let (provider, target) = {
            let session = self.session.lock().await;
            (session.provider().clone(), session.target().clone())
        };
        if let Err(e) = ensure_correct_chain(&provider, &target).await {
            error!(error = %e, "unable to move wallet to target chain");
        }

        let Ok(connection) = self.connection().await else {
            return ConnectOutcome::Superseded;
        };
        if connection.generation != generation {
            return ConnectOutcome::Superseded;
        }
        self.load_session_state(&connection).await;
        self.offer_token_tracking(&provider, generation).await;

        let session = self.session.lock().await;
        match session.connection() {
            Some(current) if current.generation == generation => ConnectOutcome::Connected {
                address: current.address,
                chain_id: current.chain_id,
            },
            _ => ConnectOutcome::Superseded,
        }
    }

    async fn load_session_state(&self, connection: &Connection<W::Client>) {
        let prize_pool_call = IGame::getPrizePoolCall {};
        let (chain_id, prize_pool, token) = futures::join!(
            connection.public.chain_id(),
            read_contract(
                &connection.public,
                self.config.contracts.game,
                Some(connection.address),
                &prize_pool_call,
            ),
            self.payments.payment_token_details(&connection.public),
        );

        match chain_id {
            Ok(chain_id) => {
                self.session
                    .lock()
                    .await
                    .update_chain_id(connection.generation, chain_id);
            }
            Err(e) => error!(error = %e, "unable to read chain id"),
        }
        let prize_pool = prize_pool
            .map(|r| r.pool)
            .map_err(|e| error!(error = %e, "unable to load prize pool"))
            .ok();
        let token = token
            .map_err(|e| {
                error!(error = %e, "unable to load payment token details");
                self.notifier.notify(Notice::error(TOKEN_DETAILS_FAILED));
            })
            .ok();
        self.commit(connection.generation, |game| {
            if let Some(pool) = prize_pool {
                game.prize_pool = pool;
            }
            game.payment_token = token;
        })
        .await;
    }

    async fn offer_token_tracking(&self, provider: &W, generation: u64) {
        let Some(token) = self.game.lock().await.payment_token.clone() else {
            return;
        };
        let watched = watch_payment_token(provider, &token).await;
        let current = self.generation().await;
        if current != generation {
            debug!(generation, current, "token prompt answered for superseded session");
            return;
        }
        match watched {
            Ok(true) => self.notifier.notify(Notice::success(TOKEN_WATCHED)),
            Ok(false) => self.notifier.notify(Notice::warning(TOKEN_NOT_WATCHED)),
            Err(e) => debug!(error = %e, generation, "wallet_watchAsset failed"),
        }
    }

    /// Waits for the next wallet notification.
    ///
    /// A caller parked here owns the event stream; [`Self::process_pending_events`]
    /// leaves the queue to it.
    pub async fn next_wallet_event(&self) -> Option<WalletEvent> {
        self.events.lock().await.recv().await
    }

    /// Handles notifications already queued, returning how many there were.
    /// Returns 0 without waiting while a listener holds the stream.
    pub async fn process_pending_events(&self) -> usize {
        let mut pending = Vec::new();
        {
            let Ok(mut events) = self.events.try_lock() else {
                debug!("wallet events owned by a listener");
                return 0;
            };
            while let Ok(event) = events.try_recv() {
                pending.push(event);
            }
        }
        let count = pending.len();
        for event in pending {
            self.handle_wallet_event(event).await;
        }
        count
    }

    /// Any account or chain change invalidates everything cached for the
    /// session.
    pub async fn handle_wallet_event(&self, event: WalletEvent) {
        let mut session = self.session.lock().await;
        session.reset(&event);
        let mut game = self.game.lock().await;
        *game = GameState::default();
    }

    /// Redeems the one free play per account.
    pub async fn free_play(&self) -> bool {
        let _busy = self.busy().await;
        match self.run_free_play().await {
            Ok(true) => {
                self.notifier.notify(Notice::success(FREE_PLAY_SUCCESS));
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.report_failure("free_play", &e, FREE_PLAY_REVERTED);
                false
            }
        }
    }

    async fn run_free_play(&self) -> Result<bool> {
        let connection = self.connection().await?;
        let game = self.config.contracts.game;
        let receipts = self.config.receipt_policy();
        let claimed_call = IGame::freePlaysCall {
            player: connection.address,
        };

        let already_claimed =
            read_contract(&connection.public, game, Some(connection.address), &claimed_call)
                .await?
                .claimed;
        if already_claimed {
            return Err(Error::AlreadyClaimed);
        }
        submit(&connection, game, &IGame::freePlayCall {}, receipts).await?;

        let claimed =
            read_contract(&connection.public, game, Some(connection.address), &claimed_call)
                .await?
                .claimed;
        if !claimed {
            warn!(address = %connection.address, "free play not recorded after claim");
            return Ok(false);
        }
        Ok(self
            .commit(connection.generation, |state| state.can_play = true)
            .await)
    }

    /// Pays for a play, approving the payment token first if needed.
    pub async fn paid_play(&self) -> bool {
        let _busy = self.busy().await;
        match self.run_paid_play().await {
            Ok(started) => {
                if started {
                    self.notifier.notify(Notice::success(PAID_PLAY_SUCCESS));
                }
                started
            }
            Err(e) => {
                self.report_failure("paid_play", &e, PAID_PLAY_REVERTED);
                false
            }
        }
    }

    async fn run_paid_play(&self) -> Result<bool> {
        let connection = self.connection().await?;
        let decimals = self.payment_token_decimals(&connection).await?;

        // approval must be mined before play() or play() reverts
        if self
            .payments
            .check_payment_token_approval(&connection, decimals)
            .await?
        {
            self.notifier.notify(Notice::success(APPROVAL_SUCCESS));
        }

        submit(
            &connection,
            self.config.contracts.game,
            &IGame::playCall {},
            self.config.receipt_policy(),
        )
        .await?;
        Ok(self
            .commit(connection.generation, |state| state.can_play = true)
            .await)
    }

    async fn payment_token_decimals(&self, connection: &Connection<W::Client>) -> Result<u8> {
        if let Some(token) = &self.game.lock().await.payment_token {
            return Ok(token.decimals);
        }
        let token = self
            .payments
            .payment_token_details(&connection.public)
            .await?;
        let decimals = token.decimals;
        self.commit(connection.generation, |state| state.payment_token = Some(token))
            .await;
        Ok(decimals)
    }

    /// Reads, ranks and stores the current scoreboard.
    pub async fn get_leaderboard(&self) -> Option<Vec<LeaderboardEntry>> {
        let _busy = self.busy().await;
        match self.run_get_leaderboard().await {
            Ok(board) => board,
            Err(e) => {
                self.report_failure("get_leaderboard", &e, "");
                None
            }
        }
    }

    async fn run_get_leaderboard(&self) -> Result<Option<Vec<LeaderboardEntry>>> {
        let connection = self.connection().await?;
        let entries = self
            .claims
            .latest_scores(&connection.public, connection.address)
            .await?;
        if entries.is_empty() {
            return Ok(None);
        }
        let ranked = rank_entries(entries);
        let board = build_leaderboard(&ranked, &self.config.chain, connection.chain_id);
        let stored = board.clone();
        if !self
            .commit(connection.generation, |state| state.leaderboard = stored)
            .await
        {
            return Ok(None);
        }
        Ok(Some(board))
    }

    /// Queries which prizes the last game's collection qualifies for.
    pub async fn get_winnings(&self) -> bool {
        let _busy = self.busy().await;
        match self.run_get_winnings().await {
            Ok(stored) => stored,
            Err(e) => {
                self.report_failure("get_winnings", &e, "");
                false
            }
        }
    }

    async fn run_get_winnings(&self) -> Result<bool> {
        let connection = self.connection().await?;
        let collected = self.game.lock().await.collected;
        let winnings = self.claims.get_winnings(&connection, collected).await?;
        info!(count = winnings.len(), "winnings loaded");
        Ok(self
            .commit(connection.generation, |state| state.winnings = winnings)
            .await)
    }

    /// Submits the player's score and claims the winnings loaded earlier.
    pub async fn claim_winnings(&self) -> bool {
        let _busy = self.busy().await;
        match self.run_claim_winnings().await {
            Ok(Some(_)) => {
                self.notifier.notify(Notice::success(CLAIM_SUCCESS));
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.report_failure("claim_winnings", &e, CLAIM_REVERTED);
                false
            }
        }
    }

    async fn run_claim_winnings(&self) -> Result<Option<ClaimReceipt>> {
        let connection = self.connection().await?;
        let (winnings, score) = {
            let game = self.game.lock().await;
            (game.winnings.clone(), game.score)
        };
        let receipt = self
            .claims
            .claim_winnings(&connection, &winnings, score)
            .await?;
        let tx = receipt.transaction_hash;
        let applied = self
            .commit(connection.generation, |state| {
                state.winnings.clear();
                state.last_claim = Some(tx);
            })
            .await;
        Ok(applied.then_some(receipt))
    }
}

async fn submit<C: ChainClient, T: alloy_sol_types::SolCall>(
    connection: &Connection<C>,
    to: Address,
    call: &T,
    receipts: ReceiptPolicy,
) -> Result<B256> {
    let hash = write_contract(&connection.wallet, to, connection.address, call).await?;
    let receipt = wait_for_transaction_receipt(&connection.public, hash, receipts).await?;
    if receipt.is_reverted() {
        return Err(Error::Reverted(hash));
    }
    Ok(hash)
}
