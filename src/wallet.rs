//! Wallet provider capability and the connection lifecycle built on it.

use crate::{
    Result,
    chain::ChainClient,
    config::ChainParams,
    payment::PaymentTokenDetails,
};
use alloy_primitives::{
    Address,
    Bytes,
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// Identity changes reported by the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

pub type WalletEventSender = mpsc::UnboundedSender<WalletEvent>;
pub type WalletEventReceiver = mpsc::UnboundedReceiver<WalletEvent>;

/// An injected wallet: account access, signing, chain management and change
/// notifications.
pub trait WalletProvider: Clone {
    type Client: ChainClient + Clone;

    /// Whether a wallet is actually present.
    fn detect(&self) -> impl Future<Output = bool>;

    /// Client for reads and simulations, bound to `chain`.
    fn read_client(&self, chain: &ChainParams) -> Result<Self::Client>;

    /// Client that submits transactions through the wallet, bound to `chain`.
    fn write_client(&self, chain: &ChainParams) -> Result<Self::Client>;

    /// Accounts the user has already authorized; never prompts.
    fn get_addresses(&self) -> impl Future<Output = Result<Vec<Address>>>;

    /// Prompts the user to authorize accounts.
    fn request_addresses(&self) -> impl Future<Output = Result<Vec<Address>>>;

    fn chain_id(&self) -> impl Future<Output = Result<u64>>;

    fn sign_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> impl Future<Output = Result<Bytes>>;

    fn switch_chain(&self, chain_id: u64) -> impl Future<Output = Result<()>>;

    fn add_chain(&self, chain: &ChainParams) -> impl Future<Output = Result<()>>;

    /// Returns whether the user accepted tracking the token.
    fn watch_asset(
        &self,
        token: &PaymentTokenDetails,
    ) -> impl Future<Output = Result<bool>>;

    /// Registers `sink` for change notifications. Registering the same
    /// channel twice must not duplicate events.
    fn subscribe(&self, sink: WalletEventSender);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// Live connection state. Cloned into every operation as its context; the
/// generation tells whether the session it came from is still current.
#[derive(Clone, Debug)]
pub struct Connection<C> {
    pub generation: u64,
    pub address: Address,
    pub chain_id: u64,
    pub public: C,
    pub wallet: C,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { address: Address, chain_id: u64 },
    /// A connect on a live session toggles it off.
    Disconnected,
    NoProvider,
    NoAccounts,
    /// The session was reset while the attempt was in flight.
    Superseded,
    /// The wallet or node errored; details are in the log.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    OnTarget,
    SwitchRequested,
    AddRequested,
}

/// What a connect attempt produced before it is applied to the session.
pub enum Established<C> {
    Connected {
        address: Address,
        chain_id: u64,
        public: C,
        wallet: C,
    },
    NoProvider,
    NoAccounts,
}

/// A connect in progress, detached from the session so no lock is held while
/// the wallet is prompting.
pub struct ConnectAttempt<W> {
    generation: u64,
    provider: W,
    target: ChainParams,
    events: WalletEventSender,
}

impl<W: WalletProvider> ConnectAttempt<W> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn establish(&self) -> Result<Established<W::Client>> {
        if !self.provider.detect().await {
            debug!("no wallet provider detected");
            return Ok(Established::NoProvider);
        }
        let public = self.provider.read_client(&self.target)?;
        let wallet = self.provider.write_client(&self.target)?;

        let mut accounts = self.provider.get_addresses().await?;
        if accounts.is_empty() {
            accounts = self.provider.request_addresses().await?;
        }
        let Some(address) = accounts.first().copied() else {
            debug!("wallet returned no accounts");
            return Ok(Established::NoAccounts);
        };

        let chain_id = public.chain_id().await?;
        self.provider.subscribe(self.events.clone());
        Ok(Established::Connected {
            address,
            chain_id,
            public,
            wallet,
        })
    }
}

pub enum ConnectStep<W> {
    Done(ConnectOutcome),
    Pending(ConnectAttempt<W>),
}

pub struct WalletSession<W: WalletProvider> {
    provider: W,
    target: ChainParams,
    events: WalletEventSender,
    generation: u64,
    phase: SessionPhase,
    connection: Option<Connection<W::Client>>,
}

impl<W: WalletProvider> WalletSession<W> {
    pub fn new(provider: W, target: ChainParams, events: WalletEventSender) -> Self {
        Self {
            provider,
            target,
            events,
            generation: 0,
            phase: SessionPhase::Disconnected,
            connection: None,
        }
    }

    pub fn provider(&self) -> &W {
        &self.provider
    }

    pub fn target(&self) -> &ChainParams {
        &self.target
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Connection<W::Client>> {
        self.connection.as_ref()
    }

    pub fn address(&self) -> Option<Address> {
        self.connection.as_ref().map(|c| c.address)
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.connection.as_ref().map(|c| c.chain_id)
    }

    /// Toggles a live session off, otherwise starts a new attempt.
    pub fn begin_connect(&mut self) -> ConnectStep<W> {
        if self.connection.is_some() {
            self.disconnect();
            return ConnectStep::Done(ConnectOutcome::Disconnected);
        }
        self.generation += 1;
        self.phase = SessionPhase::Connecting;
        ConnectStep::Pending(ConnectAttempt {
            generation: self.generation,
            provider: self.provider.clone(),
            target: self.target.clone(),
            events: self.events.clone(),
        })
    }

    /// Applies an attempt's result unless the session moved on meanwhile.
    pub fn finish_connect(
        &mut self,
        generation: u64,
        established: Result<Established<W::Client>>,
    ) -> Result<ConnectOutcome> {
        if generation != self.generation {
            debug!(
                attempt = generation,
                current = self.generation,
                "discarding superseded connect attempt"
            );
            return Ok(ConnectOutcome::Superseded);
        }
        let established = match established {
            Ok(established) => established,
            Err(e) => {
                self.phase = SessionPhase::Disconnected;
                return Err(e);
            }
        };
        match established {
            Established::Connected {
                address,
                chain_id,
                public,
                wallet,
            } => {
                info!(%address, chain_id, generation, "wallet connected");
                self.connection = Some(Connection {
                    generation,
                    address,
                    chain_id,
                    public,
                    wallet,
                });
                self.phase = SessionPhase::Connected;
                Ok(ConnectOutcome::Connected { address, chain_id })
            }
            Established::NoProvider => {
                self.phase = SessionPhase::Disconnected;
                Ok(ConnectOutcome::NoProvider)
            }
            Established::NoAccounts => {
                self.phase = SessionPhase::Disconnected;
                Ok(ConnectOutcome::NoAccounts)
            }
        }
    }

    pub async fn connect(&mut self) -> Result<ConnectOutcome> {
        match self.begin_connect() {
            ConnectStep::Done(outcome) => Ok(outcome),
            ConnectStep::Pending(attempt) => {
                let established = attempt.establish().await;
                self.finish_connect(attempt.generation(), established)
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!(address = %connection.address, "wallet disconnected");
        }
        self.generation += 1;
        self.phase = SessionPhase::Disconnected;
    }

    /// Drops the session after an identity change. Anything derived from the
    /// old account or chain must be reloaded by a fresh connect.
    pub fn reset(&mut self, event: &WalletEvent) {
        warn!(?event, generation = self.generation, "wallet identity changed, resetting session");
        self.connection = None;
        self.generation += 1;
        self.phase = SessionPhase::Disconnected;
    }

    /// Records a chain id read after connecting, if the session is unchanged.
    pub fn update_chain_id(&mut self, generation: u64, chain_id: u64) -> bool {
        match self.connection.as_mut() {
            Some(connection) if connection.generation == generation => {
                connection.chain_id = chain_id;
                true
            }
            _ => false,
        }
    }

    pub async fn ensure_correct_chain(&self) -> Result<ChainStatus> {
        ensure_correct_chain(&self.provider, &self.target).await
    }

    pub async fn watch_payment_token(&self, token: &PaymentTokenDetails) -> Result<bool> {
        watch_payment_token(&self.provider, token).await
    }
}

/// Asks the wallet to track the payment token. Returns whether the user
/// accepted.
pub async fn watch_payment_token<W: WalletProvider>(
    provider: &W,
    token: &PaymentTokenDetails,
) -> Result<bool> {
    let added = provider.watch_asset(token).await?;
    debug!(token = %token.address, symbol = %token.symbol, added, "watch asset answered");
    Ok(added)
}

/// Asks the wallet to move to `target`, adding the chain first if the wallet
/// does not know it.
pub async fn ensure_correct_chain<W: WalletProvider>(
    provider: &W,
    target: &ChainParams,
) -> Result<ChainStatus> {
    let current = provider.chain_id().await?;
    if current == target.chain_id {
        return Ok(ChainStatus::OnTarget);
    }
    info!(current, target = target.chain_id, "wallet on wrong chain, requesting switch");
    match provider.switch_chain(target.chain_id).await {
        Ok(()) => Ok(ChainStatus::SwitchRequested),
        Err(e) if e.is_unrecognized_chain() => {
            info!(chain = %target.chain_name, "chain unknown to wallet, requesting add");
            if let Err(e) = provider.add_chain(target).await {
                error!(?e, "error adding chain");
            }
            Ok(ChainStatus::AddRequested)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::test_helpers::{
        SimulatedChain,
        WalletRequest,
        test_chain_params,
    };

    fn session(chain: &SimulatedChain) -> (WalletSession<SimulatedChain>, WalletEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WalletSession::new(chain.clone(), test_chain_params(), tx), rx)
    }

    #[tokio::test]
    async fn connect__authorized_account__connects_without_prompt() {
        // given
        let chain = SimulatedChain::new();
        let player = chain.player();
        let (mut session, _rx) = session(&chain);

        // when
        let outcome = session.connect().await.unwrap();

        // then
        assert_eq!(
            outcome,
            ConnectOutcome::Connected {
                address: player,
                chain_id: chain.chain_id_now()
            }
        );
        assert_eq!(session.phase(), SessionPhase::Connected);
        assert_eq!(session.address(), Some(player));
        assert!(!chain.wallet_requests().contains(&WalletRequest::RequestAccounts));
    }

    #[tokio::test]
    async fn connect__no_authorized_accounts__requests_permission() {
        let chain = SimulatedChain::new();
        chain.revoke_authorization();
        let (mut session, _rx) = session(&chain);

        let outcome = session.connect().await.unwrap();

        assert!(matches!(outcome, ConnectOutcome::Connected { .. }));
        assert!(chain.wallet_requests().contains(&WalletRequest::RequestAccounts));
    }

    #[tokio::test]
    async fn connect__user_rejects_accounts__stays_disconnected() {
        let chain = SimulatedChain::new();
        chain.revoke_authorization();
        chain.reject_account_requests();
        let (mut session, _rx) = session(&chain);

        let outcome = session.connect().await.unwrap();

        assert_eq!(outcome, ConnectOutcome::NoAccounts);
        assert!(!session.is_connected());
        assert_eq!(session.phase(), SessionPhase::Disconnected);
    }

    #[tokio::test]
    async fn connect__no_provider__silent_noop() {
        let chain = SimulatedChain::new();
        chain.remove_provider();
        let (mut session, _rx) = session(&chain);

        let outcome = session.connect().await.unwrap();

        assert_eq!(outcome, ConnectOutcome::NoProvider);
        assert!(!session.is_connected());
        assert!(chain.calls().is_empty());
    }

    #[tokio::test]
    async fn connect__when_connected__toggles_off() {
        let chain = SimulatedChain::new();
        let (mut session, _rx) = session(&chain);
        session.connect().await.unwrap();
        let generation = session.generation();

        let outcome = session.connect().await.unwrap();

        assert_eq!(outcome, ConnectOutcome::Disconnected);
        assert!(!session.is_connected());
        assert!(session.generation() > generation);
    }

    #[tokio::test]
    async fn finish_connect__reset_during_attempt__superseded() {
        // given
        let chain = SimulatedChain::new();
        let (mut session, _rx) = session(&chain);
        let ConnectStep::Pending(attempt) = session.begin_connect() else {
            panic!("expected a pending attempt");
        };
        let established = attempt.establish().await;

        // when
        session.reset(&WalletEvent::ChainChanged(1));
        let outcome = session
            .finish_connect(attempt.generation(), established)
            .unwrap();

        // then
        assert_eq!(outcome, ConnectOutcome::Superseded);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn connect__registers_listener_once_per_channel() {
        // given
        let chain = SimulatedChain::new();
        let (mut session, mut rx) = session(&chain);
        session.connect().await.unwrap();
        session.disconnect();
        session.connect().await.unwrap();

        // when
        chain.change_account(Address::repeat_byte(0x99));

        // then
        assert!(matches!(rx.recv().await, Some(WalletEvent::AccountsChanged(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn watch_payment_token__declined__false() {
        // given
        let chain = SimulatedChain::new();
        chain.decline_watch_asset();
        let (session, _rx) = session(&chain);
        let token = PaymentTokenDetails {
            name: "Play Token".to_string(),
            symbol: "PLAY".to_string(),
            decimals: 18,
            address: chain.contracts().payment_token,
        };

        // when
        let added = session.watch_payment_token(&token).await.unwrap();

        // then
        assert!(!added);
        assert!(chain
            .wallet_requests()
            .contains(&WalletRequest::WatchAsset(token.address)));
    }

    #[tokio::test]
    async fn ensure_correct_chain__on_target__no_requests() {
        let chain = SimulatedChain::new();
        let status = ensure_correct_chain(&chain, &test_chain_params())
            .await
            .unwrap();
        assert_eq!(status, ChainStatus::OnTarget);
        assert!(chain.wallet_requests().iter().all(|r| !matches!(r, WalletRequest::SwitchChain(_))));
    }

    #[tokio::test]
    async fn ensure_correct_chain__known_other_chain__switches() {
        // given
        let chain = SimulatedChain::new();
        let target = test_chain_params();
        chain.set_wallet_chain(1);
        chain.add_known_chain(target.chain_id);

        // when
        let status = ensure_correct_chain(&chain, &target).await.unwrap();

        // then
        assert_eq!(status, ChainStatus::SwitchRequested);
        assert_eq!(chain.chain_id_now(), target.chain_id);
    }

    #[tokio::test]
    async fn ensure_correct_chain__unknown_chain__requests_add() {
        // given
        let chain = SimulatedChain::new();
        let target = test_chain_params();
        chain.set_wallet_chain(1);
        chain.forget_chain(target.chain_id);

        // when
        let status = ensure_correct_chain(&chain, &target).await.unwrap();

        // then
        assert_eq!(status, ChainStatus::AddRequested);
        let requests = chain.wallet_requests();
        assert!(requests.contains(&WalletRequest::SwitchChain(target.chain_id)));
        assert!(requests.contains(&WalletRequest::AddChain(target.chain_id)));
    }
}
