#![allow(non_snake_case)]

use arcade_session::{
    controller::GameSessionController,
    signer::WalletSigner,
    test_helpers::{
        RecordingNotifier,
        SimulatedChain,
        test_config,
    },
    wallet::ConnectOutcome,
};

mod claim_flow;
mod session_flow;

type TestController =
    GameSessionController<SimulatedChain, WalletSigner<SimulatedChain>, RecordingNotifier>;

struct TestContext {
    chain: SimulatedChain,
    notifier: RecordingNotifier,
    controller: TestController,
}

impl TestContext {
    fn new() -> Self {
        Self::with_chain(SimulatedChain::new())
    }

    fn with_chain(chain: SimulatedChain) -> Self {
        let notifier = RecordingNotifier::default();
        let controller = GameSessionController::new(
            test_config(),
            chain.clone(),
            WalletSigner::new(chain.clone()),
            notifier.clone(),
        );
        Self {
            chain,
            notifier,
            controller,
        }
    }

    async fn connected() -> Self {
        let ctx = Self::new();
        let outcome = ctx.controller.connect_wallet().await;
        assert!(matches!(outcome, ConnectOutcome::Connected { .. }));
        ctx
    }
}
