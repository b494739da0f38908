use crate::TestContext;
use alloy_primitives::{
    Address,
    U256,
};
use arcade_session::{
    Error,
    notify::NoticeLevel,
    test_helpers::{
        SimulatedChain,
        TEST_CHAIN_ID,
        WalletRequest,
    },
    wallet::{
        ConnectOutcome,
        SessionPhase,
    },
};

#[tokio::test]
async fn full_game__free_play_then_claim__player_tops_leaderboard() {
    // given
    let ctx = TestContext::connected().await;
    let rival = Address::repeat_byte(0x51);
    ctx.chain.set_scoreboard(vec![U256::from(40u64)], vec![rival]);
    ctx.chain.set_winnings(vec![U256::from(250u64)]);

    // when
    assert!(ctx.controller.free_play().await);
    ctx.controller
        .record_game_result(U256::from(95u64), U256::from(6u64))
        .await;
    assert!(ctx.controller.get_winnings().await);
    assert!(ctx.controller.claim_winnings().await);
    let board = ctx.controller.get_leaderboard().await.unwrap();

    // then
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].address, ctx.chain.player());
    assert_eq!(board[0].score, U256::from(95u64));
    assert_eq!(board[1].address, rival);
    assert_eq!(ctx.chain.last_winnings_count(), Some(U256::from(6u64)));
    assert!(ctx.notifier.messages_at(NoticeLevel::Error).is_empty());
}

#[tokio::test]
async fn account_change__between_operations__requires_reconnect() {
    // given
    let ctx = TestContext::connected().await;
    let newcomer = Address::repeat_byte(0x61);
    ctx.chain.change_account(newcomer);

    // when
    ctx.controller.process_pending_events().await;
    let played = ctx.controller.free_play().await;

    // then
    assert!(!played);
    assert_eq!(ctx.controller.phase().await, SessionPhase::Disconnected);
    assert_eq!(
        ctx.notifier.messages_at(NoticeLevel::Error),
        vec![Error::NotConnected.to_string()]
    );
    let outcome = ctx.controller.connect_wallet().await;
    assert_eq!(
        outcome,
        ConnectOutcome::Connected {
            address: newcomer,
            chain_id: TEST_CHAIN_ID
        }
    );
}

#[tokio::test]
async fn connect__chain_unknown_to_wallet__adds_chain_then_switches_next_time() {
    // given
    let chain = SimulatedChain::new();
    chain.set_wallet_chain(1);
    chain.forget_chain(TEST_CHAIN_ID);
    let ctx = TestContext::with_chain(chain);

    // when
    ctx.controller.connect_wallet().await;
    let first_requests = ctx.chain.wallet_requests();
    ctx.controller.connect_wallet().await;
    let outcome = ctx.controller.connect_wallet().await;

    // then
    assert!(first_requests.contains(&WalletRequest::AddChain(TEST_CHAIN_ID)));
    assert_eq!(
        outcome,
        ConnectOutcome::Connected {
            address: ctx.chain.player(),
            chain_id: TEST_CHAIN_ID
        }
    );
    assert_eq!(ctx.chain.chain_id_now(), TEST_CHAIN_ID);
}

#[tokio::test]
async fn connect__no_provider__no_session_and_no_chain_calls() {
    let chain = SimulatedChain::new();
    chain.remove_provider();
    let ctx = TestContext::with_chain(chain);

    let outcome = ctx.controller.connect_wallet().await;

    assert_eq!(outcome, ConnectOutcome::NoProvider);
    assert_eq!(ctx.controller.phase().await, SessionPhase::Disconnected);
    assert!(ctx.chain.calls().is_empty());
}
