use crate::TestContext;
use alloy_primitives::{
    Address,
    U256,
};
use arcade_session::{
    Error,
    authorization::score_submission_message,
    notify::NoticeLevel,
    signer::MessageSigner,
    test_helpers::{
        TEST_CHAIN_ID,
        player_key,
    },
};

#[tokio::test]
async fn claim_winnings__crowded_board__signs_descending_scores() {
    // given
    let ctx = TestContext::connected().await;
    let rivals = [
        Address::repeat_byte(0x01),
        Address::repeat_byte(0x02),
        Address::repeat_byte(0x03),
    ];
    ctx.chain.set_scoreboard(
        vec![U256::from(5u64), U256::from(9u64), U256::from(9u64)],
        rivals.to_vec(),
    );
    ctx.chain.set_winnings(vec![U256::from(10u64)]);
    ctx.controller
        .record_game_result(U256::from(1u64), U256::from(1u64))
        .await;
    assert!(ctx.controller.get_winnings().await);

    // when
    let claimed = ctx.controller.claim_winnings().await;

    // then
    assert!(claimed);
    let submission = ctx.chain.last_submission().unwrap();
    let expected_scores: Vec<U256> = [9u64, 9, 5, 1].into_iter().map(U256::from).collect();
    assert_eq!(submission.scores, expected_scores);
    assert_eq!(
        submission.players,
        vec![rivals[1], rivals[2], rivals[0], ctx.chain.player()]
    );
    let message = score_submission_message(&expected_scores, &ctx.chain.player(), TEST_CHAIN_ID);
    let expected_signature = player_key()
        .sign_message(ctx.chain.player(), message.as_slice())
        .await
        .unwrap();
    assert_eq!(submission.signature, expected_signature);
}

#[tokio::test]
async fn claim_winnings__before_querying_winnings__ineligible() {
    let ctx = TestContext::connected().await;
    ctx.chain.set_winnings(vec![U256::from(10u64)]);

    let claimed = ctx.controller.claim_winnings().await;

    assert!(!claimed);
    assert_eq!(ctx.chain.writes_of("submitScore"), 0);
    assert_eq!(
        ctx.notifier.messages_at(NoticeLevel::Error),
        vec![Error::Ineligible.to_string()]
    );
}

#[tokio::test]
async fn get_winnings__node_failure__keeps_previous_state() {
    let ctx = TestContext::connected().await;
    ctx.chain.fail_reads_of("getWinnings");

    let stored = ctx.controller.get_winnings().await;

    assert!(!stored);
    assert!(!ctx.controller.is_loading());
    assert!(ctx.controller.game_state().await.winnings.is_empty());
}
