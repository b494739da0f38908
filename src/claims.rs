use crate::{
    Error,
    Result,
    authorization::{
        AuthorizationPayload,
        authorize,
        score_submission_message,
        winnings_query_message,
    },
    chain::{
        ChainClient,
        ReceiptPolicy,
        read_contract,
        simulate_contract,
        wait_for_transaction_receipt,
        write_contract,
    },
    contracts::IGame,
    ranking::{
        RankedScores,
        ScoreEntry,
        rank_entries,
    },
    signer::MessageSigner,
    wallet::Connection,
};
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub transaction_hash: B256,
    pub ranked: RankedScores,
    pub authorization: AuthorizationPayload,
}

/// Drives the winnings query and the score submission that pays them out.
pub struct ClaimOrchestrator<S> {
    game: Address,
    signer: S,
    receipts: ReceiptPolicy,
}

impl<S: MessageSigner> ClaimOrchestrator<S> {
    pub fn new(game: Address, signer: S, receipts: ReceiptPolicy) -> Self {
        Self {
            game,
            signer,
            receipts,
        }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Prize amounts the connected account may claim for `collected` items.
    pub async fn get_winnings<C: ChainClient>(
        &self,
        connection: &Connection<C>,
        collected: U256,
    ) -> Result<Vec<U256>> {
        let message = winnings_query_message(&connection.address, connection.chain_id);
        let payload = authorize(&self.signer, connection.address, message).await?;
        let winnings = simulate_contract(
            &connection.public,
            self.game,
            connection.address,
            &IGame::getWinningsCall {
                count: collected,
                signature: payload.signature,
            },
        )
        .await?
        .winnings;
        Ok(winnings)
    }

    /// Scoreboard exactly as stored on chain, unsorted.
    pub async fn latest_scores<C: ChainClient>(
        &self,
        client: &C,
        account: Address,
    ) -> Result<Vec<ScoreEntry>> {
        let board = read_contract(client, self.game, Some(account), &IGame::scoresCall {})
            .await?;
        if board.scores.len() != board.players.len() {
            return Err(Error::LengthMismatch {
                scores: board.scores.len(),
                addresses: board.players.len(),
            });
        }
        Ok(board
            .scores
            .into_iter()
            .zip(board.players)
            .map(|(score, address)| ScoreEntry { score, address })
            .collect())
    }

    /// Submits the player's score into the ranked scoreboard and claims
    /// `winnings`.
    ///
    /// The contract re-derives the ranking from its stored scoreboard plus the
    /// submitted entry, so the board is read fresh, the player's entry is
    /// appended, and only then is it ranked and signed.
    pub async fn claim_winnings<C: ChainClient>(
        &self,
        connection: &Connection<C>,
        winnings: &[U256],
        score: U256,
    ) -> Result<ClaimReceipt> {
        if winnings.is_empty() {
            return Err(Error::Ineligible);
        }

        let mut entries = self
            .latest_scores(&connection.public, connection.address)
            .await?;
        entries.push(ScoreEntry {
            score,
            address: connection.address,
        });
        let ranked = rank_entries(entries);

        let message =
            score_submission_message(&ranked.scores, &connection.address, connection.chain_id);
        let authorization = authorize(&self.signer, connection.address, message).await?;

        let hash = write_contract(
            &connection.wallet,
            self.game,
            connection.address,
            &IGame::submitScoreCall {
                scores: ranked.scores.clone(),
                players: ranked.addresses.clone(),
                signature: authorization.signature.clone(),
                winnings: winnings.to_vec(),
            },
        )
        .await?;
        let receipt =
            wait_for_transaction_receipt(&connection.public, hash, self.receipts).await?;
        if receipt.is_reverted() {
            warn!(tx = %hash, "score submission reverted");
            return Err(Error::Reverted(hash));
        }
        info!(tx = %hash, entries = ranked.len(), "winnings claimed");
        Ok(ClaimReceipt {
            transaction_hash: hash,
            ranked,
            authorization,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::{
        signer::LocalKeySigner,
        test_helpers::{
            ChainCall,
            SimulatedChain,
        },
    };

    fn orchestrator(chain: &SimulatedChain) -> ClaimOrchestrator<LocalKeySigner> {
        let mut secret = [0u8; 32];
        secret[31] = 3;
        ClaimOrchestrator::new(
            chain.contracts().game,
            LocalKeySigner::from_secret(&secret).unwrap(),
            ReceiptPolicy::default(),
        )
    }

    fn scores(values: &[u64]) -> Vec<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    #[tokio::test]
    async fn get_winnings__returns_simulated_result() {
        // given
        let chain = SimulatedChain::new();
        chain.set_winnings(scores(&[100, 50]));
        let connection = chain.connection();

        // when
        let winnings = orchestrator(&chain)
            .get_winnings(&connection, U256::from(3u64))
            .await
            .unwrap();

        // then
        assert_eq!(winnings, scores(&[100, 50]));
        assert_eq!(chain.last_winnings_count(), Some(U256::from(3u64)));
        assert!(chain.calls().iter().all(|c| !matches!(c, ChainCall::Write(_))));
    }

    #[tokio::test]
    async fn claim_winnings__empty_winnings__ineligible_without_chain_calls() {
        let chain = SimulatedChain::new();
        let connection = chain.connection();

        let result = orchestrator(&chain)
            .claim_winnings(&connection, &[], U256::from(10u64))
            .await;

        assert!(matches!(result, Err(Error::Ineligible)));
        assert!(chain.calls().is_empty());
    }

    #[tokio::test]
    async fn claim_winnings__appends_player_then_ranks_and_signs() {
        // given
        let chain = SimulatedChain::new();
        let rivals = [Address::repeat_byte(1), Address::repeat_byte(2)];
        chain.set_scoreboard(scores(&[5, 9]), rivals.to_vec());
        let connection = chain.connection();
        let claims = orchestrator(&chain);

        // when
        let receipt = claims
            .claim_winnings(&connection, &scores(&[100]), U256::from(9u64))
            .await
            .unwrap();

        // then
        assert_eq!(receipt.ranked.scores, scores(&[9, 9, 5]));
        assert_eq!(
            receipt.ranked.addresses,
            vec![rivals[1], connection.address, rivals[0]]
        );
        assert_eq!(
            receipt.authorization.message,
            score_submission_message(
                &receipt.ranked.scores,
                &connection.address,
                connection.chain_id
            )
        );
        let submitted = chain.last_submission().unwrap();
        assert_eq!(submitted.scores, receipt.ranked.scores);
        assert_eq!(submitted.players, receipt.ranked.addresses);
        assert_eq!(submitted.signature, receipt.authorization.signature);
        assert_eq!(submitted.winnings, scores(&[100]));
    }

    #[tokio::test]
    async fn claim_winnings__unchanged_board__same_signature_on_retry() {
        let chain = SimulatedChain::new();
        chain.set_scoreboard(scores(&[7]), vec![Address::repeat_byte(4)]);
        chain.freeze_scoreboard();
        let connection = chain.connection();
        let claims = orchestrator(&chain);

        let first = claims
            .claim_winnings(&connection, &scores(&[1]), U256::from(3u64))
            .await
            .unwrap();
        let second = claims
            .claim_winnings(&connection, &scores(&[1]), U256::from(3u64))
            .await
            .unwrap();

        assert_eq!(first.authorization, second.authorization);
        assert_ne!(first.transaction_hash, second.transaction_hash);
    }

    #[tokio::test]
    async fn claim_winnings__reverted_receipt__reports_reverted() {
        let chain = SimulatedChain::new();
        chain.revert_writes_of("submitScore");
        let connection = chain.connection();

        let result = orchestrator(&chain)
            .claim_winnings(&connection, &scores(&[5]), U256::from(1u64))
            .await;

        assert!(matches!(result, Err(Error::Reverted(_))));
        assert_eq!(chain.writes_of("submitScore"), 1);
    }
}
