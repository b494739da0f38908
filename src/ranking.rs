//! Deterministic co-sorting of scoreboard entries.
//!
//! The game contract re-derives the ranked scoreboard from the same unsorted
//! inputs when verifying a score submission, so the ordering here is part of
//! the wire contract: descending by exact integer score, equal scores keep
//! their input order.

use crate::{
    Error,
    Result,
};
use alloy_primitives::{
    Address,
    U256,
};
use itertools::Itertools;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreEntry {
    pub score: U256,
    pub address: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RankedScores {
    pub scores: Vec<U256>,
    pub addresses: Vec<Address>,
}

impl RankedScores {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = ScoreEntry> + '_ {
        self.scores
            .iter()
            .zip(&self.addresses)
            .map(|(score, address)| ScoreEntry {
                score: *score,
                address: *address,
            })
    }
}

pub fn rank_scores(scores: &[U256], addresses: &[Address]) -> Result<RankedScores> {
    if scores.len() != addresses.len() {
        return Err(Error::LengthMismatch {
            scores: scores.len(),
            addresses: addresses.len(),
        });
    }
    let entries = scores
        .iter()
        .zip(addresses)
        .map(|(score, address)| ScoreEntry {
            score: *score,
            address: *address,
        });
    Ok(rank_entries(entries))
}

pub fn rank_entries(entries: impl IntoIterator<Item = ScoreEntry>) -> RankedScores {
    // sorted_by is a stable sort
    let (scores, addresses): (Vec<U256>, Vec<Address>) = entries
        .into_iter()
        .sorted_by(|a, b| b.score.cmp(&a.score))
        .map(|entry| (entry.score, entry.address))
        .unzip();
    RankedScores { scores, addresses }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use proptest::prelude::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn scores(values: &[u64]) -> Vec<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    #[test]
    fn rank_scores__descending_with_stable_ties() {
        // given
        let (a, b, c, d) = (addr(0xa), addr(0xb), addr(0xc), addr(0xd));

        // when
        let ranked = rank_scores(&scores(&[5, 9, 9, 1]), &[a, b, c, d]).unwrap();

        // then
        assert_eq!(ranked.scores, scores(&[9, 9, 5, 1]));
        assert_eq!(ranked.addresses, vec![b, c, a, d]);
    }

    #[test]
    fn rank_scores__compares_beyond_float_precision() {
        // 2^53 and 2^53 + 1 collapse to the same f64
        let low = U256::from(1u64 << 53);
        let high = low + U256::from(1u64);
        let ranked = rank_scores(&[low, high], &[addr(1), addr(2)]).unwrap();
        assert_eq!(ranked.scores, vec![high, low]);
        assert_eq!(ranked.addresses, vec![addr(2), addr(1)]);
    }

    #[test]
    fn rank_scores__mismatched_lengths__errors() {
        let result = rank_scores(&scores(&[1, 2]), &[addr(1)]);
        assert!(matches!(
            result,
            Err(Error::LengthMismatch {
                scores: 2,
                addresses: 1
            })
        ));
    }

    #[test]
    fn rank_scores__empty_input__empty_output() {
        let ranked = rank_scores(&[], &[]).unwrap();
        assert!(ranked.is_empty());
    }

    proptest! {
        #[test]
        fn rank_scores__output_is_sorted_stable_permutation(
            values in proptest::collection::vec(0u64..8, 0..40)
        ) {
            // index-derived addresses let us recover the input position of each entry
            let input_scores = scores(&values);
            let input_addresses: Vec<Address> = (0..values.len())
                .map(|i| Address::with_last_byte(i as u8))
                .collect();

            let ranked = rank_scores(&input_scores, &input_addresses).unwrap();

            prop_assert_eq!(ranked.len(), values.len());
            prop_assert_eq!(ranked.addresses.len(), values.len());
            for pair in ranked.entries().collect::<Vec<_>>().windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
                if pair[0].score == pair[1].score {
                    prop_assert!(pair[0].address < pair[1].address);
                }
            }
            for entry in ranked.entries() {
                let index = entry.address.0[19] as usize;
                prop_assert_eq!(input_scores[index], entry.score);
            }
        }

        #[test]
        fn rank_scores__is_deterministic(
            values in proptest::collection::vec(any::<u64>(), 0..20)
        ) {
            let input_scores = scores(&values);
            let input_addresses: Vec<Address> =
                (0..values.len()).map(|i| addr(i as u8)).collect();
            let first = rank_scores(&input_scores, &input_addresses).unwrap();
            let second = rank_scores(&input_scores, &input_addresses).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
