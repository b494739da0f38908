use crate::{
    config::ChainParams,
    ranking::RankedScores,
};
use alloy_primitives::{
    Address,
    U256,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub address: Address,
    pub masked_address: String,
    pub explorer_url: Option<String>,
    pub score: U256,
    pub chain_id: u64,
}

/// `0xA...bcd` style short form of the checksummed address.
pub fn mask_address(address: &Address) -> String {
    let full = address.to_checksum(None);
    format!("{}...{}", &full[..3], &full[full.len() - 3..])
}

pub fn build_leaderboard(
    ranked: &RankedScores,
    chain: &ChainParams,
    chain_id: u64,
) -> Vec<LeaderboardEntry> {
    ranked
        .entries()
        .enumerate()
        .map(|(index, entry)| LeaderboardEntry {
            rank: index + 1,
            address: entry.address,
            masked_address: mask_address(&entry.address),
            explorer_url: chain.address_url(&entry.address),
            score: entry.score,
            chain_id,
        })
        .collect()
}
