//! Signed authorizations the game contract checks before paying out.
//!
//! The message is `keccak256(abi.encodePacked(...))` over the claim fields;
//! the contract rebuilds the same bytes, so field order and widths are fixed:
//! `address` is 20 bytes, `uint256` is 32 bytes big-endian and `uint256[]` is
//! each element as 32 bytes with no length prefix.

use crate::{
    Result,
    signer::MessageSigner,
};
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
    keccak256,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationPayload {
    pub message: B256,
    pub signature: Bytes,
}

#[derive(Default)]
struct PackedEncoder {
    buf: Vec<u8>,
}

impl PackedEncoder {
    fn address(mut self, address: &Address) -> Self {
        self.buf.extend_from_slice(address.as_slice());
        self
    }

    fn uint256(mut self, value: &U256) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes::<32>());
        self
    }

    fn uint256_array(self, values: &[U256]) -> Self {
        values.iter().fold(self, |enc, value| enc.uint256(value))
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub fn winnings_query_encoding(account: &Address, chain_id: u64) -> Vec<u8> {
    PackedEncoder::default()
        .address(account)
        .uint256(&U256::from(chain_id))
        .finish()
}

pub fn score_submission_encoding(
    sorted_scores: &[U256],
    account: &Address,
    chain_id: u64,
) -> Vec<u8> {
    PackedEncoder::default()
        .uint256_array(sorted_scores)
        .address(account)
        .uint256(&U256::from(chain_id))
        .finish()
}

/// Hash authorizing `getWinnings` for `(account, chainId)`.
pub fn winnings_query_message(account: &Address, chain_id: u64) -> B256 {
    keccak256(winnings_query_encoding(account, chain_id))
}

/// Hash authorizing `submitScore` for the ranked scores.
pub fn score_submission_message(
    sorted_scores: &[U256],
    account: &Address,
    chain_id: u64,
) -> B256 {
    keccak256(score_submission_encoding(sorted_scores, account, chain_id))
}

/// Signs the raw 32 message bytes, matching how the contract recovers the
/// signer.
pub async fn authorize<S: MessageSigner>(
    signer: &S,
    account: Address,
    message: B256,
) -> Result<AuthorizationPayload> {
    let signature = signer.sign_message(account, message.as_slice()).await?;
    Ok(AuthorizationPayload { message, signature })
}
