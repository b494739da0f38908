use alloy_primitives::B256;
use thiserror::Error;

/// JSON-RPC error code a wallet returns when asked to switch to a chain it
/// has never been told about.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("wallet is not connected")]
    NotConnected,
    #[error("Not eligible for any winnings")]
    Ineligible,
    #[error("Already claimed free play")]
    AlreadyClaimed,
    #[error("no wallet provider available")]
    ProviderUnavailable,
    #[error("rpc call `{method}` failed ({code:?}): {message}")]
    Rpc {
        method: String,
        code: Option<i64>,
        message: String,
    },
    #[error("unexpected response to `{method}`: {detail}")]
    UnexpectedResponse { method: String, detail: String },
    #[error("http transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("abi encoding failed: {0}")]
    Abi(#[from] alloy_sol_types::Error),
    #[error("transaction {0} reverted")]
    Reverted(B256),
    #[error("timed out waiting for receipt of transaction {0}")]
    ReceiptTimeout(B256),
    #[error("score and address lists differ in length ({scores} vs {addresses})")]
    LengthMismatch { scores: usize, addresses: usize },
    #[error("message signing failed: {0}")]
    Signing(String),
    #[error("keystore error: {0}")]
    Keystore(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn rpc(method: impl Into<String>, code: Option<i64>, message: impl Into<String>) -> Self {
        Error::Rpc {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    pub fn unexpected(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::UnexpectedResponse {
            method: method.into(),
            detail: detail.into(),
        }
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        matches!(self, Error::Rpc { code: Some(code), .. } if *code == UNRECOGNIZED_CHAIN_CODE)
    }

    /// Errors a user can act on, as opposed to transport or contract failures.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::NotConnected | Error::Ineligible | Error::AlreadyClaimed
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn is_unrecognized_chain__only_matches_4902() {
        assert!(Error::rpc("wallet_switchEthereumChain", Some(4902), "unknown").is_unrecognized_chain());
        assert!(!Error::rpc("wallet_switchEthereumChain", Some(4001), "rejected").is_unrecognized_chain());
        assert!(!Error::rpc("wallet_switchEthereumChain", None, "boom").is_unrecognized_chain());
    }
}
