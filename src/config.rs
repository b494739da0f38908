use crate::{
    Error,
    Result,
    chain::ReceiptPolicy,
};
use alloy_primitives::{
    Address,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::Path,
    time::Duration,
};

pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;
/// 2^53 whole tokens, the allowance granted by default.
pub const DEFAULT_APPROVAL_WHOLE_TOKENS: u64 = 1 << 53;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Chain definition, also what the wallet is asked to add when it does not
/// know the target chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    #[serde(default)]
    pub block_explorer_url: Option<String>,
}

impl ChainParams {
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    pub fn primary_rpc_url(&self) -> Option<&str> {
        self.rpc_urls.first().map(String::as_str)
    }

    pub fn address_url(&self, address: &Address) -> Option<String> {
        self.block_explorer_url
            .as_ref()
            .map(|base| format!("{}/address/{address}", base.trim_end_matches('/')))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub game: Address,
    pub payment_token: Address,
}

/// How much allowance the payment guard grants when none is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// `whole_tokens` scaled by the token's decimals.
    Scaled { whole_tokens: u64 },
    Unlimited,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy::Scaled {
            whole_tokens: DEFAULT_APPROVAL_WHOLE_TOKENS,
        }
    }
}

impl ApprovalPolicy {
    pub fn amount(&self, decimals: u8) -> U256 {
        match self {
            ApprovalPolicy::Scaled { whole_tokens } => {
                let scale = U256::from(10u64).saturating_pow(U256::from(decimals));
                U256::from(*whole_tokens).saturating_mul(scale)
            }
            ApprovalPolicy::Unlimited => U256::MAX,
        }
    }
}

/// Who signs authorization payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignerConfig {
    /// The connected wallet signs as the active account.
    #[default]
    Wallet,
    /// A local encrypted keystore, unlocked at startup.
    Keystore {
        name: String,
        #[serde(default)]
        dir: Option<String>,
    },
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_RECEIPT_POLL_INTERVAL_MS
}

fn default_receipt_timeout_secs() -> u64 {
    DEFAULT_RECEIPT_TIMEOUT_SECS
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub chain: ChainParams,
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub approval: ApprovalPolicy,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// Logo shown by the wallet when it starts tracking the payment token.
    #[serde(default)]
    pub token_image_url: Option<String>,
}

impl GameConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: GameConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.chain_id == 0 {
            return Err(Error::Config("chain_id must be non-zero".to_string()));
        }
        if self.chain.rpc_urls.is_empty() {
            return Err(Error::Config("at least one rpc url is required".to_string()));
        }
        for url in &self.chain.rpc_urls {
            reqwest::Url::parse(url)
                .map_err(|e| Error::Config(format!("invalid rpc url {url}: {e}")))?;
        }
        if self.contracts.game.is_zero() {
            return Err(Error::Config("game contract address is zero".to_string()));
        }
        if self.contracts.payment_token.is_zero() {
            return Err(Error::Config(
                "payment token address is zero".to_string(),
            ));
        }
        if self.contracts.game == self.contracts.payment_token {
            return Err(Error::Config(
                "game and payment token addresses must differ".to_string(),
            ));
        }
        if self.receipt_poll_interval_ms == 0 {
            return Err(Error::Config(
                "receipt_poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.receipt_timeout_secs == 0 {
            return Err(Error::Config(
                "receipt_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn receipt_policy(&self) -> ReceiptPolicy {
        ReceiptPolicy {
            poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
            timeout: Duration::from_secs(self.receipt_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    const SAMPLE: &str = r#"{
        "chain": {
            "chain_id": 11155111,
            "chain_name": "Sepolia",
            "rpc_urls": ["https://rpc.sepolia.org"],
            "native_currency": { "name": "Sepolia Ether", "symbol": "ETH", "decimals": 18 },
            "block_explorer_url": "https://sepolia.etherscan.io/"
        },
        "contracts": {
            "game": "0x1111111111111111111111111111111111111111",
            "payment_token": "0x2222222222222222222222222222222222222222"
        }
    }"#;

    #[test]
    fn from_json__minimal_file__fills_defaults() {
        let config = GameConfig::from_json(SAMPLE).unwrap();

        assert_eq!(config.chain.chain_id, 11155111);
        assert_eq!(config.chain.chain_id_hex(), "0xaa36a7");
        assert_eq!(config.approval, ApprovalPolicy::default());
        assert_eq!(config.signer, SignerConfig::Wallet);
        assert_eq!(
            config.receipt_policy().poll_interval,
            Duration::from_millis(DEFAULT_RECEIPT_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn from_json__keystore_signer_and_unlimited_approval__parsed() {
        let mut value: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        value["signer"] = serde_json::json!({ "kind": "keystore", "name": "arcade" });
        value["approval"] = serde_json::json!({ "kind": "unlimited" });

        let config = GameConfig::from_json(&value.to_string()).unwrap();

        assert_eq!(
            config.signer,
            SignerConfig::Keystore {
                name: "arcade".to_string(),
                dir: None
            }
        );
        assert_eq!(config.approval.amount(18), U256::MAX);
    }

    #[test]
    fn validate__same_game_and_token__rejected() {
        let mut config = GameConfig::from_json(SAMPLE).unwrap();
        config.contracts.payment_token = config.contracts.game;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate__bad_rpc_url__rejected() {
        let mut config = GameConfig::from_json(SAMPLE).unwrap();
        config.chain.rpc_urls = vec!["not a url".to_string()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate__zero_chain_id__rejected() {
        let mut config = GameConfig::from_json(SAMPLE).unwrap();
        config.chain.chain_id = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate__zero_receipt_timeout__rejected() {
        let mut config = GameConfig::from_json(SAMPLE).unwrap();
        config.receipt_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn approval_amount__scales_by_decimals() {
        let policy = ApprovalPolicy::Scaled { whole_tokens: 5 };
        assert_eq!(policy.amount(0), U256::from(5u64));
        assert_eq!(policy.amount(6), U256::from(5_000_000u64));
        let default = ApprovalPolicy::default().amount(18);
        assert_eq!(
            default,
            U256::from(1u64 << 53) * U256::from(10u64).pow(U256::from(18u64))
        );
    }

    #[test]
    fn address_url__trims_trailing_slash() {
        let config = GameConfig::from_json(SAMPLE).unwrap();
        let address = Address::repeat_byte(0xab);
        assert_eq!(
            config.chain.address_url(&address).unwrap(),
            format!("https://sepolia.etherscan.io/address/{address}")
        );
    }
}
