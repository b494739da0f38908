use crate::{
    Error,
    Result,
    chain::{
        ChainClient,
        ReceiptPolicy,
        read_contract,
        wait_for_transaction_receipt,
        write_contract,
    },
    config::{
        ApprovalPolicy,
        ContractAddresses,
    },
    contracts::IERC20,
    wallet::Connection,
};
use alloy_primitives::Address;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentTokenDetails {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub address: Address,
}

/// Makes sure the game contract may pull payment tokens before a paid play
/// is submitted.
#[derive(Clone, Copy, Debug)]
pub struct PaymentGuard {
    contracts: ContractAddresses,
    policy: ApprovalPolicy,
    receipts: ReceiptPolicy,
}

impl PaymentGuard {
    pub fn new(
        contracts: ContractAddresses,
        policy: ApprovalPolicy,
        receipts: ReceiptPolicy,
    ) -> Self {
        Self {
            contracts,
            policy,
            receipts,
        }
    }

    pub async fn payment_token_details<C: ChainClient>(
        &self,
        client: &C,
    ) -> Result<PaymentTokenDetails> {
        let token = self.contracts.payment_token;
        let (name_call, symbol_call, decimals_call) = (
            IERC20::nameCall {},
            IERC20::symbolCall {},
            IERC20::decimalsCall {},
        );
        let (name, symbol, decimals) = futures::try_join!(
            read_contract(client, token, None, &name_call),
            read_contract(client, token, None, &symbol_call),
            read_contract(client, token, None, &decimals_call),
        )?;
        Ok(PaymentTokenDetails {
            name: name.name,
            symbol: symbol.symbol,
            decimals: decimals.decimals,
            address: token,
        })
    }

    /// Approves the game contract when the current allowance is zero and
    /// waits for the approval to land. Returns whether an approval was sent.
    pub async fn check_payment_token_approval<C: ChainClient>(
        &self,
        connection: &Connection<C>,
        decimals: u8,
    ) -> Result<bool> {
        let allowance = read_contract(
            &connection.public,
            self.contracts.payment_token,
            Some(connection.address),
            &IERC20::allowanceCall {
                owner: connection.address,
                spender: self.contracts.game,
            },
        )
        .await?
        .remaining;
        if !allowance.is_zero() {
            return Ok(false);
        }

        let amount = self.policy.amount(decimals);
        info!(%amount, spender = %self.contracts.game, "approving payment token");
        let hash = write_contract(
            &connection.wallet,
            self.contracts.payment_token,
            connection.address,
            &IERC20::approveCall {
                spender: self.contracts.game,
                amount,
            },
        )
        .await?;
        let receipt =
            wait_for_transaction_receipt(&connection.public, hash, self.receipts).await?;
        if receipt.is_reverted() {
            return Err(Error::Reverted(hash));
        }
        Ok(true)
    }
}
