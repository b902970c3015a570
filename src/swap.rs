use crate::{
    error::SwapError,
    secret::{RefundFiller, Secret},
};
use async_trait::async_trait;
use bitcoin::{Amount, PublicKey, Txid};

/// The HTLC was funded on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Funded {
    pub txid: Txid,
    pub value: Amount,
}

/// The HTLC was spent, either by this call or by an earlier one that the
/// already-withdrawn probe recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spent {
    pub txid: Txid,
    pub already_withdrawn: bool,
}

/// The terms negotiated with the counterparty, checked against what they
/// actually published. The owner key and hash algorithm are implicitly
/// trusted through the same negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedScript {
    pub value: Amount,
    pub locktime: u32,
    pub recipient: PublicKey,
}

/// The contract every chain engine of the swap daemon implements. One
/// instance drives one leg; the orchestrator sequences the two legs and
/// never touches a chain directly.
#[async_trait]
pub trait LedgerSwap {
    /// Chain-specific HTLC parameters.
    type Params: Send + Sync;
    /// Counterparty-promised terms vetted before acting.
    type Expected: Send + Sync;
    type Address: Send + Sync;
    type Amount: Send + Sync;
    type Funded: Send + Sync;
    type Spent: Send + Sync;

    /// Compiles the contract and derives its on-chain location. Pure.
    fn create_script(
        &self,
        params: &Self::Params,
    ) -> Result<(Vec<u8>, Self::Address), SwapError>;

    /// Vets a counterparty-published contract against the negotiated terms.
    async fn check_script(
        &self,
        params: &Self::Params,
        expected: &Self::Expected,
    ) -> Result<(), SwapError>;

    /// Locks `value` into the contract.
    async fn fund_script(
        &self,
        params: &Self::Params,
        value: Self::Amount,
    ) -> Result<Self::Funded, SwapError>;

    /// Claims the contract by revealing the preimage. `to` defaults to the
    /// local identity.
    async fn withdraw(
        &self,
        params: &Self::Params,
        secret: &Secret,
        to: Option<Self::Address>,
    ) -> Result<Self::Spent, SwapError>;

    /// Reclaims the contract once its timelock has matured.
    async fn refund(
        &self,
        params: &Self::Params,
        filler: &RefundFiller,
        to: Option<Self::Address>,
    ) -> Result<Self::Spent, SwapError>;

    /// Spendable balance of the local identity.
    async fn balance(&self) -> Result<Self::Amount, SwapError>;
}
