use bitcoin::{Address, Amount, Txid};
use thiserror::Error;

/// Everything the engine can report back to the swap orchestrator.
///
/// The engine never retries on its own; `is_retryable` tells the caller
/// whether waiting and invoking the operation again can succeed.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("insufficient funds: {total} unspent, need {requested} plus {fee} fee")]
    InsufficientFunds {
        total: Amount,
        fee: Amount,
        requested: Amount,
    },

    #[error("htlc address {0} holds no coins")]
    AddressEmpty(Address),

    /// The spending transaction's locktime has not been reached yet.
    #[error("timelock has not matured, try again later")]
    TimelockNotMature,

    /// Broadcast was accepted but the transaction never became visible.
    #[error("transaction {0} not found after broadcast")]
    TxNotFound(Txid),

    /// The counterparty's published HTLC does not match what was negotiated.
    #[error("script check failed: {0}")]
    ScriptMismatch(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Transport or backend failure from an injected collaborator.
    #[error("gateway: {0:#}")]
    Gateway(#[from] anyhow::Error),
}

impl SwapError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapError::TimelockNotMature | SwapError::TxNotFound(_) | SwapError::Gateway(_)
        )
    }
}
