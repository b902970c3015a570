use async_trait::async_trait;
use bitcoin::{Address, Amount, Txid};
use thiserror::Error;

/// One spendable output at an address, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unspent {
    pub txid: Txid,
    pub vout: u32,
    pub value: Amount,
    /// `None` when the backend does not report a depth for mempool entries.
    pub confirmations: Option<u32>,
}

/// Metadata about an arbitrary transaction.
///
/// Everything besides the txid and depth is optional; backends that cannot
/// supply a field simply leave it out and confidence estimation degrades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub txid: Txid,
    /// Address funding the transaction's first input.
    pub sender: Option<String>,
    pub fees: Option<Amount>,
    pub size: Option<u32>,
    pub confirmations: u32,
}

/// A spend of a watched address observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawTx {
    /// Destination the spend paid to.
    pub address: String,
    pub txid: Txid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSpeed {
    Slow,
    Normal,
    Fast,
}

/// What the quote is for. Swap transactions are non-standard spends and
/// backends may price them differently from plain payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMethod {
    Payment,
    Swap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeRequest {
    pub speed: FeeSpeed,
    /// Backend hint: the address whose spend the quote is for.
    pub address: Option<String>,
    pub method: FeeMethod,
    /// Virtual size override; estimators assume a method-typical size
    /// when absent.
    pub tx_size: Option<u32>,
}

/// Broadcast rejections the engine reacts to, separated from plain
/// transport failures.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The node refused the transaction because its nLockTime has not been
    /// reached (bitcoind's `non-final` rejection).
    #[error("transaction is non-final")]
    NonFinal,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Chain access required by every engine operation.
///
/// Implementations talk to an explorer or a node; the engine never assumes
/// more than these three calls. Optional capabilities live in their own
/// traits below so that their absence is visible at engine construction
/// rather than masked by silent no-ops.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn balance(&self, address: &Address) -> anyhow::Result<Amount>;

    async fn unspents(&self, address: &Address) -> anyhow::Result<Vec<Unspent>>;

    /// Submits a raw transaction in consensus hex encoding.
    async fn broadcast(&self, tx_hex: String) -> Result<Txid, BroadcastError>;
}

/// Optional: transaction metadata lookup. Without it, confidence falls back
/// to confirmations only and post-broadcast visibility goes unchecked.
#[async_trait]
pub trait FetchTxInfo: Send + Sync {
    /// `Ok(None)` when the backend does not know the transaction.
    async fn tx_info(&self, txid: &Txid) -> anyhow::Result<Option<TxInfo>>;
}

/// Optional: fee quoting. Without it, the engine uses the flat fallback fee.
#[async_trait]
pub trait EstimateFee: Send + Sync {
    async fn estimate(&self, request: &FeeRequest) -> anyhow::Result<Amount>;
}

/// Optional: detection of a prior spend of the HTLC, enabling the
/// already-withdrawn idempotent path.
#[async_trait]
pub trait DetectWithdraw: Send + Sync {
    async fn check_withdraw(&self, address: &Address) -> anyhow::Result<Option<WithdrawTx>>;
}
