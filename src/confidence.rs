use crate::{
    fee::FeeOracle,
    gateway::{FeeMethod, FeeRequest, FeeSpeed, FetchTxInfo, Unspent},
};
use std::{fmt, sync::Arc};

pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Decides which unspent outputs are safe to act on before confirmation.
///
/// A confirmed output is fully trusted. An unconfirmed one is scored by the
/// ratio of the fee it paid to the current fast fee: a mempool transaction
/// paying at least the fast rate is unlikely to be evicted by a
/// replacement, so it can be acted on early without waiting for a block.
pub struct ConfidenceFilter {
    threshold: f64,
    tx_info: Option<Arc<dyn FetchTxInfo>>,
    fees: FeeOracle,
}

impl ConfidenceFilter {
    pub fn new(threshold: f64, tx_info: Option<Arc<dyn FetchTxInfo>>, fees: FeeOracle) -> Self {
        ConfidenceFilter {
            threshold,
            tx_info,
            fees,
        }
    }

    /// The subset of `unspents` whose confidence reaches the threshold.
    pub async fn filter(&self, unspents: &[Unspent]) -> Vec<Unspent> {
        let mut confident = Vec::with_capacity(unspents.len());

        for unspent in unspents {
            let score = self.confidence(unspent).await;
            if score >= self.threshold {
                confident.push(unspent.clone());
            } else {
                tracing::debug!(
                    txid = %unspent.txid,
                    vout = unspent.vout,
                    score,
                    "skipping low-confidence output"
                );
            }
        }

        confident
    }

    /// Confidence in [0, 1] that the output will be honored by the final
    /// ledger state.
    pub async fn confidence(&self, unspent: &Unspent) -> f64 {
        if unspent.confirmations.unwrap_or(0) > 0 {
            return 1.0;
        }

        let source = match &self.tx_info {
            Some(source) => source,
            None => return 0.0,
        };

        let info = match source.tx_info(&unspent.txid).await {
            Ok(Some(info)) => info,
            Ok(None) => return 0.0,
            Err(e) => {
                tracing::debug!(txid = %unspent.txid, "tx info lookup failed: {:#}", e);
                return 0.0;
            }
        };

        let fees_paid = match info.fees {
            Some(fees) => fees,
            None => return 0.0,
        };

        let fast_fee = self
            .fees
            .estimate(&FeeRequest {
                speed: FeeSpeed::Fast,
                address: info.sender,
                method: FeeMethod::Swap,
                tx_size: info.size,
            })
            .await;

        if fast_fee.to_sat() == 0 {
            return 1.0;
        }

        #[allow(clippy::cast_precision_loss)]
        let ratio = fees_paid.to_sat() as f64 / fast_fee.to_sat() as f64;
        ratio.min(1.0)
    }
}

impl fmt::Debug for ConfidenceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfidenceFilter")
            .field("threshold", &self.threshold)
            .field("tx_info", &self.tx_info.as_ref().map(|_| ".."))
            .finish_non_exhaustive()
    }
}
