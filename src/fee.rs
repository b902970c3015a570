use crate::gateway::{EstimateFee, FeeRequest};
use bitcoin::Amount;
use std::{fmt, sync::Arc};

/// Flat per-transaction fee used when no estimator is configured. This is
/// the dust threshold: transactions built with it relay slowly if at all,
/// which is the documented degraded behavior rather than a sane default.
pub const FALLBACK_FEE: Amount = Amount::from_sat(546);

/// Per-transaction fee quotes, backed by an optional estimator capability.
///
/// The returned amount is the exact fee added to a built transaction; how
/// the backend derives it (flat or rate times size) is its own affair.
#[derive(Clone)]
pub struct FeeOracle {
    estimator: Option<Arc<dyn EstimateFee>>,
}

impl FeeOracle {
    pub fn new(estimator: Option<Arc<dyn EstimateFee>>) -> Self {
        FeeOracle { estimator }
    }

    pub async fn estimate(&self, request: &FeeRequest) -> Amount {
        let estimator = match &self.estimator {
            Some(estimator) => estimator,
            None => {
                tracing::warn!(fee = %FALLBACK_FEE, "no fee estimator configured, using flat fallback");
                return FALLBACK_FEE;
            }
        };

        match estimator.estimate(request).await {
            Ok(fee) => fee,
            Err(e) => {
                tracing::warn!(fee = %FALLBACK_FEE, "fee estimator failed ({:#}), using flat fallback", e);
                FALLBACK_FEE
            }
        }
    }
}

impl fmt::Debug for FeeOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeeOracle")
            .field("estimator", &self.estimator.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FeeMethod, FeeSpeed};
    use async_trait::async_trait;

    struct Flat(Amount);

    #[async_trait]
    impl EstimateFee for Flat {
        async fn estimate(&self, _: &FeeRequest) -> anyhow::Result<Amount> {
            Ok(self.0)
        }
    }

    struct Broken;

    #[async_trait]
    impl EstimateFee for Broken {
        async fn estimate(&self, _: &FeeRequest) -> anyhow::Result<Amount> {
            anyhow::bail!("backend down")
        }
    }

    fn request() -> FeeRequest {
        FeeRequest {
            speed: FeeSpeed::Fast,
            address: None,
            method: FeeMethod::Swap,
            tx_size: None,
        }
    }

    #[tokio::test]
    async fn quotes_come_from_the_estimator() {
        let oracle = FeeOracle::new(Some(Arc::new(Flat(Amount::from_sat(12_345)))));

        assert_eq!(oracle.estimate(&request()).await, Amount::from_sat(12_345));
    }

    #[tokio::test]
    async fn missing_estimator_falls_back_to_dust() {
        let oracle = FeeOracle::new(None);

        assert_eq!(oracle.estimate(&request()).await, FALLBACK_FEE);
    }

    #[tokio::test]
    async fn failing_estimator_falls_back_to_dust() {
        let oracle = FeeOracle::new(Some(Arc::new(Broken)));

        assert_eq!(oracle.estimate(&request()).await, FALLBACK_FEE);
    }
}
