use crate::{
    confidence::{ConfidenceFilter, DEFAULT_THRESHOLD},
    error::SwapError,
    fee::FeeOracle,
    gateway::{
        BroadcastError, ChainGateway, DetectWithdraw, EstimateFee, FeeMethod, FeeRequest,
        FeeSpeed, FetchTxInfo, Unspent,
    },
    htlc::ScriptValues,
    keyring::Keyring,
    secret::{RefundFiller, Secret},
    swap::{ExpectedScript, Funded, LedgerSwap, Spent},
};
use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    consensus::encode::serialize_hex,
    script::PushBytesBuf,
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Address, Amount, Network, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use bitcoin::hashes::Hash;
use std::{fmt, sync::Arc, time::Duration};

/// How long the backend's indexer gets before we check that a broadcast
/// transaction is visible.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Observes the funding txid after signing, before broadcast.
pub type TxHook = Box<dyn Fn(Txid) + Send + Sync>;

/// The Bitcoin leg of a swap: builds, signs and broadcasts the transactions
/// that lock coins into an HTLC and spend them back out.
///
/// All chain access goes through the injected gateway; the engine keeps no
/// state between calls, so one instance can drive any number of swaps
/// sequentially. Repeat invocations of terminal operations are absorbed by
/// the already-withdrawn path rather than double-spending.
pub struct BitcoinSwap {
    gateway: Arc<dyn ChainGateway>,
    keyring: Arc<dyn Keyring>,
    fees: FeeOracle,
    confidence: ConfidenceFilter,
    tx_info: Option<Arc<dyn FetchTxInfo>>,
    withdraw_detector: Option<Arc<dyn DetectWithdraw>>,
    network: Network,
    settle_delay: Duration,
    tx_hook: Option<TxHook>,
}

pub struct Builder {
    gateway: Arc<dyn ChainGateway>,
    keyring: Arc<dyn Keyring>,
    network: Network,
    tx_info: Option<Arc<dyn FetchTxInfo>>,
    estimator: Option<Arc<dyn EstimateFee>>,
    withdraw_detector: Option<Arc<dyn DetectWithdraw>>,
    confidence_threshold: f64,
    settle_delay: Duration,
    tx_hook: Option<TxHook>,
}

impl BitcoinSwap {
    pub fn builder(
        gateway: Arc<dyn ChainGateway>,
        keyring: Arc<dyn Keyring>,
        network: Network,
    ) -> Builder {
        Builder {
            gateway,
            keyring,
            network,
            tx_info: None,
            estimator: None,
            withdraw_detector: None,
            confidence_threshold: DEFAULT_THRESHOLD,
            settle_delay: DEFAULT_SETTLE_DELAY,
            tx_hook: None,
        }
    }
}

impl Builder {
    /// Enables transaction metadata lookup: fee-based confidence scoring
    /// and the post-broadcast visibility check.
    pub fn tx_info(mut self, source: Arc<dyn FetchTxInfo>) -> Self {
        self.tx_info = Some(source);
        self
    }

    /// Enables backend fee quotes instead of the flat fallback fee.
    pub fn fee_estimator(mut self, estimator: Arc<dyn EstimateFee>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Enables recognition of an HTLC that was already swept to the caller's
    /// destination, making `withdraw` and `refund` idempotent.
    pub fn withdraw_detector(mut self, detector: Arc<dyn DetectWithdraw>) -> Self {
        self.withdraw_detector = Some(detector);
        self
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Called with the funding txid after signing, before broadcast.
    pub fn tx_hook(mut self, hook: impl Fn(Txid) + Send + Sync + 'static) -> Self {
        self.tx_hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<BitcoinSwap, SwapError> {
        if !matches!(self.network, Network::Bitcoin | Network::Testnet) {
            return Err(SwapError::InvariantViolated(format!(
                "unsupported network {}",
                self.network
            )));
        }

        let fees = FeeOracle::new(self.estimator);
        let confidence = ConfidenceFilter::new(
            self.confidence_threshold,
            self.tx_info.clone(),
            fees.clone(),
        );

        Ok(BitcoinSwap {
            gateway: self.gateway,
            keyring: self.keyring,
            fees,
            confidence,
            tx_info: self.tx_info,
            withdraw_detector: self.withdraw_detector,
            network: self.network,
            settle_delay: self.settle_delay,
            tx_hook: self.tx_hook,
        })
    }
}

/// Which branch of the HTLC a spend takes.
#[derive(Clone, Copy)]
enum SpendPath<'a> {
    Withdraw { secret: &'a Secret },
    Refund { filler: &'a RefundFiller },
}

impl BitcoinSwap {
    /// Fee for a swap transaction touching `address`. Funding and redeeming
    /// use the same quote parameters.
    async fn swap_fee(&self, address: &Address) -> Amount {
        self.fees
            .estimate(&FeeRequest {
                speed: FeeSpeed::Fast,
                address: Some(address.to_string()),
                method: FeeMethod::Swap,
                tx_size: None,
            })
            .await
    }

    async fn do_check_script(
        &self,
        values: &ScriptValues,
        expected: &ExpectedScript,
    ) -> Result<(), SwapError> {
        let address = values.compute_address(self.network)?;
        let unspents = self.gateway.unspents(&address).await?;

        let total = total_value(&unspents);
        let confident = total_value(&self.confidence.filter(&unspents).await);

        if expected.value > total {
            return Err(SwapError::ScriptMismatch(format!(
                "expected {} but {} holds only {}",
                expected.value, address, total
            )));
        }
        if expected.locktime > values.locktime() {
            return Err(SwapError::ScriptMismatch(format!(
                "locktime {} is earlier than the negotiated {}",
                values.locktime(),
                expected.locktime
            )));
        }
        if expected.recipient != *values.recipient() {
            return Err(SwapError::ScriptMismatch(
                "recipient public key differs from the negotiated one".to_string(),
            ));
        }
        if expected.value > confident {
            return Err(SwapError::ScriptMismatch(format!(
                "only {} of {} unspent passes the confidence threshold",
                confident, total
            )));
        }

        Ok(())
    }

    async fn do_fund(&self, values: &ScriptValues, value: Amount) -> Result<Funded, SwapError> {
        let htlc_address = values.compute_address(self.network)?;
        let owner_address = self.keyring.address();

        let unspents = self.gateway.unspents(&owner_address).await?;
        let total = total_value(&unspents);
        let fee = self.swap_fee(&owner_address).await;

        let needed = value
            .checked_add(fee)
            .ok_or_else(|| SwapError::InvariantViolated("funding amount overflow".to_string()))?;
        if total < needed {
            return Err(SwapError::InsufficientFunds {
                total,
                fee,
                requested: value,
            });
        }
        let change = total - needed;

        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: inputs_spending(&unspents, Sequence::MAX),
            output: vec![
                TxOut {
                    value,
                    script_pubkey: htlc_address.script_pubkey(),
                },
                TxOut {
                    value: change,
                    script_pubkey: owner_address.script_pubkey(),
                },
            ],
        };

        // Each input is a standard P2PKH spend from the owner's address.
        let owner_script = owner_address.script_pubkey();
        let public_key = self.keyring.public_key();
        for index in 0..tx.input.len() {
            let signature = self.sign_input(&tx, index, &owner_script)?;
            tx.input[index].script_sig = p2pkh_script_sig(&signature, &public_key)?;
        }

        let txid = tx.compute_txid();
        if let Some(hook) = &self.tx_hook {
            hook(txid);
        }

        tracing::info!(%txid, %value, address = %htlc_address, "broadcasting htlc funding transaction");
        self.broadcast(&tx).await?;

        Ok(Funded { txid, value })
    }

    async fn spend(
        &self,
        values: &ScriptValues,
        path: SpendPath<'_>,
        to: Option<Address>,
    ) -> Result<Spent, SwapError> {
        let htlc_address = values.compute_address(self.network)?;
        let destination = to.unwrap_or_else(|| self.keyring.address());

        let public_key = self.keyring.public_key();
        let expected_signer = match path {
            SpendPath::Withdraw { .. } => values.recipient(),
            SpendPath::Refund { .. } => values.owner(),
        };
        if public_key != *expected_signer {
            return Err(SwapError::InvariantViolated(
                "keyring does not hold the key for this spend path".to_string(),
            ));
        }

        let unspents = self.gateway.unspents(&htlc_address).await?;
        let total = total_value(&unspents);
        let fee = self.swap_fee(&htlc_address).await;

        if total < fee {
            if let Some(spent) = self.already_withdrawn(&htlc_address, &destination).await? {
                return Ok(spent);
            }
            if total == Amount::ZERO {
                return Err(SwapError::AddressEmpty(htlc_address));
            }
            return Err(SwapError::InsufficientFunds {
                total,
                fee,
                requested: Amount::ZERO,
            });
        }

        let lock_time = match path {
            SpendPath::Refund { .. } => LockTime::from_consensus(values.locktime()),
            SpendPath::Withdraw { .. } => LockTime::ZERO,
        };

        // 0xFFFFFFFE: final, but keeps nLockTime enforceable for the
        // timelock branch.
        let mut tx = Transaction {
            version: Version::ONE,
            lock_time,
            input: inputs_spending(&unspents, Sequence::ENABLE_LOCKTIME_NO_RBF),
            output: vec![TxOut {
                value: total - fee,
                script_pubkey: destination.script_pubkey(),
            }],
        };

        let redeem_script = values.redeem_script();
        for index in 0..tx.input.len() {
            let signature = self.sign_input(&tx, index, &redeem_script)?;
            tx.input[index].script_sig = match path {
                SpendPath::Withdraw { secret } => values.unlock_with_secret(&signature, secret)?,
                SpendPath::Refund { filler } => {
                    values.unlock_after_timeout(&signature, filler.as_bytes())?
                }
            };
        }

        let txid = tx.compute_txid();
        tracing::info!(
            %txid,
            to = %destination,
            refund = matches!(path, SpendPath::Refund { .. }),
            "broadcasting htlc spend"
        );
        self.broadcast(&tx).await?;

        // Give the backend's indexer time to catch up, then make sure the
        // transaction is actually observable.
        if let Some(source) = &self.tx_info {
            tokio::time::sleep(self.settle_delay).await;
            match source.tx_info(&txid).await {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return Err(SwapError::TxNotFound(txid)),
            }
        }

        Ok(Spent {
            txid,
            already_withdrawn: false,
        })
    }

    /// Recognizes a spend of the HTLC that already paid the caller's
    /// destination, so repeat invocations return the existing txid instead
    /// of failing.
    async fn already_withdrawn(
        &self,
        htlc_address: &Address,
        destination: &Address,
    ) -> Result<Option<Spent>, SwapError> {
        let detector = match &self.withdraw_detector {
            Some(detector) => detector,
            None => return Ok(None),
        };

        let withdraw = match detector.check_withdraw(htlc_address).await? {
            Some(withdraw) => withdraw,
            None => return Ok(None),
        };

        if !withdraw
            .address
            .eq_ignore_ascii_case(&destination.to_string())
        {
            return Ok(None);
        }

        tracing::info!(txid = %withdraw.txid, "htlc already swept to destination");
        Ok(Some(Spent {
            txid: withdraw.txid,
            already_withdrawn: true,
        }))
    }

    fn sign_input(
        &self,
        tx: &Transaction,
        index: usize,
        script: &ScriptBuf,
    ) -> Result<bitcoin::ecdsa::Signature, SwapError> {
        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(index, script, EcdsaSighashType::All.to_u32())
            .map_err(|e| SwapError::InvariantViolated(format!("sighash for input {index}: {e}")))?;

        Ok(self.keyring.sign(sighash.to_byte_array())?)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<(), SwapError> {
        match self.gateway.broadcast(serialize_hex(tx)).await {
            Ok(_) => Ok(()),
            Err(BroadcastError::NonFinal) => Err(SwapError::TimelockNotMature),
            Err(BroadcastError::Backend(inner)) => Err(SwapError::Gateway(inner)),
        }
    }
}

#[async_trait]
impl LedgerSwap for BitcoinSwap {
    type Params = ScriptValues;
    type Expected = ExpectedScript;
    type Address = Address;
    type Amount = Amount;
    type Funded = Funded;
    type Spent = Spent;

    fn create_script(&self, params: &ScriptValues) -> Result<(Vec<u8>, Address), SwapError> {
        let address = params.compute_address(self.network)?;
        Ok((params.redeem_script().into_bytes(), address))
    }

    async fn check_script(
        &self,
        params: &ScriptValues,
        expected: &ExpectedScript,
    ) -> Result<(), SwapError> {
        self.do_check_script(params, expected).await
    }

    async fn fund_script(&self, params: &ScriptValues, value: Amount) -> Result<Funded, SwapError> {
        self.do_fund(params, value).await
    }

    async fn withdraw(
        &self,
        params: &ScriptValues,
        secret: &Secret,
        to: Option<Address>,
    ) -> Result<Spent, SwapError> {
        self.spend(params, SpendPath::Withdraw { secret }, to).await
    }

    async fn refund(
        &self,
        params: &ScriptValues,
        filler: &RefundFiller,
        to: Option<Address>,
    ) -> Result<Spent, SwapError> {
        self.spend(params, SpendPath::Refund { filler }, to).await
    }

    async fn balance(&self) -> Result<Amount, SwapError> {
        Ok(self.gateway.balance(&self.keyring.address()).await?)
    }
}

fn total_value(unspents: &[Unspent]) -> Amount {
    unspents
        .iter()
        .fold(Amount::ZERO, |total, unspent| total + unspent.value)
}

fn inputs_spending(unspents: &[Unspent], sequence: Sequence) -> Vec<TxIn> {
    unspents
        .iter()
        .map(|unspent| TxIn {
            previous_output: OutPoint::new(unspent.txid, unspent.vout),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        })
        .collect()
}

fn p2pkh_script_sig(
    signature: &bitcoin::ecdsa::Signature,
    public_key: &PublicKey,
) -> Result<ScriptBuf, SwapError> {
    let signature = PushBytesBuf::try_from(signature.to_vec())
        .map_err(|e| SwapError::InvariantViolated(format!("oversized signature: {}", e)))?;

    Ok(bitcoin::script::Builder::new()
        .push_slice(signature)
        .push_slice(public_key.inner.serialize())
        .into_script())
}

impl fmt::Debug for BitcoinSwap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoinSwap")
            .field("network", &self.network)
            .field("settle_delay", &self.settle_delay)
            .field("tx_info", &self.tx_info.as_ref().map(|_| ".."))
            .field(
                "withdraw_detector",
                &self.withdraw_detector.as_ref().map(|_| ".."),
            )
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("network", &self.network)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}
