use crate::gateway::{
    BroadcastError, ChainGateway, DetectWithdraw, EstimateFee, FeeMethod, FeeRequest, FeeSpeed,
    FetchTxInfo, TxInfo, Unspent, WithdrawTx,
};
use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{Address, Amount, Txid};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Virtual sizes assumed when the caller does not supply one. Swap spends
/// carry a redeem script and a preimage, plain payments do not.
const SWAP_TX_SIZE: u32 = 400;
const PAYMENT_TX_SIZE: u32 = 226;

/// HTTP client for an insight-style block explorer API.
///
/// Implements every gateway capability, so one instance can back a fully
/// featured engine. Endpoints follow the insight REST layout:
/// `addr/{a}/balance`, `addr/{a}/utxo`, `tx/send`, `tx/{txid}`,
/// `txs/?address={a}` and `utils/estimatefee`.
#[derive(Debug, Clone)]
pub struct InsightClient {
    base: Url,
    client: reqwest::Client,
}

impl InsightClient {
    pub fn new(base: Url) -> Self {
        InsightClient {
            base,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("malformed explorer endpoint {}", path))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct UtxoResponse {
    txid: Txid,
    vout: u32,
    satoshis: u64,
    #[serde(default)]
    confirmations: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    txid: Txid,
    /// Fee in decimal BTC, as insight reports it.
    #[serde(default)]
    fees: Option<f64>,
    #[serde(default)]
    size: Option<u32>,
    #[serde(default)]
    confirmations: u32,
    #[serde(default)]
    vin: Vec<TxInput>,
    #[serde(default)]
    vout: Vec<TxOutput>,
}

#[derive(Debug, Deserialize)]
struct TxInput {
    #[serde(default)]
    addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxOutput {
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: Option<ScriptPubKey>,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptPubKey {
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddressTxsResponse {
    #[serde(default)]
    txs: Vec<TxResponse>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    txid: Txid,
}

#[derive(Debug, serde::Serialize)]
struct BroadcastRequest<'a> {
    rawtx: &'a str,
}

impl TxResponse {
    fn into_tx_info(self) -> anyhow::Result<TxInfo> {
        let fees = match self.fees {
            Some(btc) => Some(Amount::from_btc(btc).context("negative fee in tx info")?),
            None => None,
        };

        Ok(TxInfo {
            txid: self.txid,
            sender: self.vin.into_iter().next().and_then(|input| input.addr),
            fees,
            size: self.size,
            confirmations: self.confirmations,
        })
    }

    fn spends_from(&self, address: &str) -> bool {
        self.vin
            .iter()
            .any(|input| input.addr.as_deref() == Some(address))
    }

    fn first_output_address(&self) -> Option<String> {
        self.vout
            .iter()
            .filter_map(|output| output.script_pub_key.as_ref())
            .flat_map(|script| script.addresses.iter())
            .next()
            .cloned()
    }
}

#[async_trait]
impl ChainGateway for InsightClient {
    async fn balance(&self, address: &Address) -> anyhow::Result<Amount> {
        let satoshis: u64 = self.get_json(&format!("addr/{}/balance", address)).await?;
        Ok(Amount::from_sat(satoshis))
    }

    async fn unspents(&self, address: &Address) -> anyhow::Result<Vec<Unspent>> {
        let utxos: Vec<UtxoResponse> = self.get_json(&format!("addr/{}/utxo", address)).await?;

        Ok(utxos
            .into_iter()
            .map(|utxo| Unspent {
                txid: utxo.txid,
                vout: utxo.vout,
                value: Amount::from_sat(utxo.satoshis),
                confirmations: utxo.confirmations,
            })
            .collect())
    }

    async fn broadcast(&self, tx_hex: String) -> Result<Txid, BroadcastError> {
        let url = self.endpoint("tx/send")?;
        let response = self
            .client
            .post(url)
            .json(&BroadcastRequest { rawtx: &tx_hex })
            .send()
            .await
            .context("broadcast request failed")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_non_final(&body) {
                return Err(BroadcastError::NonFinal);
            }
            return Err(anyhow::anyhow!("broadcast rejected: {}", body).into());
        }

        let BroadcastResponse { txid } = response
            .json()
            .await
            .context("malformed broadcast response")?;

        Ok(txid)
    }
}

#[async_trait]
impl FetchTxInfo for InsightClient {
    async fn tx_info(&self, txid: &Txid) -> anyhow::Result<Option<TxInfo>> {
        let url = self.endpoint(&format!("tx/{}", txid))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("tx info request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let tx: TxResponse = response.error_for_status()?.json().await?;
        Ok(Some(tx.into_tx_info()?))
    }
}

#[async_trait]
impl EstimateFee for InsightClient {
    async fn estimate(&self, request: &FeeRequest) -> anyhow::Result<Amount> {
        let blocks = blocks_for(request.speed);
        let rates: HashMap<String, f64> = self
            .get_json(&format!("utils/estimatefee?nbBlocks={}", blocks))
            .await?;

        let btc_per_kb = rates
            .get(&blocks.to_string())
            .copied()
            .context("estimate missing from response")?;
        anyhow::ensure!(btc_per_kb > 0.0, "backend has no estimate yet");

        let size = request.tx_size.unwrap_or(match request.method {
            FeeMethod::Swap => SWAP_TX_SIZE,
            FeeMethod::Payment => PAYMENT_TX_SIZE,
        });

        Ok(flat_fee(Amount::from_btc(btc_per_kb)?, size))
    }
}

#[async_trait]
impl DetectWithdraw for InsightClient {
    async fn check_withdraw(&self, address: &Address) -> anyhow::Result<Option<WithdrawTx>> {
        let history: AddressTxsResponse =
            self.get_json(&format!("txs/?address={}", address)).await?;

        let watched = address.to_string();
        let spend = history
            .txs
            .into_iter()
            .find(|tx| tx.spends_from(&watched));

        Ok(spend.and_then(|tx| {
            tx.first_output_address().map(|destination| WithdrawTx {
                address: destination,
                txid: tx.txid,
            })
        }))
    }
}

fn blocks_for(speed: FeeSpeed) -> u32 {
    match speed {
        FeeSpeed::Fast => 2,
        FeeSpeed::Normal => 6,
        FeeSpeed::Slow => 12,
    }
}

/// Turns a per-kilobyte rate into the flat fee for a transaction of `size`
/// vbytes, never dropping under the dust floor relays enforce.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn flat_fee(rate_per_kb: Amount, size: u32) -> Amount {
    #[allow(clippy::cast_precision_loss)]
    let fee = (rate_per_kb.to_sat() as f64 * f64::from(size) / 1024.0).ceil() as u64;
    Amount::from_sat(fee.max(crate::fee::FALLBACK_FEE.to_sat()))
}

fn is_non_final(body: &str) -> bool {
    body.contains("non-final") || body.contains("non-BIP68-final")
}
