//! Blockfrost adapter

use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use scrolls_codec::value::CborValue;
use scrolls_network::miniprotocols::Point;

use crate::error::Error;

const BLOCKFROST_MAINNET: &str = "https://cardano-mainnet.blockfrost.io/api/v0";

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct BlockfrostClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl BlockfrostClient {
    pub fn new(project_id: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url: BLOCKFROST_MAINNET.to_string(),
            project_id,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get(&self, path: &str) -> Result<Value, Error> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "blockfrost request");

        let response = self
            .http
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found(format!("blockfrost resource {path}")));
        }

        Ok(response.error_for_status()?.json().await?)
    }

    pub async fn resolve_tx_point(&self, tx_hash: &str) -> Result<Point, Error> {
        let tx = self.get(&format!("/txs/{tx_hash}")).await?;

        let slot = tx
            .get("slot")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::malformed("blockfrost tx", "slot missing"))?;

        let block_hash = tx
            .get("block")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("blockfrost tx", "block hash missing"))?;

        let hash = hex::decode(block_hash)
            .map_err(|_| Error::malformed("blockfrost tx", "block hash is not hex"))?;

        Ok(Point::Specific(slot, hash))
    }

    pub async fn metadata_721(&self, tx_hash: &str) -> Result<Option<CborValue>, Error> {
        let rows = self.get(&format!("/txs/{tx_hash}/metadata")).await?;

        let rows = rows
            .as_array()
            .ok_or_else(|| Error::malformed("blockfrost metadata", "expected an array"))?;

        for row in rows {
            let label = row.get("label").and_then(Value::as_str);
            if label == Some("721") {
                return Ok(row.get("json_metadata").map(CborValue::from_json));
            }
        }

        Ok(None)
    }

    pub async fn policy_mint_txs(&self, policy_id: &str) -> Result<Vec<String>, Error> {
        let assets = self.get(&format!("/assets/policy/{policy_id}")).await?;

        let assets = assets
            .as_array()
            .ok_or_else(|| Error::malformed("blockfrost assets", "expected an array"))?;

        let mut txs: BTreeSet<String> = BTreeSet::new();

        for row in assets {
            let unit = match row.get("asset").and_then(Value::as_str) {
                Some(unit) => unit,
                None => continue,
            };

            let info = self.get(&format!("/assets/{unit}")).await?;

            if let Some(mint_tx) = info.get("initial_mint_tx_hash").and_then(Value::as_str) {
                txs.insert(mint_tx.to_string());
            }
        }

        Ok(txs.into_iter().collect())
    }

    pub async fn output_inline_datum(&self, tx_hash: &str, tx_ix: u64) -> Result<Vec<u8>, Error> {
        let utxos = self.get(&format!("/txs/{tx_hash}/utxos")).await?;

        let outputs = utxos
            .get("outputs")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::malformed("blockfrost utxos", "outputs missing"))?;

        let output = outputs
            .get(tx_ix as usize)
            .ok_or_else(|| Error::not_found(format!("output index {tx_ix} in transaction")))?;

        if let Some(inline) = output.get("inline_datum").and_then(Value::as_str) {
            return hex::decode(inline)
                .map_err(|_| Error::malformed("blockfrost utxos", "inline_datum is not hex"));
        }

        // older deployments expose only the datum hash
        let datum_hash = output
            .get("data_hash")
            .or_else(|| output.get("datum_hash"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::not_found("inline datum on the selected output"))?;

        let datum = self
            .get(&format!("/scripts/datum/{datum_hash}/cbor"))
            .await?;

        let cbor_hex = datum
            .get("cbor")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("blockfrost datum", "cbor missing"))?;

        hex::decode(cbor_hex)
            .map_err(|_| Error::malformed("blockfrost datum", "cbor is not hex"))
    }
}
