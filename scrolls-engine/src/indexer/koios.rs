//! Koios adapter

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use scrolls_codec::value::CborValue;
use scrolls_network::miniprotocols::Point;

use crate::error::Error;

const KOIOS_MAINNET: &str = "https://api.koios.rest/api/v1";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KoiosClient {
    http: reqwest::Client,
    base_url: String,
}

impl KoiosClient {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url: base_url.unwrap_or(KOIOS_MAINNET).trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value, Error> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%url, "koios request");

        Ok(self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value, Error> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%url, "koios request");

        Ok(self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn resolve_tx_point(&self, tx_hash: &str) -> Result<Point, Error> {
        let rows = self
            .post("tx_info", json!({ "_tx_hashes": [tx_hash] }))
            .await?;

        let row = rows
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| Error::not_found(format!("transaction {tx_hash} on koios")))?;

        let slot = row
            .get("absolute_slot")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::malformed("koios tx_info", "absolute_slot missing"))?;

        let block_hash = row
            .get("block_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("koios tx_info", "block_hash missing"))?;

        let hash = hex::decode(block_hash)
            .map_err(|_| Error::malformed("koios tx_info", "block_hash is not hex"))?;

        Ok(Point::Specific(slot, hash))
    }

    pub async fn metadata_721(&self, tx_hash: &str) -> Result<Option<CborValue>, Error> {
        let rows = self
            .post("tx_metadata", json!({ "_tx_hashes": [tx_hash] }))
            .await?;

        let metadata = rows
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("metadata"));

        let label_721 = metadata.and_then(|m| m.get("721"));

        Ok(label_721.map(CborValue::from_json))
    }

    pub async fn policy_mint_txs(&self, policy_id: &str) -> Result<Vec<String>, Error> {
        let assets = self
            .get(&format!("policy_asset_list?_asset_policy={policy_id}"))
            .await?;

        let assets = assets
            .as_array()
            .ok_or_else(|| Error::malformed("koios policy_asset_list", "expected an array"))?;

        let asset_list: Vec<Value> = assets
            .iter()
            .filter_map(|row| row.get("asset_name").and_then(Value::as_str))
            .map(|name| json!([policy_id, name]))
            .collect();

        if asset_list.is_empty() {
            return Ok(vec![]);
        }

        let infos = self
            .post("asset_info", json!({ "_asset_list": asset_list }))
            .await?;

        let infos = infos
            .as_array()
            .ok_or_else(|| Error::malformed("koios asset_info", "expected an array"))?;

        let mut txs: BTreeSet<String> = BTreeSet::new();

        for info in infos {
            if let Some(mint_tx) = info.get("minting_tx_hash").and_then(Value::as_str) {
                txs.insert(mint_tx.to_string());
            }
        }

        Ok(txs.into_iter().collect())
    }

    pub async fn output_inline_datum(&self, tx_hash: &str, tx_ix: u64) -> Result<Vec<u8>, Error> {
        let rows = self
            .post(
                "utxo_info",
                json!({ "_utxo_refs": [format!("{tx_hash}#{tx_ix}")], "_extended": true }),
            )
            .await?;

        let row = rows
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| Error::not_found(format!("utxo {tx_hash}#{tx_ix} on koios")))?;

        let inline = row
            .get("inline_datum")
            .and_then(|datum| datum.get("bytes"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::not_found("inline datum on the selected output"))?;

        hex::decode(inline)
            .map_err(|_| Error::malformed("koios utxo_info", "inline_datum is not hex"))
    }
}
