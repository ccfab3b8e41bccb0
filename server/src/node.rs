use std::collections::BTreeMap;
use std::sync::Arc;

use db::types::{BlockEnvelope, BlockHeader, PayloadWithOutputs};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::error::IndexerError;

const HEADER_OBJECT_ENCODING: &str = "application/json;blockheader-encoding=object";

/// One tip hash/height per chain, a consistent snapshot of the frontier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cut {
    pub hashes: BTreeMap<String, CutEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CutEntry {
    pub hash: String,
    pub height: i64,
}

impl Cut {
    pub fn tip_height(&self, chain_id: i64) -> Option<i64> {
        self.hashes.get(&chain_id.to_string()).map(|e| e.height)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct HeaderPage {
    #[serde(default)]
    items: Vec<BlockHeader>,
}

/// Guard snapshot as returned by a pact local lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardPayload {
    #[serde(default)]
    pub keys: Vec<String>,
    pub pred: String,
}

/// Shared chainweb node client. All requests across all pipelines go through
/// one 50-permit semaphore.
pub struct NodeClient {
    client: Client,
    base_url: String,
    network: String,
    permits: Arc<Semaphore>,
}

impl NodeClient {
    pub fn new(base_url: String, network: String, concurrency: usize) -> Self {
        NodeClient {
            client: Client::new(),
            base_url,
            network,
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    fn api(&self, suffix: &str) -> String {
        format!(
            "{}/chainweb/0.0/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.network,
            suffix
        )
    }

    pub fn updates_url(&self) -> String {
        self.api("block/updates")
    }

    pub async fn current_cut(&self) -> Result<Cut, IndexerError> {
        let _permit = self.permits.acquire().await;
        let cut = self
            .client
            .get(self.api("cut"))
            .send()
            .await?
            .error_for_status()?
            .json::<Cut>()
            .await?;
        Ok(cut)
    }

    pub async fn branch_headers(
        &self,
        chain_id: i64,
        min_height: i64,
        max_height: i64,
    ) -> Result<Vec<BlockHeader>, IndexerError> {
        let _permit = self.permits.acquire().await;
        let url = self.api(&format!("chain/{}/header/branch", chain_id));
        let page = self
            .client
            .get(url)
            .header(ACCEPT, HEADER_OBJECT_ENCODING)
            .query(&[("minheight", min_height), ("maxheight", max_height)])
            .send()
            .await?
            .error_for_status()?
            .json::<HeaderPage>()
            .await?;
        Ok(page.items)
    }

    pub async fn payload_outputs(
        &self,
        chain_id: i64,
        payload_hash: &str,
    ) -> Result<PayloadWithOutputs, IndexerError> {
        let _permit = self.permits.acquire().await;
        let url = self.api(&format!("chain/{}/payload/{}/outputs", chain_id, payload_hash));
        let payload = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<PayloadWithOutputs>()
            .await?;
        Ok(payload)
    }

    /// Fetch an inclusive height range as full envelopes: branch headers
    /// first, then one payload request per header.
    pub async fn fetch_range(
        &self,
        chain_id: i64,
        from_height: i64,
        to_height: i64,
    ) -> Result<Vec<BlockEnvelope>, IndexerError> {
        let headers = self
            .branch_headers(chain_id, from_height, to_height)
            .await?;
        let mut envelopes = Vec::with_capacity(headers.len());
        for header in headers {
            let payload = self
                .payload_outputs(chain_id, &header.payload_hash)
                .await?;
            envelopes.push(BlockEnvelope {
                header,
                payload_with_outputs: payload,
            });
        }
        Ok(envelopes)
    }

    /// Execute a read-only pact expression on one chain.
    pub async fn pact_local(&self, chain_id: i64, code: &str) -> Result<Value, IndexerError> {
        let _permit = self.permits.acquire().await;
        let cmd = json!({
            "networkId": self.network,
            "payload": {"exec": {"code": code, "data": {}}},
            "signers": [],
            "meta": {
                "chainId": chain_id.to_string(),
                "sender": "indexer",
                "gasLimit": 10000,
                "gasPrice": 1.0e-8,
                "ttl": 300,
                "creationTime": 0
            },
            "nonce": "indexer-local"
        });
        let body = json!({
            "hash": "",
            "sigs": [],
            "cmd": cmd.to_string(),
        });
        let url = self.api(&format!("chain/{}/pact/api/v1/local", chain_id));
        let result = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(result)
    }

    /// Current guard for an account under one token module, read via
    /// `{module}.details`.
    pub async fn account_guard(
        &self,
        chain_id: i64,
        module: &str,
        account: &str,
    ) -> Result<Option<GuardPayload>, IndexerError> {
        let code = format!("({}.details \"{}\")", module, account.replace('"', "\\\""));
        let response = self.pact_local(chain_id, &code).await?;
        let data = &response["result"]["data"]["guard"];
        if data.is_null() {
            return Ok(None);
        }
        Ok(serde_json::from_value(data.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_indexes_tips_by_chain() {
        let cut: Cut = serde_json::from_value(json!({
            "hashes": {
                "0": {"hash": "h0", "height": 4000000},
                "3": {"hash": "h3", "height": 4000002}
            }
        }))
        .unwrap();
        assert_eq!(cut.tip_height(0), Some(4_000_000));
        assert_eq!(cut.tip_height(3), Some(4_000_002));
        assert_eq!(cut.tip_height(7), None);
    }

    #[test]
    fn guard_payload_parses_from_local_result() {
        let guard: GuardPayload = serde_json::from_value(json!({
            "keys": ["aabb"], "pred": "keys-all"
        }))
        .unwrap();
        assert_eq!(guard.keys, vec!["aabb"]);
        assert_eq!(guard.pred, "keys-all");
    }
}
