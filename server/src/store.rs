use std::sync::Arc;

use db::types::BlockEnvelope;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::DynObjectStore;

use crate::error::IndexerError;

/// Read side of the historical archive. Listing order follows the store's
/// lexicographic key order, which is what the cursor contract relies on.
#[derive(Clone)]
pub struct ArchiveStore {
    store: Arc<DynObjectStore>,
}

impl ArchiveStore {
    pub fn new(store: Arc<DynObjectStore>) -> Self {
        ArchiveStore { store }
    }

    /// Credentials and region come from the standard AWS environment names.
    pub fn from_env(bucket: &str) -> Result<Self, IndexerError> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(ArchiveStore {
            store: Arc::new(store),
        })
    }

    /// Up to `max_keys` keys under `prefix`, strictly after `start_after`.
    pub async fn list_page(
        &self,
        prefix: &str,
        max_keys: usize,
        start_after: Option<&str>,
    ) -> Result<Vec<String>, IndexerError> {
        let prefix = Path::from(prefix);
        let mut listing = match start_after {
            Some(offset) => self
                .store
                .list_with_offset(Some(&prefix), &Path::from(offset)),
            None => self.store.list(Some(&prefix)),
        };

        let mut keys = Vec::with_capacity(max_keys);
        while let Some(meta) = listing.next().await {
            keys.push(meta?.location.to_string());
            if keys.len() >= max_keys {
                break;
            }
        }
        Ok(keys)
    }

    pub async fn get_envelope(&self, key: &str) -> Result<BlockEnvelope, IndexerError> {
        let bytes = self.store.get(&Path::from(key)).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::ObjectStore;
    use serde_json::json;

    async fn seeded_store(keys: &[&str]) -> ArchiveStore {
        let memory = InMemory::new();
        for key in keys {
            memory
                .put(&Path::from(*key), bytes::Bytes::from_static(b"{}"))
                .await
                .unwrap();
        }
        ArchiveStore::new(Arc::new(memory))
    }

    #[tokio::test]
    async fn pages_are_bounded_and_lexicographic() {
        let store = seeded_store(&["headers/k1", "headers/k2", "headers/k3"]).await;
        let page = store.list_page("headers/", 2, None).await.unwrap();
        assert_eq!(page, vec!["headers/k1", "headers/k2"]);
    }

    #[tokio::test]
    async fn start_after_resumes_past_the_cursor() {
        let store = seeded_store(&["headers/k1", "headers/k2", "headers/k3"]).await;
        let page = store
            .list_page("headers/", 20, Some("headers/k2"))
            .await
            .unwrap();
        assert_eq!(page, vec!["headers/k3"]);
    }

    #[tokio::test]
    async fn exhausted_listing_returns_an_empty_page() {
        let store = seeded_store(&["headers/k1"]).await;
        let page = store
            .list_page("headers/", 20, Some("headers/k1"))
            .await
            .unwrap();
        assert!(page.is_empty());

        let other_prefix = store.list_page("payloads/", 20, None).await.unwrap();
        assert!(other_prefix.is_empty());
    }

    #[tokio::test]
    async fn envelopes_round_trip_through_the_store() {
        let memory = InMemory::new();
        let envelope = json!({
            "header": {
                "chainId": 2, "height": 77, "hash": "h77", "parent": "h76",
                "creationTime": "1718000000", "epochStart": "1718000000",
                "featureFlags": 0, "nonce": "0", "payloadHash": "ph",
                "target": "AA", "weight": "AA", "adjacents": {}
            },
            "payloadWithOutputs": {
                "minerData": "e30=", "coinbase": "e30=", "payloadHash": "ph",
                "transactionsHash": "th", "outputsHash": "oh", "transactions": []
            }
        });
        memory
            .put(
                &Path::from("headers/k1"),
                bytes::Bytes::from(serde_json::to_vec(&envelope).unwrap()),
            )
            .await
            .unwrap();
        let store = ArchiveStore::new(Arc::new(memory));
        let fetched = store.get_envelope("headers/k1").await.unwrap();
        assert_eq!(fetched.header.hash, "h77");
        assert_eq!(fetched.header.chain_id, 2);
    }
}
