use db::providers::sync::{find_last_cursor, save_cursor};
use db::types::{BlockEnvelope, Source};
use db::NewSyncStatus;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use futures::{stream, StreamExt};
use tracing::info;

use crate::bus::PublishBatch;
use crate::error::IndexerError;
use crate::indexer::IndexerContext;
use crate::materialise::materialise;
use crate::store::ArchiveStore;

pub(crate) fn chain_prefix(base: &str, chain_id: i64) -> String {
    format!("{}chain-{}/", base, chain_id)
}

/// Walk one chain's archive listing from the recorded cursor to the end.
/// Every page commits atomically: all of its blocks, then the cursor, then
/// the publish batch. A failed key fails the whole page so the cursor stays
/// strictly monotonic with no partial-page holes.
pub async fn backfill_chain(
    ctx: &IndexerContext,
    store: &ArchiveStore,
    chain_id: i64,
) -> Result<(), IndexerError> {
    let network = ctx.config.network.clone();
    let prefix = chain_prefix(&ctx.config.archive_prefix, chain_id);

    let mut start_after = {
        let mut conn = ctx.provider.conn().await?;
        find_last_cursor(&mut conn, &network, chain_id, &prefix, Source::Archive)
            .await?
            .and_then(|cursor| cursor.key)
    };

    let mut iterations: u64 = 0;
    loop {
        if ctx.shutdown.is_set() {
            break;
        }
        if let Some(max) = ctx.config.archive_max_iterations {
            if iterations >= max {
                break;
            }
        }

        let keys = store
            .list_page(&prefix, ctx.config.archive_max_keys, start_after.as_deref())
            .await?;
        let last_key = match keys.last() {
            Some(key) => key.clone(),
            None => break,
        };

        let fetched: Vec<Result<BlockEnvelope, IndexerError>> = stream::iter(keys.clone())
            .map(|key| async move { store.get_envelope(&key).await })
            .buffer_unordered(ctx.config.page_concurrency)
            .collect()
            .await;
        let mut envelopes = Vec::with_capacity(fetched.len());
        for result in fetched {
            envelopes.push(result?);
        }

        // The key drives resumption; the height span makes archive progress
        // visible next to the height-based sources.
        let cursor = NewSyncStatus {
            network: network.clone(),
            chain_id,
            prefix: prefix.clone(),
            source: Source::Archive.to_string(),
            key: Some(last_key.clone()),
            from_height: envelopes.iter().map(|e| e.header.height).min(),
            to_height: envelopes.iter().map(|e| e.header.height).max(),
        };

        let network_tx = network.clone();
        let mut conn = ctx.provider.conn().await?;
        let batch = conn
            .transaction::<PublishBatch, IndexerError, _>(|conn| {
                async move {
                    let mut batch = PublishBatch::new();
                    for envelope in &envelopes {
                        batch
                            .append(materialise(conn, &network_tx, Source::Archive, envelope).await?);
                    }
                    save_cursor(conn, &cursor).await?;
                    Ok(batch)
                }
                .scope_boxed()
            })
            .await?;

        info!(
            chain_id,
            page = keys.len(),
            published = batch.len(),
            cursor = %last_key,
            "archive page committed"
        );
        ctx.bus.publish(batch);
        start_after = Some(last_key);
        iterations += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_prefixes_nest_under_the_base() {
        assert_eq!(chain_prefix("headers/", 0), "headers/chain-0/");
        assert_eq!(chain_prefix("headers/", 19), "headers/chain-19/");
    }
}
