use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_std::task::sleep;
use backoff::{future::retry, ExponentialBackoff};
use db::providers::sync::{
    delete_streaming_error, delete_sync_error, list_sync_errors, save_cursor, save_sync_error,
};
use db::types::{BlockEnvelope, HeightRange, Source};
use db::{NewSyncError, NewSyncStatus, SyncErrorModel};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use tracing::{error, info, warn};

use crate::bus::PublishBatch;
use crate::error::IndexerError;
use crate::indexer::IndexerContext;
use crate::materialise::materialise;

const MAX_FETCH_ATTEMPTS: u32 = 8;

fn fetch_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        multiplier: 2.0,
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Inclusive chunks of at most `step` heights.
pub(crate) fn split_range(range: HeightRange, step: i64) -> Vec<HeightRange> {
    let step = step.max(1);
    let mut chunks = Vec::new();
    let mut lo = range.from_height;
    while lo <= range.to_height {
        let hi = (lo + step - 1).min(range.to_height);
        chunks.push(HeightRange {
            from_height: lo,
            to_height: hi,
        });
        lo = hi + 1;
    }
    chunks
}

/// A chunk already covered by a recorded sync error belongs to the retry
/// sweep, not the tick loop.
fn already_attempted(errors: &[SyncErrorModel], chain_id: i64, range: HeightRange) -> bool {
    errors.iter().any(|e| {
        e.chain_id == chain_id
            && e.from_height <= range.from_height
            && range.to_height <= e.to_height
    })
}

/// Tick every `sleep_interval_ms`: read the cut, fan out per chain, repair
/// the lowest missing ranges below each tip.
pub async fn run_gap_filler(ctx: Arc<IndexerContext>) {
    info!("gap filler started");
    loop {
        if ctx.shutdown.is_set() {
            break;
        }
        match ctx.node.current_cut().await {
            Err(e) => warn!("cut unavailable: {}", e),
            Ok(cut) => {
                let mut tasks = Vec::new();
                for chain_id in 0..ctx.config.chain_count {
                    let tip = match cut.tip_height(chain_id) {
                        Some(tip) => tip,
                        None => continue,
                    };
                    let ctx = ctx.clone();
                    tasks.push(tokio::spawn(async move {
                        if let Err(e) = fill_chain(&ctx, chain_id, tip).await {
                            error!(chain_id, "gap fill failed: {}", e);
                        }
                    }));
                }
                for task in tasks {
                    let _ = task.await;
                }
            }
        }
        sleep(Duration::from_millis(ctx.config.sleep_interval_ms)).await;
    }
    info!("gap filler stopped");
}

async fn fill_chain(ctx: &IndexerContext, chain_id: i64, tip: i64) -> Result<(), IndexerError> {
    let ranges = ctx
        .provider
        .next_missing_ranges(
            chain_id,
            ctx.config.min_height,
            tip,
            ctx.config.gap_range_limit,
        )
        .await?;
    if ranges.is_empty() {
        return Ok(());
    }

    let attempted = {
        let mut conn = ctx.provider.conn().await?;
        list_sync_errors(&mut conn, &ctx.config.network).await?
    };

    for range in ranges {
        if ctx.shutdown.is_set() {
            break;
        }
        for chunk in split_range(range, ctx.config.fetch_interval_in_blocks) {
            if already_attempted(&attempted, chain_id, chunk) {
                continue;
            }
            let outcome = match fetch_with_retry(ctx, chain_id, chunk).await {
                Ok(envelopes) => persist_chunk(ctx, chain_id, chunk, envelopes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                error!(
                    chain_id,
                    from = chunk.from_height,
                    to = chunk.to_height,
                    "chunk not indexed: {}",
                    e
                );
                let mut conn = ctx.provider.conn().await?;
                save_sync_error(
                    &mut conn,
                    &NewSyncError {
                        network: ctx.config.network.clone(),
                        chain_id,
                        from_height: chunk.from_height,
                        to_height: chunk.to_height,
                        source: Source::Api.to_string(),
                    },
                )
                .await?;
            }
        }
    }
    Ok(())
}

async fn fetch_with_retry(
    ctx: &IndexerContext,
    chain_id: i64,
    range: HeightRange,
) -> Result<Vec<BlockEnvelope>, IndexerError> {
    let attempts = AtomicU32::new(0);
    retry(fetch_backoff(), || async {
        match ctx
            .node
            .fetch_range(chain_id, range.from_height, range.to_height)
            .await
        {
            Ok(envelopes) => Ok(envelopes),
            Err(e) => {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    chain_id,
                    from = range.from_height,
                    to = range.to_height,
                    attempt,
                    "range fetch failed: {}",
                    e
                );
                if attempt >= MAX_FETCH_ATTEMPTS {
                    Err(backoff::Error::permanent(e))
                } else {
                    Err(backoff::Error::transient(e))
                }
            }
        }
    })
    .await
}

/// Persist one fetched chunk atomically with its cursor, then publish. A
/// repaired block also clears any streaming-error marker left for it.
async fn persist_chunk(
    ctx: &IndexerContext,
    chain_id: i64,
    range: HeightRange,
    envelopes: Vec<BlockEnvelope>,
) -> Result<(), IndexerError> {
    if envelopes.is_empty() {
        return Ok(());
    }
    let network = ctx.config.network.clone();
    let cursor = NewSyncStatus {
        network: network.clone(),
        chain_id,
        prefix: String::new(),
        source: Source::Api.to_string(),
        key: None,
        from_height: Some(range.from_height),
        to_height: Some(range.to_height),
    };

    let mut conn = ctx.provider.conn().await?;
    let batch = conn
        .transaction::<PublishBatch, IndexerError, _>(|conn| {
            async move {
                let mut batch = PublishBatch::new();
                for envelope in &envelopes {
                    batch.append(materialise(conn, &network, Source::Api, envelope).await?);
                    delete_streaming_error(conn, &envelope.header.hash, envelope.header.chain_id)
                        .await?;
                }
                save_cursor(conn, &cursor).await?;
                Ok(batch)
            }
            .scope_boxed()
        })
        .await?;

    info!(
        chain_id,
        from = range.from_height,
        to = range.to_height,
        published = batch.len(),
        "gap chunk committed"
    );
    ctx.bus.publish(batch);
    Ok(())
}

/// Periodic re-run of ranges whose retries were exhausted; a success deletes
/// the error row.
pub async fn run_retry_sweep(ctx: Arc<IndexerContext>) {
    loop {
        if ctx.shutdown.is_set() {
            break;
        }
        if let Err(e) = start_retry_errors(&ctx).await {
            error!("retry sweep failed: {}", e);
        }
        sleep(Duration::from_millis(ctx.config.retry_sweep_interval_ms)).await;
    }
}

pub async fn start_retry_errors(ctx: &IndexerContext) -> Result<(), IndexerError> {
    let errors = {
        let mut conn = ctx.provider.conn().await?;
        list_sync_errors(&mut conn, &ctx.config.network).await?
    };

    for sync_error in errors {
        if ctx.shutdown.is_set() {
            break;
        }
        let range = HeightRange {
            from_height: sync_error.from_height,
            to_height: sync_error.to_height,
        };
        match ctx
            .node
            .fetch_range(sync_error.chain_id, range.from_height, range.to_height)
            .await
        {
            Ok(envelopes) => {
                persist_chunk(ctx, sync_error.chain_id, range, envelopes).await?;
                let mut conn = ctx.provider.conn().await?;
                delete_sync_error(&mut conn, sync_error.id).await?;
                info!(
                    chain_id = sync_error.chain_id,
                    from = range.from_height,
                    to = range.to_height,
                    "exhausted range recovered"
                );
            }
            Err(e) => warn!(
                chain_id = sync_error.chain_id,
                from = range.from_height,
                to = range.to_height,
                "retry still failing: {}",
                e
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn ranges_split_into_bounded_chunks() {
        let chunks = split_range(
            HeightRange {
                from_height: 100,
                to_height: 350,
            },
            100,
        );
        assert_eq!(
            chunks,
            vec![
                HeightRange { from_height: 100, to_height: 199 },
                HeightRange { from_height: 200, to_height: 299 },
                HeightRange { from_height: 300, to_height: 350 },
            ]
        );
    }

    #[test]
    fn single_height_range_is_one_chunk() {
        let chunks = split_range(
            HeightRange {
                from_height: 102,
                to_height: 102,
            },
            100,
        );
        assert_eq!(
            chunks,
            vec![HeightRange { from_height: 102, to_height: 102 }]
        );
    }

    #[test]
    fn inverted_range_yields_no_chunks() {
        let chunks = split_range(
            HeightRange {
                from_height: 10,
                to_height: 9,
            },
            100,
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn attempted_ranges_are_left_to_the_sweep() {
        let errors = vec![SyncErrorModel {
            id: 1,
            network: "mainnet01".to_string(),
            chain_id: 3,
            from_height: 200,
            to_height: 210,
            source: "api".to_string(),
            created_at: Utc::now(),
        }];
        let inside = HeightRange {
            from_height: 200,
            to_height: 210,
        };
        let outside = HeightRange {
            from_height: 211,
            to_height: 220,
        };
        assert!(already_attempted(&errors, 3, inside));
        assert!(!already_attempted(&errors, 3, outside));
        assert!(!already_attempted(&errors, 4, inside));
    }
}
