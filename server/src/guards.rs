use std::sync::Arc;
use std::time::Duration;

use async_std::task::sleep;
use db::providers::provider::{balances_after, insert_guards, truncate_guards};
use db::NewGuard;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use futures::{stream, StreamExt};
use serde_json::json;
use tracing::{error, info};

use crate::error::IndexerError;
use crate::indexer::IndexerContext;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(3600);

/// Guards are rebuilt wholesale: once at startup, then hourly.
pub async fn run_guards_schedule(ctx: Arc<IndexerContext>) {
    loop {
        if ctx.shutdown.is_set() {
            break;
        }
        match reconcile_guards(&ctx).await {
            Ok(count) => info!(count, "guards reconciled"),
            Err(e) => error!("guards reconciliation aborted: {}", e),
        }
        sleep(RECONCILE_INTERVAL).await;
    }
}

/// Truncate and repopulate the guard snapshots from the balance ledger. One
/// transaction per 1000-row batch; a failed batch aborts the cycle and the
/// next run starts over.
pub async fn reconcile_guards(ctx: &IndexerContext) -> Result<usize, IndexerError> {
    {
        let mut conn = ctx.provider.conn().await?;
        truncate_guards(&mut conn).await?;
    }

    let mut total = 0;
    let mut after_id = 0;
    loop {
        if ctx.shutdown.is_set() {
            break;
        }
        let page = {
            let mut conn = ctx.provider.conn().await?;
            balances_after(&mut conn, after_id, ctx.config.guards_batch_size).await?
        };
        let last_id = match page.last() {
            Some(balance) => balance.id,
            None => break,
        };

        let lookups: Vec<Result<Option<NewGuard>, IndexerError>> = stream::iter(page)
            .map(|balance| {
                let node = &ctx.node;
                async move {
                    let guard = node
                        .account_guard(balance.chain_id, &balance.module, &balance.account)
                        .await?;
                    Ok(guard.map(|guard| NewGuard {
                        account: balance.account,
                        chain_id: balance.chain_id,
                        module: balance.module,
                        keys: json!(guard.keys),
                        predicate: guard.pred,
                    }))
                }
            })
            .buffer_unordered(ctx.config.guards_concurrency)
            .collect()
            .await;

        let mut rows = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            if let Some(row) = lookup? {
                rows.push(row);
            }
        }

        let mut conn = ctx.provider.conn().await?;
        let inserted = conn
            .transaction::<usize, IndexerError, _>(|conn| {
                async move { Ok(insert_guards(conn, &rows).await?) }.scope_boxed()
            })
            .await?;

        total += inserted;
        after_id = last_id;
    }
    Ok(total)
}
