use std::sync::Arc;

use db::provider::InternalDataProvider;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::archive::backfill_chain;
use crate::bus::{Bus, SubscriptionFilter};
use crate::config::IndexerConfig;
use crate::gaps::{run_gap_filler, run_retry_sweep};
use crate::node::NodeClient;
use crate::store::ArchiveStore;
use crate::stream::run_streamer;

/// Process-wide shutdown flag. Daemons poll it at tick boundaries; in-flight
/// work is allowed to finish.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Everything the pipelines share: one pool, one node client, one bus, one
/// shutdown flag.
pub struct IndexerContext {
    pub config: IndexerConfig,
    pub provider: InternalDataProvider,
    pub node: NodeClient,
    pub bus: Bus,
    pub shutdown: Shutdown,
}

pub struct Indexer {
    ctx: Arc<IndexerContext>,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        provider: InternalDataProvider,
        shutdown: Shutdown,
    ) -> Self {
        let node = NodeClient::new(
            config.base_url.clone(),
            config.network.clone(),
            config.node_concurrency,
        );
        let ctx = IndexerContext {
            config,
            provider,
            node,
            bus: Bus::new(),
            shutdown,
        };
        Indexer { ctx: Arc::new(ctx) }
    }

    /// Launch the four pipelines plus the optional publish-hook forwarder.
    pub async fn run(&self) {
        let ctx = self.ctx.clone();

        if let Some(bucket) = ctx.config.archive_bucket.clone() {
            match ArchiveStore::from_env(&bucket) {
                Ok(store) => {
                    for chain_id in 0..ctx.config.chain_count {
                        let ctx = ctx.clone();
                        let store = store.clone();
                        tokio::spawn(async move {
                            if let Err(e) = backfill_chain(&ctx, &store, chain_id).await {
                                error!(chain_id, "archive backfill failed: {}", e);
                            }
                        });
                    }
                }
                Err(e) => error!("archive store unavailable: {}", e),
            }
        } else {
            info!("no archive bucket configured, skipping backfill");
        }

        tokio::spawn(run_streamer(ctx.clone()));
        tokio::spawn(run_gap_filler(ctx.clone()));
        tokio::spawn(run_retry_sweep(ctx.clone()));

        if let Some(hook_url) = ctx.config.publish_hook_url.clone() {
            tokio::spawn(run_hook_forwarder(ctx.clone(), hook_url));
        }
    }
}

/// Forward committed dispatch records to the API server's ingest hook. The
/// receiver enforces its own allow-list; rejections are logged and dropped,
/// never retried.
async fn run_hook_forwarder(ctx: Arc<IndexerContext>, hook_url: String) {
    let client = reqwest::Client::new();
    let url = format!("{}/new-block", hook_url.trim_end_matches('/'));
    let mut updates = ctx.bus.subscribe(SubscriptionFilter::NewBlocks);

    while let Some(info) = updates.recv().await {
        if ctx.shutdown.is_set() {
            break;
        }
        match client.post(&url).json(&info).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    status = %response.status(),
                    hash = %info.hash,
                    "publish hook rejected dispatch"
                );
            }
            Err(e) => warn!(hash = %info.hash, "publish hook unreachable: {}", e),
            Ok(_) => {}
        }
    }
}
