use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The record published to subscribers when a block lands. `hash` doubles as
/// the downstream dedup key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchInfo {
    pub hash: String,
    pub chain_id: i64,
    pub height: i64,
    pub request_keys: Vec<String>,
    pub qualified_event_names: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum SubscriptionFilter {
    NewBlocks,
    /// Deliver only once the chain tip has advanced `depth` past the block.
    NewBlocksFromDepth(i64),
    Events(HashSet<String>),
    Transaction(String),
}

impl SubscriptionFilter {
    fn matches(&self, info: &DispatchInfo) -> bool {
        match self {
            SubscriptionFilter::NewBlocks | SubscriptionFilter::NewBlocksFromDepth(_) => true,
            SubscriptionFilter::Events(names) => info
                .qualified_event_names
                .iter()
                .any(|name| names.contains(name)),
            SubscriptionFilter::Transaction(request_key) => {
                info.request_keys.iter().any(|key| key == request_key)
            }
        }
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    sender: mpsc::UnboundedSender<DispatchInfo>,
    held_back: VecDeque<DispatchInfo>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<Subscriber>,
    tips: HashMap<i64, i64>,
}

/// In-process fan-out of dispatch records. Items reach the bus only through
/// a committed [`PublishBatch`], so rolled-back work never publishes.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<Mutex<BusInner>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus::default()
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> mpsc::UnboundedReceiver<DispatchInfo> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.push(Subscriber {
            filter,
            sender,
            held_back: VecDeque::new(),
        });
        receiver
    }

    /// Fan a committed batch out to every matching subscriber, in commit
    /// order. Disconnected subscribers are dropped.
    pub fn publish(&self, batch: PublishBatch) {
        let mut inner = self.inner.lock().unwrap();
        for info in batch.items {
            let tip = inner.tips.entry(info.chain_id).or_insert(info.height);
            if info.height > *tip {
                *tip = info.height;
            }
            let tips = inner.tips.clone();
            inner.subscribers.retain_mut(|subscriber| {
                if !subscriber.filter.matches(&info) {
                    return true;
                }
                match subscriber.filter {
                    SubscriptionFilter::NewBlocksFromDepth(depth) => {
                        subscriber.held_back.push_back(info.clone());
                        drain_confirmed(subscriber, &tips, depth)
                    }
                    _ => subscriber.sender.send(info.clone()).is_ok(),
                }
            });
        }
    }
}

fn drain_confirmed(
    subscriber: &mut Subscriber,
    tips: &HashMap<i64, i64>,
    depth: i64,
) -> bool {
    while let Some(front) = subscriber.held_back.front() {
        let confirmed = tips
            .get(&front.chain_id)
            .map_or(false, |tip| *tip >= front.height + depth);
        if !confirmed {
            break;
        }
        let info = subscriber.held_back.pop_front().unwrap();
        if subscriber.sender.send(info).is_err() {
            return false;
        }
    }
    true
}

/// Dispatch records buffered against one database transaction. Hand the
/// batch to [`Bus::publish`] after commit; dropping it discards the items.
#[derive(Default)]
pub struct PublishBatch {
    items: Vec<DispatchInfo>,
}

impl PublishBatch {
    pub fn new() -> Self {
        PublishBatch::default()
    }

    pub fn append(&mut self, info: Option<DispatchInfo>) {
        if let Some(info) = info {
            self.items.push(info);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(hash: &str, chain_id: i64, height: i64) -> DispatchInfo {
        DispatchInfo {
            hash: hash.to_string(),
            chain_id,
            height,
            request_keys: vec![format!("rk-{}", hash)],
            qualified_event_names: vec!["coin.TRANSFER".to_string()],
        }
    }

    #[tokio::test]
    async fn committed_batches_reach_new_block_subscribers() {
        let bus = Bus::new();
        let mut rx = bus.subscribe(SubscriptionFilter::NewBlocks);

        let mut batch = PublishBatch::new();
        batch.append(Some(info("a", 0, 10)));
        batch.append(None);
        batch.append(Some(info("b", 0, 11)));
        assert_eq!(batch.len(), 2);
        bus.publish(batch);

        assert_eq!(rx.recv().await.unwrap().hash, "a");
        assert_eq!(rx.recv().await.unwrap().hash, "b");
    }

    #[tokio::test]
    async fn dropped_batch_publishes_nothing() {
        let bus = Bus::new();
        let mut rx = bus.subscribe(SubscriptionFilter::NewBlocks);

        let mut batch = PublishBatch::new();
        batch.append(Some(info("rolled-back", 0, 10)));
        drop(batch);

        bus.publish(PublishBatch::new());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_filter_matches_qualified_names() {
        let bus = Bus::new();
        let mut transfers = bus.subscribe(SubscriptionFilter::Events(
            ["coin.TRANSFER".to_string()].into_iter().collect(),
        ));
        let mut sales = bus.subscribe(SubscriptionFilter::Events(
            ["marmalade.SALE".to_string()].into_iter().collect(),
        ));

        let mut batch = PublishBatch::new();
        batch.append(Some(info("a", 0, 1)));
        bus.publish(batch);

        assert_eq!(transfers.recv().await.unwrap().hash, "a");
        assert!(sales.try_recv().is_err());
    }

    #[tokio::test]
    async fn transaction_filter_matches_request_key() {
        let bus = Bus::new();
        let mut rx = bus.subscribe(SubscriptionFilter::Transaction("rk-a".to_string()));

        let mut batch = PublishBatch::new();
        batch.append(Some(info("a", 0, 1)));
        batch.append(Some(info("b", 0, 2)));
        bus.publish(batch);

        assert_eq!(rx.recv().await.unwrap().hash, "a");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn depth_subscriber_waits_for_confirmations() {
        let bus = Bus::new();
        let mut rx = bus.subscribe(SubscriptionFilter::NewBlocksFromDepth(2));

        let mut batch = PublishBatch::new();
        batch.append(Some(info("a", 0, 10)));
        bus.publish(batch);
        assert!(rx.try_recv().is_err());

        let mut batch = PublishBatch::new();
        batch.append(Some(info("b", 0, 11)));
        bus.publish(batch);
        assert!(rx.try_recv().is_err());

        let mut batch = PublishBatch::new();
        batch.append(Some(info("c", 0, 12)));
        bus.publish(batch);

        assert_eq!(rx.recv().await.unwrap().hash, "a");
        assert!(rx.try_recv().is_err());
    }
}
