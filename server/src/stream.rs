use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_std::task::sleep;
use db::providers::sync::{find_last_cursor, save_cursor, save_streaming_error};
use db::types::{BlockEnvelope, Source};
use db::{NewStreamingError, NewSyncStatus};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tracing::{error, info, warn};

use crate::bus::PublishBatch;
use crate::error::IndexerError;
use crate::guards::run_guards_schedule;
use crate::indexer::IndexerContext;
use crate::materialise::materialise;

const BLOCK_HEADER_EVENT: &str = "BlockHeader";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One parsed server-sent event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

fn frame_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|idx| (idx, 2));
    let crlf = buffer.find("\r\n\r\n").map(|idx| (idx, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Pull every complete frame out of the buffer, leaving the unterminated
/// tail for the next chunk.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    while let Some((idx, delim)) = frame_boundary(buffer) {
        let raw: String = buffer.drain(..idx + delim).collect();
        let mut event = String::new();
        let mut data_lines: Vec<String> = Vec::new();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        if !event.is_empty() || !data_lines.is_empty() {
            frames.push(SseFrame {
                event,
                data: data_lines.join("\n"),
            });
        }
    }
    frames
}

/// Consume the node's block-update stream. The streamer owns the observed
/// hash set (single task, no locking) and the guards reconciliation
/// schedule.
pub async fn run_streamer(ctx: Arc<IndexerContext>) {
    tokio::spawn(run_guards_schedule(ctx.clone()));

    let client = reqwest::Client::new();
    let url = ctx.node.updates_url();
    let flush_interval = Duration::from_secs(ctx.config.dedup_flush_secs);
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_flush = Instant::now();

    info!(url = %url, "tip streamer started");
    loop {
        if ctx.shutdown.is_set() {
            break;
        }
        let response = match client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("block update stream unavailable: {}", e);
                sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        let mut chunks = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = chunks.next().await {
            if ctx.shutdown.is_set() {
                break;
            }
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("block update stream interrupted: {}", e);
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            for frame in drain_frames(&mut buffer) {
                if frame.event != BLOCK_HEADER_EVENT {
                    continue;
                }
                // The unique constraint on block hashes keeps the flush
                // correct; the set only exists to bound duplicate work.
                if last_flush.elapsed() >= flush_interval {
                    seen.clear();
                    last_flush = Instant::now();
                }
                handle_block_event(&ctx, &mut seen, &frame.data).await;
            }
        }
        sleep(RECONNECT_DELAY).await;
    }
    info!("tip streamer stopped");
}

async fn handle_block_event(ctx: &IndexerContext, seen: &mut HashSet<String>, data: &str) {
    let envelope: BlockEnvelope = match serde_json::from_str(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("undecodable block update: {}", e);
            return;
        }
    };
    let hash = envelope.header.hash.clone();
    let chain_id = envelope.header.chain_id;
    if !seen.insert(hash.clone()) {
        return;
    }

    if let Err(e) = persist_streamed(ctx, &envelope).await {
        error!(chain_id, hash = %hash, "streamed block failed: {}", e);
        if let Err(e) = record_streaming_error(ctx, &hash, chain_id).await {
            error!(chain_id, hash = %hash, "streaming error not recorded: {}", e);
        }
    }
}

async fn persist_streamed(
    ctx: &IndexerContext,
    envelope: &BlockEnvelope,
) -> Result<(), IndexerError> {
    let network = ctx.config.network.clone();
    let height = envelope.header.height;
    let chain_id = envelope.header.chain_id;

    let mut conn = ctx.provider.conn().await?;
    let batch = conn
        .transaction::<PublishBatch, IndexerError, _>(|conn| {
            async move {
                let mut batch = PublishBatch::new();
                batch.append(materialise(conn, &network, Source::Streaming, envelope).await?);

                let cursor =
                    find_last_cursor(conn, &network, chain_id, "", Source::Streaming).await?;
                let advanced = cursor
                    .and_then(|c| c.to_height)
                    .map_or(true, |latest| height > latest);
                if advanced {
                    save_cursor(
                        conn,
                        &NewSyncStatus {
                            network: network.clone(),
                            chain_id,
                            prefix: String::new(),
                            source: Source::Streaming.to_string(),
                            key: None,
                            from_height: Some(height),
                            to_height: Some(height),
                        },
                    )
                    .await?;
                }
                Ok(batch)
            }
            .scope_boxed()
        })
        .await?;

    ctx.bus.publish(batch);
    Ok(())
}

async fn record_streaming_error(
    ctx: &IndexerContext,
    hash: &str,
    chain_id: i64,
) -> Result<(), IndexerError> {
    let mut conn = ctx.provider.conn().await?;
    save_streaming_error(
        &mut conn,
        &NewStreamingError {
            hash: hash.to_string(),
            chain_id,
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_on_blank_lines() {
        let mut buffer = String::from(
            "event: BlockHeader\ndata: {\"a\":1}\n\nevent: BlockHeader\ndata: {\"a\":2}\n\n",
        );
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "BlockHeader");
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[1].data, "{\"a\":2}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_frames_stay_buffered() {
        let mut buffer = String::from("event: BlockHeader\ndata: {\"a\"");
        assert!(drain_frames(&mut buffer).is_empty());

        buffer.push_str(":1}\n\n");
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn multi_line_data_joins_with_newlines() {
        let mut buffer = String::from("event: BlockHeader\ndata: {\ndata: }\n\n");
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames[0].data, "{\n}");
    }

    #[test]
    fn crlf_delimited_frames_parse_too() {
        let mut buffer = String::from("event: BlockHeader\r\ndata: {}\r\n\r\n");
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "BlockHeader");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn repeated_hashes_are_dropped_by_the_seen_set() {
        let mut seen = HashSet::new();
        assert!(seen.insert("h1".to_string()));
        assert!(!seen.insert("h1".to_string()));
        seen.clear();
        assert!(seen.insert("h1".to_string()));
    }
}
