//! Background resolution of upcoming queue entries
//!
//! A single worker drains batches of queries and warms the resolution
//! cache. Failures are reported on the event bus and never touch the
//! queue or live playback. The inter-item delay keeps the resolver from
//! hammering the lookup service.

use crate::cache::ResolutionCache;
use crate::events::{EventBus, RelayEvent};
use crate::resolver::{resolve_with_fallback, MediaResolver};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A batch of queries to warm, in queue order
pub type PreloadBatch = Vec<String>;

/// Spawn the preload worker and return its feed channel. Dropping the
/// sender shuts the worker down.
pub fn spawn(
    resolver: Arc<dyn MediaResolver>,
    cache: Arc<ResolutionCache>,
    events: EventBus,
    timeout: Duration,
    delay: Duration,
) -> mpsc::UnboundedSender<PreloadBatch> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PreloadBatch>();
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            run_batch(&*resolver, &cache, &events, &batch, timeout, delay).await;
        }
        debug!("preload worker exiting");
    });
    tx
}

async fn run_batch(
    resolver: &dyn MediaResolver,
    cache: &ResolutionCache,
    events: &EventBus,
    batch: &[String],
    timeout: Duration,
    delay: Duration,
) {
    let now = Utc::now().timestamp();
    let mut warmed = 0usize;
    for query in batch {
        if let Some(media) = cache.get(query).await {
            if media.is_valid_at(now) {
                continue;
            }
        }
        tokio::time::sleep(delay).await;
        match resolve_with_fallback(resolver, query, timeout).await {
            Ok(media) => {
                if let Err(e) = cache.put(query.clone(), media).await {
                    warn!(query = %query, "preloaded record not persisted: {}", e);
                }
                warmed += 1;
            }
            Err(e) => {
                warn!(query = %query, "preload resolution failed: {}", e);
                events.emit_lossy(RelayEvent::PreloadFailed {
                    query: query.clone(),
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }
    debug!(total = batch.len(), warmed, "preload batch done");
}
