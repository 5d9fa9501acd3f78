use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::BookingStore;

const CHECK_EVERY: Duration = Duration::from_secs(60);

/// Compact the store's WAL if more than `threshold` appends have piled up.
/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &BookingStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends, {} live bookings", store.len());
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: check the WAL periodically and compact when due.
pub async fn run_compactor(store: Arc<BookingStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_EVERY);
    interval.tick().await;
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}
