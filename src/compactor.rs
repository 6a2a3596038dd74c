use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

pub const DEFAULT_COMPACT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a campus WAL once enough transactions pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => {
                // Lock timeouts just mean the campus is busy; try next tick.
                tracing::warn!(error = %e, "WAL compaction skipped");
            }
        }
    }
}
