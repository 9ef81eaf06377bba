use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::observability;

/// Background task that compacts the journal once it has accumulated
/// `threshold` appends since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => {
                metrics::counter!(observability::COMPACTIONS_TOTAL).increment(1);
                info!("compacted journal after {appends} appends");
            }
            Err(e) => warn!("journal compaction failed: {e}"),
        }
    }
}
