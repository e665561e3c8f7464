use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::config::StatsConfig;
use crate::persistence::{self as db, stats as stats_store};
use crate::stats::StatsAggregator;
use crate::Result;

pub async fn stats_flush_loop(db: db::Db, aggregator: Arc<StatsAggregator>, cfg: StatsConfig) {
    let flush_interval = cfg.flush_interval_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(flush_interval));

    loop {
        interval.tick().await;

        match run_stats_flush(&db, &aggregator).await {
            Ok(0) => {}
            Ok(rows) => debug!(rows, "http stats flushed"),
            Err(err) => warn!(?err, "http stats flush failed"),
        }
    }
}

/// Drain the aggregator and add its counts onto the stored rows. Returns the
/// number of rows written.
pub async fn run_stats_flush(db: &db::Db, aggregator: &StatsAggregator) -> Result<usize> {
    let rows = aggregator.drain();
    if rows.is_empty() {
        return Ok(0);
    }
    let mut tx = db.begin().await?;
    stats_store::upsert_http_stats(&mut tx, &rows).await?;
    tx.commit().await?;
    Ok(rows.len())
}
