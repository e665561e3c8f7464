use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::config::MessagingConfig;
use crate::messaging::day_bucket;
use crate::persistence::{self as db, message_tasks, messages};
use crate::Result;

pub async fn message_retention_loop(db: db::Db, cfg: MessagingConfig) {
    let sweep_interval = cfg.cleanup_interval_secs.max(60);
    let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));

    loop {
        interval.tick().await;

        match run_message_retention_sweep(&db, &cfg, Utc::now()).await {
            Ok((0, 0)) => {}
            Ok((messages, tasks)) => {
                info!(messages, tasks, "message retention sweep removed rows");
            }
            Err(err) => warn!(?err, "message retention sweep failed"),
        }
    }
}

/// Drop messages older than the retention window together with their
/// delivery tasks. Returns `(messages, tasks)` removed.
pub async fn run_message_retention_sweep(
    db: &db::Db,
    cfg: &MessagingConfig,
    now: DateTime<Utc>,
) -> Result<(u64, u64)> {
    if cfg.retention_days == 0 {
        return Ok((0, 0));
    }

    let cutoff = now - ChronoDuration::days(i64::from(cfg.retention_days));
    let mut tx = db.begin().await?;
    let removed_messages = messages::delete_messages_before_day(&mut tx, &day_bucket(cutoff)).await?;
    let removed_tasks = message_tasks::delete_message_tasks_before(&mut tx, cutoff.timestamp()).await?;
    tx.commit().await?;
    Ok((removed_messages, removed_tasks))
}
