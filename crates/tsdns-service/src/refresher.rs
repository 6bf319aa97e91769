use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::RecordCache;
use crate::repository::RecordRepository;

/// Periodically reloads a [`RecordCache`] from its repository until `token` is cancelled.
///
/// The first reload happens one full `interval` after the start. Reload errors are logged and
/// the stale snapshot keeps being served until the next tick. Ticks missed while a reload is
/// running are delayed rather than caught up in a burst.
#[tracing::instrument(name = "refresher", skip_all, fields(interval = ?interval))]
pub async fn run_refresher(
    cache: Arc<RecordCache>,
    repository: Arc<dyn RecordRepository>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = cache.reload(repository.as_ref()).await {
                    let dynerr: &dyn std::error::Error = &err;
                    tracing::error!(error = dynerr, "failed to refresh record cache");
                }
            }
            _ = token.cancelled() => {
                tracing::debug!("stopping cache refresher");
                return;
            }
        }
    }
}
