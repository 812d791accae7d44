use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::model::StreamId;
use crate::store::StreamStore;

/// Periodic job that times out streams whose writer died without finalizing.
///
/// Only status changes; content is never touched.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn StreamStore>,
    interval: Duration,
    expiry_window: Duration,
    page_size: usize,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn StreamStore>,
        interval: Duration,
        expiry_window: Duration,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            interval,
            expiry_window,
            page_size: page_size.max(1),
        }
    }

    /// Runs one pass as of `now` and returns the ids moved to `timeout`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<Vec<StreamId>, StoreError> {
        let window = TimeDelta::from_std(self.expiry_window).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut expired = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store.list_active(cursor, self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            let full_page = page.len() >= self.page_size;

            for record in page {
                if record.last_activity_at >= cutoff {
                    continue;
                }
                if self.store.expire_if_idle(record.id, cutoff).await? {
                    info!(stream_id = %record.id, previous = %record.status, last_activity_at = %record.last_activity_at, "stream timed out");
                    expired.push(record.id);
                }
            }
            if !full_page {
                break;
            }
        }
        debug!(expired = expired.len(), "sweep finished");
        Ok(expired)
    }

    /// Spawns the periodic loop. It stops when `shutdown` flips to true or its
    /// sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), window_secs = self.expiry_window.as_secs(), "expiry sweeper starting");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("expiry sweeper stopping");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once(Utc::now()).await {
                            warn!(error = %err, "expiry sweep failed");
                        }
                    }
                }
            }
        })
    }
}
