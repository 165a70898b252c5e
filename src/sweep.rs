//! Persisted expiry.
//!
//! Readers already treat overdue `scheduled` rows as expired. The sweep writes
//! that status back so stored state catches up; each row is expired in its own
//! unit of work so one slow row never holds locks on the rest.

use crate::domain::{Id, MealStatus, MealTime};
use crate::engine::Engine;
use crate::error::EngineError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

const SWEEP_BATCH: i64 = 500;
const STOP_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    /// Rows that changed state between listing and locking.
    pub skipped: usize,
}

impl Engine {
    /// Expire every `scheduled` row whose grace deadline has passed.
    ///
    /// # Errors
    ///
    /// `Internal` on storage failure. Rows expired before the failure stay expired.
    pub fn expire_overdue(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        for meal_time in MealTime::ALL {
            loop {
                let now = self.now();
                let cutoff = self.lifecycle().overdue_cutoff(meal_time, now);
                let ids = self.run("list_overdue", |tx| {
                    tx.overdue_schedule_ids(meal_time, cutoff, SWEEP_BATCH)
                })?;
                let listed = ids.len();
                for id in ids {
                    if self.expire_one(id)? {
                        report.expired += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                if (listed as i64) < SWEEP_BATCH {
                    break;
                }
            }
        }

        #[cfg(feature = "metrics")]
        METRICS.record_expired(report.expired as u64);
        if report.expired > 0 || report.skipped > 0 {
            log::info!(
                "expiry sweep: {} expired, {} skipped",
                report.expired,
                report.skipped
            );
        }
        Ok(report)
    }

    fn expire_one(&self, id: Id) -> Result<bool, EngineError> {
        let now = self.now();
        self.run("expire_meal", |tx| {
            let Some(row) = tx.lock_schedule(id)? else {
                return Ok(false);
            };
            if row.status != MealStatus::Scheduled
                || !self.lifecycle().is_overdue(row.meal_time, row.scheduled_at, now)
            {
                return Ok(false);
            }
            let expired = row.transitioned(MealStatus::Expired, now)?;
            tx.update_schedule(&expired)?;
            Ok(true)
        })
    }

    /// Run [`Engine::expire_overdue`] every `sweep.interval_seconds` on a `may`
    /// coroutine until the returned handle is stopped or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Sweeper {
        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs(self.sweep_config().interval_seconds.max(1));
        let engine = Arc::clone(self);
        let flag = Arc::clone(&stop);

        let handle = may::go!(move || {
            log::info!("expiry sweeper started, every {}s", interval.as_secs());
            while !flag.load(Ordering::Acquire) {
                if let Err(e) = engine.expire_overdue() {
                    log::error!("expiry sweep failed: {e}");
                }
                let mut waited = Duration::ZERO;
                while waited < interval && !flag.load(Ordering::Acquire) {
                    let step = STOP_POLL.min(interval - waited);
                    may::coroutine::sleep(step);
                    waited += step;
                }
            }
            log::info!("expiry sweeper stopped");
        });

        Sweeper {
            stop,
            handle: Some(handle),
        }
    }
}

/// Handle to a running background sweeper.
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<may::coroutine::JoinHandle<()>>,
}

impl Sweeper {
    /// Signal the sweeper and wait for its current pass to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("expiry sweeper panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
