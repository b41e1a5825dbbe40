//! Lifecycle scheduler
//!
//! Spawns the compression, rollup-refresh, and retention loops as
//! independent background tasks. Each tick runs its pass on a blocking
//! worker under a bounded timeout; a timed-out pass is abandoned (the
//! underlying operations are atomic per chunk and per bucket, so
//! abandonment between steps leaves no partial state) and retried on
//! the next tick.

use super::{LifecycleConfig, SchedulerStats, TaskStats};
use crate::error::Result;
use crate::store::EnergyStore;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

struct TaskCounters {
    runs: AtomicU64,
    failures: AtomicU64,
    last_success: AtomicI64,
}

impl TaskCounters {
    fn new() -> Self {
        Self {
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_success: AtomicI64::new(i64::MIN),
        }
    }

    fn snapshot(&self) -> TaskStats {
        let last = self.last_success.load(Ordering::Relaxed);
        TaskStats {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_success_ms: (last != i64::MIN).then_some(last),
        }
    }
}

struct SchedulerCounters {
    compression: TaskCounters,
    refresh: TaskCounters,
    retention: TaskCounters,
}

/// Handle over the three running lifecycle loops
pub struct LifecycleScheduler {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<SchedulerCounters>,
}

type PassFn = fn(&EnergyStore, i64) -> Result<usize>;

impl LifecycleScheduler {
    /// Spawn the lifecycle loops over an engine
    pub fn start(store: Arc<EnergyStore>, config: LifecycleConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(SchedulerCounters {
            compression: TaskCounters::new(),
            refresh: TaskCounters::new(),
            retention: TaskCounters::new(),
        });

        let mut handles = Vec::new();
        if config.enabled {
            handles.push(Self::spawn_loop(
                "compression",
                config.compression_interval,
                config.task_timeout,
                store.clone(),
                shutdown.clone(),
                counters.clone(),
                |c| &c.compression,
                |store, now| store.run_compression_pass(now),
            ));
            handles.push(Self::spawn_loop(
                "rollup_refresh",
                config.refresh_interval,
                config.task_timeout,
                store.clone(),
                shutdown.clone(),
                counters.clone(),
                |c| &c.refresh,
                |store, now| store.run_refresh_pass(now),
            ));
            handles.push(Self::spawn_loop(
                "retention",
                config.retention_interval,
                config.task_timeout,
                store,
                shutdown.clone(),
                counters.clone(),
                |c| &c.retention,
                |store, now| store.run_retention_pass(now),
            ));
        }

        Self {
            shutdown,
            handles,
            counters,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_loop(
        name: &'static str,
        tick_interval: std::time::Duration,
        task_timeout: std::time::Duration,
        store: Arc<EnergyStore>,
        shutdown: Arc<AtomicBool>,
        counters: Arc<SchedulerCounters>,
        select: fn(&SchedulerCounters) -> &TaskCounters,
        pass: PassFn,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            // The first tick of a tokio interval completes immediately;
            // consume it so the first pass waits a full period.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let task = select(&counters);
                task.runs.fetch_add(1, Ordering::Relaxed);

                let store_for_pass = store.clone();
                let work = tokio::task::spawn_blocking(move || {
                    let now = chrono::Utc::now().timestamp_millis();
                    pass(&store_for_pass, now)
                });

                match tokio::time::timeout(task_timeout, work).await {
                    Ok(Ok(Ok(count))) => {
                        task.last_success
                            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                        if count > 0 {
                            debug!(task = name, count, "Lifecycle task completed");
                        }
                    }
                    Ok(Ok(Err(e))) => {
                        task.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(task = name, error = %e, "Lifecycle task failed, will retry next tick");
                    }
                    Ok(Err(join_err)) => {
                        task.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(task = name, error = %join_err, "Lifecycle task panicked, will retry next tick");
                    }
                    Err(_) => {
                        task.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(task = name, "Lifecycle task timed out, abandoned until next tick");
                    }
                }
            }

            debug!(task = name, "Lifecycle loop stopped");
        })
    }

    /// Counter snapshot for all three tasks
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            compression: self.counters.compression.snapshot(),
            refresh: self.counters.refresh.snapshot(),
            retention: self.counters.retention.snapshot(),
        }
    }

    /// Stop the loops and wait for them to wind down
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles {
            handle.abort();
            let _ = handle.await;
        }
    }
}
