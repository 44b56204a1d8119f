//! Poll scheduler.
//!
//! A [`Poller`] runs one fetch-map-publish cycle immediately and then on a
//! fixed interval. Cycles never overlap: a tick that arrives while a cycle
//! is still running is dropped, not queued.
//!
//! ```text
//!        start / tick
//!   Idle ─────────────▶ Polling ──┐
//!    ▲                            │ fetch 4 classes (joined)
//!    │                            │ map successful classes
//!    └──────── cycle done ◀───────┘ publish snapshot
//!        (tick while Polling = no-op)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::clamp_interval;
use crate::device::{map_devices, DeviceClass};
use crate::hub::{fetch_all, DeviceSource};
use crate::sink::{DeviceMetrics, MetricSink};

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

/// Marks the poller as [`PollState::Polling`] until dropped.
///
/// Dropping the guard (including during a panic unwind) returns the poller
/// to [`PollState::Idle`].
#[derive(Debug)]
pub struct PollGuard {
    polling: Arc<AtomicBool>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.polling.store(false, Ordering::SeqCst);
    }
}

/// Per-class outcome of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub class: DeviceClass,
    pub devices: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub classes: Vec<ClassReport>,
    /// Label combinations published
    pub series: usize,
    /// False if the new snapshot could not be built
    pub published: bool,
    pub duration_ms: u64,
    /// Unix time (ms) the cycle finished
    pub finished_at_ms: u64,
}

impl CycleReport {
    /// Classes whose fetch failed this cycle.
    pub fn failed_classes(&self) -> Vec<DeviceClass> {
        self.classes
            .iter()
            .filter(|c| c.error.is_some())
            .map(|c| c.class)
            .collect()
    }
}

/// Result of asking for a cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running
    Skipped,
}

/// Running totals exposed by the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStatus {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub ticks_skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleReport>,
}

/// Drives poll cycles against a [`DeviceSource`] and publishes to a [`MetricSink`].
pub struct Poller<S> {
    source: S,
    sink: Arc<MetricSink>,
    interval: Duration,
    polling: Arc<AtomicBool>,
    status: RwLock<PollStatus>,
}

impl<S: DeviceSource> Poller<S> {
    /// Create a poller. `interval` is clamped to the minimum poll interval.
    pub fn new(source: S, sink: Arc<MetricSink>, interval: Duration) -> Self {
        Self {
            source,
            sink,
            interval: clamp_interval(interval),
            polling: Arc::new(AtomicBool::new(false)),
            status: RwLock::new(PollStatus::default()),
        }
    }

    /// Effective poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The device source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The sink cycles publish to.
    pub fn sink(&self) -> &Arc<MetricSink> {
        &self.sink
    }

    /// Current scheduler state.
    pub fn state(&self) -> PollState {
        if self.polling.load(Ordering::SeqCst) {
            PollState::Polling
        } else {
            PollState::Idle
        }
    }

    /// Running totals.
    pub async fn status(&self) -> PollStatus {
        self.status.read().await.clone()
    }

    /// Move from `Idle` to `Polling`, or `None` if a cycle is running.
    pub fn try_begin(&self) -> Option<PollGuard> {
        self.polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PollGuard {
                polling: Arc::clone(&self.polling),
            })
    }

    /// Run one cycle now unless one is already running.
    pub async fn poll_once(&self) -> CycleOutcome {
        match self.try_begin() {
            Some(guard) => CycleOutcome::Completed(self.cycle(guard).await),
            None => {
                self.record_skip().await;
                CycleOutcome::Skipped
            }
        }
    }

    async fn cycle(&self, _guard: PollGuard) -> CycleReport {
        let started = Instant::now();
        debug!("Poll cycle started");

        let results = fetch_all(&self.source).await;

        let mut observations = Vec::new();
        let mut classes = Vec::with_capacity(results.len());
        for fetch in &results {
            match &fetch.devices {
                Ok(devices) => {
                    observations.extend(map_devices(fetch.class, devices));
                    debug!("{} devices = {}", fetch.class, devices.len());
                    classes.push(ClassReport {
                        class: fetch.class,
                        devices: devices.len(),
                        error: None,
                    });
                }
                Err(e) => classes.push(ClassReport {
                    class: fetch.class,
                    devices: 0,
                    error: Some(e.to_string()),
                }),
            }
        }

        let (published, series) = match DeviceMetrics::from_observations(&observations) {
            Ok(next) => {
                let series = next.series_count();
                self.sink.publish(next).await;
                (true, series)
            }
            Err(e) => {
                error!("Failed to build device metrics, keeping previous snapshot: {}", e);
                (false, 0)
            }
        };

        let report = CycleReport {
            classes,
            series,
            published,
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        };

        {
            let mut status = self.status.write().await;
            if published {
                status.cycles_completed += 1;
            } else {
                status.cycles_failed += 1;
            }
            status.last_cycle = Some(report.clone());
        }

        debug!(
            series = report.series,
            duration_ms = report.duration_ms,
            "Poll cycle finished"
        );
        report
    }

    async fn record_skip(&self) {
        self.status.write().await.ticks_skipped += 1;
        debug!("Previous poll cycle still running, skipping tick");
    }
}

impl<S: DeviceSource + 'static> Poller<S> {
    /// Poll forever: first cycle immediately, then once per interval.
    ///
    /// Each cycle runs in its own task so a panic inside it is logged and the
    /// loop keeps ticking.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "Starting poll loop");

        loop {
            ticker.tick().await;

            let Some(guard) = self.try_begin() else {
                self.record_skip().await;
                continue;
            };

            let poller = Arc::clone(&self);
            let cycle = tokio::spawn(async move { poller.cycle(guard).await });
            let poller = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = cycle.await {
                    error!("Poll cycle aborted: {}", e);
                    poller.status.write().await.cycles_failed += 1;
                }
            });
        }
    }
}

impl<S> std::fmt::Debug for Poller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("polling", &self.polling.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
