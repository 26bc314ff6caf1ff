use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::JnapClient;
use crate::config::PollerConfig;
use crate::derive::DerivationEngine;
use crate::diff::{diff_readings, ReadingsDiff};
use crate::error::TransportError;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{get_attributes_payload, GET_ATTRIBUTES};
use crate::retry::RetryPolicy;
use crate::state::{ingest, Snapshot};
use crate::types::SensorReading;
use crate::{Error, Result};

type SnapshotCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;
type ReadingsCallback = Box<dyn Fn(&ReadingsDiff, &[SensorReading]) + Send + Sync>;

/// Result of one trigger of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new snapshot was published.
    Updated { sequence: u64 },
    /// Another poll was already in flight; nothing was sent.
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerStatus {
    pub phase: PollPhase,
    pub last_outcome: Option<CycleOutcome>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub sequence: Option<u64>,
    /// No snapshot yet, or the current one is past the staleness threshold.
    pub stale: bool,
}

#[derive(Debug, Default)]
struct Stats {
    last_outcome: Option<CycleOutcome>,
    last_success: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

pub struct PollerBuilder {
    config: PollerConfig,
    snapshot_callbacks: Vec<SnapshotCallback>,
    readings_callbacks: Vec<ReadingsCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<PathBuf>,
}

impl PollerBuilder {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            snapshot_callbacks: Vec::new(),
            readings_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Called with every newly published snapshot.
    pub fn on_snapshot_updated(mut self, f: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    /// Called with the reading diff and the full reading set whenever the
    /// derived readings change, including availability flips on staleness.
    pub fn on_readings_changed(
        mut self,
        f: impl Fn(&ReadingsDiff, &[SensorReading]) + Send + Sync + 'static,
    ) -> Self {
        self.readings_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Poller> {
        self.config.validate()?;
        let client = JnapClient::new(&self.config)?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, path)?)),
            _ => None,
        };

        let (snapshot_tx, _) = watch::channel(None);
        Ok(Poller {
            inner: Arc::new(Inner {
                client,
                retry: RetryPolicy::from_config(&self.config),
                engine: DerivationEngine::from_config(&self.config),
                poll_interval: self.config.poll_interval,
                in_flight: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                current: ArcSwapOption::empty(),
                snapshot_tx,
                readings: Mutex::new(Vec::new()),
                stats: Mutex::new(Stats::default()),
                logger,
                snapshot_callbacks: self.snapshot_callbacks,
                readings_callbacks: self.readings_callbacks,
            }),
        })
    }
}

/// Periodic JNAP poller for one X265 controller.
///
/// Cheap to clone; clones share the same schedule, snapshot and callbacks.
/// Reads (`current_snapshot`, `current_readings`, `subscribe`) never wait on
/// an in-flight poll.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

struct Inner {
    client: JnapClient,
    retry: RetryPolicy,
    engine: DerivationEngine,
    poll_interval: Duration,
    in_flight: AtomicBool,
    cancel: CancellationToken,
    /// Latest published snapshot; readers load it without locking.
    current: ArcSwapOption<Snapshot>,
    /// Change notification for `subscribe`.
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    /// Readings as last delivered to callbacks.
    readings: Mutex<Vec<SensorReading>>,
    stats: Mutex<Stats>,
    logger: Option<Mutex<MessageLogger>>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    readings_callbacks: Vec<ReadingsCallback>,
}

/// Holds the single-flight flag for the lifetime of one poll.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Poller {
    pub fn builder(config: PollerConfig) -> PollerBuilder {
        PollerBuilder::new(config)
    }

    pub fn new(config: PollerConfig) -> Result<Self> {
        PollerBuilder::new(config).build()
    }

    /// Run one poll cycle now, unless one is already in flight.
    ///
    /// A failed cycle keeps the previous snapshot and returns the error.
    pub async fn request_immediate_poll(&self) -> Result<PollOutcome> {
        let Some(_guard) = InFlight::acquire(&self.inner.in_flight) else {
            debug!("poll already in flight, coalescing");
            return Ok(PollOutcome::Coalesced);
        };

        let result = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(Error::Cancelled),
            r = self.inner.poll_cycle() => r,
        };

        match result {
            Ok(sequence) => Ok(PollOutcome::Updated { sequence }),
            Err(Error::Cancelled) => {
                debug!("poll cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.inner.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Poll on the configured interval until [`shutdown`](Self::shutdown).
    ///
    /// The first poll happens immediately. Failed cycles are logged and the
    /// next tick tries again.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            endpoint = self.inner.client.endpoint(),
            interval_secs = self.inner.poll_interval.as_secs_f64(),
            "poll loop started"
        );

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => match self.request_immediate_poll().await {
                    Err(Error::Cancelled) => break,
                    Ok(PollOutcome::Coalesced) => trace!("tick coalesced with in-flight poll"),
                    Ok(PollOutcome::Updated { .. }) | Err(_) => {}
                },
            }
        }
        debug!("poll loop stopped");
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move { poller.run().await })
    }

    /// Stop the loop and abandon any in-flight request or backoff sleep.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.current()
    }

    /// Readings for the current snapshot, with staleness applied as of now.
    pub fn current_readings(&self) -> Vec<SensorReading> {
        match self.inner.current() {
            Some(snapshot) => self.inner.engine.derive_at(&snapshot, Instant::now()),
            None => Vec::new(),
        }
    }

    pub fn status(&self) -> PollerStatus {
        let current = self.inner.current();
        let stats = lock(&self.inner.stats);
        PollerStatus {
            phase: if self.inner.in_flight.load(Ordering::Acquire) {
                PollPhase::Polling
            } else {
                PollPhase::Idle
            },
            last_outcome: stats.last_outcome.clone(),
            last_success: stats.last_success,
            consecutive_failures: stats.consecutive_failures,
            sequence: current.as_ref().map(|s| s.sequence()),
            stale: current.is_none_or(|s| {
                s.is_stale_at(Instant::now(), self.inner.engine.stale_after())
            }),
        }
    }
}

impl Inner {
    fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    async fn poll_cycle(&self) -> Result<u64> {
        let payload = get_attributes_payload(&[]);
        let client = &self.client;
        let payload = &payload;
        let body = self
            .retry
            .execute(move || {
                self.log_request(payload);
                client.fetch(GET_ATTRIBUTES, payload)
            })
            .await?;

        let (sequence, previous) = match self.current() {
            Some(s) => (s.sequence() + 1, Some(s.taken_at())),
            None => (1, None),
        };
        let snapshot = ingest(&body, sequence, previous).map_err(TransportError::from)?;
        let snapshot = Arc::new(snapshot);
        trace!(sequence, vars = snapshot.len(), "snapshot ingested");

        if let Some(logger) = &self.logger {
            lock(logger).log_snapshot(&snapshot);
        }
        self.current.store(Some(Arc::clone(&snapshot)));
        self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));
        {
            let mut stats = lock(&self.stats);
            stats.last_outcome = Some(CycleOutcome::Succeeded);
            stats.last_success = Some(snapshot.taken_at());
            stats.consecutive_failures = 0;
        }

        for cb in &self.snapshot_callbacks {
            cb(&snapshot);
        }
        self.refresh_readings(&snapshot);
        Ok(sequence)
    }

    fn record_failure(&self, err: &Error) {
        let failures = {
            let mut stats = lock(&self.stats);
            stats.last_outcome = Some(CycleOutcome::Failed(err.to_string()));
            stats.consecutive_failures += 1;
            stats.consecutive_failures
        };
        warn!(error = %err, consecutive_failures = failures, "poll cycle failed");

        if let Some(logger) = &self.logger {
            lock(logger).log_failure(err);
        }
        if let Some(snapshot) = self.current() {
            self.refresh_readings(&snapshot);
        }
    }

    /// Re-derive and notify reading callbacks if anything changed since the
    /// last delivery.
    fn refresh_readings(&self, snapshot: &Snapshot) {
        let readings = self.engine.derive_at(snapshot, Instant::now());
        let diff = {
            let mut delivered = lock(&self.readings);
            let diff = diff_readings(&delivered, &readings);
            if !diff.is_empty() {
                *delivered = readings.clone();
            }
            diff
        };
        if diff.is_empty() {
            return;
        }
        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "readings changed"
        );
        for cb in &self.readings_callbacks {
            cb(&diff, &readings);
        }
    }

    fn log_request(&self, payload: &Value) {
        if let Some(logger) = &self.logger {
            lock(logger).log_request(self.client.endpoint(), GET_ATTRIBUTES, payload);
        }
    }
}
