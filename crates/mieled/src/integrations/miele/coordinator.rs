//! Polling coordinator.
//!
//! A single task owns the retained device mapping. It fetches on a fixed
//! interval and on demand, merges each successful listing into the mapping
//! and publishes the merged result through a `watch` channel. Readers never
//! see a partially merged mapping, and a failed fetch leaves the published
//! mapping untouched.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::Error;
use super::Result;
use super::model::DeviceMap;
use super::snapshot::DeviceSource;

const REQUEST_CHANNEL_SIZE: usize = 16;

/// A fully merged device mapping.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub devices: Arc<DeviceMap>,
    /// Number of successful merges so far
    pub generation: u64,
}

/// Outcome of recent polls. Published before the snapshot it belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollStatus {
    pub last_update_success: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<Error>,
}

struct RefreshRequest {
    reply: oneshot::Sender<Result<()>>,
}

/// Overlay a fresh listing on the retained mapping. Devices missing from
/// `fetched` are kept.
pub fn merge(retained: &DeviceMap, fetched: DeviceMap) -> DeviceMap {
    let mut merged = retained.clone();
    merged.extend(fetched);
    merged
}

/// Cheap, cloneable access to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    requests: mpsc::Sender<RefreshRequest>,
    snapshot: watch::Receiver<Snapshot>,
    status: watch::Receiver<PollStatus>,
}

impl CoordinatorHandle {
    /// Fetch now and wait for the result. Requests made while a fetch is in
    /// flight share that fetch's result.
    pub async fn refresh(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(RefreshRequest { reply })
            .await
            .map_err(|_| Error::CoordinatorGone)?;
        rx.await.map_err(|_| Error::CoordinatorGone)?
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PollStatus> {
        self.status.clone()
    }
}

pub struct Coordinator<S> {
    source: S,
    language: String,
    interval: Duration,
    retained: Snapshot,
    requests: mpsc::Receiver<RefreshRequest>,
    snapshot_tx: watch::Sender<Snapshot>,
    status_tx: watch::Sender<PollStatus>,
}

impl<S: DeviceSource> Coordinator<S> {
    pub fn new(
        source: S,
        language: impl Into<String>,
        interval: Duration,
    ) -> (Self, CoordinatorHandle) {
        let (requests_tx, requests) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (status_tx, status_rx) = watch::channel(PollStatus::default());

        let coordinator = Self {
            source,
            language: language.into(),
            interval,
            retained: Snapshot::default(),
            requests,
            snapshot_tx,
            status_tx,
        };
        let handle = CoordinatorHandle {
            requests: requests_tx,
            snapshot: snapshot_rx,
            status: status_rx,
        };
        (coordinator, handle)
    }

    /// Poll until every handle has been dropped. The first poll happens
    /// immediately.
    pub async fn run(mut self) {
        info!(
            "Polling Miele devices every {}s (language={})",
            self.interval.as_secs(),
            self.language
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.poll_once().await;
                    if let Err(e) = &result {
                        log_poll_failure(e, self.status_tx.borrow().consecutive_failures);
                    }
                    self.answer_queued(&result);
                }
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    debug!("Forced refresh requested");
                    let result = self.poll_once().await;
                    let _ = request.reply.send(result.clone());
                    self.answer_queued(&result);
                    ticker.reset();
                }
            }
        }

        info!("Miele coordinator stopped");
    }

    /// Fetch once; on success merge and publish.
    pub async fn poll_once(&mut self) -> Result<()> {
        match self.source.fetch_devices(&self.language).await {
            Ok(fetched) => {
                debug!("Fetched {} devices", fetched.len());
                self.retained = Snapshot {
                    devices: Arc::new(merge(&self.retained.devices, fetched)),
                    generation: self.retained.generation + 1,
                };
                self.status_tx.send_if_modified(|s| {
                    let recovered = !s.last_update_success;
                    *s = PollStatus {
                        last_update_success: true,
                        ..Default::default()
                    };
                    recovered
                });
                self.snapshot_tx.send_replace(self.retained.clone());
                Ok(())
            }
            Err(e) => {
                self.status_tx.send_modify(|s| {
                    s.last_update_success = false;
                    s.consecutive_failures += 1;
                    s.last_error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    /// Answer refresh requests that queued up during the last fetch.
    fn answer_queued(&mut self, result: &Result<()>) {
        while let Ok(request) = self.requests.try_recv() {
            debug!("Coalescing queued refresh request");
            let _ = request.reply.send(result.clone());
        }
    }
}

fn log_poll_failure(e: &Error, consecutive_failures: u32) {
    if e.is_transient() {
        warn!(
            "Failed to poll Miele devices ({} in a row), keeping last known state: {}",
            consecutive_failures, e
        );
    } else if *e == Error::AuthExpired {
        error!("Miele rejected the access token; re-authorization required");
    } else {
        error!("Polling Miele devices failed: {}", e);
    }
}
