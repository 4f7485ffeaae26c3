//! The status-poll-and-deliver loop.
//!
//! One task owns the job list and the delivery guard. It re-fetches the
//! list on an interval while any job is still in flight, hands fresh
//! snapshots to the detector and spawns deliveries; delivery outcomes come
//! back over an mpsc channel into the same `select!`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future;
use studio_proto::config::Config;
use studio_proto::job::{needs_polling, Job};
use studio_proto::protocol::{JobFilter, JobStats};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::api::{ArtifactFetcher, JobApi};
use crate::delivery::{Delivery, DeliveryOutcome};
use crate::detector::{self, DeliveryGuard, DeliveryKey, DeliveryRequest, Transition};

const EVENT_CAPACITY: usize = 256;
const REPORT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub filter: JobFilter,
    pub max_attempts: u32,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.polling.interval(),
            filter: JobFilter::default(),
            max_attempts: config.delivery.max_attempts,
        }
    }

    pub fn with_filter(mut self, filter: JobFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The latest complete view of the job collection.
#[derive(Debug, Clone, Default)]
pub struct PollSnapshot {
    /// Successful fetches so far; 0 until the initial load lands.
    pub cycle: u64,
    pub jobs: Vec<Job>,
    pub stats: Option<JobStats>,
    pub transitions: Vec<Transition>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Whether the interval is armed after this snapshot.
    pub polling: bool,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub key: DeliveryKey,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone)]
pub enum PollEvent {
    Refreshed { cycle: u64, jobs: usize, polling: bool },
    Transition(Transition),
    DeliveryStarted(DeliveryRequest),
    Delivered(DeliveryReport),
    PollFailed { cycle: u64, error: String },
}

pub struct PollScheduler<S> {
    service: Arc<S>,
    delivery: Arc<Delivery<S>>,
    settings: PollSettings,
}

impl<S> PollScheduler<S>
where
    S: JobApi + ArtifactFetcher,
{
    pub fn new(service: Arc<S>, delivery: Arc<Delivery<S>>, settings: PollSettings) -> Self {
        Self {
            service,
            delivery,
            settings,
        }
    }

    /// Start the loop. It performs the initial load right away and runs
    /// until the returned handle is shut down or dropped.
    pub fn spawn(self) -> PollHandle {
        let cancel = CancellationToken::new();
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (snapshot_tx, snapshot_rx) = watch::channel(PollSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (report_tx, report_rx) = mpsc::channel(REPORT_CAPACITY);

        let state = PollLoop {
            guard: DeliveryGuard::new(self.settings.max_attempts),
            service: self.service,
            delivery: self.delivery,
            settings: self.settings,
            cancel: cancel.clone(),
            jobs: Vec::new(),
            cycle: 0,
            attempted: 0,
            retry_pending: false,
            snapshot_tx,
            events_tx: events_tx.clone(),
            report_tx,
        };
        let task = tokio::spawn(state.run(refresh_rx, report_rx));

        PollHandle {
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
            refresh_tx,
            snapshot_rx,
            events_tx,
            task,
        }
    }
}

/// Owns the running scheduler. Dropping it cancels the loop.
pub struct PollHandle {
    cancel: CancellationToken,
    _guard: DropGuard,
    refresh_tx: mpsc::Sender<()>,
    snapshot_rx: watch::Receiver<PollSnapshot>,
    events_tx: broadcast::Sender<PollEvent>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Re-fetch now and re-arm the interval, e.g. after creating or
    /// recreating a job. Requests made while one is pending coalesce.
    pub fn refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PollEvent> {
        self.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Cancel the loop and wait for it to exit. Deliveries already in
    /// flight finish on their own; their outcomes are dropped.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Poll loop ended abnormally: {}", e);
        }
    }
}

struct PollLoop<S> {
    service: Arc<S>,
    delivery: Arc<Delivery<S>>,
    settings: PollSettings,
    cancel: CancellationToken,
    guard: DeliveryGuard,
    jobs: Vec<Job>,
    cycle: u64,
    /// Fetch attempts, successful or not.
    attempted: u64,
    /// The last fetch failed; keeps the interval armed whatever the list says.
    retry_pending: bool,
    snapshot_tx: watch::Sender<PollSnapshot>,
    events_tx: broadcast::Sender<PollEvent>,
    report_tx: mpsc::Sender<DeliveryReport>,
}

impl<S> PollLoop<S>
where
    S: JobApi + ArtifactFetcher,
{
    async fn run(
        mut self,
        mut refresh_rx: mpsc::Receiver<()>,
        mut report_rx: mpsc::Receiver<DeliveryReport>,
    ) {
        info!(
            "Poll loop starting (interval={:?}, max_attempts={})",
            self.settings.interval, self.settings.max_attempts
        );
        self.refresh().await;

        let interval = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Level-triggered: re-evaluated against whatever list is current
            let polling = self.retry_pending || needs_polling(&self.jobs);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(()) = refresh_rx.recv() => {
                    debug!("Poll loop: explicit refresh");
                    self.refresh().await;
                    ticker.reset();
                }

                Some(report) = report_rx.recv() => self.settle(report),

                _ = ticker.tick(), if polling => self.refresh().await,
            }
        }

        info!(
            "Poll loop stopped after {} cycles ({} fetches)",
            self.cycle, self.attempted
        );
    }

    /// One full poll: fetch, replace, detect, deliver, publish.
    async fn refresh(&mut self) {
        self.attempted += 1;
        let fetch = future::join(
            self.service.list_jobs(&self.settings.filter),
            self.service.job_stats(self.settings.filter.all_users),
        );
        let (jobs, stats) = tokio::select! {
            _ = self.cancel.cancelled() => return,
            fetched = fetch => fetched,
        };

        let jobs = match jobs {
            Ok(jobs) => jobs,
            Err(e) => {
                if e.is_transient() {
                    warn!("Poll failed (cycle {}): {}", self.cycle + 1, e);
                } else {
                    error!("Poll failed (cycle {}): {}", self.cycle + 1, e);
                }
                self.retry_pending = true;
                self.snapshot_tx.send_if_modified(|snapshot| {
                    let disarmed = !snapshot.polling;
                    snapshot.polling = true;
                    disarmed
                });
                let _ = self.events_tx.send(PollEvent::PollFailed {
                    cycle: self.cycle + 1,
                    error: e.to_string(),
                });
                return;
            }
        };
        self.retry_pending = false;
        let stats = match stats {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Stats fetch failed: {}", e);
                None
            }
        };

        self.cycle += 1;
        let transitions = detector::transitions(&self.jobs, &jobs);
        self.jobs = jobs;
        let requests = self.guard.detect(&self.jobs, self.cycle);
        let polling = needs_polling(&self.jobs);

        debug!(
            "Cycle {}: {} jobs, {} transitions, {} deliveries ({} still in flight), polling={}",
            self.cycle,
            self.jobs.len(),
            transitions.len(),
            requests.len(),
            self.guard.in_flight(),
            polling
        );

        self.snapshot_tx.send_replace(PollSnapshot {
            cycle: self.cycle,
            jobs: self.jobs.clone(),
            stats,
            transitions: transitions.clone(),
            fetched_at: Some(Utc::now()),
            polling,
        });

        let _ = self.events_tx.send(PollEvent::Refreshed {
            cycle: self.cycle,
            jobs: self.jobs.len(),
            polling,
        });
        for transition in transitions {
            let _ = self.events_tx.send(PollEvent::Transition(transition));
        }
        for request in requests {
            self.start_delivery(request);
        }
    }

    fn start_delivery(&self, request: DeliveryRequest) {
        let _ = self
            .events_tx
            .send(PollEvent::DeliveryStarted(request.clone()));
        let delivery = Arc::clone(&self.delivery);
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            let outcome = delivery.deliver(&request).await;
            let _ = report_tx
                .send(DeliveryReport {
                    key: request.key,
                    outcome,
                })
                .await;
        });
    }

    fn settle(&mut self, report: DeliveryReport) {
        self.guard.record(&report.key, &report.outcome, self.cycle);

        // Mirror a landed write-back locally so views agree before the
        // next fetch.
        if let DeliveryOutcome::Saved {
            persisted: true, ..
        } = report.outcome
        {
            let key = &report.key;
            let patch = |jobs: &mut [Job]| {
                let mut changed = false;
                for job in jobs.iter_mut().filter(|j| j.id == key.job_id) {
                    let artifact = job.artifact_mut(key.slot);
                    if artifact.url.as_deref() == Some(key.url.as_str()) && !artifact.downloaded {
                        artifact.downloaded = true;
                        changed = true;
                    }
                }
                changed
            };
            if patch(self.jobs.as_mut_slice()) {
                self.snapshot_tx
                    .send_if_modified(|snapshot| patch(snapshot.jobs.as_mut_slice()));
            }
        }

        let _ = self.events_tx.send(PollEvent::Delivered(report));
    }
}
