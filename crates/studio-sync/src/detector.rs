//! Decides, per fresh snapshot, which artifacts to deliver.
//!
//! Two guards stand between a URL and a second download:
//!   * the persisted `downloaded_url_N` flag on the job, and
//!   * the in-session [`DeliveryGuard`], marked before a delivery starts.
//!
//! The persisted flag only flips after the write-back lands, so a poll
//! cycle that runs while a delivery is still in flight sees the flag as
//! false; the session guard covers that window.

use std::collections::HashMap;

use studio_proto::job::{Job, JobStatus, Slot};
use tracing::debug;

use crate::delivery::DeliveryOutcome;

/// One artifact URL of one job. A new URL for the same slot (after a
/// recreate) is a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub job_id: i64,
    pub slot: Slot,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub key: DeliveryKey,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardEntry {
    InFlight { attempts: u32 },
    Delivered,
    /// Fell back (or failed); may be tried again on a later cycle.
    Degraded { attempts: u32, cycle: u64 },
}

/// In-session record of initiated deliveries.
#[derive(Debug)]
pub struct DeliveryGuard {
    entries: HashMap<DeliveryKey, GuardEntry>,
    max_attempts: u32,
}

impl DeliveryGuard {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            entries: HashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Requests for every deliverable slot in `jobs` that this session has
    /// not claimed yet. Returned keys are marked in flight.
    pub fn detect(&mut self, jobs: &[Job], cycle: u64) -> Vec<DeliveryRequest> {
        let mut requests = Vec::new();
        for job in jobs {
            for (slot, artifact) in job.slots() {
                if !artifact.is_deliverable() {
                    continue;
                }
                let Some(url) = artifact.url.clone() else {
                    continue;
                };
                let key = DeliveryKey {
                    job_id: job.id,
                    slot,
                    url,
                };

                let attempts = match self.entries.get(&key) {
                    None => 0,
                    Some(GuardEntry::InFlight { .. }) | Some(GuardEntry::Delivered) => continue,
                    Some(GuardEntry::Degraded { attempts, cycle: seen }) => {
                        if *attempts >= self.max_attempts || *seen >= cycle {
                            continue;
                        }
                        *attempts
                    }
                };

                debug!(
                    "Job {} slot {} deliverable (attempt {})",
                    job.id,
                    slot,
                    attempts + 1
                );
                self.entries.insert(
                    key.clone(),
                    GuardEntry::InFlight {
                        attempts: attempts + 1,
                    },
                );
                requests.push(DeliveryRequest {
                    filename: job.artifact_filename(slot),
                    key,
                });
            }
        }
        requests
    }

    /// Settle an in-flight key. `cycle` is the latest cycle at the time the
    /// outcome arrives; a degraded key is only eligible on a later one.
    pub fn record(&mut self, key: &DeliveryKey, outcome: &DeliveryOutcome, cycle: u64) {
        let attempts = match self.entries.get(key) {
            Some(GuardEntry::InFlight { attempts }) => *attempts,
            Some(GuardEntry::Degraded { attempts, .. }) => *attempts,
            Some(GuardEntry::Delivered) => return,
            None => 1,
        };
        let entry = if outcome.is_saved() {
            GuardEntry::Delivered
        } else {
            GuardEntry::Degraded { attempts, cycle }
        };
        self.entries.insert(key.clone(), entry);
    }

    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, GuardEntry::InFlight { .. }))
            .count()
    }
}

/// A status change of one job between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub job_id: i64,
    /// `None` when the job was not in the previous snapshot.
    pub from: Option<JobStatus>,
    pub to: JobStatus,
}

/// Status changes from `previous` to `current`. New jobs are reported with
/// `from: None`; jobs that disappeared are not reported.
pub fn transitions(previous: &[Job], current: &[Job]) -> Vec<Transition> {
    let before: HashMap<i64, JobStatus> = previous.iter().map(|j| (j.id, j.status)).collect();
    current
        .iter()
        .filter_map(|job| match before.get(&job.id) {
            Some(status) if *status == job.status => None,
            from => Some(Transition {
                job_id: job.id,
                from: from.copied(),
                to: job.status,
            }),
        })
        .collect()
}
