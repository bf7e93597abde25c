//! Current-job ownership and fan-out to authorized sessions.
//!
//! The [`JobBroadcaster`] is the only state shared between connections. A
//! single lock covers both the current job and the session registry, so a
//! job swap and the list of sessions it is delivered to are decided
//! together: a session registering concurrently lands entirely before the
//! swap (and receives the new job in the fan-out) or entirely after it (and
//! receives the new job on registration).
//!
//! Delivery is a non-blocking channel send per session, so the lock is
//! never held across I/O. Writing to the socket happens in the session's own
//! task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::job::{AssemblyError, BlockTemplate, Job};

/// Identifies one connection for the lifetime of the process.
pub type SessionId = u64;

/// Sending half of a session's job channel.
pub type JobSender = mpsc::UnboundedSender<Arc<Job>>;

/// Receiving half of a session's job channel.
pub type JobReceiver = mpsc::UnboundedReceiver<Arc<Job>>;

/// What a call to [`JobBroadcaster::publish`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The job became current and was fanned out.
    Broadcast {
        /// Sessions the job was delivered to
        delivered: usize,
        /// Sessions found closed and removed
        dropped: usize,
    },

    /// The current job already has this height; nothing changed.
    Unchanged,
}

#[derive(Default)]
struct BroadcastState {
    current: Option<Arc<Job>>,
    /// Sequence stamped on the last published job
    sequence: u64,
    sessions: HashMap<SessionId, JobSender>,
}

/// Owner of the current job and the registry of sessions to notify.
#[derive(Default)]
pub struct JobBroadcaster {
    state: Mutex<BroadcastState>,
}

impl JobBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current job.
    pub fn current_job(&self) -> Option<Arc<Job>> {
        self.state.lock().current.clone()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Assemble a job from `template` and publish it.
    ///
    /// Assembly runs outside the lock. On an assembly error the current job
    /// is left as it was.
    pub fn update_from_template(
        &self,
        template: &BlockTemplate,
    ) -> Result<UpdateOutcome, AssemblyError> {
        let job = Job::assemble(template)?;
        Ok(self.publish(job))
    }

    /// Make `job` current and deliver it to every registered session, unless
    /// the current job is already at the same height.
    ///
    /// Sessions whose channel is closed are removed; delivery to the rest
    /// continues.
    ///
    /// Each published job gets the next [`Job::sequence`], so receivers can
    /// tell a newer job from an older one still in flight.
    pub fn publish(&self, mut job: Job) -> UpdateOutcome {
        let mut state = self.state.lock();

        if state
            .current
            .as_ref()
            .is_some_and(|current| current.height == job.height)
        {
            debug!(height = job.height, "Template height unchanged");
            return UpdateOutcome::Unchanged;
        }

        state.sequence += 1;
        job.sequence = state.sequence;
        let job = Arc::new(job);
        state.current = Some(job.clone());

        let mut closed = Vec::new();
        for (id, tx) in &state.sessions {
            if tx.send(job.clone()).is_err() {
                closed.push(*id);
            }
        }
        for id in &closed {
            state.sessions.remove(id);
        }

        let delivered = state.sessions.len();
        info!(
            job_id = %job.job_id,
            height = job.height,
            sessions = delivered,
            dropped = closed.len(),
            "New job"
        );

        UpdateOutcome::Broadcast {
            delivered,
            dropped: closed.len(),
        }
    }

    /// Register a session to receive future jobs.
    ///
    /// `last_seen` is the id of the job the session was last notified of.
    /// If the current job differs, it is sent on `tx` immediately, inside the
    /// same critical section, so the session cannot miss a swap that
    /// happened before it registered.
    ///
    /// Registering an id that is already present replaces its sender.
    /// The returned guard deregisters on drop.
    pub fn register(
        self: &Arc<Self>,
        id: SessionId,
        tx: JobSender,
        last_seen: Option<&str>,
    ) -> Registration {
        let mut state = self.state.lock();

        if let Some(current) = &state.current {
            if last_seen != Some(current.job_id.as_str()) {
                // A closed channel is caught on the next broadcast.
                let _ = tx.send(current.clone());
            }
        }
        state.sessions.insert(id, tx);
        debug!(session = id, sessions = state.sessions.len(), "Session registered");

        Registration {
            broadcaster: Arc::clone(self),
            id,
        }
    }

    /// Remove a session. Returns whether it was registered.
    pub fn deregister(&self, id: SessionId) -> bool {
        let mut state = self.state.lock();
        let removed = state.sessions.remove(&id).is_some();
        if removed {
            debug!(session = id, sessions = state.sessions.len(), "Session deregistered");
        }
        removed
    }
}

/// Keeps a session registered; deregisters it when dropped.
#[must_use = "dropping the registration deregisters the session"]
pub struct Registration {
    broadcaster: Arc<JobBroadcaster>,
    id: SessionId,
}

impl Registration {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broadcaster.deregister(self.id);
    }
}
