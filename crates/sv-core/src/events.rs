//! Job lifecycle events.
//!
//! [`EventBus`] wraps a bounded `tokio::sync::broadcast` channel with a ring
//! buffer of recent events so that late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job_id: JobId,
    },
    Progress {
        job_id: JobId,
        percent: u8,
    },
    Completed {
        job_id: JobId,
        output_path: PathBuf,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
    Cancelled {
        job_id: JobId,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Started { job_id }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => *job_id,
        }
    }

    /// Whether this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: JobEvent,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: JobEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Fan-out of job events plus a short backlog for late subscribers.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    /// Oldest first, at most `backlog_len` entries.
    backlog: RwLock<VecDeque<Event>>,
    backlog_len: usize,
}

impl EventBus {
    /// `capacity` bounds the broadcast channel; receivers more than
    /// `capacity` events behind see `Lagged`. The backlog keeps the last
    /// [`MAX_RECENT_EVENTS`].
    pub fn new(capacity: usize) -> Self {
        Self::with_backlog(capacity, MAX_RECENT_EVENTS)
    }

    pub fn with_backlog(capacity: usize, backlog_len: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            backlog: RwLock::new(VecDeque::with_capacity(backlog_len)),
            backlog_len,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Record `payload` in the backlog and broadcast it.
    pub fn emit(&self, payload: JobEvent) {
        let event = Event::new(payload);
        tracing::trace!(job_id = %event.payload.job_id(), event = ?event.payload, "job event");

        if self.backlog_len > 0 {
            let mut backlog = self.backlog.write();
            while backlog.len() >= self.backlog_len {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }

        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    /// Up to `n` events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.backlog.read().iter().rev().take(n).cloned().collect()
    }

    /// Backlog entries for one job, oldest first.
    pub fn history(&self, job_id: JobId) -> Vec<JobEvent> {
        self.backlog
            .read()
            .iter()
            .filter(|e| e.payload.job_id() == job_id)
            .map(|e| e.payload.clone())
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let job_id = JobId::new();
        bus.emit(JobEvent::Started { job_id });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload, JobEvent::Started { job_id });
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        let job_id = JobId::new();
        for percent in 0..150u32 {
            bus.emit(JobEvent::Progress {
                job_id,
                percent: (percent % 100) as u8,
            });
        }
        assert_eq!(bus.recent_events(200).len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn history_is_oldest_first_and_filtered() {
        let bus = EventBus::default();
        let a = JobId::new();
        let b = JobId::new();
        bus.emit(JobEvent::Started { job_id: a });
        bus.emit(JobEvent::Started { job_id: b });
        bus.emit(JobEvent::Progress { job_id: a, percent: 40 });
        bus.emit(JobEvent::Cancelled { job_id: a });

        let history = bus.history(a);
        assert_eq!(
            history,
            vec![
                JobEvent::Started { job_id: a },
                JobEvent::Progress { job_id: a, percent: 40 },
                JobEvent::Cancelled { job_id: a },
            ]
        );
        assert!(history.last().unwrap().is_terminal());
    }

    #[test]
    fn recent_events_are_newest_first() {
        let bus = EventBus::with_backlog(8, 2);
        let job_id = JobId::new();
        bus.emit(JobEvent::Started { job_id });
        bus.emit(JobEvent::Progress { job_id, percent: 10 });
        bus.emit(JobEvent::Progress { job_id, percent: 20 });

        let recent: Vec<_> = bus.recent_events(5).into_iter().map(|e| e.payload).collect();
        assert_eq!(
            recent,
            vec![
                JobEvent::Progress { job_id, percent: 20 },
                JobEvent::Progress { job_id, percent: 10 },
            ]
        );
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(JobEvent::Failed {
            job_id: JobId::new(),
            error: "test".into(),
        });
    }

    #[test]
    fn payload_is_tagged() {
        let job_id = JobId::new();
        let json = serde_json::to_value(JobEvent::Completed {
            job_id,
            output_path: PathBuf::from("/out/movie_standard.mp4"),
        })
        .unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["output_path"], "/out/movie_standard.mp4");
    }
}
