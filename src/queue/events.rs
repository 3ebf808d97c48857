//! Queue lifecycle events and the shared error sink

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::job::Job;
use super::Queue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    /// A job's processor returned an error
    Failed,
    /// A job's lock expired before it completed
    Stalled,
    /// Queue-level fault (broker unreachable, corrupt payload)
    Error,
}

impl QueueEventKind {
    /// Listeners every queue must carry
    pub const STANDARD: [QueueEventKind; 3] = [
        QueueEventKind::Failed,
        QueueEventKind::Stalled,
        QueueEventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventKind::Failed => "failed",
            QueueEventKind::Stalled => "stalled",
            QueueEventKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Failed { job: Job, reason: String },
    Stalled { job: Job },
    Error { message: String },
}

impl QueueEvent {
    pub fn kind(&self) -> QueueEventKind {
        match self {
            QueueEvent::Failed { .. } => QueueEventKind::Failed,
            QueueEvent::Stalled { .. } => QueueEventKind::Stalled,
            QueueEvent::Error { .. } => QueueEventKind::Error,
        }
    }
}

pub trait QueueListener: Send + Sync {
    fn on_event(&self, queue: &str, event: &QueueEvent);
}

/// Central error-reporting sink shared by every queue.
#[derive(Debug, Default)]
pub struct ErrorSink {
    failed: AtomicU64,
    stalled: AtomicU64,
    errors: AtomicU64,
}

/// Events seen by an [`ErrorSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCounts {
    pub failed: u64,
    pub stalled: u64,
    pub errors: u64,
}

impl ErrorSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            failed: self.failed.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl QueueListener for ErrorSink {
    fn on_event(&self, queue: &str, event: &QueueEvent) {
        match event {
            QueueEvent::Failed { job, reason } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    queue,
                    job_id = %job.id,
                    job_name = %job.name,
                    reason = %reason,
                    "Job failed"
                );
            }
            QueueEvent::Stalled { job } => {
                self.stalled.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(queue, job_id = %job.id, job_name = %job.name, "Job stalled");
            }
            QueueEvent::Error { message } => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(queue, error = %message, "Queue error");
            }
        }
    }
}

/// Subscribe `sink` to the `failed`, `stalled` and `error` events of `queue`.
pub fn attach_standard_listeners(queue: &Queue, sink: Arc<ErrorSink>) {
    for kind in QueueEventKind::STANDARD {
        queue.on(kind, sink.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_counts_by_kind() {
        let sink = ErrorSink::new();
        let job = Job::new("SessionQueue", "purge", &serde_json::json!({})).unwrap();

        sink.on_event(
            "SessionQueue",
            &QueueEvent::Failed {
                job: job.clone(),
                reason: "boom".to_string(),
            },
        );
        sink.on_event("SessionQueue", &QueueEvent::Stalled { job });
        sink.on_event(
            "SessionQueue",
            &QueueEvent::Error {
                message: "connection refused".to_string(),
            },
        );

        assert_eq!(
            sink.counts(),
            SinkCounts {
                failed: 1,
                stalled: 1,
                errors: 1
            }
        );
    }

    #[test]
    fn test_event_kinds() {
        let event = QueueEvent::Error {
            message: "x".to_string(),
        };
        assert_eq!(event.kind(), QueueEventKind::Error);
        assert_eq!(event.kind().as_str(), "error");
    }
}
