//! # Event Bus System
//!
//! Provides an event-driven architecture for the sync engine using a broadcast channel.
//! Components publish what happened (a sync finished, a job is being retried, a
//! provider's circuit opened) and hosts subscribe without the components knowing
//! about them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Orchestrator ├──────────────>│           │
//! └──────────────┘               │           │
//!                                │ EventBus  │
//! ┌──────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │  Job Queue   ├──────────────>│  channel) ├─────────────────>│ Subscriber │
//! └──────────────┘               │           │                  └────────────┘
//!                                │           │
//! ┌──────────────┐     emit      │           │
//! │   Workers    ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::events::{CoreEvent, EventBus, JobEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Job(JobEvent::Enqueued {
//!         job_id: "job-1".to_string(),
//!         job_type: "catalog_sync".to_string(),
//!         priority: 0,
//!     }))
//!     .ok();
//! ```
//!
//! Emitting with no subscribers returns an error; publishers ignore it with `.ok()`.
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n` events.
//!   Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: all senders have been dropped. Treat as shutdown.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync run lifecycle
    Sync(SyncEvent),
    /// Background job lifecycle
    Job(JobEvent),
    /// Provider health and credentials
    Provider(ProviderEvent),
    /// Loop worker lifecycle
    Worker(WorkerEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Job(e) => e.description(),
            CoreEvent::Provider(e) => e.description(),
            CoreEvent::Worker(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Job(JobEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ProviderFailed { .. })
            | CoreEvent::Job(JobEvent::Retrying { .. })
            | CoreEvent::Provider(ProviderEvent::CircuitOpened { .. })
            | CoreEvent::Worker(WorkerEvent::TickFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Job(JobEvent::Succeeded { .. })
            | CoreEvent::Provider(ProviderEvent::CircuitClosed { .. })
            | CoreEvent::Provider(ProviderEvent::CredentialChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted by the sync orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A sync run began.
    Started {
        operation: String,
        /// "fallback" or "aggregate"
        mode: String,
        /// Providers in priority order
        providers: Vec<String>,
    },
    /// A provider was not queried.
    ProviderSkipped {
        operation: String,
        provider: String,
        reason: String,
    },
    /// A provider fetch failed; the run continued with the next provider.
    ProviderFailed {
        operation: String,
        provider: String,
        message: String,
        recoverable: bool,
    },
    /// A sync run finished.
    Completed {
        operation: String,
        /// "succeeded", "partially_succeeded", "failed" or "skipped"
        outcome: String,
        created: u64,
        updated: u64,
        unchanged: u64,
        errors: u64,
        duration_ms: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::ProviderSkipped { .. } => "Provider skipped",
            SyncEvent::ProviderFailed { .. } => "Provider fetch failed",
            SyncEvent::Completed { .. } => "Sync completed",
        }
    }
}

// ============================================================================
// Job Events
// ============================================================================

/// Events emitted by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum JobEvent {
    Enqueued {
        job_id: String,
        job_type: String,
        priority: i32,
    },
    Started {
        job_id: String,
        job_type: String,
        /// 1-based attempt number
        attempt: u32,
    },
    Succeeded {
        job_id: String,
        job_type: String,
        attempts: u32,
    },
    /// A failed attempt was rescheduled.
    Retrying {
        job_id: String,
        job_type: String,
        attempts: u32,
        /// Unix milliseconds
        next_run_at: i64,
        message: String,
    },
    /// The job reached a terminal failure.
    Failed {
        job_id: String,
        job_type: String,
        attempts: u32,
        message: String,
    },
}

impl JobEvent {
    fn description(&self) -> &str {
        match self {
            JobEvent::Enqueued { .. } => "Job enqueued",
            JobEvent::Started { .. } => "Job started",
            JobEvent::Succeeded { .. } => "Job succeeded",
            JobEvent::Retrying { .. } => "Job scheduled for retry",
            JobEvent::Failed { .. } => "Job failed",
        }
    }
}

// ============================================================================
// Provider Events
// ============================================================================

/// Provider health and credential changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProviderEvent {
    CircuitOpened {
        provider: String,
        consecutive_failures: u32,
        cooldown_secs: u64,
    },
    CircuitHalfOpen {
        provider: String,
    },
    CircuitClosed {
        provider: String,
    },
    CredentialChanged {
        provider: String,
        connected: bool,
    },
}

impl ProviderEvent {
    fn description(&self) -> &str {
        match self {
            ProviderEvent::CircuitOpened { .. } => "Provider circuit opened",
            ProviderEvent::CircuitHalfOpen { .. } => "Provider circuit half-open",
            ProviderEvent::CircuitClosed { .. } => "Provider circuit closed",
            ProviderEvent::CredentialChanged { .. } => "Provider credential changed",
        }
    }
}

// ============================================================================
// Worker Events
// ============================================================================

/// Loop worker lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum WorkerEvent {
    Started { worker: String },
    Stopped { worker: String },
    TickFailed { worker: String, message: String },
}

impl WorkerEvent {
    fn description(&self) -> &str {
        match self {
            WorkerEvent::Started { .. } => "Worker started",
            WorkerEvent::Stopped { .. } => "Worker stopped",
            WorkerEvent::TickFailed { .. } => "Worker tick failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueued(job_id: &str) -> CoreEvent {
        CoreEvent::Job(JobEvent::Enqueued {
            job_id: job_id.to_string(),
            job_type: "catalog_sync".to_string(),
            priority: 0,
        })
    }

    #[core_async::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[core_async::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(enqueued("job-1")).is_err());
    }

    #[core_async::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::Started {
            operation: "saved_albums".to_string(),
            mode: "aggregate".to_string(),
            providers: vec!["spotify".to_string(), "deezer".to_string()],
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[core_async::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(enqueued(&format!("job-{}", i))).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Job(JobEvent::Failed {
            job_id: "job-1".to_string(),
            job_type: "catalog_sync".to_string(),
            attempts: 3,
            message: "provider unavailable".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let retrying = CoreEvent::Job(JobEvent::Retrying {
            job_id: "job-1".to_string(),
            job_type: "catalog_sync".to_string(),
            attempts: 1,
            next_run_at: 0,
            message: "busy".to_string(),
        });
        assert_eq!(retrying.severity(), EventSeverity::Warning);

        let closed = CoreEvent::Provider(ProviderEvent::CircuitClosed {
            provider: "deezer".to_string(),
        });
        assert_eq!(closed.severity(), EventSeverity::Info);

        assert_eq!(enqueued("job-2").severity(), EventSeverity::Debug);
        assert_eq!(enqueued("job-2").description(), "Job enqueued");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::Completed {
            operation: "saved_tracks".to_string(),
            outcome: "succeeded".to_string(),
            created: 1,
            updated: 1,
            unchanged: 0,
            errors: 0,
            duration_ms: 12,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Sync");
        assert_eq!(json["payload"]["event"], "Completed");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
