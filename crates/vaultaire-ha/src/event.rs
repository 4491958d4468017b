//! HA events: payloads, bounded history, and asynchronous subscriber fan-out.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Maximum number of events retained per emitter; the oldest are dropped.
pub const EVENT_HISTORY_LIMIT: usize = 1000;

/// Capacity of the dispatch channel; emission never blocks on it.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Event types emitted by the health and DR orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaEventType {
    BackendRegistered,
    BackendUnregistered,
    BackendDegraded,
    BackendFailed,
    BackendRecovering,
    BackendRecovered,
    CircuitOpened,
    FailoverStarted,
    FailoverCompleted,
    RegionDown,
    RecoveryStarted,
    RecoveryCompleted,
    BackupStarted,
}

/// An event produced by an HA orchestrator.
///
/// Subscribers receive copies; the payload carries the subject id (backend
/// or region), a human-readable message, and optional string details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaEvent {
    pub id: Uuid,
    pub event_type: HaEventType,
    /// Backend or region id the event concerns.
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl HaEvent {
    /// Build an event stamped with the current time.
    pub fn new(
        event_type: HaEventType,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            subject: subject.into(),
            timestamp: Utc::now(),
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Attach a detail key/value pair.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Handler invoked for each event. Runs on the bus dispatcher task, never
/// on the emitting thread.
pub type EventHandler = Arc<dyn Fn(&HaEvent) + Send + Sync>;

/// Bounded event fan-out shared by the HA orchestrators.
///
/// Emission appends to the history ring synchronously, then hands the
/// event to a dispatcher task over a bounded channel with a non-blocking
/// send; when the channel is full the event is dropped rather than
/// blocking the emitter (state remains re-derivable from status queries).
/// The dispatcher invokes handlers in emission order and isolates handler
/// panics from the emitter.
///
/// Must be created inside a Tokio runtime.
pub struct EventBus {
    tx: mpsc::Sender<HaEvent>,
    history: Arc<RwLock<VecDeque<HaEvent>>>,
    subscribers: Arc<RwLock<Vec<EventHandler>>>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus and spawn its dispatcher task.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::channel::<HaEvent>(EVENT_CHANNEL_CAPACITY);
        let subscribers: Arc<RwLock<Vec<EventHandler>>> = Arc::new(RwLock::new(Vec::new()));

        let dispatch_subscribers = subscribers.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Copy the list so handlers may subscribe re-entrantly.
                let handlers: Vec<EventHandler> = dispatch_subscribers.read().clone();
                for handler in handlers {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(&event)
                    }));
                    if outcome.is_err() {
                        tracing::error!(
                            "Event handler panicked on {:?} for {}",
                            event.event_type,
                            event.subject
                        );
                    }
                }
            }
        });

        Self {
            tx,
            history: Arc::new(RwLock::new(VecDeque::new())),
            subscribers,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a handler for all subsequent events.
    pub fn subscribe(&self, handler: EventHandler) {
        self.subscribers.write().push(handler);
    }

    /// Record and dispatch an event. Never blocks.
    pub fn emit(&self, event: HaEvent) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > EVENT_HISTORY_LIMIT {
                history.pop_front();
            }
        }

        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<HaEvent> {
        let history = self.history.read();
        history
            .iter()
            .skip(history.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    /// Full retained history, oldest first.
    pub fn history(&self) -> Vec<HaEvent> {
        self.history.read().iter().cloned().collect()
    }

    /// Number of events dropped due to a full dispatch channel.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            history: Arc::clone(&self.history),
            subscribers: Arc::clone(&self.subscribers),
            dropped: Arc::clone(&self.dropped),
        }
    }
}
