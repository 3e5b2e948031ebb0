//! Event system for TBO services
//!
//! Provides the shared event definitions and the `EventBus` used to fan
//! them out (SSE clients, certificate issuance, notification bridges).
//! Events are emitted only after the corresponding write has committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::AccessType;

/// TBO event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TboEvent {
    /// First grant for a (user, content) pair
    EntitlementGranted {
        user_id: Uuid,
        content_id: Uuid,
        access_type: AccessType,
        payment_ref: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// A new payment replaced the previous grant; progress carried over
    EntitlementRenewed {
        user_id: Uuid,
        content_id: Uuid,
        access_type: AccessType,
        payment_ref: String,
        previous_payment_ref: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// Validity window changed without a new payment
    EntitlementExtended {
        user_id: Uuid,
        content_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    EntitlementRevoked {
        user_id: Uuid,
        content_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A playback position report was folded into the record
    ProgressRecorded {
        user_id: Uuid,
        content_id: Uuid,
        position_seconds: f64,
        percentage: f64,
        watch_session_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// Learner crossed the completion threshold (emitted once per record)
    ///
    /// Consumed by certificate issuance and notifications; this service
    /// performs neither.
    ContentCompleted {
        user_id: Uuid,
        content_id: Uuid,
        completed_at: DateTime<Utc>,
    },
}

impl TboEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            TboEvent::EntitlementGranted { .. } => "EntitlementGranted",
            TboEvent::EntitlementRenewed { .. } => "EntitlementRenewed",
            TboEvent::EntitlementExtended { .. } => "EntitlementExtended",
            TboEvent::EntitlementRevoked { .. } => "EntitlementRevoked",
            TboEvent::ProgressRecorded { .. } => "ProgressRecorded",
            TboEvent::ContentCompleted { .. } => "ContentCompleted",
        }
    }

    /// User the event concerns
    pub fn user_id(&self) -> Uuid {
        match self {
            TboEvent::EntitlementGranted { user_id, .. }
            | TboEvent::EntitlementRenewed { user_id, .. }
            | TboEvent::EntitlementExtended { user_id, .. }
            | TboEvent::EntitlementRevoked { user_id, .. }
            | TboEvent::ProgressRecorded { user_id, .. }
            | TboEvent::ContentCompleted { user_id, .. } => *user_id,
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers, and
/// receivers clean up when dropped.
///
/// # Examples
///
/// ```
/// use tbo_common::events::{EventBus, TboEvent};
/// use uuid::Uuid;
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(TboEvent::EntitlementRevoked {
///     user_id: Uuid::new_v4(),
///     content_id: Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TboEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TboEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: TboEvent) -> Result<usize, broadcast::error::SendError<TboEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: TboEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
