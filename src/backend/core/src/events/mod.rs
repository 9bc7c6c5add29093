//! Outbound engine events.
//!
//! The engines never spawn ad hoc background tasks for audit writes.
//! Instead every side effect worth observing is emitted as an explicit
//! [`EngineEvent`] through an [`EventSink`], and a separate worker (or
//! a test harness) drains the sink. This keeps the decision logic
//! unit-testable without a scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Event Identity & Envelope
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An engine event wrapped with delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier
    pub event_id: EventId,

    /// When the event was emitted
    pub emitted_at: DateTime<Utc>,

    /// Correlation ID for distributed tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// The event payload
    pub event: EngineEvent,
}

impl EventEnvelope {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            event_id: EventId::new(),
            emitted_at: Utc::now(),
            correlation_id: None,
            event,
        }
    }

    /// Set the correlation ID.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Events
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain events emitted by the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A first-time variant assignment was persisted.
    AssignmentCreated {
        experiment_id: Uuid,
        actor_id: String,
        variant_id: String,
    },

    /// An experiment event was appended to the store.
    ExperimentEventRecorded {
        experiment_id: Uuid,
        actor_id: String,
        variant_id: String,
        event_type: String,
        value: Option<f64>,
    },

    /// An experiment changed lifecycle status.
    ExperimentStatusChanged {
        experiment_id: Uuid,
        from: String,
        to: String,
    },

    /// A conversion was attributed across its touchpoints.
    ConversionAttributed {
        actor_id: String,
        model: String,
        conversion_value: f64,
        touchpoint_count: usize,
    },
}

impl EngineEvent {
    /// Short event type name, used for routing and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssignmentCreated { .. } => "assignment_created",
            Self::ExperimentEventRecorded { .. } => "experiment_event_recorded",
            Self::ExperimentStatusChanged { .. } => "experiment_status_changed",
            Self::ConversionAttributed { .. } => "conversion_attributed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sinks
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination for outbound engine events.
///
/// `emit` must never block request handling; implementations drop the
/// event (with a warning) rather than apply backpressure, since these
/// events are observational and recomputable from the store.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}

/// Sink that forwards envelopes to a tokio channel for a worker to drain.
pub struct MpscEventSink {
    tx: mpsc::Sender<EventEnvelope>,
}

impl MpscEventSink {
    /// Create a sink and its receiving half.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for MpscEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        if let Err(e) = self.tx.try_send(envelope) {
            warn!(error = %e, "Dropping engine event: sink full or closed");
        }
    }
}

/// Sink that discards everything. Useful in tests and embedded use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _envelope: EventEnvelope) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_construction() {
        let event = EngineEvent::AssignmentCreated {
            experiment_id: Uuid::new_v4(),
            actor_id: "actor-1".to_string(),
            variant_id: "control".to_string(),
        };

        let envelope = EventEnvelope::new(event).with_correlation("req-42");
        assert_eq!(envelope.correlation_id.as_deref(), Some("req-42"));
        assert_eq!(envelope.event.kind(), "assignment_created");
    }

    #[tokio::test]
    async fn test_mpsc_sink_delivers() {
        let (sink, mut rx) = MpscEventSink::new(4);

        sink.emit(EventEnvelope::new(EngineEvent::ExperimentStatusChanged {
            experiment_id: Uuid::new_v4(),
            from: "draft".to_string(),
            to: "running".to_string(),
        }));

        let received = rx.recv().await.expect("event delivered");
        assert_eq!(received.event.kind(), "experiment_status_changed");
    }

    #[test]
    fn test_full_sink_drops_instead_of_blocking() {
        let (sink, _rx) = MpscEventSink::new(1);
        let make = || {
            EventEnvelope::new(EngineEvent::ExperimentStatusChanged {
                experiment_id: Uuid::new_v4(),
                from: "running".to_string(),
                to: "paused".to_string(),
            })
        };

        sink.emit(make());
        // Second emit exceeds capacity; must not panic or block.
        sink.emit(make());
    }
}
