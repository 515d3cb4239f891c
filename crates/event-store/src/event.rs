use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use ulid::Ulid;

use crate::AggregateId;

/// Globally unique, time-sortable identifier for a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Ulid);

impl EventId {
    /// Creates a new event id from the current time.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
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

impl From<Ulid> for EventId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// Position marker in an aggregate's log, used for optimistic concurrency.
///
/// Revisions are 26-character ULID strings, so their lexicographic order is
/// their chronological order. [`Revision::initial`] (all zeros) means the
/// log has no events yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(Ulid);

impl Revision {
    /// The revision of an empty log.
    pub fn initial() -> Self {
        Self(Ulid::nil())
    }

    /// Returns true for the empty-log revision.
    pub fn is_initial(&self) -> bool {
        self.0.is_nil()
    }

    /// Creates a fresh revision strictly greater than `previous`.
    ///
    /// Uses the current time when it sorts after `previous`; otherwise the
    /// clock is behind (or in the same millisecond) and `previous` is
    /// incremented instead. Returns `None` only if the ULID space is exhausted.
    pub fn next_after(previous: Revision) -> Option<Self> {
        let candidate = Ulid::new();
        if candidate > previous.0 {
            Some(Self(candidate))
        } else {
            previous.0.increment().map(Self)
        }
    }

    /// Returns the underlying ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::initial()
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

impl From<Ulid> for Revision {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// A fact to be appended to an aggregate's log.
///
/// Produced by command handlers; the store turns it into a [`RecordedEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

impl DomainEvent {
    /// Creates an event from a raw JSON payload.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Creates an event from a serializable payload.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(payload)?))
    }
}

/// Provenance of an event: the request trace it belongs to and the event or
/// command that caused it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

/// An event once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// The aggregate whose log holds this event.
    pub aggregate: AggregateId,

    /// The event type (e.g. `"deposited"`).
    #[serde(rename = "type")]
    pub event_type: String,

    /// The event payload.
    pub data: serde_json::Value,

    /// Position of this event in the aggregate's log.
    pub revision: Revision,

    /// When the store accepted the event.
    pub timestamp: DateTime<Utc>,

    /// Correlation and causation ids.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl RecordedEvent {
    /// Creates a new recorded event builder.
    pub fn builder() -> RecordedEventBuilder {
        RecordedEventBuilder::default()
    }

    /// Deserializes the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Strips the storage fields, leaving the domain fact.
    pub fn to_domain_event(&self) -> DomainEvent {
        DomainEvent::new(self.event_type.clone(), self.data.clone())
    }
}

/// Builder for recorded events.
///
/// Stores assemble events this way when reading rows back; tests use it to
/// hand-craft logs for replay.
#[derive(Debug, Default)]
pub struct RecordedEventBuilder {
    id: Option<EventId>,
    aggregate: Option<AggregateId>,
    event_type: Option<String>,
    data: Option<serde_json::Value>,
    revision: Option<Revision>,
    timestamp: Option<DateTime<Utc>>,
    metadata: EventMetadata,
}

impl RecordedEventBuilder {
    /// Sets the event id. If not set, a new id will be generated.
    pub fn id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the owning aggregate.
    pub fn aggregate(mut self, aggregate: AggregateId) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a raw JSON value.
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the revision.
    pub fn revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the correlation and causation ids.
    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builds the event, returning None if aggregate, type, data or revision
    /// is missing.
    pub fn try_build(self) -> Option<RecordedEvent> {
        Some(RecordedEvent {
            id: self.id.unwrap_or_default(),
            aggregate: self.aggregate?,
            event_type: self.event_type?,
            data: self.data?,
            revision: self.revision?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        })
    }
}
