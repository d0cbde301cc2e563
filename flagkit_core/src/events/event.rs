use std::sync::mpsc::SyncSender;

use serde_json::Value;

use crate::eval::Reason;
use crate::flag::VariationIndex;
use crate::user::User;

/// Current wall-clock time in milliseconds since the epoch, the timestamp unit used throughout
/// the event pipeline.
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A single flag evaluation to be recorded.
///
/// `creation_date` is stamped by [`crate::events::EventProcessor`] when the event is recorded;
/// callers construct the event with [`EvalEvent::new`] and fill in the optional fields directly.
#[derive(Debug, Clone)]
pub struct EvalEvent {
    pub creation_date: u64,
    pub user: User,
    pub key: String,
    pub version: Option<u64>,
    pub variation: Option<VariationIndex>,
    pub value: Value,
    pub reason: Option<Reason>,
    pub default_value: Option<Value>,
    /// When true, a full feature event is emitted in addition to the summary counter.
    pub track_events: bool,
    /// Emit debug copies of this event while this timestamp is in the future.
    pub debug_until: Option<u64>,
    /// Set when this evaluation happened as a prerequisite of another flag.
    pub prereq_of: Option<String>,
}

impl EvalEvent {
    pub fn new(user: User, key: impl Into<String>, value: Value) -> EvalEvent {
        EvalEvent {
            creation_date: 0,
            user,
            key: key.into(),
            version: None,
            variation: None,
            value,
            reason: None,
            default_value: None,
            track_events: false,
            debug_until: None,
            prereq_of: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentifyEvent {
    pub creation_date: u64,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct CustomEvent {
    pub creation_date: u64,
    pub user: User,
    pub key: String,
    pub data: Option<Value>,
    pub metric_value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AliasEvent {
    pub creation_date: u64,
    pub key: String,
    pub context_kind: String,
    pub previous_key: String,
    pub previous_context_kind: String,
}

/// Synthetic event introducing a newly seen user; emitted by the dispatcher, never recorded
/// directly.
#[derive(Debug, Clone)]
pub struct IndexEvent {
    pub creation_date: u64,
    pub user: User,
}

/// An event travelling through the pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    Eval(EvalEvent),
    Identify(IdentifyEvent),
    Custom(CustomEvent),
    Alias(AliasEvent),
    Index(IndexEvent),
    /// A full copy of an evaluation emitted while its debug window is open.
    Debug(EvalEvent),
}

impl Event {
    pub(crate) fn user(&self) -> Option<&User> {
        match self {
            Event::Eval(e) | Event::Debug(e) => Some(&e.user),
            Event::Identify(e) => Some(&e.user),
            Event::Custom(e) => Some(&e.user),
            Event::Index(e) => Some(&e.user),
            Event::Alias(_) => None,
        }
    }

    pub(crate) fn creation_date(&self) -> u64 {
        match self {
            Event::Eval(e) | Event::Debug(e) => e.creation_date,
            Event::Identify(e) => e.creation_date,
            Event::Custom(e) => e.creation_date,
            Event::Alias(e) => e.creation_date,
            Event::Index(e) => e.creation_date,
        }
    }
}

/// Messages consumed by the dispatcher. Producers enqueue events and control sentinels through
/// the same bounded inbox so that they are processed in order.
#[derive(Debug)]
pub(crate) enum InboxMessage {
    Event(Box<Event>),
    /// Snapshot the output buffer and hand it to a flush worker.
    Flush,
    /// Clear the user-key cache.
    FlushUsers,
    /// Emit a periodic diagnostic event.
    Diagnostic,
    /// Wait for all outstanding flush workers, then acknowledge. Used by tests.
    TestSync(SyncSender<()>),
    /// Shut down worker pools, acknowledge, and exit the loop.
    Stop(SyncSender<()>),
}
