//! Flag evaluation.
//!
//! The evaluator is pure: it has no I/O of its own and reads flag and segment configuration
//! through the [`crate::store::DataStore`] trait, plus an optional [`BigSegmentsProvider`] for
//! externally stored segment memberships. Evaluation never fails with an `Err`; failures are
//! reported through [`Reason::error_kind`] and a null value.

mod bucketing;
mod evaluator;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::flag::{FeatureFlag, VariationIndex};

pub use evaluator::Evaluator;

/// The result of evaluating a flag for a user: the chosen value plus everything the event
/// pipeline needs to record the evaluation.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// The evaluation detail for the requested flag.
    pub detail: Detail,
    /// One record per prerequisite flag that was evaluated along the way, in evaluation order.
    /// The caller records each as its own evaluation event.
    pub prereq_evals: Vec<PrerequisiteEvalRecord>,
}

/// A prerequisite evaluation performed while evaluating a dependent flag.
#[derive(Debug, Clone)]
pub struct PrerequisiteEvalRecord {
    /// The prerequisite flag that was evaluated.
    pub flag: Arc<FeatureFlag>,
    /// Key of the flag that required the prerequisite.
    pub prereq_of: String,
    /// The prerequisite's own evaluation detail.
    pub detail: Detail,
}

/// The value selected by an evaluation together with how it was selected.
#[derive(Debug, Clone, PartialEq)]
pub struct Detail {
    /// The selected variation's value, or `Value::Null` on error.
    pub value: Value,
    /// Index of the selected variation, if one was selected.
    pub variation_index: Option<VariationIndex>,
    pub reason: Reason,
}

impl Detail {
    pub(crate) fn err(kind: ErrorKind) -> Detail {
        Detail {
            value: Value::Null,
            variation_index: None,
            reason: ReasonKind::Error { error_kind: kind }.into(),
        }
    }

    /// The value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// The value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

/// Why an evaluation produced its result. Serializes into the `reason` field of feature events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    #[serde(flatten)]
    kind: ReasonKind,
    /// Present when the evaluation consulted (or failed to consult) a big segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    big_segments_status: Option<BigSegmentsStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ReasonKind {
    /// The flag is off; the off variation was served.
    Off,
    /// No target or rule matched.
    Fallthrough {
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        in_experiment: bool,
    },
    /// The user key is listed in one of the flag's targets.
    TargetMatch,
    /// A rule matched.
    RuleMatch {
        rule_index: usize,
        rule_id: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        in_experiment: bool,
    },
    /// A prerequisite was off or served the wrong variation; the off variation was served.
    PrerequisiteFailed { prerequisite_key: String },
    /// The evaluation could not be carried out; the value is null.
    Error { error_kind: ErrorKind },
}

impl Reason {
    pub fn kind(&self) -> &ReasonKind {
        &self.kind
    }

    /// The error kind, if this is an error reason.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.kind {
            ReasonKind::Error { error_kind } => Some(error_kind),
            _ => None,
        }
    }

    pub fn big_segments_status(&self) -> Option<BigSegmentsStatus> {
        self.big_segments_status
    }

    pub(crate) fn with_big_segments_status(mut self, status: BigSegmentsStatus) -> Reason {
        self.big_segments_status = Some(status);
        self
    }
}

impl From<ReasonKind> for Reason {
    fn from(kind: ReasonKind) -> Reason {
        Reason { kind, big_segments_status: None }
    }
}

/// Kinds of evaluation failure, reported inside [`ReasonKind::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No user, or the user has no key.
    UserNotSpecified,
    /// The requested flag does not exist in the store.
    FlagNotFound,
    /// The flag configuration is inconsistent, e.g. a variation index out of range, a rule with
    /// neither variation nor rollout, or a prerequisite cycle.
    MalformedFlag,
}

/// Health of the big-segment store as observed during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    Healthy,
    Stale,
    NotConfigured,
    StoreError,
}

/// A user's membership query result from a big-segment store.
#[derive(Debug, Clone)]
pub struct BigSegmentsResult {
    /// Maps segment references (see [`crate::segment::Segment::reference`]) to inclusion. A
    /// missing entry means the store has no opinion and segment rules decide.
    pub membership: Option<HashMap<String, bool>>,
    pub status: BigSegmentsStatus,
}

/// External store answering per-user big-segment membership queries.
pub trait BigSegmentsProvider: Send + Sync {
    /// Query the membership map for `user_key`. Called at most once per evaluation.
    fn membership(&self, user_key: &str) -> BigSegmentsResult;
}
