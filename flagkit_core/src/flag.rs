//! Feature flag configuration as served by the flag delivery endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index into a flag's `variations` list.
pub type VariationIndex = usize;

/// A feature flag definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub rules: Vec<FlagRule>,
    #[serde(default)]
    pub fallthrough: VariationOrRollout,
    pub off_variation: Option<VariationIndex>,
    #[serde(default)]
    pub variations: Vec<Value>,
    #[serde(default)]
    pub salt: String,
    /// When true, every evaluation of this flag emits a full feature event in addition to being
    /// summarized.
    #[serde(default)]
    pub track_events: bool,
    /// While this timestamp (ms since epoch) is in the future relative to both the local clock
    /// and the last known server clock, evaluations emit debug events.
    pub debug_events_until_date: Option<u64>,
}

/// A prerequisite flag that must evaluate to a specific variation before the dependent flag can
/// proceed past the prerequisite check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub key: String,
    pub variation: VariationIndex,
}

/// Individual user keys pinned to a specific variation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: VariationIndex,
}

/// A targeting rule: a conjunction of clauses plus the variation (or rollout) served on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
}

/// Either a fixed variation or a percentage rollout. Exactly one of the fields is normally set;
/// neither being set is a flag configuration error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationOrRollout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationIndex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<Rollout>,
}

/// A percentage rollout over a flag's variations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub kind: RolloutKind,
    /// Overrides `{key}.{salt}` as the bucketing input when set, so that experiments with the
    /// same seed bucket users identically across flags.
    pub seed: Option<i64>,
    #[serde(default)]
    pub variations: Vec<WeightedVariation>,
    pub bucket_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RolloutKind {
    #[default]
    Rollout,
    Experiment,
}

/// One slice of a rollout. `weight` is in units of 0.001%, so all weights in a rollout normally
/// sum to 100_000.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedVariation {
    pub variation: VariationIndex,
    pub weight: u64,
    /// Excludes this slice from experiment analysis; `inExperiment` is false for users bucketed
    /// into it.
    #[serde(default)]
    pub untracked: bool,
}

/// A single condition inside a flag or segment rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    #[serde(default)]
    pub attribute: String,
    pub op: Operator,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub negate: bool,
}

/// Clause operators. Operators introduced by newer server versions deserialize as
/// [`Operator::Unknown`] and never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    In,
    EndsWith,
    StartsWith,
    Matches,
    Contains,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SegmentMatch,
    SemVerEqual,
    SemVerLessThan,
    SemVerGreaterThan,
    #[serde(other)]
    Unknown,
}

impl FeatureFlag {
    /// The value of the variation at `index`, if the index is valid.
    pub fn variation_value(&self, index: VariationIndex) -> Option<&Value> {
        self.variations.get(index)
    }
}
