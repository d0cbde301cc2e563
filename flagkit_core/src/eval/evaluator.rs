use serde_json::Value;

use crate::flag::{Clause, FeatureFlag, Operator, RolloutKind, VariationIndex, VariationOrRollout};
use crate::segment::{Segment, SegmentRule};
use crate::store::DataStore;
use crate::user::User;

use super::bucketing::bucket_user;
use super::{
    BigSegmentsProvider, BigSegmentsResult, BigSegmentsStatus, Detail, ErrorKind, EvalResult,
    PrerequisiteEvalRecord, Reason, ReasonKind,
};

/// Evaluates flags against a data store.
///
/// An `Evaluator` borrows its collaborators and is cheap to construct per evaluation.
pub struct Evaluator<'a> {
    store: &'a dyn DataStore,
    big_segments: Option<&'a dyn BigSegmentsProvider>,
}

/// Per-evaluation scratch state.
#[derive(Default)]
struct EvalState {
    prereq_evals: Vec<PrerequisiteEvalRecord>,
    /// Keys of flags whose prerequisites are currently being evaluated, for cycle detection.
    prereq_chain: Vec<String>,
    /// Big-segment membership is queried at most once per evaluation.
    big_segments: Option<BigSegmentsResult>,
    big_segments_status: Option<BigSegmentsStatus>,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a dyn DataStore) -> Evaluator<'a> {
        Evaluator { store, big_segments: None }
    }

    /// Attach a big-segment membership provider.
    pub fn with_big_segments(mut self, provider: &'a dyn BigSegmentsProvider) -> Evaluator<'a> {
        self.big_segments = Some(provider);
        self
    }

    /// Evaluate `flag` for `user`.
    pub fn evaluate(&self, flag: &FeatureFlag, user: &User) -> EvalResult {
        let mut state = EvalState::default();

        let mut detail = if user.key().is_empty() {
            Detail::err(ErrorKind::UserNotSpecified)
        } else {
            self.evaluate_internal(flag, user, &mut state)
        };

        if let Some(status) = state.big_segments_status {
            detail.reason = detail.reason.with_big_segments_status(status);
        }

        let flag_key = flag.key.as_str();
        let user_key = user.key();
        log::trace!(target: "flagkit", flag_key, user_key; "evaluated a flag");

        EvalResult { detail, prereq_evals: state.prereq_evals }
    }

    fn evaluate_internal(&self, flag: &FeatureFlag, user: &User, state: &mut EvalState) -> Detail {
        if state.prereq_chain.iter().any(|key| key == &flag.key) {
            log::warn!(
                target: "flagkit",
                "prerequisite cycle detected involving flag {:?}",
                flag.key
            );
            return Detail::err(ErrorKind::MalformedFlag);
        }

        if !flag.on {
            return self.off_detail(flag, ReasonKind::Off.into());
        }

        if let Some(failed_key) = self.check_prerequisites(flag, user, state) {
            return self.off_detail(
                flag,
                ReasonKind::PrerequisiteFailed { prerequisite_key: failed_key }.into(),
            );
        }

        for target in &flag.targets {
            if target.values.iter().any(|value| value == user.key()) {
                return self.variation_detail(flag, target.variation, ReasonKind::TargetMatch.into());
            }
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            if rule
                .clauses
                .iter()
                .all(|clause| self.clause_matches(clause, user, state))
            {
                return self.resolve(flag, &rule.variation_or_rollout, user, |in_experiment| {
                    ReasonKind::RuleMatch {
                        rule_index,
                        rule_id: rule.id.clone(),
                        in_experiment,
                    }
                    .into()
                });
            }
        }

        self.resolve(flag, &flag.fallthrough, user, |in_experiment| {
            ReasonKind::Fallthrough { in_experiment }.into()
        })
    }

    /// Evaluate every prerequisite in order, recording each evaluation, and return the key of
    /// the first one that fails to match.
    fn check_prerequisites(
        &self,
        flag: &FeatureFlag,
        user: &User,
        state: &mut EvalState,
    ) -> Option<String> {
        for prereq in &flag.prerequisites {
            let matched = match self.store.flag(&prereq.key) {
                None => false,
                Some(prereq_flag) => {
                    state.prereq_chain.push(flag.key.clone());
                    let detail = self.evaluate_internal(&prereq_flag, user, state);
                    state.prereq_chain.pop();

                    let matched =
                        prereq_flag.on && detail.variation_index == Some(prereq.variation);
                    state.prereq_evals.push(PrerequisiteEvalRecord {
                        flag: prereq_flag,
                        prereq_of: flag.key.clone(),
                        detail,
                    });
                    matched
                }
            };
            if !matched {
                return Some(prereq.key.clone());
            }
        }
        None
    }

    fn off_detail(&self, flag: &FeatureFlag, reason: Reason) -> Detail {
        match flag.off_variation {
            Some(index) => self.variation_detail(flag, index, reason),
            None => Detail { value: Value::Null, variation_index: None, reason },
        }
    }

    fn variation_detail(&self, flag: &FeatureFlag, index: VariationIndex, reason: Reason) -> Detail {
        match flag.variation_value(index) {
            Some(value) => Detail {
                value: value.clone(),
                variation_index: Some(index),
                reason,
            },
            None => Detail::err(ErrorKind::MalformedFlag),
        }
    }

    fn resolve(
        &self,
        flag: &FeatureFlag,
        variation_or_rollout: &VariationOrRollout,
        user: &User,
        make_reason: impl FnOnce(bool) -> Reason,
    ) -> Detail {
        match self.variation_index_for(flag, variation_or_rollout, user) {
            Some((index, in_experiment)) => {
                self.variation_detail(flag, index, make_reason(in_experiment))
            }
            None => Detail::err(ErrorKind::MalformedFlag),
        }
    }

    fn variation_index_for(
        &self,
        flag: &FeatureFlag,
        variation_or_rollout: &VariationOrRollout,
        user: &User,
    ) -> Option<(VariationIndex, bool)> {
        if let Some(index) = variation_or_rollout.variation {
            return Some((index, false));
        }

        let rollout = variation_or_rollout.rollout.as_ref()?;
        if rollout.variations.is_empty() {
            return None;
        }

        let bucket_by = rollout.bucket_by.as_deref().unwrap_or("key");
        let bucket = bucket_user(rollout.seed, user, bucket_by, &flag.key, &flag.salt);
        let experiment = rollout.kind == RolloutKind::Experiment;

        let mut sum = 0.0;
        for weighted in &rollout.variations {
            sum += weighted.weight as f64 / 100_000.0;
            if bucket < sum {
                return Some((weighted.variation, experiment && !weighted.untracked));
            }
        }

        // Weights summing below 100% leave a remainder; it lands in the last slice.
        let last = rollout.variations.last().unwrap();
        Some((last.variation, experiment && !last.untracked))
    }

    fn clause_matches(&self, clause: &Clause, user: &User, state: &mut EvalState) -> bool {
        if clause.op == Operator::SegmentMatch {
            let matched = clause.values.iter().filter_map(Value::as_str).any(|key| {
                self.store
                    .segment(key)
                    .map_or(false, |segment| self.segment_matches(&segment, user, state))
            });
            return matched != clause.negate;
        }

        clause_matches_attribute(clause, user)
    }

    fn segment_matches(&self, segment: &Segment, user: &User, state: &mut EvalState) -> bool {
        if segment.unbounded {
            let Some(reference) = segment.reference() else {
                state.big_segments_status = Some(BigSegmentsStatus::NotConfigured);
                return false;
            };

            if state.big_segments.is_none() {
                let result = match self.big_segments {
                    Some(provider) => provider.membership(user.key()),
                    None => BigSegmentsResult {
                        membership: None,
                        status: BigSegmentsStatus::NotConfigured,
                    },
                };
                state.big_segments_status = Some(result.status);
                state.big_segments = Some(result);
            }

            if let Some(membership) = state
                .big_segments
                .as_ref()
                .and_then(|result| result.membership.as_ref())
            {
                if let Some(&included) = membership.get(&reference) {
                    return included;
                }
            }

            // The store has no opinion: fall back to the segment's rules, skipping the
            // include/exclude lists which are unbounded for big segments.
            segment.rules.iter().any(|rule| segment_rule_matches(segment, rule, user))
        } else {
            if segment.included.iter().any(|key| key == user.key()) {
                return true;
            }
            if segment.excluded.iter().any(|key| key == user.key()) {
                return false;
            }
            segment.rules.iter().any(|rule| segment_rule_matches(segment, rule, user))
        }
    }
}

fn segment_rule_matches(segment: &Segment, rule: &SegmentRule, user: &User) -> bool {
    if !rule
        .clauses
        .iter()
        .all(|clause| clause_matches_attribute(clause, user))
    {
        return false;
    }

    let Some(weight) = rule.weight else {
        return true;
    };
    let bucket_by = rule.bucket_by.as_deref().unwrap_or("key");
    bucket_user(None, user, bucket_by, &segment.key, &segment.salt) < weight as f64 / 100_000.0
}

/// Match a clause against a user attribute. A missing attribute fails the clause before
/// negation is applied.
fn clause_matches_attribute(clause: &Clause, user: &User) -> bool {
    let Some(user_value) = user.attribute(&clause.attribute) else {
        return false;
    };
    if user_value.is_null() {
        return false;
    }

    let matched = match &user_value {
        Value::Array(items) => items.iter().any(|item| {
            clause
                .values
                .iter()
                .any(|clause_value| operator_matches(clause.op, item, clause_value))
        }),
        scalar => clause
            .values
            .iter()
            .any(|clause_value| operator_matches(clause.op, scalar, clause_value)),
    };

    matched != clause.negate
}

fn operator_matches(op: Operator, user_value: &Value, clause_value: &Value) -> bool {
    match op {
        Operator::In => values_equal(user_value, clause_value),
        Operator::StartsWith => {
            str_pair(user_value, clause_value).map_or(false, |(u, c)| u.starts_with(c))
        }
        Operator::EndsWith => {
            str_pair(user_value, clause_value).map_or(false, |(u, c)| u.ends_with(c))
        }
        Operator::Contains => {
            str_pair(user_value, clause_value).map_or(false, |(u, c)| u.contains(c))
        }
        Operator::Matches => str_pair(user_value, clause_value)
            .and_then(|(u, c)| regex::Regex::new(c).ok().map(|re| re.is_match(u)))
            .unwrap_or(false),
        Operator::LessThan => num_pair(user_value, clause_value).map_or(false, |(u, c)| u < c),
        Operator::LessThanOrEqual => {
            num_pair(user_value, clause_value).map_or(false, |(u, c)| u <= c)
        }
        Operator::GreaterThan => num_pair(user_value, clause_value).map_or(false, |(u, c)| u > c),
        Operator::GreaterThanOrEqual => {
            num_pair(user_value, clause_value).map_or(false, |(u, c)| u >= c)
        }
        Operator::Before => time_pair(user_value, clause_value).map_or(false, |(u, c)| u < c),
        Operator::After => time_pair(user_value, clause_value).map_or(false, |(u, c)| u > c),
        Operator::SemVerEqual => {
            semver_pair(user_value, clause_value).map_or(false, |(u, c)| u == c)
        }
        Operator::SemVerLessThan => {
            semver_pair(user_value, clause_value).map_or(false, |(u, c)| u < c)
        }
        Operator::SemVerGreaterThan => {
            semver_pair(user_value, clause_value).map_or(false, |(u, c)| u > c)
        }
        // segmentMatch is resolved one level up; inside attribute matching it never holds.
        Operator::SegmentMatch | Operator::Unknown => false,
    }
}

/// Equality with numeric loosening: `1` and `1.0` are the same value on the wire.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn str_pair<'v>(a: &'v Value, b: &'v Value) -> Option<(&'v str, &'v str)> {
    Some((a.as_str()?, b.as_str()?))
}

fn num_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((a.as_f64()?, b.as_f64()?))
}

/// A point in time for `before`/`after`: milliseconds since epoch, or an RFC 3339 string.
fn time_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((parse_time_ms(a)?, parse_time_ms(b)?))
}

fn parse_time_ms(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.timestamp_millis() as f64),
        _ => None,
    }
}

fn semver_pair(a: &Value, b: &Value) -> Option<(semver::Version, semver::Version)> {
    Some((parse_semver(a)?, parse_semver(b)?))
}

/// Parse a semantic version, completing missing minor/patch components so that `"2"` and
/// `"2.0"` compare like `"2.0.0"`.
fn parse_semver(value: &Value) -> Option<semver::Version> {
    let s = value.as_str()?;
    if let Ok(version) = semver::Version::parse(s) {
        return Some(version);
    }

    let split_at = s.find(|c| c == '-' || c == '+').unwrap_or(s.len());
    let (numeric, rest) = s.split_at(split_at);
    if numeric.is_empty() || !numeric.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let mut padded = numeric.to_owned();
    for _ in numeric.matches('.').count()..2 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    semver::Version::parse(&padded).ok()
}
