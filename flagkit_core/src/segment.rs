//! User segment configuration as served by the flag delivery endpoints.

use serde::{Deserialize, Serialize};

use crate::flag::Clause;

/// A user segment. Segments are referenced from flag rules via the `segmentMatch` operator.
///
/// A segment with `unbounded` set is a big segment: its membership is too large to ship in the
/// configuration document and is queried per user from an external store instead, keyed by
/// [`Segment::reference`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub included: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub unbounded: bool,
    /// Stamp distinguishing re-creations of a big segment; part of the membership reference.
    pub generation: Option<u64>,
}

/// A rule inside a segment: all clauses must match, then an optional percentage of the matching
/// users is carved out via `weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    #[serde(default)]
    pub clauses: Vec<Clause>,
    /// In units of 0.001%; unset means the rule matches outright.
    pub weight: Option<u64>,
    pub bucket_by: Option<String>,
}

impl Segment {
    /// The membership key for this segment in a big-segment store, e.g. `"seg.g4"`.
    ///
    /// Returns `None` for segments without a generation, which cannot be queried.
    pub fn reference(&self) -> Option<String> {
        self.generation
            .map(|generation| format!("{}.g{}", self.key, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::Segment;

    #[test]
    fn reference_requires_generation() {
        let mut segment: Segment = serde_json::from_str(
            r#"{"key": "seg", "version": 1, "unbounded": true, "generation": 4}"#,
        )
        .unwrap();
        assert_eq!(segment.reference(), Some("seg.g4".to_owned()));

        segment.generation = None;
        assert_eq!(segment.reference(), None);
    }
}
