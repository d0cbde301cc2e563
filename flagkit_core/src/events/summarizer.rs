use std::collections::HashMap;

use serde_json::Value;

use crate::flag::VariationIndex;

use super::event::{EvalEvent, Event};

/// Aggregated counters over evaluation events, keyed by flag and, within a flag, by
/// (variation, version).
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct EventSummary {
    /// Timestamp of the earliest contributing event, or 0 when the summary is empty.
    pub start_date: u64,
    /// Timestamp of the latest contributing event.
    pub end_date: u64,
    pub flags: HashMap<String, FlagSummary>,
}

impl EventSummary {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FlagSummary {
    /// The default value the caller supplied on the first evaluation seen for this flag.
    pub default_value: Value,
    /// In insertion order, which the output format preserves.
    pub counters: Vec<FlagCounter>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FlagCounter {
    pub variation: Option<VariationIndex>,
    pub version: Option<u64>,
    pub value: Value,
    pub count: u64,
}

/// Folds evaluation events into an [`EventSummary`]. Non-evaluation events are ignored.
#[derive(Debug, Default)]
pub(crate) struct EventSummarizer {
    summary: EventSummary,
}

impl EventSummarizer {
    pub fn summarize(&mut self, event: &Event) {
        if let Event::Eval(eval) = event {
            self.summarize_eval(eval);
        }
    }

    fn summarize_eval(&mut self, event: &EvalEvent) {
        let summary = &mut self.summary;
        if summary.start_date == 0 || event.creation_date < summary.start_date {
            summary.start_date = event.creation_date;
        }
        if event.creation_date > summary.end_date {
            summary.end_date = event.creation_date;
        }

        let flag = summary
            .flags
            .entry(event.key.clone())
            .or_insert_with(|| FlagSummary {
                default_value: event.default_value.clone().unwrap_or(Value::Null),
                counters: Vec::new(),
            });

        match flag
            .counters
            .iter_mut()
            .find(|counter| counter.variation == event.variation && counter.version == event.version)
        {
            Some(counter) => counter.count += 1,
            None => flag.counters.push(FlagCounter {
                variation: event.variation,
                version: event.version,
                value: event.value.clone(),
                count: 1,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }

    /// Hand off the current summary and reset to empty.
    pub fn take(&mut self) -> EventSummary {
        std::mem::take(&mut self.summary)
    }

    /// Put back a summary taken by [`EventSummarizer::take`] after a failed flush submission.
    /// Only valid while no events have been summarized in between.
    pub fn restore(&mut self, summary: EventSummary) {
        debug_assert!(self.summary.is_empty());
        self.summary = summary;
    }
}
