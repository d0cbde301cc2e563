use super::event::Event;
use super::summarizer::{EventSummarizer, EventSummary};

/// The full events and summary handed to a flush worker. Ownership moves to the worker when a
/// flush submission succeeds.
#[derive(Debug)]
pub(crate) struct FlushPayload {
    pub events: Vec<Event>,
    pub summary: EventSummary,
}

/// The dispatcher-owned output buffer: full events queued for the next flush, the summarizer,
/// and drop accounting for overflow.
#[derive(Debug)]
pub(crate) struct EventBuffer {
    capacity: usize,
    events: Vec<Event>,
    summarizer: EventSummarizer,
    dropped_events: u64,
    /// Set while the buffer is saturated so the warning is logged once per episode.
    capacity_exceeded: bool,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> EventBuffer {
        EventBuffer {
            capacity,
            events: Vec::new(),
            summarizer: EventSummarizer::default(),
            dropped_events: 0,
            capacity_exceeded: false,
        }
    }

    /// Queue a full event for the next flush, dropping it if the buffer is at capacity.
    pub fn add_event(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.dropped_events += 1;
            if !self.capacity_exceeded {
                self.capacity_exceeded = true;
                log::warn!(
                    target: "flagkit",
                    "exceeded event buffer capacity; increase capacity to avoid dropping events"
                );
            }
            return;
        }
        self.capacity_exceeded = false;
        self.events.push(event);
    }

    pub fn add_to_summary(&mut self, event: &Event) {
        self.summarizer.summarize(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.summarizer.is_empty()
    }

    /// Move the buffered events and summary out, leaving the buffer empty.
    pub fn take_payload(&mut self) -> FlushPayload {
        FlushPayload {
            events: std::mem::take(&mut self.events),
            summary: self.summarizer.take(),
        }
    }

    /// Put back a payload whose flush submission was rejected, so the next flush retries it.
    pub fn restore(&mut self, payload: FlushPayload) {
        self.events = payload.events;
        self.summarizer.restore(payload.summary);
    }

    /// Drain the dropped-event counter for diagnostics.
    pub fn take_dropped_count(&mut self) -> u64 {
        std::mem::take(&mut self.dropped_events)
    }
}
