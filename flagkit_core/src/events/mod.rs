//! The analytics event pipeline.
//!
//! Application threads record events through the non-blocking [`EventProcessor`] façade. A
//! single dispatcher thread consumes the bounded inbox and folds most evaluations into compact
//! summary counters, queueing full events only where required (tracked flags, open debug
//! windows, newly seen users). On each flush the buffered batch is handed to a small worker
//! pool that formats it into the wire JSON and delivers it through an [`EventSender`].
//!
//! Overload is handled by dropping: producers are never blocked and never observe an error.

mod buffer;
mod diagnostics;
mod dispatcher;
mod event;
mod formatter;
mod lru;
mod pool;
mod processor;
mod sender;
mod summarizer;

pub use event::{AliasEvent, CustomEvent, EvalEvent, Event, IdentifyEvent, IndexEvent};
pub use processor::EventProcessor;
pub use sender::{EventSender, HttpEventSender, SenderResult};
