//! The Rust server-side SDK for Flagkit, a feature flagging and experimentation platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that evaluates feature flags for users, where each user
//! has a unique key and key-value attributes associated with it. Evaluation is local against an
//! in-memory store; each evaluation is reported to the Flagkit analytics service through a
//! background event pipeline that aggregates and de-duplicates events so that high-frequency
//! evaluation never blocks application threads.
//!
//! # Typed variations
//!
//! [`Client::variation`] returns a raw JSON value. For flags with a known type, the typed
//! helpers are more convenient:
//! - [`Client::bool_variation()`]
//! - [`Client::string_variation()`]
//! - [`Client::float_variation()`]
//!
//! # Shutdown
//!
//! Analytics events are buffered and delivered in batches. Call [`Client::close`] before the
//! process exits, otherwise the last batch of events may be lost. Events may also be dropped
//! while the pipeline is overloaded; delivery is best-effort by design.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages
//! under the `flagkit` target. Consider integrating a `log`-compatible logger implementation
//! for better visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;

pub use client::Client;
pub use config::ClientConfig;

pub use flagkit_core::eval::{Detail, ErrorKind, Reason, ReasonKind};
pub use flagkit_core::{Error, EventsConfig, Result, User};
