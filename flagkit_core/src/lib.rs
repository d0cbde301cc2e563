//! `flagkit_core` is the common core of the Flagkit server-side SDKs: flag evaluation and the
//! analytics event pipeline. If you're a Flagkit user, you probably want the `flagkit` crate
//! instead.
//!
//! # Overview
//!
//! The crate is organized as a set of building blocks:
//!
//! - [`eval`] evaluates flags for users against a [`store::DataStore`], with no I/O of its own.
//! - [`events`] aggregates, de-duplicates, and periodically delivers analytics events with
//!   bounded memory; producers are never blocked.
//! - [`store`] holds the flag and segment configuration fed by a configuration updater.
//!
//! # Versioning
//!
//! Versions follow semver, but as an internal building block of the SDKs this crate breaks its
//! API whenever the SDKs need it to; pin a version if you depend on it directly.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod eval;
pub mod events;
pub mod flag;
pub mod segment;
pub mod store;

mod error;
mod user;

pub use config::EventsConfig;
pub use error::{Error, Result};
pub use user::User;
