//! Domain types for JobDaemon
//!
//! A [`Job`] is a named command with a fixed repeat interval. The scheduling
//! loop advances its schedule; the RPC front door creates and edits it.

mod job;

pub use job::{Job, JobPatch, JobValidationError, MAX_INTERVAL_SECS, NewJob};
