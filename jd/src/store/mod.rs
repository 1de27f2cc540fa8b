//! Job storage with actor pattern
//!
//! JobStore is the shared database handle: a pool of worker tasks, each
//! owning one SQLite connection, processes commands sent over a channel.
//! The handle is cheap to clone and safe to use from many tasks at once.

mod manager;
mod messages;
mod sqlite;

pub use manager::JobStore;
pub use messages::{StoreCommand, StoreError, StoreResponse};
