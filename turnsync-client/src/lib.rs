#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.
#![allow(clippy::module_name_repetitions)] // Store and engine types keep their module prefix.

//! Transcript synchronization for turnsync.
//!
//! A live conversation is kept consistent from two sources: a push channel
//! that may drop, duplicate or reorder events, and pull fetches that return
//! authoritative but possibly stale slices. The core is sans-IO:
//!
//! - [`store::TurnStore`] holds the ordered, deduplicated transcript.
//! - [`reconciler::Reconciler`] shows sends optimistically and settles them.
//! - [`fetcher::Fetcher`] runs single-flight catch-up fetches.
//! - [`connection::ConnectionManager`] drives the push channel lifecycle.
//!
//! [`engine::SyncEngine`] ties them to one conversation, and
//! [`driver::SyncClient`] runs the engine against a [`transport::Transport`]
//! on a tokio task.

pub mod connection;
pub mod cursor;
pub mod driver;
pub mod effect;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod reconciler;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionState, classify, transition};
pub use driver::{SyncClient, SyncHandle};
pub use effect::{Effect, FetchTicket, Notification, SendPayload, TimerId};
pub use engine::{SyncEngine, TranscriptSnapshot};
pub use error::{SendFailure, SyncError};
pub use store::{Entry, EntryKind, LocalId, TranscriptView, TurnStore, VecView, ViewChange};
pub use transport::{HttpTransport, Transport};
