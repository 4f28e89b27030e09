#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.
#![allow(clippy::module_name_repetitions)] // Store and engine types keep their module prefix.

//! Shared types for turnsync: the wire models exchanged with the transcript
//! server, client configuration, and the persisted preference store.

pub mod config;
pub mod models;

pub use models::{
    Actor, AgentState, Attachment, ConversationStatus, ErrorResponse, Intent, PushEvent,
    QuestionOption, SendAccepted, SendCommandRequest, SendSelectionRequest, SessionListResponse,
    SessionSummary, StreamFilter, Timestamp, TranscriptSlice, Turn, TurnId, TurnUpdateKind,
    UnitBoundary,
};
