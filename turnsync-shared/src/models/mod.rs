//! Wire models exchanged with the transcript server.

pub mod errors;
pub mod events;
pub mod timestamp;
pub mod transcript;
pub mod turn;

pub use errors::ErrorResponse;
pub use events::{
    AgentState, ConversationSignal, ConversationStatus, GapEvent, PushEvent, StateChangedEvent,
    StreamFilter, TurnEvent, TurnUpdateKind, TurnUpdatedEvent,
};
pub use timestamp::Timestamp;
pub use transcript::{
    SendAccepted, SendCommandRequest, SendSelectionRequest, SessionListResponse, SessionSummary,
    TranscriptSlice,
};
pub use turn::{Actor, Attachment, Intent, QuestionOption, Turn, TurnId, UnitBoundary};
