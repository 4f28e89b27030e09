use serde::{Deserialize, Serialize};

use super::events::{AgentState, ConversationStatus};
use super::timestamp::Timestamp;
use super::turn::{Attachment, Turn, TurnId, UnitBoundary};

/// Response of `GET /api/conversations/{id}/turns`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptSlice {
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Units that produced no turns inside this slice.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundaries: Vec<UnitBoundary>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub agent_state: AgentState,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_turn_id: Option<TurnId>,
}

impl TranscriptSlice {
    #[must_use]
    pub fn status(&self) -> ConversationStatus {
        ConversationStatus {
            agent_state: self.agent_state.clone(),
            ended: self.ended,
        }
    }

    /// Highest turn id contained in the slice.
    #[must_use]
    pub fn newest_turn_id(&self) -> Option<TurnId> {
        self.turns.iter().map(|turn| turn.id).max()
    }
}

/// Body of `POST /api/conversations/{id}/commands`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendCommandRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Body of `POST /api/conversations/{id}/selections`: the options picked in
/// answer to a question turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendSelectionRequest {
    pub question_id: TurnId,
    pub selected: Vec<String>,
}

impl SendSelectionRequest {
    /// Text the server records for the resulting user turn.
    #[must_use]
    pub fn display_text(&self) -> String {
        self.selected.join(", ")
    }
}

/// Acceptance of a command or selection. The resulting turn arrives through
/// the push channel or the next fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAccepted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub conversation_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_state: AgentState,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_id: Option<TurnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

/// Response of `GET /api/sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionListResponse {
    #[serde(default)]
    pub active: Vec<SessionSummary>,
    #[serde(default)]
    pub ended: Vec<SessionSummary>,
}

impl SessionListResponse {
    #[must_use]
    pub fn find(&self, conversation_id: &str) -> Option<&SessionSummary> {
        self.active
            .iter()
            .chain(self.ended.iter())
            .find(|session| session.conversation_id == conversation_id)
    }
}
