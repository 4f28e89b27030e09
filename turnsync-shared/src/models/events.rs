use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::turn::Turn;

/// Coarse agent state reported alongside a conversation. Open set, like
/// [`Intent`](super::Intent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentState {
    #[default]
    Idle,
    Working,
    AwaitingInput,
    Other(String),
}

impl AgentState {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::AwaitingInput => "awaiting_input",
            Self::Other(state) => state,
        }
    }
}

impl From<String> for AgentState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "idle" => Self::Idle,
            "working" => Self::Working,
            "awaiting_input" => Self::AwaitingInput,
            _ => Self::Other(value),
        }
    }
}

impl From<AgentState> for String {
    fn from(value: AgentState) -> Self {
        match value {
            AgentState::Other(state) => state,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation-level status shown next to the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStatus {
    pub agent_state: AgentState,
    pub ended: bool,
}

/// Why a `turn_updated` event was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnUpdateKind {
    /// Clock-skew fix-up; the turn may move.
    Timestamp,
    /// Structured options arrived after the turn.
    Options,
    /// Text or summary changed.
    #[default]
    Content,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnEvent {
    pub conversation_id: String,
    pub turn: Turn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnUpdatedEvent {
    pub conversation_id: String,
    pub turn: Turn,
    #[serde(default)]
    pub update: TurnUpdateKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChangedEvent {
    pub conversation_id: String,
    pub agent_state: AgentState,
    #[serde(default)]
    pub ended: bool,
}

/// Payload of the coarse "something changed" signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSignal {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GapEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Number of events the server dropped for this client, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<u64>,
}

/// Events carried by the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    TurnCreated { payload: TurnEvent },
    TurnUpdated { payload: TurnUpdatedEvent },
    StateChanged { payload: StateChangedEvent },
    CardRefresh { payload: ConversationSignal },
    SessionCreated { payload: ConversationSignal },
    SessionEnded { payload: ConversationSignal },
    Gap {
        #[serde(default)]
        payload: GapEvent,
    },
}

const KNOWN_EVENT_TYPES: [&str; 7] = [
    "turn_created",
    "turn_updated",
    "state_changed",
    "card_refresh",
    "session_created",
    "session_ended",
    "gap",
];

impl PushEvent {
    /// Decodes one push frame.
    ///
    /// `event_name` is the SSE `event:` field; it supplies the type when the
    /// JSON body has none. Hyphenated names (`turn-created`) are accepted.
    /// Returns `Ok(None)` for event types this client does not know.
    ///
    /// # Errors
    /// Returns the JSON error when the body is malformed or a known event type
    /// carries an invalid payload.
    pub fn decode(event_name: Option<&str>, data: &str) -> Result<Option<Self>, serde_json::Error> {
        let mut value: Value = serde_json::from_str(data)?;
        let declared = value
            .get("type")
            .and_then(Value::as_str)
            .map(normalize_type)
            .or_else(|| event_name.map(normalize_type));

        let Some(kind) = declared else {
            return Ok(None);
        };
        if !KNOWN_EVENT_TYPES.contains(&kind.as_str()) {
            return Ok(None);
        }

        if let Some(object) = value.as_object_mut() {
            object.insert("type".to_string(), Value::String(kind));
        }
        serde_json::from_value(value).map(Some)
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::TurnCreated { .. } => "turn_created",
            Self::TurnUpdated { .. } => "turn_updated",
            Self::StateChanged { .. } => "state_changed",
            Self::CardRefresh { .. } => "card_refresh",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionEnded { .. } => "session_ended",
            Self::Gap { .. } => "gap",
        }
    }

    /// Conversation the event concerns, if it names one.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::TurnCreated { payload } => Some(&payload.conversation_id),
            Self::TurnUpdated { payload } => Some(&payload.conversation_id),
            Self::StateChanged { payload } => Some(&payload.conversation_id),
            Self::CardRefresh { payload }
            | Self::SessionCreated { payload }
            | Self::SessionEnded { payload } => Some(&payload.conversation_id),
            Self::Gap { payload } => payload.conversation_id.as_deref(),
        }
    }
}

fn normalize_type(raw: &str) -> String {
    raw.trim().replace('-', "_")
}

/// Scope of one push channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
}

impl StreamFilter {
    #[must_use]
    pub fn for_conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            ..Self::default()
        }
    }

    /// Query parameters for the stream endpoint.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(conversation) = &self.conversation_id {
            pairs.push(("conversation", conversation.clone()));
        }
        if let Some(agent) = &self.agent_id {
            pairs.push(("agent", agent.clone()));
        }
        if !self.types.is_empty() {
            pairs.push(("types", self.types.join(",")));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, TurnId};

    const TURN_CREATED: &str = r#"{
        "type": "turn_created",
        "payload": {
            "conversation_id": "c-1",
            "turn": {
                "id": 41,
                "actor": "agent",
                "intent": "progress",
                "text": "running tests",
                "timestamp": "2025-03-08T14:30:00Z"
            }
        }
    }"#;

    #[test]
    fn decodes_tagged_turn_created() {
        let event = PushEvent::decode(None, TURN_CREATED).unwrap().unwrap();
        let PushEvent::TurnCreated { payload } = event else {
            panic!("expected turn_created");
        };
        assert_eq!(payload.conversation_id, "c-1");
        assert_eq!(payload.turn.id, TurnId(41));
        assert_eq!(payload.turn.intent, Intent::Progress);
    }

    #[test]
    fn event_name_supplies_missing_type() {
        let data = r#"{"payload":{"conversation_id":"c-1","agent_state":"working"}}"#;
        let event = PushEvent::decode(Some("state-changed"), data).unwrap().unwrap();

        assert_eq!(event.type_name(), "state_changed");
        assert_eq!(event.conversation_id(), Some("c-1"));
    }

    #[test]
    fn unknown_types_are_ignored() {
        let data = r#"{"type":"presence_update","payload":{"user":"u-1"}}"#;
        assert_eq!(PushEvent::decode(None, data).unwrap(), None);
        assert_eq!(PushEvent::decode(Some("heartbeat"), "{}").unwrap(), None);
        assert_eq!(PushEvent::decode(None, "{}").unwrap(), None);
    }

    #[test]
    fn malformed_known_event_is_an_error() {
        let data = r#"{"type":"turn_created","payload":{"conversation_id":"c-1"}}"#;
        assert!(PushEvent::decode(None, data).is_err());
        assert!(PushEvent::decode(Some("gap"), "not json").is_err());
    }

    #[test]
    fn gap_payload_is_optional() {
        let event = PushEvent::decode(Some("gap"), "{}").unwrap().unwrap();
        assert_eq!(event, PushEvent::Gap { payload: GapEvent::default() });
        assert_eq!(event.conversation_id(), None);
    }

    #[test]
    fn update_kind_tolerates_new_values() {
        let data = r#"{
            "type": "turn_updated",
            "payload": {
                "conversation_id": "c-1",
                "update": "reaction",
                "turn": {
                    "id": 9,
                    "actor": "user",
                    "intent": "command",
                    "text": "ship it",
                    "timestamp": "2025-03-08T14:30:00Z"
                }
            }
        }"#;
        let Some(PushEvent::TurnUpdated { payload }) = PushEvent::decode(None, data).unwrap()
        else {
            panic!("expected turn_updated");
        };
        assert_eq!(payload.update, TurnUpdateKind::Other);
    }

    #[test]
    fn agent_state_round_trips_unknown_values() {
        let state: AgentState = serde_json::from_str("\"compacting\"").unwrap();
        assert_eq!(state, AgentState::Other("compacting".into()));
        assert_eq!(serde_json::to_string(&AgentState::AwaitingInput).unwrap(), "\"awaiting_input\"");
    }

    #[test]
    fn filter_builds_query_pairs() {
        let filter = StreamFilter {
            conversation_id: Some("c-1".into()),
            agent_id: None,
            types: vec!["turn_created".into(), "gap".into()],
        };
        assert_eq!(
            filter.query_pairs(),
            vec![
                ("conversation", "c-1".to_string()),
                ("types", "turn_created,gap".to_string())
            ]
        );
        assert!(StreamFilter::default().query_pairs().is_empty());
    }
}
