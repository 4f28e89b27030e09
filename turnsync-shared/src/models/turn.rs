use std::fmt;

use serde::{Deserialize, Serialize};

use super::timestamp::Timestamp;

/// Server-assigned turn identifier.
///
/// Identifiers are opaque but ordered, and grow with the conversation in the
/// common case, which is what high-water tracking relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub i64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Agent,
}

impl Actor {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl TryFrom<&str> for Actor {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            _ => Err("invalid actor"),
        }
    }
}

/// What a turn is for. The tag set is open: tags this client does not know
/// are kept verbatim in [`Intent::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    Command,
    Question,
    Progress,
    Completion,
    Answer,
    Other(String),
}

impl Intent {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Command => "command",
            Self::Question => "question",
            Self::Progress => "progress",
            Self::Completion => "completion",
            Self::Answer => "answer",
            Self::Other(tag) => tag,
        }
    }

    /// Terminal intents must always be shown, even over an entry already
    /// rendered for the same id.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion)
    }
}

impl From<String> for Intent {
    fn from(value: String) -> Self {
        match value.as_str() {
            "command" => Self::Command,
            "question" => Self::Question,
            "progress" => Self::Progress,
            "completion" => Self::Completion,
            "answer" => Self::Answer,
            _ => Self::Other(value),
        }
    }
}

impl From<Intent> for String {
    fn from(value: Intent) -> Self {
        match value {
            Intent::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One selectable answer offered by a question turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// File metadata attached to a turn. Content is fetched by collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One conversation entry as delivered by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub actor: Actor,
    pub intent: Intent,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_label: Option<String>,
}

impl Turn {
    /// Text to render: the body, or the summary when the body is empty.
    #[must_use]
    pub fn display_text(&self) -> &str {
        if self.text.trim().is_empty() {
            self.summary.as_deref().unwrap_or_default()
        } else {
            &self.text
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.intent.is_terminal()
    }
}

/// A unit of work that produced no turns of its own, sent by the server so the
/// transcript can still show where the unit started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitBoundary {
    pub unit_id: String,
    #[serde(default)]
    pub label: String,
    pub timestamp: Timestamp,
}
