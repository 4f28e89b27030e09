//! Builders shared by the unit tests.

use chrono::{TimeDelta, TimeZone, Utc};
use shared::models::{Actor, Intent, QuestionOption, Timestamp, Turn, TurnId};

use crate::store::{VecView, ViewChange};

/// `2025-03-08T14:30:00Z` shifted by `seconds`.
pub fn ts(seconds: i64) -> Timestamp {
    let base = Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap();
    Timestamp(base + TimeDelta::seconds(seconds))
}

pub fn turn(id: i64, actor: Actor, intent: Intent, text: &str, seconds: i64) -> Turn {
    Turn {
        id: TurnId(id),
        actor,
        intent,
        text: text.to_string(),
        summary: None,
        options: None,
        attachments: Vec::new(),
        timestamp: ts(seconds),
        unit_id: None,
        unit_label: None,
    }
}

pub fn agent(id: i64, intent: Intent, text: &str, seconds: i64) -> Turn {
    turn(id, Actor::Agent, intent, text, seconds)
}

pub fn user(id: i64, text: &str, seconds: i64) -> Turn {
    turn(id, Actor::User, Intent::Command, text, seconds)
}

pub fn in_unit(mut turn: Turn, unit_id: &str, label: &str) -> Turn {
    turn.unit_id = Some(unit_id.to_string());
    turn.unit_label = Some(label.to_string());
    turn
}

pub fn with_options(mut turn: Turn, labels: &[&str]) -> Turn {
    turn.options = Some(
        labels
            .iter()
            .map(|label| QuestionOption {
                label: (*label).to_string(),
                description: None,
            })
            .collect(),
    );
    turn
}

pub fn replay(view: &mut VecView, changes: &[ViewChange]) {
    for change in changes {
        change.apply(view);
    }
}
