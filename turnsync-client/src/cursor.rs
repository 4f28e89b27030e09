use serde::Serialize;
use shared::models::TurnId;

/// Per-conversation position: the newest id seen from any source, the oldest
/// id fetched so far, and a last-read marker kept only for this session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCursor {
    pub last_seen: Option<TurnId>,
    pub oldest_fetched: Option<TurnId>,
    pub has_more: bool,
    pub saved_marker: Option<TurnId>,
}

impl SyncCursor {
    #[must_use]
    pub fn with_marker(saved_marker: Option<TurnId>) -> Self {
        Self {
            saved_marker,
            ..Self::default()
        }
    }

    /// Raises the high-water mark. Returns `true` if it moved.
    pub fn observe(&mut self, id: TurnId) -> bool {
        if self.last_seen.is_some_and(|seen| seen >= id) {
            return false;
        }
        self.last_seen = Some(id);
        true
    }

    /// Lowers the pagination boundary.
    pub fn observe_oldest(&mut self, id: TurnId) {
        if self.oldest_fetched.is_none_or(|oldest| id < oldest) {
            self.oldest_fetched = Some(id);
        }
    }
}
