//! # Turn Store
//!
//! The ordered, deduplicated, boundary-aware list of entries for the active
//! conversation. Pure data: no I/O, no timers. Every mutation is recorded as a
//! [`ViewChange`] that the owner drains and forwards to a [`TranscriptView`].
//!
//! Invariants:
//! - entries are sorted by timestamp (ties keep arrival order);
//! - a confirmed [`TurnId`] appears in at most one entry, including the
//!   members of composite groups;
//! - at most one boundary marker exists per unit id.

mod view;

#[cfg(test)]
mod store_tests;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use shared::models::{Actor, Timestamp, Turn, TurnId, TurnUpdateKind, UnitBoundary};
use tracing::trace;
use uuid::Uuid;

pub use view::{TranscriptView, VecView, ViewChange};

/// Store-assigned identity of an entry, stable across moves and promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryKey(u64);

/// Client-side identity of an optimistic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One or more confirmed turns rendered as a single entry. More than one
/// member makes it a composite group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnGroup {
    turns: Vec<Turn>,
}

impl TurnGroup {
    fn single(turn: Turn) -> Self {
        Self { turns: vec![turn] }
    }

    /// First member; groups are never empty.
    #[must_use]
    pub fn lead(&self) -> &Turn {
        &self.turns[0]
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.turns.len() > 1
    }

    pub fn ids(&self) -> impl Iterator<Item = TurnId> + '_ {
        self.turns.iter().map(|turn| turn.id)
    }

    #[must_use]
    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == id)
    }

    /// Display text of every member, newline-joined.
    #[must_use]
    pub fn text(&self) -> String {
        self.turns
            .iter()
            .map(Turn::display_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn accepts(&self, turn: &Turn, window: TimeDelta) -> bool {
        let lead = self.lead();
        let Some(last) = self.turns.last() else {
            return false;
        };
        groupable(turn)
            && groupable(lead)
            && lead.intent == turn.intent
            && lead.unit_id == turn.unit_id
            && last.timestamp.distance(&turn.timestamp) <= window
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.turns.sort_by_key(|member| (member.timestamp, member.id));
    }

    fn replace(&mut self, turn: Turn) {
        if let Some(slot) = self.turns.iter_mut().find(|member| member.id == turn.id) {
            *slot = turn;
        }
        self.turns.sort_by_key(|member| (member.timestamp, member.id));
    }

    /// Detaches the members later than `timestamp`. The lead always stays.
    fn split_after(&mut self, timestamp: Timestamp) -> Option<Self> {
        let at = self
            .turns
            .iter()
            .position(|member| member.timestamp > timestamp)?;
        if at == 0 {
            return None;
        }
        Some(Self {
            turns: self.turns.split_off(at),
        })
    }

    fn take(&mut self, id: TurnId) -> Option<Turn> {
        let position = self.turns.iter().position(|member| member.id == id)?;
        Some(self.turns.remove(position))
    }
}

fn groupable(turn: &Turn) -> bool {
    turn.actor == Actor::Agent && !turn.is_terminal() && turn.options.is_none()
}

/// Optimistic user turn shown before the server confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placeholder {
    pub local_id: LocalId,
    pub text: String,
    pub failed: bool,
}

/// Separator shown where a new unit of work starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Boundary {
    pub unit_id: String,
    pub label: String,
}

/// Inline error shown in place of a message that could not be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Turn(TurnGroup),
    Pending(Placeholder),
    Boundary(Boundary),
    Notice(Notice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub key: EntryKey,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl Entry {
    #[must_use]
    pub const fn group(&self) -> Option<&TurnGroup> {
        match &self.kind {
            EntryKind::Turn(group) => Some(group),
            _ => None,
        }
    }

    #[must_use]
    pub const fn placeholder(&self) -> Option<&Placeholder> {
        match &self.kind {
            EntryKind::Pending(placeholder) => Some(placeholder),
            _ => None,
        }
    }

    /// Confirmed ids held by this entry.
    #[must_use]
    pub fn ids(&self) -> Vec<TurnId> {
        self.group().map(|group| group.ids().collect()).unwrap_or_default()
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(&self.kind, EntryKind::Pending(placeholder) if placeholder.failed)
    }

    /// Flags a placeholder as failed; other entries are left alone.
    pub fn mark_failed(&mut self) {
        if let EntryKind::Pending(placeholder) = &mut self.kind {
            placeholder.failed = true;
        }
    }

    /// Text to render for this entry.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.kind {
            EntryKind::Turn(group) => group.text(),
            EntryKind::Pending(placeholder) => placeholder.text.clone(),
            EntryKind::Boundary(boundary) => boundary.label.clone(),
            EntryKind::Notice(notice) => notice.message.clone(),
        }
    }
}

/// Where a batch of turns came from. Fetched turns reflect the server's
/// current record and may correct the timestamp of a known turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    Push,
    Update,
    Fetch,
    Older,
}

/// What happened to one incoming turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Inserted,
    Grouped,
    Replaced,
    Relocated,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub grouped: usize,
    pub replaced: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl MergeOutcome {
    pub fn record(&mut self, decision: MergeDecision) {
        match decision {
            MergeDecision::Inserted => self.inserted += 1,
            MergeDecision::Grouped => self.grouped += 1,
            MergeDecision::Replaced => self.replaced += 1,
            MergeDecision::Relocated | MergeDecision::Updated => self.updated += 1,
            MergeDecision::Skipped => self.skipped += 1,
        }
    }

    /// Whether the batch changed anything.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.inserted + self.grouped + self.replaced + self.updated > 0
    }
}

#[derive(Debug)]
pub struct TurnStore {
    conversation_id: String,
    entries: Vec<Entry>,
    seen: HashMap<TurnId, EntryKey>,
    markers: HashSet<String>,
    next_key: u64,
    group_window: TimeDelta,
    changes: Vec<ViewChange>,
}

impl TurnStore {
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, group_window: Duration) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
            seen: HashMap::new(),
            markers: HashSet::new(),
            next_key: 0,
            group_window: TimeDelta::from_std(group_window).unwrap_or(TimeDelta::zero()),
            changes: Vec::new(),
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: TurnId) -> bool {
        self.seen.contains_key(&id)
    }

    /// Number of confirmed turns, counting every member of composite groups.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn turn(&self, id: TurnId) -> Option<&Turn> {
        let index = self.index_of_turn(id)?;
        self.entries[index].group()?.get(id)
    }

    #[must_use]
    pub fn max_turn_id(&self) -> Option<TurnId> {
        self.seen.keys().copied().max()
    }

    #[must_use]
    pub fn min_turn_id(&self) -> Option<TurnId> {
        self.seen.keys().copied().min()
    }

    #[must_use]
    pub fn placeholder(&self, local_id: LocalId) -> Option<&Placeholder> {
        let index = self.index_of_placeholder(local_id)?;
        self.entries[index].placeholder()
    }

    /// Takes every change recorded since the last drain.
    pub fn drain_changes(&mut self) -> Vec<ViewChange> {
        std::mem::take(&mut self.changes)
    }

    /// Merges a batch of confirmed turns. Safe to call with turns the store
    /// already holds; the result is the same as merging them once.
    pub fn merge<I>(&mut self, turns: I, source: MergeSource) -> MergeOutcome
    where
        I: IntoIterator<Item = Turn>,
    {
        let mut batch: Vec<Turn> = turns.into_iter().collect();
        batch.sort_by_key(|turn| (turn.timestamp, turn.id));

        let mut outcome = MergeOutcome::default();
        for turn in batch {
            outcome.record(self.merge_turn(turn, source));
        }
        outcome
    }

    /// Merges one confirmed turn.
    ///
    /// Known ids are skipped, except that a terminal turn always replaces what
    /// is shown for its id, and a fetched turn whose timestamp moved is
    /// relocated.
    pub fn merge_turn(&mut self, turn: Turn, source: MergeSource) -> MergeDecision {
        if !self.seen.contains_key(&turn.id) {
            return self.insert_turn(turn, source);
        }
        if turn.is_terminal() {
            return self.replace_terminal(turn, source);
        }
        if matches!(source, MergeSource::Fetch | MergeSource::Older)
            && self
                .turn(turn.id)
                .is_some_and(|existing| existing.timestamp != turn.timestamp)
        {
            trace!(turn_id = %turn.id, ?source, "fetched turn carries a corrected timestamp");
            return self.apply_update(turn, TurnUpdateKind::Timestamp);
        }
        trace!(turn_id = %turn.id, ?source, "duplicate turn skipped");
        MergeDecision::Skipped
    }

    /// Applies a `turn_updated` event. Timestamp corrections move the entry,
    /// late options or text update it in place, unknown ids are merged.
    pub fn apply_update(&mut self, turn: Turn, kind: TurnUpdateKind) -> MergeDecision {
        let Some(index) = self.index_of_turn(turn.id) else {
            trace!(turn_id = %turn.id, ?kind, "update for unknown turn, merging");
            return self.insert_turn(turn, MergeSource::Update);
        };
        let EntryKind::Turn(group) = &mut self.entries[index].kind else {
            return MergeDecision::Skipped;
        };
        let Some(existing) = group.get(turn.id) else {
            return MergeDecision::Skipped;
        };
        if *existing == turn {
            return MergeDecision::Skipped;
        }

        let moved = existing.timestamp != turn.timestamp;
        let regroup = group.is_composite()
            && (moved || turn.options.is_some() || existing.intent != turn.intent);
        trace!(turn_id = %turn.id, ?kind, moved, regroup, "applying turn update");

        if regroup {
            self.split_member(index, turn.id);
            self.insert_turn(turn, MergeSource::Update);
            return MergeDecision::Relocated;
        }

        group.replace(turn);
        let timestamp = group.lead().timestamp;
        self.entries[index].timestamp = timestamp;
        if self.refresh(index) == index {
            MergeDecision::Updated
        } else {
            MergeDecision::Relocated
        }
    }

    /// Inserts a boundary-only marker supplied by the fetch layer.
    pub fn insert_boundary(&mut self, boundary: UnitBoundary) -> MergeDecision {
        if self.markers.contains(&boundary.unit_id) {
            return MergeDecision::Skipped;
        }
        let index = self.open_slot(boundary.timestamp);
        let label = if boundary.label.is_empty() {
            boundary.unit_id.clone()
        } else {
            boundary.label
        };
        self.markers.insert(boundary.unit_id.clone());
        self.insert_entry(
            index,
            boundary.timestamp,
            EntryKind::Boundary(Boundary {
                unit_id: boundary.unit_id,
                label,
            }),
        );
        MergeDecision::Inserted
    }

    pub fn insert_placeholder(
        &mut self,
        local_id: LocalId,
        text: impl Into<String>,
        timestamp: Timestamp,
    ) -> EntryKey {
        let index = self.open_slot(timestamp);
        self.insert_entry(
            index,
            timestamp,
            EntryKind::Pending(Placeholder {
                local_id,
                text: text.into(),
                failed: false,
            }),
        )
    }

    /// Turns a placeholder into the confirmed turn, keeping its entry key.
    /// Returns `false` when the placeholder is gone or the id is already shown.
    pub fn promote_placeholder(&mut self, local_id: LocalId, turn: Turn) -> bool {
        if self.seen.contains_key(&turn.id) {
            return false;
        }
        let Some(index) = self.index_of_placeholder(local_id) else {
            return false;
        };
        let entry = &mut self.entries[index];
        self.seen.insert(turn.id, entry.key);
        entry.timestamp = turn.timestamp;
        entry.kind = EntryKind::Turn(TurnGroup::single(turn));
        self.refresh(index);
        true
    }

    pub fn mark_placeholder_failed(&mut self, local_id: LocalId) -> bool {
        let Some(index) = self.index_of_placeholder(local_id) else {
            return false;
        };
        self.entries[index].mark_failed();
        self.changes.push(ViewChange::MarkedFailed { index });
        true
    }

    pub fn remove_placeholder(&mut self, local_id: LocalId) -> Option<Placeholder> {
        let index = self.index_of_placeholder(local_id)?;
        let entry = self.entries.remove(index);
        self.changes.push(ViewChange::Removed { index });
        match entry.kind {
            EntryKind::Pending(placeholder) => Some(placeholder),
            _ => None,
        }
    }

    pub fn insert_notice(&mut self, message: impl Into<String>, timestamp: Timestamp) -> EntryKey {
        let index = self.open_slot(timestamp);
        self.insert_entry(
            index,
            timestamp,
            EntryKind::Notice(Notice {
                message: message.into(),
            }),
        )
    }

    fn insert_turn(&mut self, turn: Turn, source: MergeSource) -> MergeDecision {
        let mut index = self.insertion_index(turn.timestamp);

        if index > 0 {
            let window = self.group_window;
            let previous = &mut self.entries[index - 1];
            if let EntryKind::Turn(group) = &mut previous.kind
                && group.accepts(&turn, window)
            {
                trace!(turn_id = %turn.id, ?source, "turn joined composite entry");
                self.seen.insert(turn.id, previous.key);
                group.push(turn);
                let entry = previous.clone();
                self.changes.push(ViewChange::Updated {
                    index: index - 1,
                    entry,
                });
                return MergeDecision::Grouped;
            }
            self.split_group(index - 1, turn.timestamp, index);
        }

        if let Some(unit_id) = turn.unit_id.as_deref() {
            index = self.place_boundary(index, unit_id, turn.unit_label.as_deref(), turn.timestamp);
        }

        trace!(turn_id = %turn.id, ?source, index, "turn inserted");
        let id = turn.id;
        let timestamp = turn.timestamp;
        let key = self.insert_entry(index, timestamp, EntryKind::Turn(TurnGroup::single(turn)));
        self.seen.insert(id, key);
        MergeDecision::Inserted
    }

    /// Makes sure a marker for `unit_id` precedes position `index` and returns
    /// the position the turn should now take.
    fn place_boundary(
        &mut self,
        index: usize,
        unit_id: &str,
        label: Option<&str>,
        timestamp: Timestamp,
    ) -> usize {
        if self.markers.contains(unit_id) {
            // An earlier turn of a unit we already marked: pull the marker up.
            let existing = self.entries.iter().position(|entry| {
                matches!(&entry.kind, EntryKind::Boundary(boundary) if boundary.unit_id == unit_id)
            });
            if let Some(from) = existing
                && from >= index
            {
                let mut marker = self.entries.remove(from);
                marker.timestamp = timestamp;
                self.entries.insert(index, marker);
                if from != index {
                    self.changes.push(ViewChange::Relocated { from, to: index });
                }
                self.changes.push(ViewChange::Updated {
                    index,
                    entry: self.entries[index].clone(),
                });
                return index + 1;
            }
            return index;
        }

        if self.preceding_unit(index) == Some(unit_id) {
            return index;
        }

        self.markers.insert(unit_id.to_string());
        self.insert_entry(
            index,
            timestamp,
            EntryKind::Boundary(Boundary {
                unit_id: unit_id.to_string(),
                label: label.unwrap_or(unit_id).to_string(),
            }),
        );
        index + 1
    }

    fn preceding_unit(&self, index: usize) -> Option<&str> {
        self.entries[..index]
            .iter()
            .rev()
            .find_map(|entry| match &entry.kind {
                EntryKind::Turn(group) => Some(group.lead().unit_id.as_deref()),
                EntryKind::Pending(_) => Some(None),
                EntryKind::Boundary(_) | EntryKind::Notice(_) => None,
            })
            .flatten()
    }

    fn replace_terminal(&mut self, turn: Turn, source: MergeSource) -> MergeDecision {
        let Some(index) = self.index_of_turn(turn.id) else {
            return self.insert_turn(turn, source);
        };
        let EntryKind::Turn(group) = &mut self.entries[index].kind else {
            return MergeDecision::Skipped;
        };
        if group.get(turn.id) == Some(&turn) {
            trace!(turn_id = %turn.id, ?source, "terminal turn already shown");
            return MergeDecision::Skipped;
        }

        trace!(turn_id = %turn.id, ?source, "terminal turn replaces entry");
        if group.is_composite() {
            self.split_member(index, turn.id);
            self.insert_turn(turn, source);
            return MergeDecision::Replaced;
        }

        let timestamp = turn.timestamp;
        group.replace(turn);
        self.entries[index].timestamp = timestamp;
        self.refresh(index);
        MergeDecision::Replaced
    }

    /// Removes one member from a composite group and forgets its id.
    fn split_member(&mut self, index: usize, id: TurnId) {
        let EntryKind::Turn(group) = &mut self.entries[index].kind else {
            return;
        };
        if !group.is_composite() || group.take(id).is_none() {
            return;
        }
        let timestamp = group.lead().timestamp;
        self.entries[index].timestamp = timestamp;
        self.seen.remove(&id);
        self.refresh(index);
    }

    /// Moves the entry at `index` if its timestamp no longer fits there, then
    /// reports its new content. Returns the final position.
    fn refresh(&mut self, index: usize) -> usize {
        let timestamp = self.entries[index].timestamp;
        let fits_before = index == 0 || self.entries[index - 1].timestamp <= timestamp;
        let fits_after = self
            .entries
            .get(index + 1)
            .is_none_or(|next| next.timestamp >= timestamp);

        let to = if fits_before && fits_after {
            index
        } else {
            let entry = self.entries.remove(index);
            let to = self.insertion_index(entry.timestamp);
            self.entries.insert(to, entry);
            self.changes.push(ViewChange::Relocated { from: index, to });
            to
        };
        if to > 0 {
            self.split_group(to - 1, timestamp, to + 1);
        }
        self.changes.push(ViewChange::Updated {
            index: to,
            entry: self.entries[to].clone(),
        });
        to
    }

    /// Position for a new entry at `timestamp`, splitting a composite group
    /// that spans it so no group member ends up after a later entry.
    fn open_slot(&mut self, timestamp: Timestamp) -> usize {
        let index = self.insertion_index(timestamp);
        if index > 0 {
            self.split_group(index - 1, timestamp, index);
        }
        index
    }

    /// Moves the members of the group at `index` that are later than
    /// `timestamp` into their own entry at position `at`.
    fn split_group(&mut self, index: usize, timestamp: Timestamp, at: usize) {
        let tail = match &mut self.entries[index].kind {
            EntryKind::Turn(group) => group.split_after(timestamp),
            _ => None,
        };
        let Some(tail) = tail else {
            return;
        };
        trace!(turn_id = %tail.lead().id, "composite entry split around a later arrival");
        self.changes.push(ViewChange::Updated {
            index,
            entry: self.entries[index].clone(),
        });
        let ids: Vec<TurnId> = tail.ids().collect();
        let key = self.insert_entry(at, tail.lead().timestamp, EntryKind::Turn(tail));
        for id in ids {
            self.seen.insert(id, key);
        }
    }

    /// Position for a new entry: after every entry not later than `timestamp`,
    /// found by scanning back from the end since arrivals are mostly in order.
    fn insertion_index(&self, timestamp: Timestamp) -> usize {
        let mut index = self.entries.len();
        while index > 0 && self.entries[index - 1].timestamp > timestamp {
            index -= 1;
        }
        index
    }

    fn insert_entry(&mut self, index: usize, timestamp: Timestamp, kind: EntryKind) -> EntryKey {
        let key = EntryKey(self.next_key);
        self.next_key += 1;
        let entry = Entry {
            key,
            timestamp,
            kind,
        };
        self.changes.push(ViewChange::Inserted {
            index,
            entry: entry.clone(),
        });
        self.entries.insert(index, entry);
        key
    }

    fn index_of_turn(&self, id: TurnId) -> Option<usize> {
        let key = self.seen.get(&id)?;
        self.entries.iter().position(|entry| entry.key == *key)
    }

    fn index_of_placeholder(&self, local_id: LocalId) -> Option<usize> {
        self.entries.iter().position(|entry| {
            matches!(&entry.kind, EntryKind::Pending(placeholder) if placeholder.local_id == local_id)
        })
    }
}
