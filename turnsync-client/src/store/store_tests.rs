use std::time::Duration;

use shared::models::{Intent, TurnId, TurnUpdateKind, UnitBoundary};

use super::*;
use crate::testing::{agent, in_unit, replay, ts, user, with_options};

fn store() -> TurnStore {
    TurnStore::new("c-1", Duration::from_secs(2))
}

fn entry_ids(store: &TurnStore) -> Vec<Vec<i64>> {
    store
        .entries()
        .iter()
        .filter(|entry| entry.group().is_some())
        .map(|entry| entry.ids().into_iter().map(|id| id.0).collect())
        .collect()
}

fn boundary_units(store: &TurnStore) -> Vec<String> {
    store
        .entries()
        .iter()
        .filter_map(|entry| match &entry.kind {
            EntryKind::Boundary(boundary) => Some(boundary.unit_id.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_out_of_order_arrivals_are_sorted() {
    let mut store = store();
    store.merge_turn(agent(3, Intent::Progress, "third", 10), MergeSource::Push);
    store.merge_turn(agent(1, Intent::Progress, "first", 0), MergeSource::Push);
    store.merge_turn(agent(2, Intent::Answer, "second", 5), MergeSource::Fetch);

    assert_eq!(entry_ids(&store), vec![vec![1], vec![2], vec![3]]);
    let timestamps: Vec<_> = store.entries().iter().map(|entry| entry.timestamp).collect();
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_merge_is_idempotent() {
    let turns = vec![
        user(1, "run the tests", 0),
        agent(2, Intent::Progress, "running", 5),
        agent(3, Intent::Answer, "all green", 10),
    ];
    let mut store = store();

    let first = store.merge(turns.clone(), MergeSource::Fetch);
    let snapshot = store.entries().to_vec();
    store.drain_changes();

    let second = store.merge(turns, MergeSource::Push);

    assert_eq!(first.inserted, 3);
    assert_eq!(second.skipped, 3);
    assert!(!second.changed());
    assert_eq!(store.entries(), snapshot.as_slice());
    assert!(store.drain_changes().is_empty());
}

#[test]
fn test_terminal_turn_replaces_entry_in_place() {
    let mut store = store();
    store.merge_turn(agent(5, Intent::Progress, "working", 0), MergeSource::Push);
    store.drain_changes();

    let decision = store.merge_turn(agent(5, Intent::Completion, "done", 0), MergeSource::Fetch);

    assert_eq!(decision, MergeDecision::Replaced);
    assert_eq!(store.len(), 1);
    assert_eq!(store.entries()[0].text(), "done");
    let changes = store.drain_changes();
    assert!(matches!(changes.as_slice(), [ViewChange::Updated { index: 0, .. }]));

    let again = store.merge_turn(agent(5, Intent::Completion, "done", 0), MergeSource::Push);
    assert_eq!(again, MergeDecision::Skipped);
}

#[test]
fn test_non_terminal_duplicate_does_not_overwrite() {
    let mut store = store();
    store.merge_turn(agent(5, Intent::Completion, "done", 0), MergeSource::Push);

    let decision = store.merge_turn(agent(5, Intent::Progress, "stale", 0), MergeSource::Fetch);

    assert_eq!(decision, MergeDecision::Skipped);
    assert_eq!(store.entries()[0].text(), "done");
}

#[test]
fn test_close_agent_turns_form_composite_entry() {
    let mut store = store();
    let outcome = store.merge(
        vec![
            agent(1, Intent::Progress, "reading files", 0),
            agent(2, Intent::Progress, "editing parser", 1),
            agent(3, Intent::Progress, "running tests", 2),
        ],
        MergeSource::Push,
    );

    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.grouped, 2);
    assert_eq!(store.len(), 1);
    assert_eq!(entry_ids(&store), vec![vec![1, 2, 3]]);
    assert_eq!(
        store.entries()[0].text(),
        "reading files\nediting parser\nrunning tests"
    );
    assert_eq!(store.turn_count(), 3);
    assert!((1..=3).all(|id| store.contains(TurnId(id))));
}

#[test]
fn test_turn_inside_composite_span_splits_group() {
    let mut store = store();
    let mut view = VecView::default();
    store.merge(vec![agent(1, Intent::Progress, "reading", 0)], MergeSource::Push);
    store.merge_turn(agent(2, Intent::Progress, "editing", 2), MergeSource::Push);
    assert_eq!(entry_ids(&store), vec![vec![1, 2]]);

    let decision = store.merge_turn(user(3, "stop", 1), MergeSource::Push);

    assert_eq!(decision, MergeDecision::Inserted);
    assert_eq!(entry_ids(&store), vec![vec![1], vec![3], vec![2]]);
    let positions: Vec<_> = store
        .entries()
        .iter()
        .flat_map(|entry| entry.group().map(|group| group.turns().to_vec()).unwrap_or_default())
        .map(|turn| turn.timestamp)
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!((1..=3).all(|id| store.contains(TurnId(id))));
    assert_eq!(store.turn(TurnId(2)).map(|turn| turn.text.as_str()), Some("editing"));

    replay(&mut view, &store.drain_changes());
    assert_eq!(view.entries, store.entries());
}

#[test]
fn test_relocated_turn_splits_group_it_lands_in() {
    let mut store = store();
    store.merge(
        vec![
            agent(1, Intent::Progress, "reading", 0),
            agent(2, Intent::Progress, "editing", 2),
            user(3, "status?", 10),
        ],
        MergeSource::Fetch,
    );
    assert_eq!(entry_ids(&store), vec![vec![1, 2], vec![3]]);

    store.apply_update(user(3, "status?", 1), TurnUpdateKind::Timestamp);

    assert_eq!(entry_ids(&store), vec![vec![1], vec![3], vec![2]]);
}

#[test]
fn test_grouping_requires_matching_neighbours() {
    let mut store = store();
    store.merge(
        vec![
            agent(1, Intent::Progress, "a", 0),
            agent(2, Intent::Answer, "different intent", 1),
            agent(3, Intent::Answer, "too late", 10),
            with_options(agent(4, Intent::Answer, "has options", 11), &["yes", "no"]),
            in_unit(agent(5, Intent::Answer, "other unit", 12), "u-2", "Deploy"),
            user(6, "user turns stay single", 13),
            user(7, "user turns stay single", 14),
        ],
        MergeSource::Fetch,
    );

    assert_eq!(
        entry_ids(&store),
        vec![vec![1], vec![2], vec![3], vec![4], vec![5], vec![6], vec![7]]
    );
}

#[test]
fn test_terminal_turn_splits_composite_entry() {
    let mut store = store();
    store.merge(
        vec![
            agent(1, Intent::Progress, "a", 0),
            agent(2, Intent::Progress, "b", 1),
            agent(3, Intent::Progress, "c", 2),
        ],
        MergeSource::Push,
    );

    let decision = store.merge_turn(agent(2, Intent::Completion, "b finished", 1), MergeSource::Push);

    assert_eq!(decision, MergeDecision::Replaced);
    assert_eq!(entry_ids(&store), vec![vec![1, 3], vec![2]]);
    assert_eq!(store.entries()[1].text(), "b finished");
    assert_eq!(store.turn_count(), 3);
}

#[test]
fn test_unit_change_inserts_single_boundary() {
    let mut store = store();
    store.merge(
        vec![
            in_unit(agent(1, Intent::Command, "build", 0), "u-1", "Build"),
            in_unit(agent(2, Intent::Answer, "built", 5), "u-1", "Build"),
            in_unit(agent(3, Intent::Command, "deploy", 10), "u-2", "Deploy"),
        ],
        MergeSource::Push,
    );
    store.merge(
        vec![in_unit(agent(2, Intent::Answer, "built", 5), "u-1", "Build")],
        MergeSource::Fetch,
    );

    assert_eq!(boundary_units(&store), vec!["u-1", "u-2"]);
    assert!(matches!(&store.entries()[0].kind, EntryKind::Boundary(b) if b.label == "Build"));
    assert!(matches!(&store.entries()[3].kind, EntryKind::Boundary(b) if b.label == "Deploy"));
    assert_eq!(store.len(), 5);
}

#[test]
fn test_boundary_only_markers_are_idempotent() {
    let mut store = store();
    store.merge_turn(in_unit(agent(1, Intent::Command, "build", 0), "u-1", "Build"), MergeSource::Push);

    let marker = UnitBoundary {
        unit_id: "u-9".into(),
        label: "Lint (no output)".into(),
        timestamp: ts(30),
    };
    assert_eq!(store.insert_boundary(marker.clone()), MergeDecision::Inserted);
    assert_eq!(store.insert_boundary(marker), MergeDecision::Skipped);
    assert_eq!(
        store.insert_boundary(UnitBoundary {
            unit_id: "u-1".into(),
            label: String::new(),
            timestamp: ts(0),
        }),
        MergeDecision::Skipped
    );
    assert_eq!(boundary_units(&store), vec!["u-1", "u-9"]);
}

#[test]
fn test_earlier_turn_of_marked_unit_moves_marker_up() {
    let mut store = store();
    store.merge_turn(in_unit(agent(2, Intent::Answer, "later", 10), "u-1", "Build"), MergeSource::Push);
    store.merge_turn(in_unit(agent(1, Intent::Command, "earlier", 0), "u-1", "Build"), MergeSource::Fetch);

    assert_eq!(boundary_units(&store), vec!["u-1"]);
    assert!(matches!(store.entries()[0].kind, EntryKind::Boundary(_)));
    assert_eq!(store.entries()[0].timestamp, ts(0));
    assert_eq!(entry_ids(&store), vec![vec![1], vec![2]]);
}

#[test]
fn test_timestamp_correction_relocates_without_duplicating() {
    let mut store = store();
    store.merge(
        vec![
            agent(1, Intent::Answer, "one", -600),
            agent(8, Intent::Answer, "eight", -120),
            agent(9, Intent::Answer, "nine", 0),
        ],
        MergeSource::Fetch,
    );

    let decision = store.apply_update(agent(9, Intent::Answer, "nine", -300), TurnUpdateKind::Timestamp);

    assert_eq!(decision, MergeDecision::Relocated);
    assert_eq!(entry_ids(&store), vec![vec![1], vec![9], vec![8]]);
    assert_eq!(store.turn_count(), 3);
    assert_eq!(store.turn(TurnId(9)).map(|turn| turn.timestamp), Some(ts(-300)));
}

#[test]
fn test_late_options_update_in_place() {
    let mut store = store();
    store.merge(
        vec![
            agent(4, Intent::Question, "deploy now?", 0),
            agent(5, Intent::Answer, "waiting", 10),
        ],
        MergeSource::Push,
    );
    store.drain_changes();

    let update = with_options(agent(4, Intent::Question, "deploy now?", 0), &["yes", "no"]);
    let decision = store.apply_update(update, TurnUpdateKind::Options);

    assert_eq!(decision, MergeDecision::Updated);
    assert_eq!(
        store.turn(TurnId(4)).and_then(|turn| turn.options.as_ref()).map(Vec::len),
        Some(2)
    );
    assert!(matches!(
        store.drain_changes().as_slice(),
        [ViewChange::Updated { index: 0, .. }]
    ));
}

#[test]
fn test_update_for_unknown_turn_is_merged() {
    let mut store = store();
    let decision = store.apply_update(agent(77, Intent::Answer, "late", 0), TurnUpdateKind::Content);

    assert_eq!(decision, MergeDecision::Inserted);
    assert!(store.contains(TurnId(77)));
}

#[test]
fn test_identical_update_is_skipped() {
    let mut store = store();
    store.merge_turn(agent(4, Intent::Answer, "same", 0), MergeSource::Push);

    let decision = store.apply_update(agent(4, Intent::Answer, "same", 0), TurnUpdateKind::Content);

    assert_eq!(decision, MergeDecision::Skipped);
}

#[test]
fn test_placeholder_promotion_keeps_entry_key() {
    let mut store = store();
    store.merge_turn(agent(1, Intent::Answer, "ready", 0), MergeSource::Push);
    let local_id = LocalId::new();
    let key = store.insert_placeholder(local_id, "hello", ts(30));

    assert!(store.promote_placeholder(local_id, user(501, "hello", 29)));

    assert_eq!(store.len(), 2);
    assert_eq!(store.entries()[1].key, key);
    assert_eq!(store.entries()[1].ids(), vec![TurnId(501)]);
    assert!(store.placeholder(local_id).is_none());
    assert!(!store.promote_placeholder(local_id, user(502, "hello", 30)));
}

#[test]
fn test_failed_placeholder_can_be_removed() {
    let mut store = store();
    let local_id = LocalId::new();
    store.insert_placeholder(local_id, "deploy", ts(0));

    assert!(store.mark_placeholder_failed(local_id));
    assert!(store.entries()[0].is_failed());

    let removed = store.remove_placeholder(local_id).unwrap();
    assert_eq!(removed.text, "deploy");
    assert!(store.is_empty());
    assert!(store.remove_placeholder(local_id).is_none());
}

#[test]
fn test_change_stream_mirrors_store() {
    let mut store = store();
    let mut view = VecView::default();

    store.merge(
        vec![
            in_unit(agent(1, Intent::Command, "build", 0), "u-1", "Build"),
            agent(3, Intent::Progress, "step", 20),
            agent(4, Intent::Progress, "step 2", 21),
            agent(2, Intent::Answer, "middle", 10),
        ],
        MergeSource::Fetch,
    );
    let local_id = LocalId::new();
    store.insert_placeholder(local_id, "hi", ts(40));
    store.apply_update(agent(2, Intent::Answer, "middle", 30), TurnUpdateKind::Timestamp);
    store.merge_turn(agent(4, Intent::Completion, "finished", 21), MergeSource::Push);
    store.promote_placeholder(local_id, user(9, "hi", 5));
    store.insert_notice("message not sent", ts(50));

    replay(&mut view, &store.drain_changes());

    assert_eq!(view.entries, store.entries());
}
