//! Plain-text rendering of transcript entries.

use std::io::Write;

use client::{Entry, EntryKind, TranscriptView, VecView};
use shared::models::{Actor, Timestamp, Turn};

fn clock(timestamp: Timestamp) -> String {
    timestamp.0.format("%H:%M:%S").to_string()
}

fn speaker(turn: &Turn) -> String {
    match turn.actor {
        Actor::User => "you".to_string(),
        Actor::Agent => format!("agent ({})", turn.intent.as_str()),
    }
}

/// Renders one entry as one or more lines, without a trailing newline.
#[must_use]
pub fn entry_lines(entry: &Entry) -> String {
    let time = clock(entry.timestamp);
    match &entry.kind {
        EntryKind::Turn(group) => {
            let lead = group.lead();
            let mut lines = vec![format!("[{time}] {}: {}", speaker(lead), lead.display_text())];
            for member in &group.turns()[1..] {
                lines.push(format!("           {}", member.display_text()));
            }
            for (number, option) in lead.options.iter().flatten().enumerate() {
                lines.push(format!("           {}) {}", number + 1, option.label));
            }
            lines.join("\n")
        }
        EntryKind::Pending(placeholder) if placeholder.failed => {
            format!("[{time}] you: {} (not confirmed)", placeholder.text)
        }
        EntryKind::Pending(placeholder) => format!("[{time}] you: {} (sending)", placeholder.text),
        EntryKind::Boundary(boundary) => format!("---- {} ----", boundary.label),
        EntryKind::Notice(notice) => format!("[{time}] ! {}", notice.message),
    }
}

/// Append-only terminal view. Lines that were already printed cannot move,
/// so relocations only update the mirror and edits are printed again.
#[derive(Debug)]
pub struct TerminalView<W> {
    out: W,
    mirror: VecView,
}

impl<W: Write + Send> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            mirror: VecView::default(),
        }
    }

    fn print(&mut self, line: &str) {
        // A closed stdout has nowhere to report to.
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TranscriptView for TerminalView<W> {
    fn insert(&mut self, index: usize, entry: &Entry) {
        self.mirror.insert(index, entry);
        if entry.placeholder().is_none() {
            self.print(&entry_lines(entry));
        }
    }

    fn relocate(&mut self, from: usize, to: usize) {
        self.mirror.relocate(from, to);
    }

    fn update(&mut self, index: usize, entry: &Entry) {
        let unchanged = self
            .mirror
            .entries
            .get(index)
            .is_some_and(|shown| shown.kind == entry.kind);
        let was_pending = self
            .mirror
            .entries
            .get(index)
            .is_some_and(|shown| shown.placeholder().is_some());
        self.mirror.update(index, entry);
        if unchanged {
            return;
        }
        if was_pending {
            self.print(&entry_lines(entry));
        } else {
            self.print(&format!("~ {}", entry_lines(entry)));
        }
    }

    fn mark_failed(&mut self, index: usize) {
        self.mirror.mark_failed(index);
        if let Some(entry) = self.mirror.entries.get(index).cloned() {
            self.print(&entry_lines(&entry));
        }
    }

    fn remove(&mut self, index: usize) {
        self.mirror.remove(index);
    }

    fn clear(&mut self) {
        self.mirror.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::{TurnStore, store::MergeSource};
    use shared::models::{Intent, QuestionOption, TurnId};
    use std::time::Duration;

    fn turn(id: i64, actor: Actor, intent: Intent, text: &str) -> Turn {
        let timestamp = "2025-03-08T14:30:00Z".parse().unwrap();
        Turn {
            id: TurnId(id),
            actor,
            intent,
            text: text.to_string(),
            summary: None,
            options: None,
            attachments: Vec::new(),
            timestamp: Timestamp(timestamp),
            unit_id: None,
            unit_label: None,
        }
    }

    fn replay(store: &mut TurnStore, view: &mut TerminalView<Vec<u8>>) {
        for change in store.drain_changes() {
            change.apply(view);
        }
    }

    #[test]
    fn test_question_lists_options() {
        let mut question = turn(3, Actor::Agent, Intent::Question, "Deploy now?");
        question.options = Some(vec![
            QuestionOption {
                label: "yes".into(),
                description: None,
            },
            QuestionOption {
                label: "no".into(),
                description: None,
            },
        ]);
        let mut store = TurnStore::new("c-1", Duration::from_secs(2));
        store.merge_turn(question, MergeSource::Fetch);

        let rendered = entry_lines(&store.entries()[0]);

        assert_eq!(
            rendered,
            "[14:30:00] agent (question): Deploy now?\n           1) yes\n           2) no"
        );
    }

    #[test]
    fn test_terminal_view_prints_confirmed_send_once() {
        let mut store = TurnStore::new("c-1", Duration::from_secs(2));
        let mut view = TerminalView::new(Vec::new());
        let local_id = client::LocalId::new();
        let sent_at = Timestamp("2025-03-08T14:30:00Z".parse().unwrap());
        store.insert_placeholder(local_id, "hello", sent_at);
        replay(&mut store, &mut view);

        store.promote_placeholder(local_id, turn(501, Actor::User, Intent::Command, "hello"));
        store.merge_turn(turn(502, Actor::Agent, Intent::Answer, "hi there"), MergeSource::Push);
        replay(&mut store, &mut view);

        let output = String::from_utf8(view.into_inner()).unwrap();
        assert_eq!(
            output,
            "[14:30:00] you: hello\n[14:30:00] agent (answer): hi there\n"
        );
    }
}
