//! # Catch-up Fetcher
//!
//! Pull-based reconciliation. "Latest" fetches are single-flight: a request
//! made while one is running is remembered once and issued after the running
//! one resolves plus a short debounce. "Older" pages are fetched on their own
//! track, one at a time.

use std::time::Duration;

use shared::models::TurnId;
use tracing::debug;

use crate::effect::{Effect, FetchTicket, Outbox, TimerId};

/// Why a latest fetch was requested. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Initial,
    SafetyNet,
    Gap,
    Reconnect,
    ReconnectFollowUp,
    Visibility,
    Signal,
    Poll,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: FetchTicket,
    high_water: Option<TurnId>,
}

/// A latest-fetch result that is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// High-water mark when the fetch was issued.
    pub high_water_at_start: Option<TurnId>,
}

#[derive(Debug)]
pub struct Fetcher {
    conversation_id: String,
    generation: u64,
    next_seq: u64,
    debounce: Duration,
    in_flight: Option<InFlight>,
    trailing: bool,
    debounce_armed: bool,
    older: Option<FetchTicket>,
}

impl Fetcher {
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, generation: u64, debounce: Duration) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            generation,
            next_seq: 0,
            debounce,
            in_flight: None,
            trailing: false,
            debounce_armed: false,
            older: None,
        }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub const fn is_loading_older(&self) -> bool {
        self.older.is_some()
    }

    /// Requests a latest fetch. Returns `true` if it was issued right away.
    pub fn request_latest(
        &mut self,
        reason: FetchReason,
        high_water: Option<TurnId>,
        outbox: &mut Outbox,
    ) -> bool {
        if self.in_flight.is_some() {
            self.trailing = true;
            debug!(conversation_id = %self.conversation_id, ?reason, "fetch in flight, trailing request queued");
            return false;
        }
        if self.debounce_armed {
            debug!(conversation_id = %self.conversation_id, ?reason, "fetch joins pending trailing request");
            return false;
        }
        debug!(conversation_id = %self.conversation_id, ?reason, "fetching latest turns");
        self.issue(high_water, outbox);
        true
    }

    /// Settles a latest fetch, successful or not. Returns `None` when the
    /// result belongs to an earlier context or a superseded request.
    pub fn complete_latest(&mut self, ticket: FetchTicket, outbox: &mut Outbox) -> Option<Accepted> {
        if ticket.generation != self.generation {
            debug!(?ticket, generation = self.generation, "discarding fetch from previous conversation");
            return None;
        }
        let flight = self.in_flight.filter(|flight| flight.ticket == ticket)?;
        self.in_flight = None;

        if std::mem::take(&mut self.trailing) {
            self.debounce_armed = true;
            outbox.schedule(TimerId::FetchDebounce, self.debounce);
        }
        Some(Accepted {
            high_water_at_start: flight.high_water,
        })
    }

    /// The debounce window after a settled fetch closed: issue the trailing
    /// request.
    pub fn debounce_elapsed(&mut self, high_water: Option<TurnId>, outbox: &mut Outbox) -> bool {
        if !std::mem::take(&mut self.debounce_armed) {
            return false;
        }
        if self.in_flight.is_some() {
            self.trailing = true;
            return false;
        }
        self.issue(high_water, outbox);
        true
    }

    /// Requests the page before `before`. Independent of the latest track;
    /// only one older page is fetched at a time.
    pub fn request_older(&mut self, before: TurnId, limit: u32, outbox: &mut Outbox) -> bool {
        if self.older.is_some() {
            return false;
        }
        let ticket = self.next_ticket();
        self.older = Some(ticket);
        outbox.push(Effect::FetchOlder {
            ticket,
            conversation_id: self.conversation_id.clone(),
            before,
            limit,
        });
        true
    }

    pub fn complete_older(&mut self, ticket: FetchTicket) -> bool {
        if ticket.generation != self.generation || self.older != Some(ticket) {
            debug!(?ticket, "discarding stale page of older turns");
            return false;
        }
        self.older = None;
        true
    }

    fn issue(&mut self, high_water: Option<TurnId>, outbox: &mut Outbox) {
        let ticket = self.next_ticket();
        self.in_flight = Some(InFlight { ticket, high_water });
        outbox.push(Effect::FetchLatest {
            ticket,
            conversation_id: self.conversation_id.clone(),
        });
    }

    fn next_ticket(&mut self) -> FetchTicket {
        self.next_seq += 1;
        FetchTicket {
            seq: self.next_seq,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> Fetcher {
        Fetcher::new("c-1", 1, Duration::from_millis(500))
    }

    fn latest_tickets(outbox: &Outbox) -> Vec<FetchTicket> {
        outbox
            .effects()
            .iter()
            .filter_map(|effect| match effect {
                Effect::FetchLatest { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn overlapping_requests_cost_at_most_two_fetches() {
        let mut fetcher = fetcher();
        let mut outbox = Outbox::default();

        assert!(fetcher.request_latest(FetchReason::Initial, None, &mut outbox));
        assert!(!fetcher.request_latest(FetchReason::Gap, None, &mut outbox));
        assert!(!fetcher.request_latest(FetchReason::Visibility, None, &mut outbox));

        let first = latest_tickets(&outbox)[0];
        assert!(fetcher.complete_latest(first, &mut outbox).is_some());
        assert!(outbox.effects().contains(&Effect::Schedule {
            timer: TimerId::FetchDebounce,
            after: Duration::from_millis(500),
        }));

        assert!(fetcher.debounce_elapsed(None, &mut outbox));
        assert_eq!(latest_tickets(&outbox).len(), 2);
    }

    #[test]
    fn requests_during_debounce_window_join_it() {
        let mut fetcher = fetcher();
        let mut outbox = Outbox::default();
        fetcher.request_latest(FetchReason::Initial, None, &mut outbox);
        fetcher.request_latest(FetchReason::Gap, None, &mut outbox);
        let first = latest_tickets(&outbox)[0];
        fetcher.complete_latest(first, &mut outbox);

        assert!(!fetcher.request_latest(FetchReason::Signal, None, &mut outbox));
        assert!(fetcher.debounce_elapsed(None, &mut outbox));
        assert!(!fetcher.debounce_elapsed(None, &mut outbox));

        assert_eq!(latest_tickets(&outbox).len(), 2);
    }

    #[test]
    fn lone_request_does_not_schedule_trailing_fetch() {
        let mut fetcher = fetcher();
        let mut outbox = Outbox::default();
        fetcher.request_latest(FetchReason::SafetyNet, Some(TurnId(4)), &mut outbox);
        let ticket = latest_tickets(&outbox)[0];

        let accepted = fetcher.complete_latest(ticket, &mut outbox).unwrap();

        assert_eq!(accepted.high_water_at_start, Some(TurnId(4)));
        assert!(!fetcher.is_fetching());
        assert_eq!(outbox.effects().len(), 1);
    }

    #[test]
    fn stale_tickets_are_discarded() {
        let mut fetcher = fetcher();
        let mut outbox = Outbox::default();
        fetcher.request_latest(FetchReason::Initial, None, &mut outbox);
        let ticket = latest_tickets(&outbox)[0];

        let superseded = FetchTicket { seq: ticket.seq + 7, ..ticket };
        let other_context = FetchTicket {
            generation: ticket.generation + 1,
            ..ticket
        };
        assert!(fetcher.complete_latest(superseded, &mut outbox).is_none());
        assert!(fetcher.complete_latest(other_context, &mut outbox).is_none());
        assert!(fetcher.is_fetching());

        assert!(fetcher.complete_latest(ticket, &mut outbox).is_some());
        assert!(fetcher.complete_latest(ticket, &mut outbox).is_none());
    }

    #[test]
    fn older_pages_run_independently() {
        let mut fetcher = fetcher();
        let mut outbox = Outbox::default();
        fetcher.request_latest(FetchReason::Initial, None, &mut outbox);

        assert!(fetcher.request_older(TurnId(20), 50, &mut outbox));
        assert!(!fetcher.request_older(TurnId(20), 50, &mut outbox));

        let older = outbox
            .effects()
            .iter()
            .find_map(|effect| match effect {
                Effect::FetchOlder { ticket, before, limit, .. } => {
                    assert_eq!((*before, *limit), (TurnId(20), 50));
                    Some(*ticket)
                }
                _ => None,
            })
            .unwrap();

        assert!(fetcher.is_fetching());
        assert!(fetcher.complete_older(older));
        assert!(!fetcher.is_loading_older());
        assert!(fetcher.request_older(TurnId(10), 50, &mut outbox));
    }
}
