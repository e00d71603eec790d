//! Domain Event Streams
//!
//! Forward-only, single-pass sequences of event messages for one aggregate.

use std::iter::Peekable;
use std::vec::IntoIter;

use super::DomainEventMessage;

/// An ordered stream of events for a single aggregate.
///
/// The stream is consumed as it is read and cannot be restarted; reading the
/// aggregate again means asking the event store for a fresh stream.
#[derive(Debug)]
pub struct DomainEventStream {
    events: Peekable<IntoIter<DomainEventMessage>>,
}

impl DomainEventStream {
    pub fn new(events: Vec<DomainEventMessage>) -> Self {
        Self {
            events: events.into_iter().peekable(),
        }
    }

    /// A stream without events
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Whether there is at least one more event
    pub fn has_next(&mut self) -> bool {
        self.events.peek().is_some()
    }

    /// Look at the next event without consuming it
    pub fn peek(&mut self) -> Option<&DomainEventMessage> {
        self.events.peek()
    }
}

impl Iterator for DomainEventStream {
    type Item = DomainEventMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl From<Vec<DomainEventMessage>> for DomainEventStream {
    fn from(events: Vec<DomainEventMessage>) -> Self {
        Self::new(events)
    }
}
