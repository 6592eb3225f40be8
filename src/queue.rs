//! Queue types with safe Debug implementations.
//!
//! These wrappers ensure that debug output only shows metadata,
//! not potentially sensitive payload data.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};

use crate::buffer::Buf;
use crate::message::{Handshake, Message, MessageType};

/// Outcome of offering an inbound handshake message to the [`HandshakeQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insert {
    /// New message, held until its flight is complete.
    Queued,
    /// Already consumed. The peer is retransmitting a flight we processed.
    Duplicate,
    /// Already held; the copy is dropped.
    Present,
    /// Bound reached; the message is dropped.
    Full,
}

struct Entry {
    message_seq: u16,
    msg_type: MessageType,
    body: Buf,
}

/// Inbound handshake messages ordered by `message_seq`.
///
/// A flight is released once every message from `next_seq` up to a
/// flight-ending message is present.
pub(crate) struct HandshakeQueue {
    entries: VecDeque<Entry>,
    next_seq: u16,
    max: usize,
}

impl HandshakeQueue {
    pub fn new(max: usize) -> Self {
        HandshakeQueue {
            entries: VecDeque::new(),
            next_seq: 0,
            max,
        }
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Skip ahead, e.g. past a message handled outside the queue.
    pub fn set_next_seq(&mut self, seq: u16) {
        self.next_seq = seq;
        self.entries.retain(|e| e.message_seq >= seq);
    }

    pub fn insert(&mut self, handshake: &Handshake<'_>) -> Insert {
        if handshake.message_seq < self.next_seq {
            return Insert::Duplicate;
        }

        let search = self
            .entries
            .binary_search_by_key(&handshake.message_seq, |e| e.message_seq);

        match search {
            Ok(_) => Insert::Present,
            Err(_) if self.entries.len() >= self.max => {
                warn!("Handshake queue full (max {}): {:?}", self.max, self);
                Insert::Full
            }
            Err(index) => {
                self.entries.insert(
                    index,
                    Entry {
                        message_seq: handshake.message_seq,
                        msg_type: handshake.msg_type,
                        body: Buf::from_slice(handshake.body),
                    },
                );
                Insert::Queued
            }
        }
    }

    /// Take the next complete flight, if any.
    pub fn take_flight(&mut self) -> Option<Vec<Message>> {
        let mut expected = self.next_seq;
        let mut end = None;

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.message_seq != expected {
                break;
            }
            if entry.msg_type.ends_flight() {
                end = Some(i + 1);
                break;
            }
            expected = expected.wrapping_add(1);
        }

        let end = end?;

        let flight: Vec<Message> = self
            .entries
            .drain(..end)
            .map(|e| Message {
                msg_type: e.msg_type,
                body: e.body,
            })
            .collect();

        self.next_seq = self.next_seq.wrapping_add(flight.len() as u16);

        Some(flight)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for HandshakeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("HandshakeQueue");
        s.field("len", &self.len())
            .field("next_seq", &self.next_seq);

        if let (Some(min), Some(max)) = (self.entries.front(), self.entries.back()) {
            s.field(
                "seq_range",
                &format_args!("{} - {}", min.message_seq, max.message_seq),
            );
        }

        s.finish()
    }
}

/// Wrapper around the transmit queue that provides safe Debug output.
///
/// Each datagram carries its destination. Before a server session is bound,
/// stateless replies go to whoever asked.
///
/// The Debug implementation only shows metadata (datagram count and total bytes),
/// not potentially sensitive payload data.
pub(crate) struct QueueTx(VecDeque<(SocketAddr, Buf)>);

impl QueueTx {
    pub fn new() -> Self {
        Self(VecDeque::new())
    }
}

impl Deref for QueueTx {
    type Target = VecDeque<(SocketAddr, Buf)>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for QueueTx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl fmt::Debug for QueueTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_bytes: usize = self.0.iter().map(|(_, b)| b.len()).sum();
        f.debug_struct("QueueTx")
            .field("datagrams", &self.0.len())
            .field("total_bytes", &total_bytes)
            .finish()
    }
}
