//! Outbound flights.
//!
//! A flight is encoded in full before it replaces the previous one. Records
//! keep the sequence numbers they were first sent with so a resend is
//! byte-identical to the first send.

use std::fmt;

use crate::buffer::Buf;
use crate::message::{ContentType, Record};

/// A fully encoded flight, ready to be resent as a unit.
#[derive(Clone, Default)]
pub(crate) struct Flight {
    datagrams: Vec<Buf>,
}

impl Flight {
    pub fn datagrams(&self) -> &[Buf] {
        &self.datagrams
    }

    pub fn len(&self) -> usize {
        self.datagrams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datagrams.is_empty()
    }
}

impl fmt::Debug for Flight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_bytes: usize = self.datagrams.iter().map(|b| b.len()).sum();
        f.debug_struct("Flight")
            .field("datagrams", &self.datagrams.len())
            .field("total_bytes", &total_bytes)
            .finish()
    }
}

/// Packs records into datagrams no larger than the MTU.
pub(crate) struct FlightBuilder {
    mtu: usize,
    done: Vec<Buf>,
    current: Buf,
}

impl FlightBuilder {
    pub fn new(mtu: usize) -> Self {
        FlightBuilder {
            mtu,
            done: Vec::new(),
            current: Buf::new(),
        }
    }

    pub fn push_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        sequence: u64,
        fragment: &[u8],
    ) {
        let record = Record {
            content_type,
            epoch,
            sequence,
            fragment,
        };

        if !self.current.is_empty() && self.current.len() + record.wire_len() > self.mtu {
            self.done.push(std::mem::take(&mut self.current));
        }

        if record.wire_len() > self.mtu {
            // Never split a record. The peer may still accept it.
            warn!(
                "Record exceeds MTU ({} > {}), sending alone",
                record.wire_len(),
                self.mtu
            );
        }

        record.serialize(&mut self.current);
    }

    pub fn finish(mut self) -> Flight {
        if !self.current.is_empty() {
            self.done.push(self.current);
        }
        Flight {
            datagrams: self.done,
        }
    }
}
