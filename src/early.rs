use std::collections::VecDeque;
use std::fmt;

use crate::buffer::Buf;

/// One 0-RTT record: its per-session sequence number and plaintext.
#[derive(PartialEq, Eq)]
pub struct EarlyDataRecord {
    pub seq: u64,
    pub data: Buf,
}

impl fmt::Debug for EarlyDataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EarlyDataRecord")
            .field("seq", &self.seq)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Returned by [`EarlyDataBuffer::push`] when the byte ceiling would be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded;

/// Bounded queue of early data received before the handshake completed.
///
/// Pushing past the byte ceiling fails instead of blocking. 0-RTT is best
/// effort and the peer can resend after the handshake.
#[derive(Debug)]
pub struct EarlyDataBuffer {
    records: VecDeque<EarlyDataRecord>,
    len_bytes: usize,
    capacity_bytes: usize,
}

impl EarlyDataBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        EarlyDataBuffer {
            records: VecDeque::new(),
            len_bytes: 0,
            capacity_bytes,
        }
    }

    pub fn push(&mut self, record: EarlyDataRecord) -> Result<(), CapacityExceeded> {
        let len = record.data.len();
        if self.len_bytes + len > self.capacity_bytes {
            return Err(CapacityExceeded);
        }
        self.len_bytes += len;
        self.records.push_back(record);
        Ok(())
    }

    /// Take the oldest record.
    pub fn pop(&mut self) -> Option<EarlyDataRecord> {
        let record = self.records.pop_front()?;
        self.len_bytes -= record.data.len();
        Some(record)
    }

    /// Consume every buffered record, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = EarlyDataRecord> + '_ {
        self.len_bytes = 0;
        self.records.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bytes currently held.
    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}
