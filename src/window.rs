/// Outcome of checking a sequence number against a [`ReplayWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Duplicate,
    TooOld,
}

/// Sliding replay window for record sequence numbers.
///
/// Tracks the highest accepted sequence number and a bitmap of the last
/// `size` sequence numbers, indexed by `seq % size`. Anything more than
/// `size - 1` behind the high-water mark is too old.
///
/// Each epoch should have its own `ReplayWindow` instance. The caller is
/// responsible for routing records to the correct per-epoch window.
#[derive(Debug)]
pub struct ReplayWindow {
    max_seq: Option<u64>,
    bits: Box<[u64]>,
    size: u64,
}

impl ReplayWindow {
    /// Create a window tracking `size` sequence numbers.
    ///
    /// `size` is rounded up to a multiple of 64.
    pub fn new(size: usize) -> Self {
        let words = size.max(1).div_ceil(64);
        Self {
            max_seq: None,
            bits: vec![0; words].into_boxed_slice(),
            size: (words * 64) as u64,
        }
    }

    /// Check `seq` and mark it if it is acceptable.
    pub fn accept(&mut self, seq: u64) -> Verdict {
        let verdict = self.check(seq);
        if verdict == Verdict::Accepted {
            self.ack(seq);
        }
        verdict
    }

    /// Check `seq` without updating the window.
    pub fn check(&self, seq: u64) -> Verdict {
        let Some(max) = self.max_seq else {
            return Verdict::Accepted;
        };

        if seq > max {
            return Verdict::Accepted;
        }

        if max - seq >= self.size {
            return Verdict::TooOld;
        }

        if self.is_marked(seq) {
            Verdict::Duplicate
        } else {
            Verdict::Accepted
        }
    }

    /// Mark `seq` as accepted, sliding the window if it is the new high-water mark.
    pub fn ack(&mut self, seq: u64) {
        match self.max_seq {
            None => {
                self.bits.fill(0);
                self.max_seq = Some(seq);
            }
            Some(max) if seq > max => {
                let delta = seq - max;
                if delta >= self.size {
                    self.bits.fill(0);
                } else {
                    // Evict the slots the window slides over.
                    for s in (max + 1)..=seq {
                        self.clear(s);
                    }
                }
                self.max_seq = Some(seq);
            }
            Some(max) if max - seq >= self.size => {
                // too old, nothing to mark
                return;
            }
            Some(_) => {}
        }

        self.mark(seq);
    }

    /// Lowest sequence number still inside the window.
    pub fn base(&self) -> u64 {
        self.max_seq
            .map(|m| m.saturating_sub(self.size - 1))
            .unwrap_or(0)
    }

    /// Highest accepted sequence number.
    pub fn max_seq(&self) -> Option<u64> {
        self.max_seq
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    fn slot(&self, seq: u64) -> (usize, u64) {
        let idx = (seq % self.size) as usize;
        (idx / 64, 1u64 << (idx % 64))
    }

    fn is_marked(&self, seq: u64) -> bool {
        let (word, mask) = self.slot(seq);
        self.bits[word] & mask != 0
    }

    fn mark(&mut self, seq: u64) {
        let (word, mask) = self.slot(seq);
        self.bits[word] |= mask;
    }

    fn clear(&mut self, seq: u64) {
        let (word, mask) = self.slot(seq);
        self.bits[word] &= !mask;
    }
}
