//! Reusable connection slots.
//!
//! A slot is the part of a connection that outlives its socket: the
//! read-ahead buffer. Each endpoint keeps a LIFO free-list of slots sized to
//! its own buffer requirement, so steady-state accept/close cycles allocate
//! nothing.
//!
//! Thread-safety: a `SlotPool` is owned by its endpoint and only touched by
//! the acceptor thread. Slots themselves travel with their connection.

/// Read-ahead buffer with a consumed/filled window.
///
/// Bytes in `buf[start..end]` have been received but not yet consumed.
#[derive(Debug)]
pub struct Slot {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl Slot {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Total buffer capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Received bytes not yet consumed.
    #[inline]
    pub fn available(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Mark `n` bytes as consumed.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Writable tail of the buffer, compacting first if the tail is full.
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        if self.end == self.buf.len() && self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        &mut self.buf[self.end..]
    }

    #[inline]
    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.buf.len());
        self.end += n;
    }

    /// Copy buffered bytes into `dst`, consuming them.
    pub(crate) fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let n = self.available().min(dst.len());
        dst[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.consume(n);
        n
    }

    /// Forget buffered data before the slot is reused.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

/// Per-endpoint LIFO free-list of slots.
pub(crate) struct SlotPool {
    free: Vec<Slot>,
    slot_size: usize,
    max_free: usize,
}

impl SlotPool {
    pub(crate) fn new(slot_size: usize, max_free: usize) -> Self {
        Self {
            free: Vec::new(),
            slot_size,
            max_free,
        }
    }

    /// Take the most recently released slot, or allocate a new one.
    ///
    /// Returns the slot and whether it was reused.
    pub(crate) fn take(&mut self) -> (Slot, bool) {
        match self.free.pop() {
            Some(mut slot) => {
                slot.reset();
                (slot, true)
            }
            None => (Slot::new(self.slot_size), false),
        }
    }

    /// Return a slot to the free-list.
    ///
    /// Slots of the wrong size or beyond `max_free` are dropped.
    pub(crate) fn put(&mut self, slot: Slot) {
        if slot.capacity() != self.slot_size || self.free.len() >= self.max_free {
            return;
        }
        self.free.push(slot);
    }

    #[cfg(test)]
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }
}
