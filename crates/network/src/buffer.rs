// crates/network/src/buffer.rs
//! Reusable staging buffer for line-oriented and bulk receives
//!
//! The buffer tracks three offsets: `consumed` (bytes already handed to the
//! caller), `filled` (bytes received so far) and the allocated capacity.
//! `0 <= consumed <= filled <= capacity` holds at all times.

use crate::error::NetworkResult;

/// Growth step for the control-channel line buffer
pub const LINE_STEP: usize = 256;

/// Growth step and default size for bulk payload buffers
pub const DATA_STEP: usize = 4096;

/// Byte buffer that grows by a fixed step and compacts in place
#[derive(Debug, Clone)]
pub struct GrowableBuffer {
    data: Vec<u8>,
    consumed: usize,
    filled: usize,
    scan_from: usize,
    step: usize,
}

impl GrowableBuffer {
    /// Creates an empty buffer that grows by `step` bytes at a time
    pub fn new(step: usize) -> Self {
        Self::with_capacity(0, step)
    }

    /// Creates a buffer with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize, step: usize) -> Self {
        Self {
            data: vec![0; capacity],
            consumed: 0,
            filled: 0,
            scan_from: 0,
            step: step.max(1),
        }
    }

    /// Bytes already returned to the caller
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes received into the buffer
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Allocated size
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Received bytes not yet returned
    pub fn pending(&self) -> &[u8] {
        &self.data[self.consumed..self.filled]
    }

    pub fn is_empty(&self) -> bool {
        self.consumed == self.filled
    }

    /// Copies `bytes` in, reclaiming consumed space before growing
    pub fn append(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            let spare = self.spare();
            let n = spare.len().min(rest.len());
            spare[..n].copy_from_slice(&rest[..n]);
            self.filled += n;
            rest = &rest[n..];
        }
    }

    /// Returns writable space after `filled`, making room if there is none
    ///
    /// Room is made by shifting unconsumed bytes to offset 0 when possible and
    /// by growing the allocation by one step otherwise.
    pub fn spare(&mut self) -> &mut [u8] {
        if self.filled == self.data.len() {
            if self.consumed > 0 {
                self.compact();
            } else {
                self.grow();
            }
        }
        &mut self.data[self.filled..]
    }

    /// Marks `n` bytes written into [`spare`](Self::spare) as filled
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.data.len());
        self.filled = (self.filled + n).min(self.data.len());
    }

    /// Receives into the spare space with `read` and returns the byte count
    pub fn fill_from<F>(&mut self, read: F) -> NetworkResult<usize>
    where
        F: FnOnce(&mut [u8]) -> NetworkResult<usize>,
    {
        let n = read(self.spare())?;
        self.commit(n);
        Ok(n)
    }

    /// Moves unconsumed bytes to the start of the allocation
    pub fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.data.copy_within(self.consumed..self.filled, 0);
        self.filled -= self.consumed;
        self.scan_from = self.scan_from.saturating_sub(self.consumed);
        self.consumed = 0;
    }

    fn grow(&mut self) {
        let new_len = self.data.len() + self.step;
        self.data.resize(new_len, 0);
    }

    /// Takes the next CRLF-terminated line without its terminator
    ///
    /// At most `max_scan` new bytes are examined. Returns `None` and keeps all
    /// data if no terminator is present yet; a later append can complete it.
    pub fn take_line(&mut self, max_scan: usize) -> Option<&[u8]> {
        let end = self.find_line_end(max_scan)?;
        Some(self.consume_line(end))
    }

    /// Returns the offset of the next CR LF without consuming anything
    ///
    /// Bytes already scanned are not examined again on the next call.
    pub fn find_line_end(&mut self, max_scan: usize) -> Option<usize> {
        let start = self.scan_from.max(self.consumed);
        let limit = start.saturating_add(max_scan).min(self.filled);

        for i in start..limit {
            if self.data[i] == b'\r' && i + 1 < self.filled && self.data[i + 1] == b'\n' {
                self.scan_from = i;
                return Some(i);
            }
        }

        // a trailing '\r' may still be completed by the next receive
        self.scan_from = limit.saturating_sub(1).max(self.consumed);
        None
    }

    /// Consumes the line ending at `end` (as returned by [`find_line_end`](Self::find_line_end))
    pub fn consume_line(&mut self, end: usize) -> &[u8] {
        let start = self.consumed;
        let end = end.clamp(start, self.filled);
        self.consumed = (end + 2).min(self.filled);
        self.scan_from = self.consumed;
        &self.data[start..end]
    }

    /// Takes whatever unterminated data remains, e.g. after the peer closed
    pub fn take_remaining(&mut self) -> &[u8] {
        let start = self.consumed;
        self.consumed = self.filled;
        self.scan_from = self.filled;
        &self.data[start..self.filled]
    }

    /// Drops all content but keeps the allocation for reuse
    pub fn clear(&mut self) {
        self.consumed = 0;
        self.filled = 0;
        self.scan_from = 0;
    }

    /// Consumes the buffer, returning the unconsumed bytes
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.filled);
        if self.consumed > 0 {
            self.data.drain(..self.consumed);
        }
        self.data
    }
}

impl Default for GrowableBuffer {
    fn default() -> Self {
        Self::new(LINE_STEP)
    }
}
