//! A byte buffer that grows by half again each time it fills up.
//!
//! Unlike a plain `Vec`, growth is explicit: the owner checks [`is_full()`],
//! then trades the buffer in for a bigger one with [`grow()`].
//! Growth never panics. Capacity arithmetic saturates at `usize::MAX`,
//! and growing a buffer that is already that large is an error
//! rather than a silent truncation.
//!
//! [`is_full()`]: struct.GrowableBuffer.html#method.is_full
//! [`grow()`]: struct.GrowableBuffer.html#method.grow

use log::*;

use crate::result::*;

/// The capacity of a buffer's first allocation
pub const INITIAL_CAPACITY: usize = 1024;

/// Returns the capacity a buffer of `current` capacity grows to,
/// or `None` if it can't grow any further.
pub fn next_capacity(current: usize) -> Option<usize> {
    match current {
        0 => Some(INITIAL_CAPACITY),
        usize::MAX => None,
        c => Some(c.checked_add(c / 2).unwrap_or(usize::MAX)),
    }
}

#[derive(Debug, Default)]
pub struct GrowableBuffer {
    bytes: Vec<u8>,
    /// The logical capacity. The `Vec` has at least this much room.
    capacity: usize,
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if the next [`push()`](#method.push) needs a [`grow()`](#method.grow) first.
    pub fn is_full(&self) -> bool {
        self.bytes.len() == self.capacity
    }

    /// Appends a byte. The buffer must not be full.
    pub fn push(&mut self, byte: u8) {
        debug_assert!(!self.is_full(), "push() into a full GrowableBuffer");
        self.bytes.push(byte);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Consumes the buffer and returns one with more capacity
    /// and the same contents.
    ///
    /// Anything holding an offset into the old buffer
    /// needs to be recomputed against the new one.
    pub fn grow(mut self) -> GzResult<Self> {
        let capacity = next_capacity(self.capacity).ok_or(GzError::Allocation)?;
        self.bytes
            .try_reserve_exact(capacity - self.bytes.len())
            .map_err(|e| {
                debug!("Couldn't grow buffer to {} bytes: {}", capacity, e);
                GzError::Allocation
            })?;
        trace!("Grew buffer from {} to {} bytes", self.capacity, capacity);
        self.capacity = capacity;
        Ok(self)
    }
}
