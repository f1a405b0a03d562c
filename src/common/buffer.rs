// SPDX-License-Identifier: GPL-2.0-or-later

//! Append-only byte buffer with amortized growth.
//!
//! Used for sample descriptors, parameter-set caches and pending-sample
//! spooling: anywhere a fixed-size array would be wrong because the number
//! of samples is unbounded a priori.

/// Growable byte buffer. Bytes are only ever appended; nothing is ever
/// removed except by `reset`.
#[derive(Clone, Debug, Default)]
pub struct GrowableBuffer {
    data: Vec<u8>,
}

impl GrowableBuffer {
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
        }
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    // new capacity = max(old*2 + 1024, old + needed + 1024)
    fn grow_for(&mut self, additional: usize) {
        let old = self.data.capacity();
        if old - self.data.len() >= additional {
            return;
        }
        let grown = old.saturating_mul(2).saturating_add(1024);
        let needed = old.saturating_add(additional).saturating_add(1024);
        self.data.reserve(grown.max(needed).saturating_sub(self.data.len()));
    }

    /// Appends `bytes` and returns the offset they were written at.
    pub fn put(&mut self, bytes: &[u8]) -> usize {
        self.grow_for(bytes.len());
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Appends `n` zeroed bytes and returns a mutable view onto them.
    pub fn alloc_tail(&mut self, n: usize) -> &mut [u8] {
        self.grow_for(n);
        let start = self.data.len();
        self.data.resize(start + n, 0);
        &mut self.data[start..]
    }

    /// Overwrites `offset..offset+bytes.len()` in already-written data, e.g.
    /// patching a box size once its payload turned out bigger than a single
    /// header field can hold. Never extends the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range falls outside what has already been written.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn put_returns_offset() {
        let mut buf = GrowableBuffer::default();
        assert_eq!(0, buf.put(b"abc"));
        assert_eq!(3, buf.put(b"de"));
        assert_eq!(b"abcde", buf.as_slice());
    }

    #[test]
    fn alloc_tail_is_zeroed_and_mutable() {
        let mut buf = GrowableBuffer::default();
        buf.put(b"x");
        let tail = buf.alloc_tail(3);
        tail.copy_from_slice(b"yzw");
        assert_eq!(b"xyzw", buf.as_slice());
    }

    #[test]
    fn reset_clears_but_keeps_capacity() {
        let mut buf = GrowableBuffer::default();
        buf.put(b"abcdefgh");
        let cap_before = buf.data.capacity();
        buf.reset();
        assert_eq!(0, buf.len());
        assert_eq!(cap_before, buf.data.capacity());
    }
}
