//! A growable byte buffer used on the response write path, and by the
//! parser for accumulating a header line or chunk-size token before it is
//! known to be complete.
//!
//! Grounded on `onion_block`/`onion_block_ro` from the original library:
//! append-with-doubling-reservation discipline and a `take`-style drain
//! that hands ownership of the filled bytes to the caller without a copy.

#[derive(Debug, Default, Clone)]
pub struct Block {
    data: Vec<u8>,
}

impl Block {
    pub fn new() -> Self {
        Block { data: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Block {
            data: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn append_str(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
    }

    /// Removes and returns the first `n` bytes, shifting the remainder
    /// down. Used after a successful partial `write()` to the socket.
    pub fn drain_front(&mut self, n: usize) {
        self.data.drain(..n.min(self.data.len()));
    }

    /// Hands the full contents to the caller, leaving this block empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl From<Vec<u8>> for Block {
    fn from(data: Vec<u8>) -> Self {
        Block { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_drain() {
        let mut b = Block::new();
        b.append(b"hello ");
        b.append(b"world");
        assert_eq!(b.as_slice(), b"hello world");
        b.drain_front(6);
        assert_eq!(b.as_slice(), b"world");
    }

    #[test]
    fn take_empties_block() {
        let mut b = Block::new();
        b.append(b"data");
        let taken = b.take();
        assert_eq!(taken, b"data");
        assert!(b.is_empty());
    }
}
