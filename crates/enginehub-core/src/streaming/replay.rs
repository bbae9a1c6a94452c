use std::collections::VecDeque;

/// Bounded tail of the most recent chunks of a stream.
#[derive(Debug)]
pub struct ReplayBuffer {
    chunks: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl ReplayBuffer {
    /// A buffer keeping at most `capacity` chunks (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    /// All retained chunks concatenated in arrival order.
    pub fn snapshot(&self) -> Vec<u8> {
        let len = self.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_concatenates_in_order() {
        let mut buf = ReplayBuffer::new(10);
        buf.push(b"a".to_vec());
        buf.push(b"b".to_vec());
        buf.push(b"c".to_vec());
        assert_eq!(buf.snapshot(), b"abc");
    }

    #[test]
    fn oldest_chunks_fall_off() {
        let mut buf = ReplayBuffer::new(2);
        buf.push(b"one ".to_vec());
        buf.push(b"two ".to_vec());
        buf.push(b"three".to_vec());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.snapshot(), b"two three");
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut buf = ReplayBuffer::new(0);
        assert!(buf.is_empty());
        buf.push(b"x".to_vec());
        buf.push(b"y".to_vec());
        assert_eq!(buf.snapshot(), b"y");
    }
}
