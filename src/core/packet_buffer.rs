/// Growable byte buffer with append/drain semantics.
///
/// One instance sits between the socket reader and the frame parser: the
/// reader appends raw bytes as they arrive, the parser consumes whole frames
/// from the front. Callers are expected to hold the owning lock across an
/// append or a parse pass; the buffer itself is not synchronized.
///
/// Consumed bytes are reclaimed lazily: the read cursor advances on
/// `consume` and the backing storage is compacted once the dead prefix
/// dominates, keeping appends amortized O(1).
#[derive(Debug, Default)]
pub struct PacketBuffer {
    bytes: Vec<u8>,
    start: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            start: 0,
        }
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.bytes.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append bytes read from the socket.
    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// The unconsumed bytes, front first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.start..]
    }

    /// Drop `count` bytes from the front (a parsed frame or response head).
    ///
    /// # Panics
    /// Panics if `count` exceeds the buffered length.
    pub fn consume(&mut self, count: usize) {
        assert!(count <= self.len(), "consumed past end of packet buffer");
        self.start += count;

        if self.start >= self.bytes.len() {
            self.bytes.clear();
            self.start = 0;
        } else if self.start > 4096 && self.start * 2 > self.bytes.len() {
            self.bytes.drain(..self.start);
            self.start = 0;
        }
    }

    /// Remove and return every buffered byte.
    pub fn drain(&mut self) -> Vec<u8> {
        let out = self.bytes.split_off(self.start);
        self.bytes.clear();
        self.start = 0;
        out
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_consume_preserves_order() {
        let mut buffer = PacketBuffer::new();
        buffer.append(b"hello ");
        buffer.append(b"world");
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.as_slice(), b"hello world");

        buffer.consume(6);
        assert_eq!(buffer.as_slice(), b"world");

        buffer.append(b"!");
        assert_eq!(buffer.as_slice(), b"world!");
    }

    #[test]
    fn drain_empties_the_buffer() {
        let mut buffer = PacketBuffer::new();
        buffer.append(b"abc");
        buffer.consume(1);
        assert_eq!(buffer.drain(), b"bc");
        assert!(buffer.is_empty());
        assert_eq!(buffer.drain(), Vec::<u8>::new());
    }

    #[test]
    fn compaction_keeps_contents_intact() {
        let mut buffer = PacketBuffer::new();
        let chunk = vec![7u8; 1024];
        for _ in 0..8 {
            buffer.append(&chunk);
        }
        buffer.consume(5000);
        assert_eq!(buffer.len(), 8 * 1024 - 5000);
        assert!(buffer.as_slice().iter().all(|&b| b == 7));
    }

    #[test]
    #[should_panic(expected = "consumed past end")]
    fn consume_past_end_panics() {
        let mut buffer = PacketBuffer::new();
        buffer.append(b"ab");
        buffer.consume(3);
    }
}
