use bytes::{Bytes, BytesMut};

/// Append-only byte buffer, consumed wholesale by the next stage to spawn.
#[derive(Debug, Default)]
pub struct StdinAccumulator {
    buf: BytesMut,
}

impl StdinAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Hands the accumulated bytes over and leaves the buffer empty.
    /// Returns `None` when nothing was accumulated.
    pub fn take(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            return None;
        }
        Some(self.buf.split().freeze())
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_everything_once() {
        let mut acc = StdinAccumulator::new();
        acc.append(b"hello ");
        acc.append(b"world");
        assert_eq!(acc.len(), 11);

        assert_eq!(acc.take().as_deref(), Some(&b"hello world"[..]));
        assert!(acc.is_empty());
        assert!(acc.take().is_none());
    }
}
