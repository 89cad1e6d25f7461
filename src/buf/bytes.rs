//! A pooled, growable contiguous byte container.
//!
//! Used on the read path to hand a codec a single `&[u8]` view over bytes
//! that are otherwise scattered across a ring buffer's head/tail and the
//! loop's scratch tail (see `RingBuffer::with_byte_buffer`).

#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> ByteBuffer {
        ByteBuffer { inner: Vec::new() }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Clears the contents but keeps the backing allocation, so the
    /// buffer can be returned to its pool and reused without reallocating.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl std::ops::Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}
