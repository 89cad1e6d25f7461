//! Process-global free lists for `RingBuffer` and `ByteBuffer`, mirroring
//! the reference implementation's package-level `ringbuffer.Get`/`Put`
//! and `bytebuffer.Get`/`Put`. Backed by a spin-locked `Vec` rather than
//! `sync.Pool` since this crate has no GC-driven eviction to replicate;
//! `Get`/`Put` are safe to call from any thread.

use super::bytes::ByteBuffer;
use super::ring::RingBuffer;
use crate::atomic::SpinLock;

static RING_BUFFER_POOL: SpinLock<Vec<RingBuffer>> = SpinLock::new(Vec::new());
static BYTE_BUFFER_POOL: SpinLock<Vec<ByteBuffer>> = SpinLock::new(Vec::new());

/// Takes a ring buffer from the pool, or allocates a fresh (empty,
/// uncapacitied) one if the pool is drained.
pub fn get_ring_buffer() -> RingBuffer {
    RING_BUFFER_POOL
        .with(|free| free.pop())
        .unwrap_or_else(RingBuffer::new)
}

/// Resets `rb` to empty and returns it to the pool.
pub fn put_ring_buffer(mut rb: RingBuffer) {
    rb.reset();
    RING_BUFFER_POOL.with(|free| free.push(rb));
}

/// Takes a byte buffer from the pool, or allocates a fresh one.
pub fn get_byte_buffer() -> ByteBuffer {
    BYTE_BUFFER_POOL
        .with(|free| free.pop())
        .unwrap_or_else(ByteBuffer::new)
}

/// Clears `bb` and returns it to the pool.
pub fn put_byte_buffer(mut bb: ByteBuffer) {
    bb.clear();
    BYTE_BUFFER_POOL.with(|free| free.push(bb));
}
