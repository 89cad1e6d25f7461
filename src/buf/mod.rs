//! Pooled byte buffers: the per-connection ring buffers and the
//! scatter-gather helper used to linearise them for codecs.

mod bytes;
mod pool;
mod ring;

pub use bytes::ByteBuffer;
pub use pool::{get_byte_buffer, get_ring_buffer, put_byte_buffer, put_ring_buffer};
pub use ring::RingBuffer;
