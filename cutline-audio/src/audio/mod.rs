//! Audio primitives: formats, arenas, buffers and sample conversion

pub mod arena;
pub mod buffer;
pub mod format;
pub mod limiter;
pub mod types;

pub use buffer::{AudioBuffer, BufferFormat, Consumer};
pub use limiter::ClipLimiter;
pub use types::{Endian, PcmFormat};
