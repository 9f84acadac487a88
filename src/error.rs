use thiserror::Error;

/// Fatal construction errors for [`crate::jitter_buffer::JitterBuffer`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `latency` is required; a jitter buffer without a dwell bound can't
    /// schedule its release timer.
    #[error("jitter buffer requires a non-zero latency")]
    MissingLatency,
}

/// Recoverable per-packet rejection from [`crate::buffer_store::BufferStore::insert`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InsertError {
    /// The packet's promoted extended index falls at or below the store's
    /// release watermark; it arrived too late to be reordered into place.
    #[error("late packet: index {index} at or below watermark {base_index}")]
    LatePacket { index: i64, base_index: i64 },
}

/// Failures decoding a wire-format TWCC feedback payload.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short: needed {needed} more byte(s)")]
    UnexpectedEof { needed: usize },
    #[error("invalid packet status symbol {0}")]
    InvalidSymbol(u8),
    #[error("invalid status vector symbol size id {0}")]
    InvalidSymbolSize(u8),
    #[error("chunk stream produced {produced} statuses, expected {expected}")]
    ChunkCountMismatch { produced: usize, expected: usize },
}
