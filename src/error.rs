//! Error types for the multiplexer.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all mplex operations.
///
/// The enum is `Clone` because a stream records its first fatal error once
/// and then reports it to every later observer (reader, writer, close
/// path). I/O errors are wrapped in an `Arc` to keep that possible.
#[derive(Debug, Clone, Error)]
pub enum MplexError {
    /// I/O error on the underlying transport.
    #[error("i/o error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// A frame carried a type tag outside the protocol range 0..=6.
    /// Unrecoverable protocol violation; fatal to the connection.
    #[error("invalid message type: {0}")]
    InvalidType(u8),

    /// Operation attempted after the multiplexer was closed.
    #[error("multiplexer is closed")]
    MuxerClosed,

    /// `open_stream` rejected because the local outbound cap is reached.
    #[error("too many outbound streams")]
    TooManyOutboundStreams,

    /// The peer kept opening streams above the inbound cap and breached
    /// the rate limiter; the whole connection is torn down.
    #[error("too many open streams")]
    TooManyOpenStreams,

    /// The remote reset the stream.
    #[error("stream reset")]
    StreamReset,

    /// The stream was aborted locally.
    #[error("stream aborted")]
    StreamAborted,

    /// A stream's inbound buffer exceeded the configured ceiling while
    /// nobody was reading it; the stream was reset.
    #[error("input buffer full")]
    InputBufferFull,

    /// The sink was started twice on a single stream.
    #[error("sink already started")]
    DoubleSink,

    /// Write attempted after the writable half ended.
    #[error("sink already ended")]
    SinkEnded,

    /// The transport or the outbound frame channel went away.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<std::io::Error> for MplexError {
    fn from(err: std::io::Error) -> Self {
        MplexError::Io(Arc::new(err))
    }
}

/// Result type alias using MplexError.
pub type Result<T> = std::result::Result<T, MplexError>;
