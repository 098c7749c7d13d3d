//! Multiplexer configuration.

/// Default outbound fragmentation ceiling per `MESSAGE_*` payload (1 MiB).
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024 * 1024;

/// Default cap on concurrent receiver-side streams.
pub const DEFAULT_MAX_INBOUND_STREAMS: usize = 1024;

/// Default cap on concurrent initiator-side streams.
pub const DEFAULT_MAX_OUTBOUND_STREAMS: usize = 1024;

/// Default per-stream readable-buffer ceiling before forced reset (4 MiB).
pub const DEFAULT_MAX_STREAM_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Default rate-limiter capacity (and per-second refill) for `NEW_STREAM`
/// frames arriving while the inbound cap is already reached.
pub const DEFAULT_DISCONNECT_THRESHOLD: u64 = 5;

/// Tunables for a [`Multiplexer`](crate::Multiplexer).
#[derive(Debug, Clone)]
pub struct MplexConfig {
    /// Outbound fragmentation ceiling per `MESSAGE_*` payload.
    pub max_msg_size: usize,
    /// Cap on concurrent receiver-side streams.
    pub max_inbound_streams: usize,
    /// Cap on concurrent initiator-side streams.
    pub max_outbound_streams: usize,
    /// Per-stream readable-buffer ceiling before forced reset.
    pub max_stream_buffer_size: usize,
    /// Token-bucket capacity and per-second refill for post-cap
    /// `NEW_STREAM` bursts; the first overflow beyond it closes the
    /// connection.
    pub disconnect_threshold: u64,
}

impl Default for MplexConfig {
    fn default() -> Self {
        Self {
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_inbound_streams: DEFAULT_MAX_INBOUND_STREAMS,
            max_outbound_streams: DEFAULT_MAX_OUTBOUND_STREAMS,
            max_stream_buffer_size: DEFAULT_MAX_STREAM_BUFFER_SIZE,
            disconnect_threshold: DEFAULT_DISCONNECT_THRESHOLD,
        }
    }
}

impl MplexConfig {
    /// Create a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outbound fragmentation ceiling.
    pub fn max_msg_size(mut self, value: usize) -> Self {
        self.max_msg_size = value;
        self
    }

    /// Set the inbound stream cap.
    pub fn max_inbound_streams(mut self, value: usize) -> Self {
        self.max_inbound_streams = value;
        self
    }

    /// Set the outbound stream cap.
    pub fn max_outbound_streams(mut self, value: usize) -> Self {
        self.max_outbound_streams = value;
        self
    }

    /// Set the per-stream readable-buffer ceiling.
    pub fn max_stream_buffer_size(mut self, value: usize) -> Self {
        self.max_stream_buffer_size = value;
        self
    }

    /// Set the post-cap `NEW_STREAM` rate-limit threshold.
    pub fn disconnect_threshold(mut self, value: u64) -> Self {
        self.disconnect_threshold = value;
        self
    }
}
