//! # mplex
//!
//! Implementation of the libp2p [mplex] stream multiplexer: many
//! independent, ordered, bytewise duplex streams carried over a single
//! reliable byte transport.
//!
//! ## Architecture
//!
//! - **Wire layer** ([`protocol`]): varint length-delimited frames, a
//!   pooled-header [`Encoder`](protocol::Encoder) and a stateful
//!   [`Decoder`](protocol::Decoder) that accepts arbitrary chunking.
//! - **Streams** ([`stream`]): per-stream half-close state machines with
//!   outbound fragmentation and an inbound buffer fed by the dispatcher.
//! - **Multiplexer** ([`muxer`]): owns the registries, decodes and
//!   dispatches inbound frames, opens outbound streams and enforces the
//!   inbound-stream cap with a rate-limited disconnect policy.
//!
//! mplex has no flow control: the only inbound safety valve is the
//! per-stream buffer ceiling, enforced by resetting the offending stream.
//!
//! [mplex]: https://github.com/libp2p/specs/tree/master/mplex
//!
//! ## Example
//!
//! ```ignore
//! use mplex::{Multiplexer, MplexConfig};
//!
//! #[tokio::main]
//! async fn main() -> mplex::Result<()> {
//!     let transport = connect_somewhere().await?;
//!     let mux = Multiplexer::new(transport, MplexConfig::default());
//!
//!     let mut stream = mux.open_stream(Some("greeting")).await?;
//!     stream.write(b"hello").await?;
//!     stream.end().await?;
//!
//!     while let Some(chunk) = stream.read().await? {
//!         println!("peer said: {:?}", chunk);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chunks;
pub mod config;
pub mod error;
pub mod muxer;
pub mod protocol;
pub mod stream;

mod rate_limit;
mod writer;

pub use chunks::ChunkList;
pub use config::MplexConfig;
pub use error::{MplexError, Result};
pub use muxer::{Multiplexer, StreamInfo};
pub use stream::{MplexStream, Role, StreamId};
