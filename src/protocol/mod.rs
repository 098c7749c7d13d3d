//! Protocol module - wire format, framing and frame types.
//!
//! This module implements the mplex wire layer:
//! - unsigned LEB128 varints
//! - `Message` records and their seven type tags
//! - the [`Encoder`] with its pooled header buffer
//! - the stateful [`Decoder`] that accumulates partial reads

mod decoder;
mod encoder;
mod message;
pub(crate) mod varint;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use message::{Message, MessageType};
