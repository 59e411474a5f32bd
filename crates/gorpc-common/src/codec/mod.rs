//! Frame-level codecs
//!
//! A gorpc connection is a stream of length-prefixed messages:
//! `[4-byte length as u32 big-endian] + [payload]`. Headers and bodies
//! strictly alternate, one request or response being exactly one header
//! followed by one body.
//!
//! The payload encoding is selected per connection by [`CodecKind`], named in
//! the session [`Options`](crate::protocol::Options). [`FrameReader`] and
//! [`FrameWriter`] own the two halves of the underlying byte stream; the
//! writer buffers and flushes once per `write` call so a frame reaches the
//! peer whole.

pub mod frame;

pub use frame::{read_options, split, write_options, BoxedConnection, Connection, FrameReader,
                FrameWriter, MAX_FRAME_SIZE};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::Result;

/// Body encoding negotiated in the session preface.
///
/// MessagePack is the default: a self-describing binary format that carries
/// structure inline. JSON is kept for interoperability and debugging.
/// [`from_name`](CodecKind::from_name) is the process-wide identifier
/// resolution the preface goes through; adding a format means adding a
/// variant and its identifier there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    MessagePack,
    Json,
}

impl CodecKind {
    /// Resolves a codec by its wire identifier.
    pub fn from_name(name: &str) -> Option<CodecKind> {
        match name {
            "application/msgpack" => Some(CodecKind::MessagePack),
            "application/json" => Some(CodecKind::Json),
            _ => None,
        }
    }

    /// The wire identifier of this codec.
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::MessagePack => "application/msgpack",
            CodecKind::Json => "application/json",
        }
    }

    /// Encodes a value into a frame payload.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecKind::MessagePack => Ok(rmp_serde::to_vec_named(value)?),
            CodecKind::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decodes a frame payload into a value.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            CodecKind::MessagePack => Ok(rmp_serde::from_slice(data)?),
            CodecKind::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}

impl Default for CodecKind {
    fn default() -> Self {
        CodecKind::MessagePack
    }
}
