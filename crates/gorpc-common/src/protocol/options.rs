use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::protocol::error::{Result, RpcError};

/// Sentinel identifying a gorpc connection.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// HTTP path the RPC server answers `CONNECT` on.
pub const DEFAULT_RPC_PATH: &str = "/gorpc/";

/// Status portion of the tunnel handshake response line.
pub const CONNECTED_LINE: &str = "200 connected to gorpc";

/// Session preface negotiated once per connection.
///
/// The client sends `Options` as the first frame, always JSON-encoded so the
/// server can decode it before knowing the body codec; everything after it
/// uses `codec_type`. Timeouts travel as milliseconds, with zero meaning
/// "no deadline".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: CodecKind,
    pub connect_timeout: Duration,
    pub handle_timeout: Duration,
}

/// The preface as it travels: the codec is its identifier string, resolved
/// through [`CodecKind::from_name`] on the way in.
#[derive(Serialize, Deserialize)]
struct WireOptions {
    magic_number: u32,
    codec_type: String,
    connect_timeout: u64,
    handle_timeout: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecKind::MessagePack,
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Selects the body codec for this session.
    pub fn with_codec(mut self, codec_type: CodecKind) -> Self {
        self.codec_type = codec_type;
        self
    }

    /// Bounds dial-plus-handshake; zero disables the deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds server-side method execution; zero disables the deadline.
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Encodes the preface payload, the codec as its wire identifier.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&WireOptions {
            magic_number: self.magic_number,
            codec_type: self.codec_type.name().to_string(),
            connect_timeout: self.connect_timeout.as_millis() as u64,
            handle_timeout: self.handle_timeout.as_millis() as u64,
        })?)
    }

    /// Decodes a preface payload, resolving the codec identifier through
    /// [`CodecKind::from_name`]; an unrecognized identifier is its own
    /// error, distinct from malformed JSON.
    pub fn from_json(payload: &[u8]) -> Result<Options> {
        let wire: WireOptions = serde_json::from_slice(payload)?;
        let codec_type = CodecKind::from_name(&wire.codec_type)
            .ok_or(RpcError::UnknownCodec(wire.codec_type))?;
        Ok(Options {
            magic_number: wire.magic_number,
            codec_type,
            connect_timeout: Duration::from_millis(wire.connect_timeout),
            handle_timeout: Duration::from_millis(wire.handle_timeout),
        })
    }
}
