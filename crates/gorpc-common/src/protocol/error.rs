use std::time::Duration;

use thiserror::Error;

/// Errors produced anywhere in the gorpc stack.
///
/// Server-side errors that occur after a request was admitted travel back to
/// the caller as text in [`Header::error`](super::Header) and surface on the
/// client as [`RpcError::Remote`]; everything else is returned directly.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The client is closing or the connection has shut down underneath it.
    #[error("connection is shut down")]
    Shutdown,

    /// Dial plus handshake did not finish within the connect timeout.
    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// A synchronous call was cancelled while waiting for its response.
    #[error("rpc client: call timeout: {service_method} (seq {seq})")]
    CallTimeout { service_method: String, seq: u64 },

    /// The session preface carried the wrong magic number.
    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagic(u32),

    /// The codec identifier in a decoded preface is not recognized.
    #[error("rpc: unknown codec type {0}")]
    UnknownCodec(String),

    /// The receiver's type name does not start with an upper-case letter.
    #[error("rpc server: {0} is not a valid service name")]
    InvalidServiceName(String),

    /// A service with the same name is already registered.
    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    /// The dispatch string did not contain a `Service.Method` separator.
    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedServiceMethod(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    /// The discovery's server list is empty.
    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    /// The invoked method returned an error.
    #[error("{0}")]
    Application(String),

    /// A non-empty `Header::error` received from the peer.
    #[error("{0}")]
    Remote(String),

    /// A frame length prefix above the allowed maximum.
    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
