//! gorpc protocol types
//!
//! The request/response header, the session preface exchanged once per
//! connection, and the error type used across the workspace.
//!
//! # Components
//!
//! - [`Header`] - one per frame, on requests and responses alike
//! - [`Options`] - the negotiated session preface (magic number, codec,
//!   timeouts)
//! - [`RpcError`] / [`Result`] - error handling for all gorpc crates

pub mod error;
pub mod header;
pub mod options;

pub use error::{Result, RpcError};
pub use header::Header;
pub use options::{Options, CONNECTED_LINE, DEFAULT_RPC_PATH, MAGIC_NUMBER};
