//! gorpc common types and codecs
//!
//! This crate provides the protocol definitions and the frame-level codec
//! layer shared by every gorpc component.
//!
//! # Overview
//!
//! gorpc is a small RPC runtime: a client invokes a named method exported by
//! a remote server over a TCP (optionally HTTP-tunneled) connection. This
//! crate contains the pieces both sides agree on:
//!
//! - **Protocol layer**: the session [`Options`](protocol::Options) preface,
//!   the per-frame [`Header`](protocol::Header), and the shared
//!   [`RpcError`](protocol::RpcError) type
//! - **Codec layer**: length-prefixed framing over a duplex byte stream and
//!   the pluggable body encodings behind [`CodecKind`](codec::CodecKind)
//!
//! # Wire format
//!
//! A connection carries `Options ‖ (Header ‖ Body)*`. The `Options` preface
//! is always JSON so the server can decode it before knowing the body codec;
//! every subsequent header and body uses the codec named in the preface.
//! Each of these messages is framed as
//! `[4-byte length as u32 big-endian] + [payload]`.

pub mod codec;
pub mod protocol;

pub use codec::{CodecKind, FrameReader, FrameWriter};
pub use protocol::{Header, Options, Result, RpcError, MAGIC_NUMBER};
