//! gorpc client
//!
//! The calling side of the runtime, in three layers:
//!
//! - [`Client`] - one negotiated connection: sends framed requests, runs a
//!   dedicated receiver task that routes responses to waiting callers by
//!   sequence number, honors cancellation and connect timeouts
//! - [`Discovery`] - where server addresses come from: a static list
//!   ([`MultiServersDiscovery`]) or a registry-backed one
//!   ([`RegistryDiscovery`])
//! - [`XClient`] - the multiplexer: picks an address per call by
//!   [`SelectMode`], caches one client per address, and can broadcast a call
//!   to every known server with first-error cancellation
//!
//! # Example
//!
//! ```no_run
//! use gorpc_client::Client;
//! use gorpc_common::Options;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! # async fn run() -> gorpc_common::Result<()> {
//! let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
//! let reply: i64 = client.call("Foo.Sum", &Args { num1: 3, num2: 4 }).await?;
//! assert_eq!(reply, 7);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod discovery;
pub mod xclient;

pub use client::{Call, Client};
pub use discovery::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode};
pub use xclient::XClient;
