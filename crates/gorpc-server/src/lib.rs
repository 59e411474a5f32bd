//! gorpc server
//!
//! Exposes an arbitrary receiver's methods as remotely callable procedures.
//!
//! # Overview
//!
//! A [`Server`] owns a table of registered services. Each accepted connection
//! gets its own request pump: the pump reads frames, dispatches every request
//! on its own task (pipelined, so one slow method does not stall the
//! connection) and serializes responses through a per-connection send lock.
//! An optional handle timeout bounds method execution; timed-out requests are
//! answered with an error response and any late result is dropped.
//!
//! # Example
//!
//! ```no_run
//! use gorpc_server::{Methods, RpcService, Server};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! struct Arith;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! impl Arith {
//!     fn sum(&self, args: Args, reply: &mut i64) -> Result<(), String> {
//!         *reply = args.num1 + args.num2;
//!         Ok(())
//!     }
//! }
//!
//! impl RpcService for Arith {
//!     fn methods(methods: &mut Methods<Self>) {
//!         methods.add("Sum", Arith::sum);
//!     }
//! }
//!
//! # async fn run() -> gorpc_common::Result<()> {
//! let server = Arc::new(Server::new());
//! server.register(Arith).await?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! server.accept(listener).await;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod service;

pub use server::Server;
pub use service::{Method, Methods, RpcService, Service};
