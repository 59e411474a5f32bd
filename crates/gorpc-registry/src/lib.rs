//! gorpc registry
//!
//! A lightweight service registry: servers announce themselves with periodic
//! heartbeats, the registry serves the set of live addresses, and entries
//! whose heartbeats stop are pruned after a timeout. State is in-memory
//! only.
//!
//! # HTTP API
//!
//! Mounted at [`DEFAULT_REGISTRY_PATH`]:
//!
//! - `GET` - the live server list as a JSON array of addresses
//! - `POST` - heartbeat: a JSON array of addresses to upsert
//! - anything else - `405 Method Not Allowed`
//!
//! # Example
//!
//! ```no_run
//! use gorpc_registry::{heartbeat, Registry};
//! use std::time::Duration;
//!
//! # async fn run() -> gorpc_common::Result<()> {
//! let registry = Registry::new(Duration::from_secs(5));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! tokio::spawn(registry.serve(listener));
//!
//! // A server announces itself every default interval.
//! heartbeat(
//!     "http://127.0.0.1:9999/gorpc/registry",
//!     "127.0.0.1:8080",
//!     Duration::ZERO,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod heartbeat;
pub mod registry;

pub use heartbeat::heartbeat;
pub use registry::{Registry, DEFAULT_REGISTRY_PATH, DEFAULT_TIMEOUT};
