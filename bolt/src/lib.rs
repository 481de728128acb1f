#![deny(unsafe_code)] // Enforce memory safety across the entire crate
//! # Overall Example
//! ```rust,no_run
//!
//! use bolt::conf::Broker;
//! use bolt::{Result, Server};
//!
//! fn main() -> Result<()> {
//!     let cfg = Broker { port: 9100, ..Default::default() };
//!     let server = Server::new(cfg).start()?;
//!     println!("listening on {}", server.local_addr());
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

/// Broker Core
pub mod client; // Client handle and socket connection
pub mod context; // Shared server context
pub mod manager; // I/O manager threads
pub mod processor; // Message queue and dispatch
pub mod server; // Listener, accept loop and lifecycle
pub mod stats; // Broker counters

/// Topic Handling
pub mod distributor; // Subscription trie
pub mod topic; // Topic parsing and matching

/// Support
pub mod logger; // log to slog bridge
pub mod types; // Common data types

pub use context::ServerContext;
pub use server::{Server, ServerHandle};

/// External Crate Re-exports
pub use bolt_codec as codec; // Wire codec
pub use bolt_conf as conf; // Configuration
pub use bolt_utils as utils; // Common utilities

pub type Result<T, E = anyhow::Error> = anyhow::Result<T, E>;
