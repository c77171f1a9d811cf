//! Session management for notebook documents.
//!
//! Provides:
//! - `DocumentAddress` / `SessionKey` - Canonical document identity
//! - `KernelClient` - The per-session kernel/transport pairing
//! - `SessionMultiplexer` - Maps each session key to exactly one
//!   lazily-created client, deduplicating concurrent creation

pub mod address;
pub mod client;
pub mod multiplexer;

pub use address::{AddressError, DocumentAddress, SessionKey};
pub use client::{ClientConnector, CommandOutcome, ConnectError, KernelClient};
pub use multiplexer::{CreationError, SessionMultiplexer};
