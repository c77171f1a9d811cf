//! Core abstractions for relaying notebook kernel traffic.
//!
//! This crate provides the fundamental building blocks:
//! - `KernelCommand` / `KernelEvent` - Typed kernel traffic
//! - `Envelope` + codec - Wire-stable serialization keyed by explicit type tags
//! - `EventChannel` - Ordered in-process event fan-out
//! - `Kernel` and `BroadcastTransport` collaborator traits

pub mod channel;
pub mod commands;
pub mod envelope;
pub mod events;
pub mod traits;

pub use channel::EventChannel;
pub use commands::KernelCommand;
pub use envelope::{CodecError, CommandEnvelope, Envelope, EnvelopeKind, EventEnvelope};
pub use events::{CompletionItem, DiagnosticSeverity, FormattedValue, KernelEvent, KernelInfo};
pub use traits::{BroadcastFrame, BroadcastTransport, Kernel, KernelError, KERNEL_EVENT_FRAME};
