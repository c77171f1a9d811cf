//! Per-kernel event distribution.
//!
//! Provides:
//! - `KernelEventBus` - Subscribes once to a kernel and fans its events
//!   out to all connected peers of a transport
//! - `BackchannelProxy` - Re-injects envelopes received from remote
//!   peers into the owning kernel

pub mod backchannel;
pub mod bus;

pub use backchannel::{BackchannelProxy, BusError};
pub use bus::KernelEventBus;
