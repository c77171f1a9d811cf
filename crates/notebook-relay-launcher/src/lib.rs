//! Locating and acquiring kernel tools.
//!
//! Provides:
//! - `resolve_kernel_executable` - Find a kernel executable on disk
//! - `ToolAcquisition` - Memoized acquisition of launch descriptors
//!
//! Acquisition happens at client-construction time only; the resulting
//! [`LaunchDescriptor`] is an opaque input to client construction and is
//! never inspected by the messaging core.

pub mod acquisition;
pub mod locate;

pub use acquisition::{AcquisitionError, AcquisitionRequest, LaunchDescriptor, ToolAcquisition};
pub use locate::resolve_kernel_executable;
