//! Memoized acquisition of kernel launch descriptors.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::locate::resolve_kernel_executable;

/// Acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("kernel tool `{0}` not found")]
    ToolNotFound(String),
    #[error("invalid kernel tool arguments `{0}`")]
    InvalidArguments(String),
}

/// Everything needed to launch a kernel process.
///
/// Opaque to the messaging core; only client construction consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub version: Option<String>,
}

/// Which tool to acquire, and how.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AcquisitionRequest {
    /// Executable name or absolute path.
    pub tool_name: String,
    /// Raw argument string, split shell-style at acquisition time.
    pub tool_args: String,
    /// Requested tool version, if pinned.
    pub version: Option<String>,
}

impl AcquisitionRequest {
    /// Request a tool by name with no arguments or version pin.
    #[must_use]
    pub fn new<S: Into<String>>(tool_name: S) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_args: String::new(),
            version: None,
        }
    }

    /// Set the raw argument string.
    #[must_use]
    pub fn args<S: Into<String>>(mut self, tool_args: S) -> Self {
        self.tool_args = tool_args.into();
        self
    }

    /// Pin a tool version.
    #[must_use]
    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }
}

type SharedAcquisition = Shared<BoxFuture<'static, Result<LaunchDescriptor, AcquisitionError>>>;

type Probe =
    dyn Fn(AcquisitionRequest) -> BoxFuture<'static, Result<LaunchDescriptor, AcquisitionError>>
        + Send
        + Sync;

/// Caches one in-flight-or-completed acquisition.
///
/// Concurrent acquires of the same request share a single probe. A
/// request that differs from the cached one invalidates the cache, and a
/// failed probe is never cached, so the next call starts fresh.
pub struct ToolAcquisition {
    probe: Arc<Probe>,
    cached: Mutex<Option<(AcquisitionRequest, SharedAcquisition)>>,
}

impl Default for ToolAcquisition {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolAcquisition {
    /// Acquisition backed by on-disk tool lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::with_probe(|request| locate_probe(request).boxed())
    }

    /// Acquisition backed by a custom probe, e.g. an installer flow.
    #[must_use]
    pub fn with_probe<F>(probe: F) -> Self
    where
        F: Fn(AcquisitionRequest) -> BoxFuture<'static, Result<LaunchDescriptor, AcquisitionError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            probe: Arc::new(probe),
            cached: Mutex::new(None),
        }
    }

    /// Acquire a launch descriptor for `request`.
    ///
    /// # Errors
    /// Returns [`AcquisitionError`] if the tool cannot be located or the
    /// argument string does not parse.
    pub async fn acquire(
        &self,
        request: AcquisitionRequest,
    ) -> Result<LaunchDescriptor, AcquisitionError> {
        let shared = {
            let mut cached = self.cached.lock().unwrap();
            let reuse = cached.as_ref().and_then(|(cached_request, shared)| {
                (*cached_request == request).then(|| shared.clone())
            });
            match reuse {
                Some(shared) => shared,
                None => {
                    if cached.is_some() {
                        tracing::debug!(tool = %request.tool_name, "acquisition request changed; invalidating cache");
                    }
                    let shared = (self.probe)(request.clone()).shared();
                    *cached = Some((request.clone(), shared.clone()));
                    shared
                }
            }
        };

        let result = shared.await;
        if result.is_err() {
            let mut cached = self.cached.lock().unwrap();
            if cached
                .as_ref()
                .is_some_and(|(cached_request, _)| *cached_request == request)
            {
                *cached = None;
            }
        }
        result
    }
}

async fn locate_probe(request: AcquisitionRequest) -> Result<LaunchDescriptor, AcquisitionError> {
    let args = shlex::split(&request.tool_args)
        .ok_or_else(|| AcquisitionError::InvalidArguments(request.tool_args.clone()))?;
    let executable = resolve_kernel_executable(&request.tool_name)
        .await
        .ok_or_else(|| AcquisitionError::ToolNotFound(request.tool_name.clone()))?;
    let working_dir = dirs::data_local_dir().map(|dir| dir.join("notebook-relay"));

    tracing::debug!(executable = %executable.display(), "kernel tool located");
    Ok(LaunchDescriptor {
        executable,
        args,
        working_dir,
        version: request.version,
    })
}
