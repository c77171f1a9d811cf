//! The per-session client handle.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use notebook_relay_core::{
    CommandEnvelope, EventEnvelope, Kernel, KernelCommand, KernelError, KernelEvent,
};

use crate::address::SessionKey;

/// Client construction failure.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("kernel tool not found: {0}")]
    ToolNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the kernel/transport pairing for a session.
///
/// Implementations may perform process or network I/O; the multiplexer
/// guarantees `connect` runs at most once per live session key.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Construct the client for `key`.
    ///
    /// # Errors
    /// Returns [`ConnectError`] if the kernel cannot be reached or
    /// launched; the failure is propagated to every waiter for `key`.
    async fn connect(&self, key: &SessionKey) -> Result<KernelClient, ConnectError>;
}

type Teardown = Box<dyn FnOnce() + Send>;

/// What one command submission produced, in emission order.
#[derive(Debug)]
pub struct CommandOutcome {
    /// Token the submission was correlated under.
    pub correlation_token: String,
    /// Non-terminal events attributed to the command.
    pub produced: Vec<KernelEvent>,
    /// The failure message, if the command failed.
    pub failure: Option<String>,
}

impl CommandOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// A single logical handle to a running kernel for one session.
///
/// Exactly one exists per live session key; the multiplexer owns it and
/// disposes it on close. Disposal runs the connector-installed teardown
/// hook at most once, no matter how often it is invoked.
pub struct KernelClient {
    kernel: Arc<dyn Kernel>,
    teardown: Mutex<Option<Teardown>>,
}

impl std::fmt::Debug for KernelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelClient").finish_non_exhaustive()
    }
}

impl KernelClient {
    /// Wrap a kernel handle with no teardown hook.
    #[must_use]
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self {
            kernel,
            teardown: Mutex::new(None),
        }
    }

    /// Wrap a kernel handle and register a teardown hook to run on
    /// disposal.
    #[must_use]
    pub fn with_teardown(kernel: Arc<dyn Kernel>, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kernel,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// The kernel this client talks to.
    #[must_use]
    pub fn kernel(&self) -> Arc<dyn Kernel> {
        Arc::clone(&self.kernel)
    }

    /// Subscribe to the kernel's events, in emission order.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.kernel.subscribe()
    }

    /// Submit a command under a freshly minted correlation token.
    ///
    /// Returns the token so later events can be matched to this
    /// submission.
    ///
    /// # Errors
    /// Returns [`KernelError`] if the kernel refuses the command.
    pub async fn submit_command(&self, command: KernelCommand) -> Result<String, KernelError> {
        let token = Uuid::new_v4().to_string();
        let envelope = CommandEnvelope {
            command,
            correlation_token: Some(token.clone()),
        };
        self.kernel.submit(envelope).await?;
        Ok(token)
    }

    /// Submit code and collect the correlated events until the kernel
    /// reports the command finished.
    ///
    /// # Errors
    /// Returns [`KernelError::Disconnected`] if the kernel's event
    /// stream closes before a terminal event arrives.
    pub async fn execute_code<S: Into<String>>(&self, code: S) -> Result<CommandOutcome, KernelError> {
        // Subscribe before submitting so no correlated event can be missed.
        let mut events = self.kernel.subscribe();
        let token = self
            .submit_command(KernelCommand::SubmitCode { code: code.into() })
            .await?;

        let mut produced = Vec::new();
        loop {
            match events.recv().await {
                Ok(envelope) if envelope.correlation_token.as_deref() == Some(token.as_str()) => {
                    match envelope.event {
                        KernelEvent::CommandSucceeded => {
                            return Ok(CommandOutcome {
                                correlation_token: token,
                                produced,
                                failure: None,
                            });
                        }
                        KernelEvent::CommandFailed { message } => {
                            return Ok(CommandOutcome {
                                correlation_token: token,
                                produced,
                                failure: Some(message),
                            });
                        }
                        event => produced.push(event),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "dropped events while collecting command outcome");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(KernelError::Disconnected),
            }
        }
    }

    /// Release the underlying kernel/transport pairing.
    ///
    /// Idempotent: the teardown hook runs on the first call only.
    pub fn dispose(&self) {
        if let Some(teardown) = self.teardown.lock().unwrap().take() {
            teardown();
        }
    }
}
