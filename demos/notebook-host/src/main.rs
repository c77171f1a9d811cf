//! Demo host process: one notebook session, fanned out over WebSocket.
//!
//! Run with: cargo run -p notebook-host
//!
//! Peers connect to ws://127.0.0.1:3000/ws and receive every kernel
//! event as a `kernelEvent` frame; envelopes they send back are
//! re-injected through the backchannel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notebook_relay_bus::KernelEventBus;
use notebook_relay_core::{
    BroadcastTransport, CommandEnvelope, EventChannel, EventEnvelope, FormattedValue, Kernel,
    KernelCommand, KernelError, KernelEvent, KernelInfo,
};
use notebook_relay_launcher::{AcquisitionRequest, LaunchDescriptor, ToolAcquisition};
use notebook_relay_session::{
    ClientConnector, ConnectError, DocumentAddress, KernelClient, SessionKey, SessionMultiplexer,
};
use notebook_relay_transport::{WebSocketHub, WsState, create_ws_router};

/// A toy kernel that echoes submissions back as return values.
///
/// Real kernels live behind the same `Kernel` trait; this one exists so
/// the demo runs without any language runtime installed.
struct EchoKernel {
    channel: EventChannel,
    descriptor: LaunchDescriptor,
}

impl EchoKernel {
    fn new(descriptor: LaunchDescriptor) -> Self {
        Self {
            channel: EventChannel::new(),
            descriptor,
        }
    }
}

#[async_trait]
impl Kernel for EchoKernel {
    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.channel.subscribe()
    }

    async fn submit(&self, envelope: CommandEnvelope) -> Result<(), KernelError> {
        let reply = |event| EventEnvelope::correlated_to(event, &envelope);
        match &envelope.command {
            KernelCommand::SubmitCode { code } => {
                self.channel.publish(reply(KernelEvent::CodeSubmissionReceived {
                    code: code.clone(),
                }));
                self.channel.publish(reply(KernelEvent::ReturnValueProduced {
                    value: FormattedValue::text_plain(code.clone()),
                }));
                self.channel.publish(reply(KernelEvent::CommandSucceeded));
            }
            KernelCommand::RequestCompletions { .. } => {
                self.channel.publish(reply(KernelEvent::CompletionsProduced {
                    completions: Vec::new(),
                }));
                self.channel.publish(reply(KernelEvent::CommandSucceeded));
            }
            KernelCommand::RequestKernelInfo => {
                self.channel.publish(reply(KernelEvent::KernelInfoProduced {
                    info: KernelInfo {
                        language_name: "echo".into(),
                        implementation_version: self
                            .descriptor
                            .version
                            .clone()
                            .unwrap_or_else(|| "0.1.0".into()),
                    },
                }));
                self.channel.publish(reply(KernelEvent::CommandSucceeded));
            }
            KernelCommand::Cancel => {
                self.channel.publish(reply(KernelEvent::CommandFailed {
                    message: "nothing to cancel".into(),
                }));
            }
        }
        Ok(())
    }

    fn publish(&self, envelope: EventEnvelope) {
        self.channel.publish(envelope);
    }
}

/// Builds a session client: acquires the kernel tool, then pairs an echo
/// kernel with it.
struct HostConnector {
    acquisition: ToolAcquisition,
    tool_name: String,
}

#[async_trait]
impl ClientConnector for HostConnector {
    async fn connect(&self, key: &SessionKey) -> Result<KernelClient, ConnectError> {
        let request = AcquisitionRequest::new(self.tool_name.clone());
        let descriptor = self
            .acquisition
            .acquire(request)
            .await
            .map_err(|err| ConnectError::ToolNotFound(err.to_string()))?;
        tracing::info!(
            session = %key,
            executable = %descriptor.executable.display(),
            "kernel tool acquired"
        );

        let session = key.to_string();
        let kernel = Arc::new(EchoKernel::new(descriptor));
        Ok(KernelClient::with_teardown(kernel, move || {
            tracing::info!(session = %session, "kernel client torn down");
        }))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr: SocketAddr = env_or("NOTEBOOK_HOST_ADDR", "127.0.0.1:3000")
        .parse()
        .context("invalid NOTEBOOK_HOST_ADDR")?;
    let document = env_or("NOTEBOOK_DOCUMENT", "untitled:Untitled-1");
    let tool_name = env_or("NOTEBOOK_KERNEL_TOOL", "sh");

    let address = DocumentAddress::parse(&document).context("invalid NOTEBOOK_DOCUMENT")?;
    let key = SessionKey::from_address(&address);

    let connector = Arc::new(HostConnector {
        acquisition: ToolAcquisition::new(),
        tool_name,
    });
    let multiplexer = SessionMultiplexer::new(connector);

    multiplexer.on_client_create(&key, |_client| async {
        tracing::info!("session client created");
    });

    let client = multiplexer
        .get_or_add_client(&key)
        .await
        .context("failed to start the notebook session")?;

    let hub = Arc::new(WebSocketHub::new());
    let bus = KernelEventBus::new(client.kernel());
    bus.register_context(Arc::clone(&hub) as Arc<dyn BroadcastTransport>);

    let state = WsState {
        hub,
        backchannel: bus.backchannel(),
    };
    let app = create_ws_router(state).layer(CorsLayer::permissive());

    tracing::info!(%addr, session = %key, "notebook host listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    multiplexer.close_client(&key, true);
    bus.dispose();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
