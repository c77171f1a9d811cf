//! Wire-stable envelopes for commands and events.
//!
//! An envelope is the unit exchanged with remote peers:
//! `{ kind, type, payload, correlationToken? }`. Decoding dispatches on
//! the explicit type tag carried in the envelope, never on the payload
//! shape, so a decoder does not need to trust the sender's object model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::commands::KernelCommand;
use crate::events::KernelEvent;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unrecognized envelope type tag `{tag}`")]
    UnrecognizedEnvelopeType { tag: String },
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope payload must be a JSON object, got {found}")]
    InvalidPayload { found: &'static str },
}

/// Which side of the protocol an envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Command,
    Event,
}

/// A command plus its optional correlation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: KernelCommand,
    pub correlation_token: Option<String>,
}

impl CommandEnvelope {
    /// Wrap a command without a correlation token.
    #[must_use]
    pub const fn new(command: KernelCommand) -> Self {
        Self {
            command,
            correlation_token: None,
        }
    }

    /// Wrap a command and mint a fresh correlation token for it.
    #[must_use]
    pub fn with_fresh_token(command: KernelCommand) -> Self {
        Self {
            command,
            correlation_token: Some(Uuid::new_v4().to_string()),
        }
    }
}

/// An event plus the correlation token of the command that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub event: KernelEvent,
    pub correlation_token: Option<String>,
}

impl EventEnvelope {
    /// Wrap an uncorrelated event.
    #[must_use]
    pub const fn new(event: KernelEvent) -> Self {
        Self {
            event,
            correlation_token: None,
        }
    }

    /// Wrap an event correlated to the command that caused it.
    #[must_use]
    pub fn correlated_to(event: KernelEvent, cause: &CommandEnvelope) -> Self {
        Self {
            event,
            correlation_token: cause.correlation_token.clone(),
        }
    }
}

/// The wire-stable unit exchanged with remote peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Command(CommandEnvelope),
    Event(EventEnvelope),
}

impl Envelope {
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Command(_) => EnvelopeKind::Command,
            Self::Event(_) => EnvelopeKind::Event,
        }
    }

    #[must_use]
    pub fn correlation_token(&self) -> Option<&str> {
        match self {
            Self::Command(envelope) => envelope.correlation_token.as_deref(),
            Self::Event(envelope) => envelope.correlation_token.as_deref(),
        }
    }

    /// The wire type tag of the wrapped command or event.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::Command(envelope) => envelope.command.type_tag(),
            Self::Event(envelope) => envelope.event.type_tag(),
        }
    }
}

/// The serde shape of an envelope on the wire.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    kind: EnvelopeKind,
    #[serde(rename = "type")]
    type_tag: String,
    payload: Value,
    #[serde(
        rename = "correlationToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    correlation_token: Option<String>,
}

/// Serialize an envelope to its wire form.
///
/// # Errors
/// Returns [`CodecError::Malformed`] if the payload cannot be turned into
/// JSON; every in-model payload serializes cleanly, so hitting this is a
/// caller contract violation.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let raw = match envelope {
        Envelope::Command(command) => RawEnvelope {
            kind: EnvelopeKind::Command,
            type_tag: command.command.type_tag().to_owned(),
            payload: tagless_payload(serde_json::to_value(&command.command)?),
            correlation_token: command.correlation_token.clone(),
        },
        Envelope::Event(event) => RawEnvelope {
            kind: EnvelopeKind::Event,
            type_tag: event.event.type_tag().to_owned(),
            payload: tagless_payload(serde_json::to_value(&event.event)?),
            correlation_token: event.correlation_token.clone(),
        },
    };
    Ok(serde_json::to_string(&raw)?)
}

/// Deserialize an envelope from its wire form.
///
/// # Errors
/// Returns [`CodecError::UnrecognizedEnvelopeType`] for an unknown type
/// tag and [`CodecError::Malformed`] for anything that is not a valid
/// envelope. Either way the failure isolates this one message.
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    match raw.kind {
        EnvelopeKind::Command => {
            if !KernelCommand::is_known_tag(&raw.type_tag) {
                return Err(CodecError::UnrecognizedEnvelopeType { tag: raw.type_tag });
            }
            let command = retag(&raw.type_tag, raw.payload)?;
            Ok(Envelope::Command(CommandEnvelope {
                command,
                correlation_token: raw.correlation_token,
            }))
        }
        EnvelopeKind::Event => {
            if !KernelEvent::is_known_tag(&raw.type_tag) {
                return Err(CodecError::UnrecognizedEnvelopeType { tag: raw.type_tag });
            }
            let event = retag(&raw.type_tag, raw.payload)?;
            Ok(Envelope::Event(EventEnvelope {
                event,
                correlation_token: raw.correlation_token,
            }))
        }
    }
}

/// Strip the serde tag so the payload holds only variant fields.
fn tagless_payload(mut value: Value) -> Value {
    if let Value::Object(fields) = &mut value {
        fields.remove("type");
    }
    value
}

/// Rebuild a tagged value from a wire tag plus its payload fields.
fn retag<T: serde::de::DeserializeOwned>(tag: &str, payload: Value) -> Result<T, CodecError> {
    let mut fields = match payload {
        Value::Object(fields) => fields,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(CodecError::InvalidPayload {
                found: json_type_name(&other),
            });
        }
    };
    fields.insert("type".to_owned(), Value::String(tag.to_owned()));
    Ok(serde_json::from_value(Value::Object(fields))?)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
