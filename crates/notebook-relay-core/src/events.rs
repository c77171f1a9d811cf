//! Typed events emitted by a kernel.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// A value produced by a kernel, tagged with its mime type.
///
/// Textual mime types carry the value verbatim; binary mime types carry
/// it base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
}

impl FormattedValue {
    /// Create a `text/plain` value.
    #[must_use]
    pub fn text_plain<S: Into<String>>(value: S) -> Self {
        Self {
            mime_type: "text/plain".into(),
            value: value.into(),
        }
    }

    /// Create a binary value (base64 encoded).
    #[must_use]
    pub fn binary<S: Into<String>>(mime_type: S, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: BASE64.encode(bytes),
        }
    }

    /// Decode a binary value back into raw bytes.
    #[must_use]
    pub fn decode_binary(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.value).ok()
    }
}

/// Severity of a diagnostic raised during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Hint,
    Info,
    Warning,
    Error,
}

/// A single completion suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub display_text: String,
    pub insert_text: String,
}

/// Language/implementation metadata reported by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub language_name: String,
    pub implementation_version: String,
}

/// Something that happened inside a kernel.
///
/// Events are immutable and carry an implicit emission order per kernel;
/// nothing in this crate reorders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    /// The kernel accepted a code submission.
    CodeSubmissionReceived { code: String },
    /// Output was written while executing.
    OutputProduced { value: FormattedValue },
    /// The submission produced a return value.
    ReturnValueProduced { value: FormattedValue },
    /// A diagnostic was raised.
    DiagnosticProduced {
        severity: DiagnosticSeverity,
        message: String,
    },
    /// Completion items were produced.
    CompletionsProduced { completions: Vec<CompletionItem> },
    /// Kernel metadata was produced.
    KernelInfoProduced { info: KernelInfo },
    /// The causing command finished successfully.
    CommandSucceeded,
    /// The causing command failed.
    CommandFailed { message: String },
}

impl KernelEvent {
    /// Every wire tag an event can carry. Decoding rejects anything else.
    pub const TYPE_TAGS: &'static [&'static str] = &[
        "code_submission_received",
        "output_produced",
        "return_value_produced",
        "diagnostic_produced",
        "completions_produced",
        "kernel_info_produced",
        "command_succeeded",
        "command_failed",
    ];

    /// The wire type tag for this event.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::CodeSubmissionReceived { .. } => "code_submission_received",
            Self::OutputProduced { .. } => "output_produced",
            Self::ReturnValueProduced { .. } => "return_value_produced",
            Self::DiagnosticProduced { .. } => "diagnostic_produced",
            Self::CompletionsProduced { .. } => "completions_produced",
            Self::KernelInfoProduced { .. } => "kernel_info_produced",
            Self::CommandSucceeded => "command_succeeded",
            Self::CommandFailed { .. } => "command_failed",
        }
    }

    /// Whether `tag` names a known event type.
    #[must_use]
    pub fn is_known_tag(tag: &str) -> bool {
        Self::TYPE_TAGS.contains(&tag)
    }
}
