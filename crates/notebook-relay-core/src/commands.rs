//! Typed commands directed at a kernel.

use serde::{Deserialize, Serialize};

/// A request directed at a kernel.
///
/// Commands are immutable once built. The serde tag doubles as the wire
/// type tag carried in envelopes (see [`crate::envelope`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelCommand {
    /// Execute a block of code.
    SubmitCode { code: String },
    /// Request completion items at a cursor position.
    RequestCompletions { code: String, cursor_position: u32 },
    /// Request language/implementation metadata.
    RequestKernelInfo,
    /// Cancel the currently running submission.
    Cancel,
}

impl KernelCommand {
    /// Every wire tag a command can carry. Decoding rejects anything else.
    pub const TYPE_TAGS: &'static [&'static str] = &[
        "submit_code",
        "request_completions",
        "request_kernel_info",
        "cancel",
    ];

    /// The wire type tag for this command.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::SubmitCode { .. } => "submit_code",
            Self::RequestCompletions { .. } => "request_completions",
            Self::RequestKernelInfo => "request_kernel_info",
            Self::Cancel => "cancel",
        }
    }

    /// Whether `tag` names a known command type.
    #[must_use]
    pub fn is_known_tag(tag: &str) -> bool {
        Self::TYPE_TAGS.contains(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_matches_serde_tag() {
        let commands = [
            KernelCommand::SubmitCode {
                code: "1 + 1".into(),
            },
            KernelCommand::RequestCompletions {
                code: "pri".into(),
                cursor_position: 3,
            },
            KernelCommand::RequestKernelInfo,
            KernelCommand::Cancel,
        ];

        for command in commands {
            let value = serde_json::to_value(&command).unwrap();
            assert_eq!(value["type"], command.type_tag());
            assert!(KernelCommand::is_known_tag(command.type_tag()));
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(!KernelCommand::is_known_tag("reboot_universe"));
    }
}
