//! Types exchanged between the turn controller and its UI collaborator.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// User input
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Text {
        text: String,
    },
    /// Pre‑encoded data: URI image.
    Image {
        image_url: String,
    },

    /// Local image path provided by the user.  This will be converted to an
    /// `Image` variant (base64 data URL) before the request is sent.
    LocalImage {
        path: PathBuf,
    },
}

/// Determines how liberally commands are auto‑approved by the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicyMode {
    /// Only “known safe” commands (see `is_known_safe_command()`) that
    /// **only read files** are auto‑approved. Everything else asks
    /// the user.
    #[default]
    Manual,

    /// In addition to everything allowed by `Manual`, shell scripts composed
    /// exclusively of known-safe commands (pipelines, `&&` sequences) are
    /// auto‑approved.
    AutoApproveSafe,

    /// *All* commands are auto‑approved, but they are expected to run inside a
    /// sandbox where network access is disabled and writes are confined to the
    /// writable roots. Without a platform sandbox this degrades to asking.
    AutoApproveAll,
}

/// User's decision in response to a confirmation prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// User has approved this command and the agent should execute it.
    Approve,

    /// User has approved this command and wants to automatically approve any
    /// future identical instances (same argv) for the rest of the session.
    ApproveAlways,

    /// User has denied this command; the model is told and the turn
    /// continues so it can try something else.
    #[default]
    DenyContinue,

    /// User has denied this command and wants the turn to stop.
    DenyExit,

    /// User wants an explanation of the command before deciding.
    Explain,
}

/// Answer returned by the UI for a single confirmation prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfirmation {
    pub decision: ReviewDecision,

    /// Text sent back to the model in place of the default nudge when the
    /// command is denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_deny_message: Option<String>,
}

impl From<ReviewDecision> for CommandConfirmation {
    fn from(decision: ReviewDecision) -> Self {
        Self {
            decision,
            custom_deny_message: None,
        }
    }
}

/// What the UI shows the user when a command needs confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPrompt {
    pub call_id: String,
    pub command: Vec<String>,
    pub cwd: PathBuf,
    /// Filled in after the user asked for an explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}
