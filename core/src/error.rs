use reqwest::StatusCode;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, AgentErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// The sandbox wrapper itself could not be started.
    #[error("failed to launch sandbox {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Landlock could not be fully enforced by the running kernel.
    #[cfg(target_os = "linux")]
    #[error("Landlock was not able to fully enforce all sandbox rules")]
    LandlockRestrict,

    #[cfg(target_os = "linux")]
    #[error(transparent)]
    LandlockRuleset(#[from] landlock::RulesetError),

    /// Error from linux seccomp filter setup
    #[cfg(target_os = "linux")]
    #[error("seccomp setup error")]
    SeccompInstall(#[from] seccompiler::Error),

    /// Error from linux seccomp backend
    #[cfg(target_os = "linux")]
    #[error("seccomp backend error")]
    SeccompBackend(#[from] seccompiler::BackendError),

    #[cfg(target_os = "linux")]
    #[error("seccomp filters are not supported on {0}")]
    SeccompUnsupportedArch(&'static str),
}

#[derive(Error, Debug)]
pub enum AgentErr {
    /// Returned by the model client when the SSE stream disconnects or errors out **after** the
    /// HTTP handshake has succeeded but **before** it finished emitting `response.completed`.
    ///
    /// The turn controller treats this as a transient error and will retry the request.
    #[error("stream disconnected before completion: {0}")]
    Stream(String),

    /// A turn is already running on this controller.
    #[error("a turn is already in progress")]
    Busy,

    /// The active turn was cancelled by the user.
    #[error("interrupted")]
    Interrupted,

    /// Unexpected HTTP status code, with the response body and, for server
    /// errors, the delay requested through `Retry-After`.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String, Option<Duration>),

    /// HTTP 429, or a `response.failed` event reporting a rate limit or an
    /// exhausted quota. Never retried.
    #[error("rate limit reached: {0}")]
    RateLimited(String),

    /// A `response.failed` event whose error code will not go away on retry,
    /// e.g. `invalid_prompt` or `context_length_exceeded`.
    #[error("response failed ({code}): {message}")]
    ResponseFailed { code: String, message: String },

    /// Sandbox error
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxErr),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),

    #[error("{0}")]
    EnvVar(EnvVarError),
}

impl AgentErr {
    /// Transient failures worth another attempt: server errors, connection
    /// problems and streams that ended before completion.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentErr::Stream(..) | AgentErr::Reqwest(_) => true,
            AgentErr::UnexpectedStatus(status, ..) => status.is_server_error(),
            AgentErr::Busy
            | AgentErr::Interrupted
            | AgentErr::RateLimited(_)
            | AgentErr::ResponseFailed { .. }
            | AgentErr::Sandbox(_)
            | AgentErr::Io(_)
            | AgentErr::Json(_)
            | AgentErr::TokioJoin(_)
            | AgentErr::EnvVar(_) => false,
        }
    }

    /// Delay requested by the server via `Retry-After`, if any.
    pub fn requested_delay(&self) -> Option<Duration> {
        match self {
            AgentErr::UnexpectedStatus(_, _, delay) => *delay,
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct EnvVarError {
    /// Name of the environment variable that is missing.
    pub var: String,

    /// Optional instructions to help the user get a valid value for the
    /// variable and set it.
    pub instructions: Option<String>,
}

impl std::fmt::Display for EnvVarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Missing environment variable: `{}`.", self.var)?;
        if let Some(instructions) = &self.instructions {
            write!(f, " {instructions}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = AgentErr::UnexpectedStatus(StatusCode::BAD_GATEWAY, String::new(), None);
        assert!(err.is_retryable());
        assert!(AgentErr::Stream("closed".into()).is_retryable());
    }

    #[test]
    fn retry_after_is_the_requested_delay() {
        let err = AgentErr::UnexpectedStatus(
            StatusCode::SERVICE_UNAVAILABLE,
            String::new(),
            Some(Duration::from_secs(3)),
        );
        assert_eq!(err.requested_delay(), Some(Duration::from_secs(3)));
        assert_eq!(AgentErr::Stream("closed".into()).requested_delay(), None);
    }

    #[test]
    fn client_errors_and_rate_limits_are_not_retryable() {
        let err = AgentErr::UnexpectedStatus(StatusCode::BAD_REQUEST, "bad".into(), None);
        assert!(!err.is_retryable());
        assert!(!AgentErr::RateLimited("slow down".into()).is_retryable());
        let failed = AgentErr::ResponseFailed {
            code: "invalid_prompt".into(),
            message: "flagged".into(),
        };
        assert!(!failed.is_retryable());
        assert!(!AgentErr::Interrupted.is_retryable());
    }

    #[test]
    fn env_var_error_includes_instructions() {
        let err = EnvVarError {
            var: "OPENAI_API_KEY".to_string(),
            instructions: Some("Export it first.".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Missing environment variable: `OPENAI_API_KEY`. Export it first."
        );
    }
}
