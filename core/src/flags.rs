use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    pub OPENAI_DEFAULT_MODEL: &str = "codex-mini-latest";
    pub OPENAI_API_BASE: &str = "https://api.openai.com/v1";

    /// Total number of backend invocations a single request may use before
    /// the turn gives up on transient failures.
    pub SHELLPILOT_MAX_ATTEMPTS: u64 = 8;
    pub SHELLPILOT_RETRY_BASE_DELAY_MS: u64 = 500;

    // We generally don't want to disconnect; this updates the timeout to be five minutes.
    pub OPENAI_STREAM_IDLE_TIMEOUT_MS: Duration = Duration::from_millis(300_000), |value| {
        value.parse().map(Duration::from_millis)
    };

    /// Fixture path for offline tests (see client.rs).
    pub SHELLPILOT_RS_SSE_FIXTURE: Option<&str> = None;
}
