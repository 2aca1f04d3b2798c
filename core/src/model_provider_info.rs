//! Registry of model providers.
//!
//! Providers can be defined in two places:
//!   1. Built-in defaults compiled into the binary so the agent works out-of-the-box.
//!   2. User-defined entries inside `~/.shellpilot/config.toml` under the
//!      `model_providers` key. These override or extend the defaults at runtime.
//!
//! Every provider must speak the OpenAI Responses API (`POST {base_url}/responses`).

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::env::VarError;

use crate::error::AgentErr;
use crate::error::EnvVarError;
use crate::flags::OPENAI_API_BASE;

/// Serializable representation of a provider definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelProviderInfo {
    /// Friendly display name.
    pub name: String,
    /// Base URL for the provider's OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable that stores the user's API key for this provider.
    pub env_key: Option<String>,

    /// Optional instructions to help the user get a valid value for the
    /// variable and set it.
    pub env_key_instructions: Option<String>,
}

impl ModelProviderInfo {
    /// If `env_key` is Some, returns the API key for this provider if present
    /// (and non-empty) in the environment. If `env_key` is required but
    /// cannot be found, returns an error.
    pub fn api_key(&self) -> crate::error::Result<Option<String>> {
        match &self.env_key {
            Some(env_key) => std::env::var(env_key)
                .and_then(|v| {
                    if v.trim().is_empty() {
                        Err(VarError::NotPresent)
                    } else {
                        Ok(Some(v))
                    }
                })
                .map_err(|_| {
                    AgentErr::EnvVar(EnvVarError {
                        var: env_key.clone(),
                        instructions: self.env_key_instructions.clone(),
                    })
                }),
            None => Ok(None),
        }
    }

    pub(crate) fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }
}

/// Built-in default provider list.
pub fn built_in_model_providers() -> HashMap<String, ModelProviderInfo> {
    use ModelProviderInfo as P;

    [(
        "openai",
        P {
            name: "OpenAI".into(),
            base_url: (*OPENAI_API_BASE).to_string(),
            env_key: Some("OPENAI_API_KEY".into()),
            env_key_instructions: Some("Create an API key (https://platform.openai.com) and export it as an environment variable.".into()),
        },
    )]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
