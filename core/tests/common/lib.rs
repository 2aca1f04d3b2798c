#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::sync::mpsc;

use shellpilot_core::AgentCallbacks;
use shellpilot_core::ModelBackend;
use shellpilot_core::Prompt;
use shellpilot_core::ResponseEvent;
use shellpilot_core::ResponseStream;
use shellpilot_core::TurnConfig;
use shellpilot_core::config::Config;
use shellpilot_core::config::ConfigOverrides;
use shellpilot_core::config::ConfigToml;
use shellpilot_core::error::AgentErr;
use shellpilot_core::error::Result;
use shellpilot_core::models::ContentItem;
use shellpilot_core::models::ResponseItem;
use shellpilot_core::protocol::ApprovalPolicyMode;
use shellpilot_core::protocol::CommandConfirmation;
use shellpilot_core::protocol::ConfirmationPrompt;
use shellpilot_core::protocol::ReviewDecision;

/// Returns a default `Config` whose on-disk state is confined to the provided
/// temporary directory. Using a per-test directory keeps tests hermetic and
/// avoids clobbering a developer's real `~/.shellpilot`.
pub fn load_default_config_for_test(shellpilot_home: &TempDir) -> Config {
    Config::load_from_base_config_with_overrides(
        ConfigToml::default(),
        ConfigOverrides {
            cwd: Some(shellpilot_home.path().to_path_buf()),
            ..Default::default()
        },
        shellpilot_home.path().to_path_buf(),
    )
    .expect("defaults for test should always succeed")
}

/// Turn settings for tests: no sandbox, no backoff delay.
pub fn turn_config_for_test(shellpilot_home: &TempDir) -> TurnConfig {
    let mut config = TurnConfig::from(&load_default_config_for_test(shellpilot_home));
    config.approval_policy = ApprovalPolicyMode::Manual;
    config.retry_base_delay = Duration::ZERO;
    config.platform_sandbox = None;
    config
}

/// Renders a list of JSON events as an SSE body. Each object must carry a
/// `type` field, which doubles as the `event:` name.
pub fn sse(events: Vec<Value>) -> String {
    events
        .into_iter()
        .map(|e| {
            let kind = e
                .get("type")
                .and_then(|v| v.as_str())
                .expect("event missing type");
            if e.as_object().map(|o| o.len() == 1).unwrap_or(false) {
                format!("event: {kind}\n\n")
            } else {
                format!("event: {kind}\ndata: {e}\n\n")
            }
        })
        .collect()
}

pub fn ev_output_item_done(item: &ResponseItem) -> Value {
    json!({
        "type": "response.output_item.done",
        "item": item,
    })
}

pub fn ev_completed(id: &str, output: &[ResponseItem]) -> Value {
    json!({
        "type": "response.completed",
        "response": { "id": id, "output": output },
    })
}

pub fn assistant_message(id: &str, text: &str) -> ResponseItem {
    ResponseItem::Message {
        id: Some(id.to_string()),
        role: "assistant".to_string(),
        content: vec![ContentItem::OutputText {
            text: text.to_string(),
        }],
    }
}

pub fn function_call(call_id: &str, name: &str, arguments: Value) -> ResponseItem {
    ResponseItem::FunctionCall {
        id: Some(format!("fc_{call_id}")),
        name: name.to_string(),
        arguments: arguments.to_string(),
        call_id: call_id.to_string(),
    }
}

pub fn shell_call(call_id: &str, command: &[&str]) -> ResponseItem {
    function_call(call_id, "shell", json!({ "command": command }))
}

/// A response that ends with `response.completed` and carries `output`.
pub fn completed_response(id: &str, output: Vec<ResponseItem>) -> Scripted {
    let mut events: Vec<ResponseEvent> = output
        .iter()
        .cloned()
        .map(ResponseEvent::OutputItemDone)
        .collect();
    events.push(ResponseEvent::Completed {
        response_id: id.to_string(),
        output,
    });
    Scripted::Events(events)
}

/// One scripted backend invocation.
pub enum Scripted {
    Events(Vec<ResponseEvent>),
    Error(AgentErr),
    /// A stream that stays open until the backend is dropped.
    Hang,
}

/// A `ModelBackend` that replays a script and records every prompt it was
/// given. Once the script runs out it answers with an empty completed
/// response.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<Prompt>>,
    open_streams: Mutex<Vec<mpsc::Sender<Result<ResponseEvent>>>>,
    pub request_started: Notify,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn stream(&self, prompt: &Prompt) -> Result<ResponseStream> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let next = self.script.lock().unwrap().pop_front();
        self.request_started.notify_one();
        match next {
            Some(Scripted::Events(events)) => {
                Ok(ResponseStream::from_events(events.into_iter().map(Ok).collect()))
            }
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Hang) => {
                let (tx, rx) = mpsc::channel(1);
                self.open_streams.lock().unwrap().push(tx);
                Ok(ResponseStream::new(rx))
            }
            None => Ok(ResponseStream::from_events(vec![Ok(
                ResponseEvent::Completed {
                    response_id: "resp_default".to_string(),
                    output: Vec::new(),
                },
            )])),
        }
    }
}

/// `AgentCallbacks` that records everything and answers confirmations from
/// a queue of canned decisions (denying once the queue is empty).
#[derive(Default)]
pub struct RecordingCallbacks {
    items: Mutex<Vec<ResponseItem>>,
    loading: Mutex<Vec<bool>>,
    continuation_ids: Mutex<Vec<Option<String>>>,
    confirmations: Mutex<Vec<ConfirmationPrompt>>,
    decisions: Mutex<VecDeque<CommandConfirmation>>,
}

impl RecordingCallbacks {
    pub fn with_decisions(decisions: Vec<CommandConfirmation>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            ..Default::default()
        }
    }

    pub fn items(&self) -> Vec<ResponseItem> {
        self.items.lock().unwrap().clone()
    }

    pub fn loading(&self) -> Vec<bool> {
        self.loading.lock().unwrap().clone()
    }

    pub fn continuation_ids(&self) -> Vec<Option<String>> {
        self.continuation_ids.lock().unwrap().clone()
    }

    pub fn confirmations(&self) -> Vec<ConfirmationPrompt> {
        self.confirmations.lock().unwrap().clone()
    }

    /// Text of every surfaced system message.
    pub fn system_messages(&self) -> Vec<String> {
        self.items()
            .iter()
            .filter(|item| matches!(item, ResponseItem::Message { role, .. } if role == "system"))
            .filter_map(ResponseItem::message_text)
            .collect()
    }

    /// `(call_id, content)` of every surfaced function call output.
    pub fn outputs(&self) -> Vec<(String, String)> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                ResponseItem::FunctionCallOutput { call_id, output } => {
                    Some((call_id, output.content))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AgentCallbacks for RecordingCallbacks {
    fn on_item(&self, item: ResponseItem) {
        self.items.lock().unwrap().push(item);
    }

    fn on_loading(&self, loading: bool) {
        self.loading.lock().unwrap().push(loading);
    }

    fn on_continuation_id_changed(&self, id: Option<String>) {
        self.continuation_ids.lock().unwrap().push(id);
    }

    async fn get_command_confirmation(&self, prompt: &ConfirmationPrompt) -> CommandConfirmation {
        self.confirmations.lock().unwrap().push(prompt.clone());
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| CommandConfirmation::from(ReviewDecision::DenyContinue))
    }
}
