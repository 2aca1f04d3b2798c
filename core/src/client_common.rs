use crate::error::Result;
use crate::models::ResponseItem;
use futures::Stream;
use serde::Serialize;
use std::borrow::Cow;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use tokio::sync::mpsc;

/// The `instructions` field in the payload sent to a model should always start
/// with this content.
pub(crate) const BASE_INSTRUCTIONS: &str = include_str!("../prompt.md");

/// API request payload for a single model turn.
#[derive(Default, Debug, Clone)]
pub struct Prompt {
    /// Conversation context input items.
    pub input: Vec<ResponseItem>,
    /// Optional previous response ID (when storage is enabled).
    pub prev_id: Option<String>,
    /// Replaces the built-in agent instructions when set.
    pub instructions: Option<String>,
    /// Whether to store response on server side (disable_response_storage = !store).
    pub store: bool,
}

impl Prompt {
    pub(crate) fn get_full_instructions(&self) -> Cow<'_, str> {
        match &self.instructions {
            Some(instructions) => Cow::Borrowed(instructions.as_str()),
            None => Cow::Borrowed(BASE_INSTRUCTIONS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    OutputItemDone(ResponseItem),
    /// Terminal event. `output` is the authoritative list of items the
    /// backend produced for this response.
    Completed {
        response_id: String,
        output: Vec<ResponseItem>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct Reasoning {
    pub(crate) effort: &'static str,
    pub(crate) summary: &'static str,
}

/// Request object that is serialized as JSON and POST'ed when using the
/// Responses API.
#[derive(Debug, Serialize)]
pub(crate) struct ResponsesApiRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) instructions: &'a str,
    pub(crate) input: Vec<&'a ResponseItem>,
    pub(crate) tools: &'a [serde_json::Value],
    pub(crate) tool_choice: &'static str,
    pub(crate) parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) previous_response_id: Option<String>,
    pub(crate) store: bool,
    pub(crate) stream: bool,
}

pub(crate) fn create_reasoning_param_for_request(model: &str) -> Option<Reasoning> {
    if model_supports_reasoning_summaries(model) {
        Some(Reasoning {
            effort: "medium",
            summary: "auto",
        })
    } else {
        None
    }
}

pub fn model_supports_reasoning_summaries(model: &str) -> bool {
    // Reasoning is only requested for OpenAI reasoning models; other models
    // reject the parameter.
    model.starts_with('o') || model.starts_with("codex")
}

/// Events of a single backend response, in arrival order.
pub struct ResponseStream {
    rx_event: mpsc::Receiver<Result<ResponseEvent>>,
}

impl ResponseStream {
    pub fn new(rx_event: mpsc::Receiver<Result<ResponseEvent>>) -> Self {
        Self { rx_event }
    }

    /// A stream that replays a fixed list of events and then ends.
    pub fn from_events(events: Vec<Result<ResponseEvent>>) -> Self {
        let (tx, rx_event) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity matches the number of events, so this cannot fail.
            let _ = tx.try_send(event);
        }
        Self { rx_event }
    }
}

impl Stream for ResponseStream {
    type Item = Result<ResponseEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}
