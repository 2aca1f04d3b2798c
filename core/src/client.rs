use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::prelude::*;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::io::ReaderStream;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::client_common::Prompt;
use crate::client_common::ResponseEvent;
use crate::client_common::ResponseStream;
use crate::client_common::ResponsesApiRequest;
use crate::client_common::create_reasoning_param_for_request;
use crate::error::AgentErr;
use crate::error::Result;
use crate::flags::OPENAI_STREAM_IDLE_TIMEOUT_MS;
use crate::flags::SHELLPILOT_RS_SSE_FIXTURE;
use crate::model_provider_info::ModelProviderInfo;
use crate::models::ResponseItem;
use crate::openai_tools::create_tools_json_for_responses_api;

/// Something that turns a prompt into a stream of response events. The turn
/// controller owns retries, so implementations make exactly one attempt per
/// call.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn stream(&self, prompt: &Prompt) -> Result<ResponseStream>;
}

#[derive(Clone)]
pub struct ModelClient {
    model: String,
    client: reqwest::Client,
    provider: ModelProviderInfo,
}

impl ModelClient {
    pub fn new(model: impl ToString, provider: ModelProviderInfo) -> Self {
        Self {
            model: model.to_string(),
            client: reqwest::Client::new(),
            provider,
        }
    }
}

#[async_trait]
impl ModelBackend for ModelClient {
    /// Implementation for the OpenAI *Responses* API.
    async fn stream(&self, prompt: &Prompt) -> Result<ResponseStream> {
        if let Some(path) = &*SHELLPILOT_RS_SSE_FIXTURE {
            // short circuit for tests
            warn!(path, "Streaming from fixture");
            return stream_from_fixture(path).await;
        }

        let tools_json = create_tools_json_for_responses_api()?;
        let full_instructions = prompt.get_full_instructions();
        let payload = ResponsesApiRequest {
            model: &self.model,
            instructions: &full_instructions,
            // `Other` is a catch-all for items we could not parse; never echo
            // those back.
            input: prompt
                .input
                .iter()
                .filter(|item| !matches!(item, ResponseItem::Other))
                .collect(),
            tools: &tools_json,
            tool_choice: "auto",
            parallel_tool_calls: false,
            reasoning: create_reasoning_param_for_request(&self.model),
            previous_response_id: prompt.prev_id.clone(),
            store: prompt.store,
            stream: true,
        };

        let url = self.provider.responses_url();
        debug!(url, "POST");
        trace!("request payload: {}", serde_json::to_string(&payload)?);

        let api_key = self.provider.api_key()?;
        let mut req_builder = self
            .client
            .post(&url)
            .header("OpenAI-Beta", "responses=experimental")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload);
        if let Some(api_key) = api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let res = req_builder.send().await?;
        let status = res.status();
        if status.is_success() {
            let (tx_event, rx_event) = mpsc::channel::<Result<ResponseEvent>>(16);

            // spawn task to process SSE
            let stream = res.bytes_stream().map_err(AgentErr::Reqwest);
            tokio::spawn(process_sse(stream, tx_event));

            return Ok(ResponseStream::new(rx_event));
        }

        let retry_after = if status.is_server_error() {
            res.headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        } else {
            None
        };

        // The Responses endpoint returns structured JSON bodies even for
        // 4xx/5xx errors; include the text so the user sees the exact reason.
        let body = res.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(AgentErr::RateLimited(error_message(&body)))
        } else {
            Err(AgentErr::UnexpectedStatus(status, body, retry_after))
        }
    }
}

/// Pulls `error.message` out of an OpenAI error body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.to_string(),
    }
}

/// The `error` object of a `response.failed` event.
#[derive(Debug, Default, Deserialize)]
struct FailedResponseError {
    code: Option<String>,
    message: Option<String>,
}

/// Classifies a `response.failed` event. Rate limits and exhausted quotas
/// are reported as such, server-side hiccups are retried and every other
/// error code is final.
fn response_failed_error(response: Option<&Value>) -> AgentErr {
    let error = response
        .and_then(|r| r.get("error"))
        .and_then(|e| serde_json::from_value::<FailedResponseError>(e.clone()).ok())
        .unwrap_or_default();
    let message = error
        .message
        .unwrap_or_else(|| "response.failed event received".to_string());
    match error.code.as_deref() {
        Some("rate_limit_exceeded" | "insufficient_quota") => AgentErr::RateLimited(message),
        None | Some("server_error") => AgentErr::Stream(message),
        Some(code) => AgentErr::ResponseFailed {
            code: code.to_string(),
            message,
        },
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct SseEvent {
    #[serde(rename = "type")]
    kind: String,
    response: Option<Value>,
    item: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseCompleted {
    id: String,
    #[serde(default)]
    output: Vec<Value>,
}

async fn process_sse<S>(stream: S, tx_event: mpsc::Sender<Result<ResponseEvent>>)
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut stream = stream.eventsource();

    // If the stream stays completely silent for an extended period treat it as disconnected.
    let idle_timeout = *OPENAI_STREAM_IDLE_TIMEOUT_MS;
    // Filled in by the "response.completed" message.
    let mut completed: Option<ResponseEvent> = None;

    loop {
        let sse = match timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(e))) => {
                debug!("SSE Error: {e:#}");
                let event = AgentErr::Stream(e.to_string());
                let _ = tx_event.send(Err(event)).await;
                return;
            }
            Ok(None) => {
                match completed {
                    Some(event) => {
                        let _ = tx_event.send(Ok(event)).await;
                    }
                    None => {
                        let _ = tx_event
                            .send(Err(AgentErr::Stream(
                                "stream closed before response.completed".into(),
                            )))
                            .await;
                    }
                }
                return;
            }
            Err(_) => {
                let _ = tx_event
                    .send(Err(AgentErr::Stream(
                        "idle timeout waiting for SSE".into(),
                    )))
                    .await;
                return;
            }
        };

        let event: SseEvent = match serde_json::from_str(&sse.data) {
            Ok(event) => event,
            Err(e) => {
                debug!("Failed to parse SSE event: {e}, data: {}", &sse.data);
                continue;
            }
        };

        trace!(?event, "SSE event");
        match event.kind.as_str() {
            // Individual output item finalised. Forward immediately so the UI
            // sees items live; the turn controller drops the copies that come
            // back in `response.completed`.
            "response.output_item.done" => {
                let Some(item_val) = event.item else { continue };
                let Ok(item) = serde_json::from_value::<ResponseItem>(item_val) else {
                    debug!("failed to parse ResponseItem from output_item.done");
                    continue;
                };

                let event = ResponseEvent::OutputItemDone(item);
                if tx_event.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            // Final response completed – includes array of output items & id
            "response.completed" => {
                if let Some(resp_val) = event.response {
                    match serde_json::from_value::<ResponseCompleted>(resp_val) {
                        Ok(r) => {
                            let output = r
                                .output
                                .into_iter()
                                .filter_map(|v| serde_json::from_value::<ResponseItem>(v).ok())
                                .collect();
                            completed = Some(ResponseEvent::Completed {
                                response_id: r.id,
                                output,
                            });
                        }
                        Err(e) => {
                            debug!("failed to parse ResponseCompleted: {e}");
                            continue;
                        }
                    };
                };
            }
            "response.failed" => {
                let err = response_failed_error(event.response.as_ref());
                debug!("response failed: {err}");
                let _ = tx_event.send(Err(err)).await;
                return;
            }
            other => debug!(other, "sse event"),
        }
    }
}

/// used in tests to stream from a text SSE file
async fn stream_from_fixture(path: impl AsRef<Path>) -> Result<ResponseStream> {
    let (tx_event, rx_event) = mpsc::channel::<Result<ResponseEvent>>(16);
    let f = std::fs::File::open(path.as_ref())?;
    let lines = std::io::BufReader::new(f).lines();

    // insert \n\n after each line for proper SSE parsing
    let mut content = String::new();
    for line in lines {
        content.push_str(&line?);
        content.push_str("\n\n");
    }

    let rdr = std::io::Cursor::new(content);
    let stream = ReaderStream::new(rdr).map_err(AgentErr::Io);
    tokio::spawn(process_sse(stream, tx_event));
    Ok(ResponseStream::new(rx_event))
}
