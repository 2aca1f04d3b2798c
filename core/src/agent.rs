//! The turn controller: drives one conversation with the model backend,
//! executing the shell commands the model asks for under the configured
//! approval policy and sandbox.
//!
//! A controller runs at most one turn at a time. A turn is a loop of
//! request → stream → handle tool calls → request, which ends when the model
//! stops calling tools, the user cancels, or a failure is reported back as a
//! system message.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::client::ModelBackend;
use crate::client_common::Prompt;
use crate::client_common::ResponseEvent;
use crate::config::Config;
use crate::confirmation_queue::ConfirmationQueue;
use crate::confirmation_queue::ConfirmationRequest;
use crate::conversation_history::ConversationHistory;
use crate::error::AgentErr;
use crate::error::Result;
use crate::exec::ExecParams;
use crate::exec::ExecToolCallOutput;
use crate::exec::SandboxType;
use crate::exec::format_exec_output;
use crate::exec::process_exec_tool_call;
use crate::exec::sandbox_writable_roots;
use crate::is_safe_command::classify_command;
use crate::models::ContentItem;
use crate::models::FunctionCallOutputPayload;
use crate::models::ResponseInputItem;
use crate::models::ResponseItem;
use crate::models::ShellToolCallParams;
use crate::protocol::ApprovalPolicyMode;
use crate::protocol::CommandConfirmation;
use crate::protocol::ConfirmationPrompt;
use crate::protocol::InputItem;
use crate::protocol::ReviewDecision;
use crate::safety::ApprovedCommands;
use crate::safety::SafetyCheck;
use crate::safety::assess_command_safety;
use crate::safety::get_platform_sandbox;
use crate::thinking_timer::ThinkingTimer;
use crate::util::backoff;

const DEFAULT_DENY_MESSAGE: &str =
    "No, don't run that command. Keep going, but do something else instead.";

const EXPLAIN_INSTRUCTIONS: &str = "You explain shell commands to people who are deciding \
whether to let them run. Answer in at most three short sentences of plain language: what the \
command does and anything it could change or delete. Do not suggest alternatives.";

/// The UI side of a conversation.
#[async_trait]
pub trait AgentCallbacks: Send + Sync {
    /// A newly surfaced conversation item, after de-duplication.
    fn on_item(&self, item: ResponseItem);

    fn on_loading(&self, loading: bool);

    /// The server-side continuation id changed; `None` means the next turn
    /// starts a fresh chain.
    fn on_continuation_id_changed(&self, id: Option<String>);

    /// Asks the user whether `prompt.command` may run. Only one call is
    /// outstanding at any time.
    async fn get_command_confirmation(&self, prompt: &ConfirmationPrompt) -> CommandConfirmation;
}

/// The subset of [`Config`] a controller needs.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub approval_policy: ApprovalPolicyMode,
    pub writable_roots: Vec<PathBuf>,
    pub cwd: PathBuf,
    pub disable_response_storage: bool,
    pub instructions: Option<String>,
    pub max_attempts: u64,
    pub retry_base_delay: Duration,
    /// Always writable inside the sandbox when any writable root is set.
    pub shellpilot_home: PathBuf,
    /// Sandbox used for commands that are auto-approved without the user.
    pub platform_sandbox: Option<SandboxType>,
}

impl From<&Config> for TurnConfig {
    fn from(config: &Config) -> Self {
        Self {
            approval_policy: config.approval_policy,
            writable_roots: config.writable_roots.clone(),
            cwd: config.cwd.clone(),
            disable_response_storage: config.disable_response_storage,
            instructions: config.instructions.clone(),
            max_attempts: config.max_attempts,
            retry_base_delay: config.retry_base_delay,
            shellpilot_home: config.shellpilot_home.clone(),
            platform_sandbox: get_platform_sandbox(),
        }
    }
}

/// Mutable state of the controller.
#[derive(Default)]
struct TurnState {
    active: bool,
    cancel: CancellationToken,
    last_response_id: Option<String>,
    /// `function_call`s surfaced whose output has not been surfaced yet.
    in_flight_calls: HashSet<String>,
    seen_ids: HashSet<String>,
    /// Serialized content of the last surfaced item if it was a user
    /// message.
    last_user_content: Option<String>,
    /// Tool outputs to send with the next turn's input.
    pending_input: Vec<ResponseItem>,
    history: ConversationHistory,
}

impl TurnState {
    /// Decides whether `item` should reach the UI and updates the
    /// bookkeeping accordingly.
    fn admit(&mut self, item: &ResponseItem) -> bool {
        if let Some(id) = item.id() {
            if !self.seen_ids.insert(id.to_string()) {
                debug!(id, "dropping duplicate item");
                return false;
            }
        }

        match item {
            ResponseItem::Message { role, content, .. } if role == "user" => {
                let serialized = serde_json::to_string(content).unwrap_or_default();
                if self.last_user_content.as_deref() == Some(serialized.as_str()) {
                    debug!("collapsing repeated user message");
                    return false;
                }
                self.last_user_content = Some(serialized);
                return true;
            }
            ResponseItem::FunctionCall { call_id, .. } => {
                self.in_flight_calls.insert(call_id.clone());
            }
            ResponseItem::FunctionCallOutput { call_id, .. } => {
                if !self.in_flight_calls.remove(call_id) {
                    debug!(%call_id, "dropping output for a call that is no longer pending");
                    return false;
                }
            }
            ResponseItem::Message { .. } | ResponseItem::Reasoning { .. } | ResponseItem::Other => {}
        }
        self.last_user_content = None;
        true
    }

    /// Stops the current turn and forgets everything that would tie the
    /// next turn to it: pending calls, carried-over input and the
    /// continuation id.
    fn abandon(&mut self) {
        self.cancel.cancel();
        let purged = std::mem::take(&mut self.in_flight_calls);
        self.history.remove_calls(&purged);
        self.pending_input.clear();
        self.last_response_id = None;
    }
}

struct Inner {
    backend: Arc<dyn ModelBackend>,
    callbacks: Arc<dyn AgentCallbacks>,
    config: TurnConfig,
    state: Mutex<TurnState>,
    approved: Mutex<ApprovedCommands>,
    timer: Mutex<ThinkingTimer>,
    confirmations: ConfirmationQueue,
}

/// Result of streaming one request, after retries.
enum StreamOutcome {
    Completed {
        response_id: String,
        items: Vec<ResponseItem>,
    },
    Cancelled,
    /// Terminal failure, already phrased for the user.
    Failed(String),
}

/// Result of handling one `function_call`.
enum CallOutcome {
    Output {
        output: ResponseItem,
        /// Extra input for the model, e.g. the user's reason for a denial.
        followup: Option<ResponseItem>,
        /// The user asked to stop the turn.
        stop: bool,
    },
    Cancelled,
}

impl CallOutcome {
    fn output(call_id: String, content: String, success: bool) -> Self {
        CallOutcome::Output {
            output: function_call_output(call_id, content, success),
            followup: None,
            stop: false,
        }
    }
}

#[derive(Clone)]
pub struct TurnController {
    inner: Arc<Inner>,
}

impl TurnController {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        callbacks: Arc<dyn AgentCallbacks>,
        config: TurnConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                callbacks,
                config,
                state: Mutex::new(TurnState::default()),
                approved: Mutex::new(ApprovedCommands::new()),
                timer: Mutex::new(ThinkingTimer::new()),
                confirmations: ConfirmationQueue::new(),
            }),
        }
    }

    /// Runs one turn to completion. Fails only with [`AgentErr::Busy`] when a
    /// turn is already running; every other outcome, including backend
    /// failures and cancellation, resolves to `Ok(())`. Dropping the future
    /// before it resolves cancels the turn.
    pub async fn run(&self, input: Vec<InputItem>) -> Result<()> {
        let token = {
            let mut state = lock(&self.inner.state);
            if state.active {
                return Err(AgentErr::Busy);
            }
            state.active = true;
            state.cancel = CancellationToken::new();
            state.cancel.clone()
        };
        lock(&self.inner.timer).start_turn();
        info!("turn started");
        self.inner.callbacks.on_loading(true);

        let mut turn = ActiveTurn {
            inner: Arc::clone(&self.inner),
            token: token.clone(),
            pump: tokio::spawn(pump_confirmations(Arc::clone(&self.inner), token.clone())),
            finished: false,
        };
        self.inner.run_turn(input, &token).await;
        turn.finished = true;
        Ok(())
    }

    /// Cancels the running turn, if any. Outputs of commands that are still
    /// running are never surfaced and the next turn starts a fresh
    /// continuation chain.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.inner.state);
            if !state.active {
                return;
            }
            info!("cancelling turn");
            state.abandon();
        }
        self.inner.confirmations.clear();
        self.inner.callbacks.on_continuation_id_changed(None);
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).active
    }

    pub fn continuation_id(&self) -> Option<String> {
        lock(&self.inner.state).last_response_id.clone()
    }

    /// Time spent in the current (or last) turn.
    pub fn turn_thinking_time(&self) -> Duration {
        lock(&self.inner.timer).turn_elapsed()
    }

    /// Time spent in all turns of this controller.
    pub fn session_thinking_time(&self) -> Duration {
        lock(&self.inner.timer).session_elapsed()
    }
}

/// Owns a running turn. Dropping it releases the controller, so a `run`
/// future that is dropped before completion behaves like a cancellation.
struct ActiveTurn {
    inner: Arc<Inner>,
    token: CancellationToken,
    pump: JoinHandle<()>,
    finished: bool,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.pump.abort();
        let abandoned = !self.finished && !self.token.is_cancelled();
        {
            let mut state = lock(&self.inner.state);
            if abandoned {
                warn!("turn dropped before it finished");
                state.abandon();
            }
            state.active = false;
        }
        if abandoned {
            self.inner.confirmations.clear();
            self.inner.callbacks.on_continuation_id_changed(None);
        }
        lock(&self.inner.timer).finish_turn();
        info!(cancelled = self.token.is_cancelled(), "turn finished");
        self.inner.callbacks.on_loading(false);
    }
}

impl Inner {
    async fn run_turn(&self, input: Vec<InputItem>, token: &CancellationToken) {
        let user_item = ResponseItem::from(ResponseInputItem::from(input));
        self.surface(token, user_item.clone());

        let mut turn_input = {
            let mut state = lock(&self.state);
            let mut pending = std::mem::take(&mut state.pending_input);
            pending.push(user_item);
            pending
        };

        loop {
            if token.is_cancelled() {
                return;
            }

            let prompt = self.build_prompt(&turn_input);
            let (response_id, items) = match self.stream_with_retries(&prompt, token).await {
                StreamOutcome::Completed { response_id, items } => (response_id, items),
                StreamOutcome::Cancelled => return,
                StreamOutcome::Failed(message) => {
                    self.surface(token, ResponseItem::system_message(message));
                    return;
                }
            };

            if !self.accept_response(token, response_id, &items) {
                return;
            }

            let calls: Vec<(String, String, String)> = items
                .into_iter()
                .filter_map(|item| match item {
                    ResponseItem::FunctionCall {
                        name,
                        arguments,
                        call_id,
                        ..
                    } => Some((name, arguments, call_id)),
                    ResponseItem::Message { .. }
                    | ResponseItem::Reasoning { .. }
                    | ResponseItem::FunctionCallOutput { .. }
                    | ResponseItem::Other => None,
                })
                .collect();
            if calls.is_empty() {
                debug!("no tool calls; turn complete");
                return;
            }

            let outcomes = join_all(calls.into_iter().map(|(name, arguments, call_id)| {
                self.handle_function_call(name, arguments, call_id, token)
            }))
            .await;

            let mut next_input = Vec::new();
            let mut stop = false;
            for outcome in outcomes {
                match outcome {
                    CallOutcome::Output {
                        output,
                        followup,
                        stop: stop_requested,
                    } => {
                        if !self.surface(token, output.clone()) {
                            if token.is_cancelled() {
                                return;
                            }
                            warn!("tool output was not surfaced; sending it to the model anyway");
                        }
                        next_input.push(output);
                        if let Some(followup) = followup {
                            self.surface(token, followup.clone());
                            next_input.push(followup);
                        }
                        stop |= stop_requested;
                    }
                    CallOutcome::Cancelled => return,
                }
            }

            if stop {
                info!("user denied a command and ended the turn");
                lock(&self.state).pending_input = next_input;
                return;
            }
            turn_input = next_input;
        }
    }

    /// Emits `item` to the UI unless the turn was cancelled or the item is a
    /// duplicate. Returns whether it was emitted.
    fn surface(&self, token: &CancellationToken, item: ResponseItem) -> bool {
        {
            let mut state = lock(&self.state);
            if token.is_cancelled() || !state.admit(&item) {
                return false;
            }
        }
        self.callbacks.on_item(item);
        true
    }

    fn build_prompt(&self, turn_input: &[ResponseItem]) -> Prompt {
        let mut state = lock(&self.state);
        if self.config.disable_response_storage {
            // Without server-side storage the whole transcript is resent and
            // a continuation id would be rejected.
            state.history.record_items(turn_input);
            Prompt {
                input: state.history.contents(),
                prev_id: None,
                instructions: self.config.instructions.clone(),
                store: false,
            }
        } else {
            Prompt {
                input: turn_input.to_vec(),
                prev_id: state.last_response_id.clone(),
                instructions: self.config.instructions.clone(),
                store: true,
            }
        }
    }

    /// Records a completed response and surfaces its staged tool calls.
    /// Returns `false` if the turn was cancelled meanwhile.
    fn accept_response(
        &self,
        token: &CancellationToken,
        response_id: String,
        items: &[ResponseItem],
    ) -> bool {
        {
            let mut state = lock(&self.state);
            if token.is_cancelled() {
                return false;
            }
            if self.config.disable_response_storage {
                state.history.record_items(items);
            } else {
                state.last_response_id = Some(response_id.clone());
            }
        }
        if !self.config.disable_response_storage {
            self.callbacks.on_continuation_id_changed(Some(response_id));
        }

        for item in items {
            if matches!(item, ResponseItem::FunctionCall { .. }) {
                self.surface(token, item.clone());
            }
        }
        !token.is_cancelled()
    }

    async fn stream_with_retries(&self, prompt: &Prompt, token: &CancellationToken) -> StreamOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return StreamOutcome::Cancelled,
                result = self.try_stream(prompt, token) => result,
            };

            let err = match result {
                Ok((response_id, items)) => return StreamOutcome::Completed { response_id, items },
                Err(err) => err,
            };

            match err {
                AgentErr::Interrupted => return StreamOutcome::Cancelled,
                AgentErr::RateLimited(message) => {
                    warn!("rate limited: {message}");
                    return StreamOutcome::Failed(format!(
                        "Rate limit reached: {message}. Please wait a moment and try again."
                    ));
                }
                err if err.is_retryable() => {
                    if attempt >= max_attempts {
                        warn!("giving up after {attempt} attempts: {err}");
                        return StreamOutcome::Failed(format!(
                            "Network error: the model backend could not be reached after \
                             {attempt} attempts ({err}). Please check your connection and try again."
                        ));
                    }
                    let delay = err
                        .requested_delay()
                        .unwrap_or_else(|| backoff(self.config.retry_base_delay, attempt));
                    warn!("request failed: {err}; retrying {attempt}/{max_attempts} in {delay:?}");
                    tokio::select! {
                        _ = token.cancelled() => return StreamOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                AgentErr::UnexpectedStatus(status, body, _) => {
                    return StreamOutcome::Failed(format!(
                        "The model backend returned an error ({status}): {body}"
                    ));
                }
                AgentErr::ResponseFailed { code, message } => {
                    warn!(%code, "response failed: {message}");
                    return StreamOutcome::Failed(format!(
                        "The model could not complete the response ({code}): {message}"
                    ));
                }
                err => return StreamOutcome::Failed(format!("Error: {err}")),
            }
        }
    }

    /// One backend attempt. Messages and reasoning are surfaced as they
    /// arrive; tool calls are staged until the response completes.
    async fn try_stream(
        &self,
        prompt: &Prompt,
        token: &CancellationToken,
    ) -> Result<(String, Vec<ResponseItem>)> {
        let mut stream = self.backend.stream(prompt).await?;
        let mut staged: Vec<ResponseItem> = Vec::new();

        while let Some(event) = stream.next().await {
            if token.is_cancelled() {
                return Err(AgentErr::Interrupted);
            }
            match event? {
                ResponseEvent::OutputItemDone(item) => self.stage(token, &mut staged, item),
                ResponseEvent::Completed {
                    response_id,
                    output,
                } => {
                    for item in output {
                        self.stage(token, &mut staged, item);
                    }
                    return Ok((response_id, staged));
                }
            }
        }

        Err(AgentErr::Stream(
            "stream closed before response.completed".to_string(),
        ))
    }

    fn stage(&self, token: &CancellationToken, staged: &mut Vec<ResponseItem>, item: ResponseItem) {
        let duplicate = match item.id() {
            Some(id) => staged.iter().any(|s| s.id() == Some(id)),
            None => staged.contains(&item),
        };
        if duplicate {
            return;
        }
        match &item {
            ResponseItem::FunctionCall { .. } => {}
            ResponseItem::Message { .. }
            | ResponseItem::Reasoning { .. }
            | ResponseItem::FunctionCallOutput { .. }
            | ResponseItem::Other => {
                self.surface(token, item.clone());
            }
        }
        staged.push(item);
    }

    async fn handle_function_call(
        &self,
        name: String,
        arguments: String,
        call_id: String,
        token: &CancellationToken,
    ) -> CallOutcome {
        match name.as_str() {
            "container.exec" | "shell" => {
                let params = match serde_json::from_str::<ShellToolCallParams>(&arguments) {
                    Ok(params) => params,
                    Err(e) => {
                        return CallOutcome::output(
                            call_id,
                            format!("failed to parse function arguments: {e}"),
                            false,
                        );
                    }
                };
                self.handle_shell_call(params, call_id, token).await
            }
            _ => CallOutcome::output(call_id, format!("unsupported call: {name}"), false),
        }
    }

    async fn handle_shell_call(
        &self,
        params: ShellToolCallParams,
        call_id: String,
        token: &CancellationToken,
    ) -> CallOutcome {
        let ShellToolCallParams {
            command,
            workdir,
            timeout_ms,
        } = params;
        let cwd = match workdir {
            Some(dir) => self.config.cwd.join(dir),
            None => self.config.cwd.clone(),
        };

        let safety = classify_command(&command);
        let check = {
            let approved = lock(&self.approved);
            assess_command_safety(
                &command,
                self.config.approval_policy,
                safety,
                &approved,
                self.config.platform_sandbox,
            )
        };
        debug!(?command, ?safety, ?check, "assessed command");

        let sandbox_type = match check {
            SafetyCheck::AutoApprove { sandbox_type } => sandbox_type,
            SafetyCheck::Reject { reason } => {
                return CallOutcome::output(
                    call_id,
                    format!("exec command rejected: {reason}"),
                    false,
                );
            }
            SafetyCheck::AskUser => {
                let mut explanation = None;
                loop {
                    let rx = self.confirmations.enqueue(ConfirmationPrompt {
                        call_id: call_id.clone(),
                        command: command.clone(),
                        cwd: cwd.clone(),
                        explanation: explanation.take(),
                    });
                    let confirmation = tokio::select! {
                        _ = token.cancelled() => return CallOutcome::Cancelled,
                        confirmation = rx => match confirmation {
                            Ok(confirmation) => confirmation,
                            // The queue was cleared by a cancellation.
                            Err(_) => return CallOutcome::Cancelled,
                        },
                    };

                    match confirmation.decision {
                        ReviewDecision::Approve => break SandboxType::None,
                        ReviewDecision::ApproveAlways => {
                            lock(&self.approved).insert(command.clone());
                            break SandboxType::None;
                        }
                        ReviewDecision::DenyContinue => {
                            let message = confirmation
                                .custom_deny_message
                                .filter(|m| !m.trim().is_empty())
                                .unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_string());
                            return CallOutcome::Output {
                                output: function_call_output(call_id, "aborted".to_string(), false),
                                followup: Some(user_message(message)),
                                stop: false,
                            };
                        }
                        ReviewDecision::DenyExit => {
                            return CallOutcome::Output {
                                output: function_call_output(call_id, "aborted".to_string(), false),
                                followup: None,
                                stop: true,
                            };
                        }
                        ReviewDecision::Explain => {
                            explanation = Some(self.explain_command(&command, token).await);
                            if token.is_cancelled() {
                                return CallOutcome::Cancelled;
                            }
                        }
                    }
                }
            }
        };

        let params = ExecParams {
            command,
            cwd,
            timeout_ms,
            writable_roots: sandbox_writable_roots(
                &self.config.writable_roots,
                &self.config.shellpilot_home,
            ),
            env: HashMap::new(),
        };

        // The child runs in its own task: cancelling the turn stops waiting
        // for it, but does not kill it.
        let handle = tokio::spawn(process_exec_tool_call(params, sandbox_type));
        let output: ExecToolCallOutput = tokio::select! {
            _ = token.cancelled() => return CallOutcome::Cancelled,
            joined = handle => match joined {
                Ok(output) => output,
                Err(e) => {
                    warn!("exec task failed: {e}");
                    return CallOutcome::output(call_id, format!("execution error: {e}"), false);
                }
            },
        };
        if token.is_cancelled() {
            return CallOutcome::Cancelled;
        }

        let success = output.exit_code == 0;
        CallOutcome::output(call_id, format_exec_output(&output), success)
    }

    /// Asks the backend for a plain-language explanation of `command`. Never
    /// fails; problems are reported in the returned text.
    async fn explain_command(&self, command: &[String], token: &CancellationToken) -> String {
        let rendered = shlex::try_join(command.iter().map(String::as_str))
            .unwrap_or_else(|_| command.join(" "));
        let prompt = Prompt {
            input: vec![user_message(format!(
                "Explain what this shell command does:\n\n{rendered}"
            ))],
            prev_id: None,
            instructions: Some(EXPLAIN_INSTRUCTIONS.to_string()),
            store: false,
        };

        let result = tokio::select! {
            _ = token.cancelled() => return String::new(),
            result = self.collect_explanation(&prompt) => result,
        };
        match result {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => "The model did not provide an explanation.".to_string(),
            Err(e) => {
                warn!("failed to explain command: {e}");
                format!("Unable to generate an explanation: {e}")
            }
        }
    }

    async fn collect_explanation(&self, prompt: &Prompt) -> Result<String> {
        let mut stream = self.backend.stream(prompt).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::OutputItemDone(item) => {
                    if let Some(t) = item.message_text() {
                        text.push_str(&t);
                    }
                }
                ResponseEvent::Completed { output, .. } => {
                    if text.is_empty() {
                        for item in &output {
                            if let Some(t) = item.message_text() {
                                text.push_str(&t);
                            }
                        }
                    }
                    return Ok(text);
                }
            }
        }
        Ok(text)
    }
}

/// Services the confirmation queue through the UI, one prompt at a time,
/// for the lifetime of a turn.
async fn pump_confirmations(inner: Arc<Inner>, token: CancellationToken) {
    let mut rx = inner.confirmations.subscribe();
    loop {
        let current: Option<ConfirmationRequest> = rx.borrow_and_update().clone();
        match current {
            Some(request) => {
                let id = request.id;
                tokio::select! {
                    _ = token.cancelled() => return,
                    confirmation = inner.callbacks.get_command_confirmation(&request.prompt) => {
                        inner.confirmations.resolve(id, confirmation);
                    }
                    // The request was dropped (e.g. the queue was cleared).
                    _ = wait_until_replaced(&mut rx, id) => {}
                }
            }
            None => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn wait_until_replaced(rx: &mut watch::Receiver<Option<ConfirmationRequest>>, id: u64) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        let still_current = rx
            .borrow_and_update()
            .as_ref()
            .is_some_and(|request| request.id == id);
        if !still_current {
            return;
        }
    }
}

fn function_call_output(call_id: String, content: String, success: bool) -> ResponseItem {
    ResponseItem::FunctionCallOutput {
        call_id,
        output: FunctionCallOutputPayload {
            content,
            success: Some(success),
        },
    }
}

fn user_message(text: String) -> ResponseItem {
    ResponseItem::Message {
        id: None,
        role: "user".to_string(),
        content: vec![ContentItem::InputText { text }],
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(id: Option<&str>, role: &str, text: &str) -> ResponseItem {
        ResponseItem::Message {
            id: id.map(str::to_string),
            role: role.to_string(),
            content: vec![ContentItem::InputText {
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn items_are_deduplicated_by_id() {
        let mut state = TurnState::default();
        let item = message(Some("msg_1"), "assistant", "hi");
        assert!(state.admit(&item));
        assert!(!state.admit(&item));
        assert!(state.admit(&message(Some("msg_2"), "assistant", "hi")));
    }

    #[test]
    fn only_consecutive_identical_user_messages_collapse() {
        let mut state = TurnState::default();
        let hello = message(None, "user", "hello");
        assert!(state.admit(&hello));
        assert!(!state.admit(&hello));
        assert!(state.admit(&message(None, "user", "something else")));
        assert!(state.admit(&message(None, "assistant", "reply")));
        assert!(state.admit(&hello), "a non-adjacent repeat is surfaced");
    }

    #[test]
    fn outputs_need_a_pending_call() {
        let mut state = TurnState::default();
        let call = ResponseItem::FunctionCall {
            id: Some("fc_1".to_string()),
            name: "shell".to_string(),
            arguments: "{}".to_string(),
            call_id: "call_1".to_string(),
        };
        let output = function_call_output("call_1".to_string(), "ok".to_string(), true);

        assert!(!state.admit(&output));
        assert!(state.admit(&call));
        assert!(state.in_flight_calls.contains("call_1"));
        assert!(state.admit(&output));
        assert!(!state.admit(&output), "exactly one output per call");
        assert!(state.in_flight_calls.is_empty());
    }

    #[test]
    fn deny_output_is_aborted() {
        let output = function_call_output("c".to_string(), "aborted".to_string(), false);
        let ResponseItem::FunctionCallOutput { output, .. } = output else {
            panic!("expected a function call output");
        };
        assert_eq!(output.content, "aborted");
        assert_eq!(output.success, Some(false));
    }
}
