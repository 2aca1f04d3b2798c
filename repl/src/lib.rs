use std::fs::OpenOptions;
use std::io::Write;
use std::io::stdout;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use owo_colors::OwoColorize;
use owo_colors::Style;
use shellpilot_common::elapsed::format_elapsed;
use shellpilot_core::AgentCallbacks;
use shellpilot_core::ModelClient;
use shellpilot_core::TurnConfig;
use shellpilot_core::TurnController;
use shellpilot_core::config::Config;
use shellpilot_core::config::ConfigOverrides;
use shellpilot_core::models::ReasoningItemReasoningSummary;
use shellpilot_core::models::ResponseItem;
use shellpilot_core::models::ShellToolCallParams;
use shellpilot_core::protocol::CommandConfirmation;
use shellpilot_core::protocol::ConfirmationPrompt;
use shellpilot_core::protocol::InputItem;
use shellpilot_core::protocol::ReviewDecision;
use shellpilot_core::util::notify_on_sigint;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::io::Stdin;
use tokio::sync::Notify;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
pub use cli::Cli;

/// Stdin is shared between the prompt loop and confirmation prompts.
type SharedLines = Arc<tokio::sync::Mutex<Lines<BufReader<Stdin>>>>;

/// Initialize the global logger once at startup based on the `--verbose` flag.
/// Logs also go to `shellpilot.log` under `log_dir` when it can be opened; the
/// returned guard must be kept alive for the file writer to flush.
fn init_logger(verbose: u8, allow_ansi: bool, log_dir: &Path) -> Option<WorkerGuard> {
    // Map -v occurrences to explicit log levels:
    //   0 → warn (default)
    //   1 → info
    //   2 → debug
    //   ≥3 → trace
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = |default: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(allow_ansi)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(default_level));

    let (file_layer, guard) = match open_log_file(log_dir) {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_filter(env_filter("shellpilot_core=info,shellpilot_repl=info"));
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    // `try_init` fails if something else installed a subscriber first.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

fn open_log_file(log_dir: &Path) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(log_dir)?;
    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // Ensure the file is only readable and writable by the current user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    log_file_opts.open(log_dir.join("shellpilot.log"))
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let ctrl_c = notify_on_sigint();

    // Load config file and apply CLI overrides.
    let overrides = ConfigOverrides {
        model: cli.model.clone(),
        approval_policy: cli.approval_policy.map(Into::into),
        writable_roots: cli.writable_roots.clone(),
        disable_response_storage: if cli.disable_response_storage {
            Some(true)
        } else {
            None
        },
        ..Default::default()
    };
    let config = Config::load_with_overrides(overrides)?;

    // Initialize logging before any other work so early errors are captured.
    let _log_guard = init_logger(cli.verbose, !cli.no_ansi, &config.log_dir());
    debug!(?config, "loaded config");

    repl_main(cli, config, ctrl_c).await
}

async fn repl_main(cli: Cli, config: Config, ctrl_c: Arc<Notify>) -> anyhow::Result<()> {
    let lines: SharedLines = Arc::new(tokio::sync::Mutex::new(
        BufReader::new(tokio::io::stdin()).lines(),
    ));
    let backend = Arc::new(ModelClient::new(
        config.model.clone(),
        config.model_provider.clone(),
    ));
    let callbacks = Arc::new(ReplCallbacks::new(Arc::clone(&lines)));
    let controller = TurnController::new(backend, callbacks, TurnConfig::from(&config));

    out(
        &format!(
            "model {} via {}, approval policy {:?}",
            config.model, config.model_provider.name, config.approval_policy
        ),
        MessagePriority::BackgroundEvent,
        MessageActor::User,
    );

    let mut first_prompt = cli.prompt;
    let mut images = cli.images;
    loop {
        let text = match first_prompt.take() {
            Some(input) => input,
            None => match request_input(&lines, &ctrl_c).await? {
                Some(input) => input,
                None => {
                    // ctrl + d
                    println!();
                    return Ok(());
                }
            },
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Interpret certain single‑word commands as immediate termination requests.
        if trimmed == "q" || trimmed == "exit" {
            println!("Exiting…");
            return Ok(());
        }

        let mut items = vec![InputItem::Text {
            text: trimmed.to_string(),
        }];
        items.extend(
            std::mem::take(&mut images)
                .into_iter()
                .map(|path| InputItem::LocalImage { path }),
        );

        // Ctrl+C cancels the running turn instead of exiting.
        let turn = controller.run(items);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                result = &mut turn => {
                    result?;
                    break;
                }
                _ = ctrl_c.notified() => {
                    out("cancelling…", MessagePriority::TaskProgress, MessageActor::User);
                    controller.cancel();
                }
            }
        }
        debug!(
            "session thinking time: {:?}",
            controller.session_thinking_time()
        );
    }
}

async fn request_input(lines: &SharedLines, ctrl_c: &Notify) -> std::io::Result<Option<String>> {
    print!("user> ");
    stdout().flush()?;
    let mut reader = lines.lock().await;
    let interrupted = ctrl_c.notified();
    tokio::select! {
        line = reader.next_line() => {
            match line? {
                Some(input) => Ok(Some(input.trim().to_string())),
                None => Ok(None),
            }
        }
        _ = interrupted => {
            println!();
            Ok(Some(String::new()))
        }
    }
}

struct ReplCallbacks {
    lines: SharedLines,
    turn_started: Mutex<Option<Instant>>,
}

impl ReplCallbacks {
    fn new(lines: SharedLines) -> Self {
        Self {
            lines,
            turn_started: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AgentCallbacks for ReplCallbacks {
    fn on_item(&self, item: ResponseItem) {
        match item {
            ResponseItem::Message { ref role, .. } => {
                if role == "user" {
                    return;
                }
                let text = item.message_text().unwrap_or_default();
                if role == "system" {
                    out(&text, MessagePriority::Error, MessageActor::System);
                } else {
                    out(&text, MessagePriority::UserMessage, MessageActor::Agent);
                }
            }
            ResponseItem::Reasoning { summary, .. } => {
                for ReasoningItemReasoningSummary::SummaryText { text } in summary {
                    out(&text, MessagePriority::BackgroundEvent, MessageActor::Agent);
                }
            }
            ResponseItem::FunctionCall {
                name, arguments, ..
            } => {
                let shown = match serde_json::from_str::<ShellToolCallParams>(&arguments) {
                    Ok(params) => format!("running: {}", render_command(&params.command)),
                    Err(_) => format!("calling {name}({arguments})"),
                };
                out(&shown, MessagePriority::TaskProgress, MessageActor::Agent);
            }
            ResponseItem::FunctionCallOutput { output, .. } => {
                out(
                    &summarize_output(&output.content),
                    MessagePriority::BackgroundEvent,
                    MessageActor::Agent,
                );
            }
            ResponseItem::Other => debug!("ignoring unknown item"),
        }
    }

    fn on_loading(&self, loading: bool) {
        let mut started = self
            .turn_started
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if loading {
            *started = Some(Instant::now());
            out("thinking…", MessagePriority::TaskProgress, MessageActor::Agent);
        } else if let Some(start) = started.take() {
            out(
                &format!("done in {}", format_elapsed(start)),
                MessagePriority::TaskProgress,
                MessageActor::Agent,
            );
        }
    }

    fn on_continuation_id_changed(&self, id: Option<String>) {
        debug!(?id, "continuation id changed");
    }

    async fn get_command_confirmation(&self, prompt: &ConfirmationPrompt) -> CommandConfirmation {
        if let Some(explanation) = &prompt.explanation {
            out(explanation, MessagePriority::UserMessage, MessageActor::Agent);
        }
        let question = format!(
            "run `{}` in {}? [y]es / [a]lways / [n]o (optionally followed by a reason) / e[x]it turn / [e]xplain: ",
            render_command(&prompt.command),
            prompt.cwd.display()
        );

        let mut lines = self.lines.lock().await;
        loop {
            print!("{}", question.bold());
            let _ = stdout().flush();
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                // Closed stdin: nobody can approve anything.
                Ok(None) | Err(_) => return CommandConfirmation::from(ReviewDecision::DenyExit),
            };
            match parse_decision(&line) {
                Some(confirmation) => return confirmation,
                None => println!("please answer y, a, n, x or e"),
            }
        }
    }
}

/// Maps an answer typed at the confirmation prompt to a decision. `n`/`no`
/// may be followed by a message for the model explaining the denial.
fn parse_decision(line: &str) -> Option<CommandConfirmation> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let decision = match word.to_ascii_lowercase().as_str() {
        "y" | "yes" => ReviewDecision::Approve,
        "a" | "always" => ReviewDecision::ApproveAlways,
        "n" | "no" => {
            return Some(CommandConfirmation {
                decision: ReviewDecision::DenyContinue,
                custom_deny_message: (!rest.is_empty()).then(|| rest.to_string()),
            });
        }
        "x" | "exit" => ReviewDecision::DenyExit,
        "e" | "explain" => ReviewDecision::Explain,
        _ => return None,
    };
    rest.is_empty().then(|| CommandConfirmation::from(decision))
}

fn render_command(command: &[String]) -> String {
    shlex::try_join(command.iter().map(String::as_str)).unwrap_or_else(|_| command.join(" "))
}

/// One-line summary of a shell tool output: exit status plus the first line
/// of output.
fn summarize_output(content: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) else {
        return content.to_string();
    };
    let exit_code = parsed["metadata"]["exit_code"].as_i64().unwrap_or(-1);
    let output = parsed["output"].as_str().unwrap_or_default().trim();
    let first_line = output.lines().next().unwrap_or_default();
    let more = if output.lines().nth(1).is_some() { " …" } else { "" };
    if exit_code == 0 {
        format!("command completed (exit 0) {first_line}{more}")
    } else {
        format!("command failed (exit {exit_code}): {first_line}{more}")
    }
}

#[derive(Debug, Clone, Copy)]
enum MessagePriority {
    BackgroundEvent,
    TaskProgress,
    UserMessage,
    Error,
}

enum MessageActor {
    Agent,
    User,
    System,
}

impl From<MessageActor> for String {
    fn from(actor: MessageActor) -> Self {
        match actor {
            MessageActor::Agent => "shellpilot".to_string(),
            MessageActor::User => "user".to_string(),
            MessageActor::System => "system".to_string(),
        }
    }
}

fn out(msg: &str, priority: MessagePriority, actor: MessageActor) {
    let actor: String = actor.into();
    let style = match priority {
        MessagePriority::BackgroundEvent => Style::new().fg_rgb::<127, 127, 127>(),
        MessagePriority::TaskProgress => Style::new().fg_rgb::<200, 200, 200>(),
        MessagePriority::UserMessage => Style::new().white(),
        MessagePriority::Error => Style::new().red(),
    };

    println!("{}> {}", actor.bold(), msg.style(style));
}
