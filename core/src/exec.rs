use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tracing::debug;
use tracing::error;

use crate::error::AgentErr;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::output_collector::MAX_STREAM_OUTPUT;
use crate::output_collector::MAX_STREAM_OUTPUT_LINES;
use crate::output_collector::StreamOutput;
use crate::output_collector::read_capped;
use crate::seatbelt::MACOS_PATH_TO_SEATBELT_EXECUTABLE;
use crate::seatbelt::create_seatbelt_command_args;
use crate::shell::format_invocation;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

// Conventional exit codes for outcomes that never produced a real status.
const TIMEOUT_EXIT_CODE: i32 = 124;
const CANNOT_EXECUTE_EXIT_CODE: i32 = 126;
const NOT_FOUND_EXIT_CODE: i32 = 127;

#[derive(Debug, Clone)]
pub struct ExecParams {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub timeout_ms: Option<u64>,
    /// Directories the command may write to when it runs under a sandbox.
    pub writable_roots: Vec<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ExecParams {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxType {
    None,

    /// Only available on macOS.
    MacosSeatbelt,

    /// Landlock and seccomp. Only available on Linux.
    LinuxLandlock,
}

#[derive(Debug, Clone)]
pub struct ExecToolCallOutput {
    pub exit_code: i32,
    pub stdout: StreamOutput<String>,
    pub stderr: StreamOutput<String>,
    pub duration: Duration,
}

impl ExecToolCallOutput {
    fn synthetic(exit_code: i32, stderr: String, duration: Duration) -> Self {
        Self {
            exit_code,
            stdout: StreamOutput::new(String::new()),
            stderr: StreamOutput::new(stderr),
            duration,
        }
    }

    pub fn truncated(&self) -> bool {
        self.stdout.is_truncated() || self.stderr.is_truncated()
    }
}

#[derive(Debug)]
pub(crate) struct RawExecToolCallOutput {
    exit_code: i32,
    stdout: StreamOutput<String>,
    stderr: StreamOutput<String>,
    timed_out: bool,
}

/// Roots writable inside the sandbox: the requested ones plus the locations
/// common tooling expects to write to. An empty request stays empty so the
/// command runs fully read-only.
pub fn sandbox_writable_roots(requested: &[PathBuf], config_dir: &Path) -> Vec<PathBuf> {
    if requested.is_empty() {
        return Vec::new();
    }

    let mut roots = requested.to_vec();
    for extra in [config_dir.to_path_buf(), std::env::temp_dir()] {
        if !roots.contains(&extra) {
            roots.push(extra);
        }
    }
    roots
}

/// Runs a model-issued command and always produces an output record. A
/// non-zero exit, a missing binary or a timeout are ordinary results; only a
/// sandbox that cannot be launched is logged as an error, and even that is
/// reported back as a synthetic failed execution.
pub async fn process_exec_tool_call(
    params: ExecParams,
    sandbox_type: SandboxType,
) -> ExecToolCallOutput {
    let start = Instant::now();
    let timeout = params.timeout_duration();

    // Spawning in a missing directory fails with `NotFound` too, which would
    // read as a missing binary.
    if !tokio::fs::metadata(&params.cwd)
        .await
        .is_ok_and(|m| m.is_dir())
    {
        return ExecToolCallOutput::synthetic(
            CANNOT_EXECUTE_EXIT_CODE,
            format!("working directory does not exist: {}", params.cwd.display()),
            start.elapsed(),
        );
    }

    let raw_output_result = match sandbox_type {
        SandboxType::LinuxLandlock => exec_linux(params, timeout).await,
        SandboxType::None | SandboxType::MacosSeatbelt => {
            match spawn_for_sandbox(params, sandbox_type) {
                Ok(child) => consume_truncated_output(child, timeout).await,
                Err(err) => Err(err),
            }
        }
    };
    let duration = start.elapsed();

    match raw_output_result {
        Ok(raw_output) => {
            let mut stderr = raw_output.stderr;
            if raw_output.timed_out {
                let note = format!("command timed out after {} ms", timeout.as_millis());
                debug!("{note}");
                if !stderr.text.is_empty() && !stderr.text.ends_with('\n') {
                    stderr.text.push('\n');
                }
                stderr.text.push_str(&note);
            }
            ExecToolCallOutput {
                exit_code: raw_output.exit_code,
                stdout: raw_output.stdout,
                stderr,
                duration,
            }
        }
        Err(AgentErr::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            ExecToolCallOutput::synthetic(
                NOT_FOUND_EXIT_CODE,
                format!("command not found: {err}"),
                duration,
            )
        }
        Err(err @ AgentErr::Sandbox(SandboxErr::Launch { .. })) => {
            error!("{err}");
            ExecToolCallOutput::synthetic(CANNOT_EXECUTE_EXIT_CODE, err.to_string(), duration)
        }
        Err(err) => {
            error!("exec error: {err}");
            ExecToolCallOutput::synthetic(CANNOT_EXECUTE_EXIT_CODE, err.to_string(), duration)
        }
    }
}

#[cfg(target_os = "linux")]
async fn exec_linux(params: ExecParams, timeout: Duration) -> Result<RawExecToolCallOutput> {
    crate::landlock::exec_under_landlock(params, timeout).await
}

#[cfg(not(target_os = "linux"))]
async fn exec_linux(_params: ExecParams, _timeout: Duration) -> Result<RawExecToolCallOutput> {
    Err(AgentErr::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "linux sandbox is not supported on this platform",
    )))
}

/// Spawns the command. For [`SandboxType::LinuxLandlock`] the restrictions
/// must already be installed on the calling thread.
pub(crate) fn spawn_for_sandbox(params: ExecParams, sandbox_type: SandboxType) -> Result<Child> {
    let ExecParams {
        command,
        cwd,
        writable_roots,
        env,
        ..
    } = params;
    let command = format_invocation(command);

    match sandbox_type {
        SandboxType::None | SandboxType::LinuxLandlock => {
            let (program, args) = command.split_first().ok_or_else(|| {
                AgentErr::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "command args are empty",
                ))
            })?;
            Ok(spawn_child(Path::new(program), args, &cwd, &env)?)
        }
        SandboxType::MacosSeatbelt => {
            let args = create_seatbelt_command_args(command, &writable_roots);
            spawn_child(Path::new(MACOS_PATH_TO_SEATBELT_EXECUTABLE), &args, &cwd, &env).map_err(
                |source| {
                    AgentErr::Sandbox(SandboxErr::Launch {
                        program: MACOS_PATH_TO_SEATBELT_EXECUTABLE.to_string(),
                        source,
                    })
                },
            )
        }
    }
}

fn spawn_child(
    program: &Path,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
) -> io::Result<Child> {
    debug!("spawning {} {:?} in {}", program.display(), args, cwd.display());
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(env)
        // The model cannot answer interactive prompts.
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

/// Consumes the output of a child process, truncating it so it is suitable for
/// use as the output of a `shell` tool call. Also enforces specified timeout.
pub(crate) async fn consume_truncated_output(
    mut child: Child,
    timeout: Duration,
) -> Result<RawExecToolCallOutput> {
    // Both stdout and stderr were configured with `Stdio::piped()`
    // above, therefore `take()` should normally return `Some`.  If it doesn't
    // we treat it as an exceptional I/O error
    let stdout_reader = child.stdout.take().ok_or_else(|| {
        AgentErr::Io(io::Error::other(
            "stdout pipe was unexpectedly not available",
        ))
    })?;
    let stderr_reader = child.stderr.take().ok_or_else(|| {
        AgentErr::Io(io::Error::other(
            "stderr pipe was unexpectedly not available",
        ))
    })?;

    let stdout_handle = tokio::spawn(read_capped(
        BufReader::new(stdout_reader),
        MAX_STREAM_OUTPUT,
        MAX_STREAM_OUTPUT_LINES,
    ));
    let stderr_handle = tokio::spawn(read_capped(
        BufReader::new(stderr_reader),
        MAX_STREAM_OUTPUT,
        MAX_STREAM_OUTPUT_LINES,
    ));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(exit_status) => (exit_status?.code().unwrap_or(-1), false),
        Err(_) => {
            child.start_kill()?;
            // Reap it so the pipes close and the readers reach EOF.
            child.wait().await?;
            (TIMEOUT_EXIT_CODE, true)
        }
    };

    let stdout = stdout_handle.await??;
    let stderr = stderr_handle.await??;

    Ok(RawExecToolCallOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

/// Exec output is a pre-serialized JSON payload
pub fn format_exec_output(output: &ExecToolCallOutput) -> String {
    #[derive(Serialize)]
    struct ExecMetadata {
        exit_code: i32,
        duration_seconds: f32,
    }

    #[derive(Serialize)]
    struct ExecOutput<'a> {
        output: &'a str,
        metadata: ExecMetadata,
    }

    let text = if output.exit_code == 0 || output.stderr.text.is_empty() {
        output.stdout.text.clone()
    } else if output.stdout.text.is_empty() {
        output.stderr.text.clone()
    } else {
        format!("{}\n{}", output.stdout.text, output.stderr.text)
    };

    // round to 1 decimal place
    let duration_seconds = ((output.duration.as_secs_f32()) * 10.0).round() / 10.0;

    let payload = ExecOutput {
        output: &text,
        metadata: ExecMetadata {
            exit_code: output.exit_code,
            duration_seconds,
        },
    };

    serde_json::to_string(&payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn always_writable_roots_only_extend_a_non_empty_request() {
        let config_dir = PathBuf::from("/home/me/.shellpilot");
        assert!(sandbox_writable_roots(&[], &config_dir).is_empty());

        let roots = sandbox_writable_roots(&[PathBuf::from("/work")], &config_dir);
        assert_eq!(roots[0], PathBuf::from("/work"));
        assert!(roots.contains(&config_dir));
        assert!(roots.contains(&std::env::temp_dir()));
    }

    #[test]
    fn exec_output_is_json_with_metadata() {
        let output = ExecToolCallOutput {
            exit_code: 0,
            stdout: StreamOutput::new("hi\n".to_string()),
            stderr: StreamOutput::new(String::new()),
            duration: Duration::from_millis(1234),
        };
        let json: serde_json::Value = serde_json::from_str(&format_exec_output(&output))
            .unwrap_or_else(|e| panic!("invalid json: {e}"));
        assert_eq!(
            json,
            serde_json::json!({
                "output": "hi\n",
                "metadata": { "exit_code": 0, "duration_seconds": 1.2 }
            })
        );
    }

    #[tokio::test]
    async fn missing_working_directory_is_not_a_missing_command() {
        let cwd = std::env::temp_dir().join("shellpilot-no-such-dir").join("nested");
        let params = ExecParams {
            command: vec!["ls".to_string()],
            cwd: cwd.clone(),
            timeout_ms: None,
            writable_roots: Vec::new(),
            env: HashMap::new(),
        };

        let output = process_exec_tool_call(params, SandboxType::None).await;

        assert_eq!(output.exit_code, CANNOT_EXECUTE_EXIT_CODE);
        assert_eq!(
            output.stderr.text,
            format!("working directory does not exist: {}", cwd.display())
        );
        assert!(!output.stderr.text.contains("command not found"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_not_found() {
        let params = ExecParams {
            command: vec!["shellpilot-definitely-not-a-binary".to_string()],
            cwd: std::env::temp_dir(),
            timeout_ms: None,
            writable_roots: Vec::new(),
            env: HashMap::new(),
        };

        let output = process_exec_tool_call(params, SandboxType::None).await;

        assert_eq!(output.exit_code, NOT_FOUND_EXIT_CODE);
        assert!(output.stderr.text.starts_with("command not found"));
    }

    #[test]
    fn failed_exec_output_includes_stderr() {
        let output = ExecToolCallOutput {
            exit_code: 2,
            stdout: StreamOutput::new(String::new()),
            stderr: StreamOutput::new("no such file".to_string()),
            duration: Duration::ZERO,
        };
        assert!(format_exec_output(&output).contains("no such file"));
    }
}
