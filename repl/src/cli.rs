use clap::ArgAction;
use clap::Parser;
use shellpilot_common::ApprovalModeCliArg;
use std::path::PathBuf;

/// Command‑line arguments.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Interactive terminal agent that runs shell commands on your behalf."
)]
pub struct Cli {
    /// First prompt of the session. More prompts are read from stdin.
    pub prompt: Option<String>,

    /// Override the default model from ~/.shellpilot/config.toml.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Optional images to attach to the first prompt.
    #[arg(long = "image", short = 'i', value_name = "FILE")]
    pub images: Vec<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    ///
    /// The flag may be passed up to three times. Without any -v the CLI only prints warnings and errors.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Don't use colored ansi output for verbose logging
    #[arg(long)]
    pub no_ansi: bool,

    /// Configure when the model requires human approval before executing a command.
    #[arg(long = "ask-for-approval", short = 'a')]
    pub approval_policy: Option<ApprovalModeCliArg>,

    /// Directory sandboxed commands may write to. May be given several times;
    /// without any, sandboxed commands are read-only.
    #[arg(long = "writable-root", short = 'w', value_name = "DIR")]
    pub writable_roots: Vec<PathBuf>,

    /// Disable server‑side response storage (sends the full conversation context with every request)
    #[arg(long = "disable-response-storage", default_value_t = false)]
    pub disable_response_storage: bool,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_repeated_roots_and_policy() {
        let cli = Cli::try_parse_from([
            "shellpilot",
            "-a",
            "auto-approve-all",
            "-w",
            "src",
            "--writable-root",
            "/tmp/out",
            "-vv",
            "list the files",
        ])
        .unwrap();

        assert_eq!(cli.approval_policy, Some(ApprovalModeCliArg::AutoApproveAll));
        assert_eq!(
            cli.writable_roots,
            vec![PathBuf::from("src"), PathBuf::from("/tmp/out")]
        );
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.prompt.as_deref(), Some("list the files"));
        assert!(!cli.disable_response_storage);
    }
}
