use std::collections::HashSet;

use crate::exec::SandboxType;
use crate::is_safe_command::CommandSafety;
use crate::protocol::ApprovalPolicyMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyCheck {
    AutoApprove { sandbox_type: SandboxType },
    AskUser,
    Reject { reason: String },
}

/// Commands the user chose to "always approve" during this session, keyed by
/// the exact argv. Owned by a single turn controller.
#[derive(Debug, Default, Clone)]
pub struct ApprovedCommands {
    commands: HashSet<Vec<String>>,
}

impl ApprovedCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, command: Vec<String>) {
        self.commands.insert(command);
    }

    pub fn contains(&self, command: &[String]) -> bool {
        self.commands.contains(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub fn assess_command_safety(
    command: &[String],
    approval_policy: ApprovalPolicyMode,
    safety: CommandSafety,
    approved: &ApprovedCommands,
    platform_sandbox: Option<SandboxType>,
) -> SafetyCheck {
    // Also catches `["   "]`, which would format to an empty invocation.
    if command.iter().all(|arg| arg.trim().is_empty()) {
        return SafetyCheck::Reject {
            reason: "empty command".to_string(),
        };
    }

    let approve_without_sandbox = || SafetyCheck::AutoApprove {
        sandbox_type: SandboxType::None,
    };

    // Previously approved or allow-listed commands.
    // All approval modes allow these commands to continue without sandboxing.
    if safety == CommandSafety::KnownSafe || approved.contains(command) {
        return approve_without_sandbox();
    }

    match approval_policy {
        ApprovalPolicyMode::Manual => SafetyCheck::AskUser,
        ApprovalPolicyMode::AutoApproveSafe => match safety {
            CommandSafety::SafeComposite => approve_without_sandbox(),
            CommandSafety::KnownSafe | CommandSafety::Unknown => SafetyCheck::AskUser,
        },
        ApprovalPolicyMode::AutoApproveAll => match safety {
            CommandSafety::SafeComposite => approve_without_sandbox(),
            CommandSafety::KnownSafe | CommandSafety::Unknown => match platform_sandbox {
                // We have a sandbox, so we can approve the command.
                Some(sandbox_type) => SafetyCheck::AutoApprove { sandbox_type },
                // Without one, running arbitrary commands unattended is not
                // an option, so we ask.
                None => SafetyCheck::AskUser,
            },
        },
    }
}

pub fn get_platform_sandbox() -> Option<SandboxType> {
    if cfg!(target_os = "macos") {
        Some(SandboxType::MacosSeatbelt)
    } else if cfg!(target_os = "linux") {
        Some(SandboxType::LinuxLandlock)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    const NO_SANDBOX: SafetyCheck = SafetyCheck::AutoApprove {
        sandbox_type: SandboxType::None,
    };

    #[test]
    fn empty_command_is_rejected() {
        let check = assess_command_safety(
            &[],
            ApprovalPolicyMode::AutoApproveAll,
            CommandSafety::Unknown,
            &ApprovedCommands::new(),
            Some(SandboxType::MacosSeatbelt),
        );
        assert!(matches!(check, SafetyCheck::Reject { .. }));
    }

    #[test]
    fn whitespace_only_command_is_rejected() {
        for command in [argv(&["   "]), argv(&["", "\t"])] {
            let check = assess_command_safety(
                &command,
                ApprovalPolicyMode::AutoApproveAll,
                CommandSafety::Unknown,
                &ApprovedCommands::new(),
                Some(SandboxType::MacosSeatbelt),
            );
            assert_eq!(
                check,
                SafetyCheck::Reject {
                    reason: "empty command".to_string()
                }
            );
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn auto_approve_all_runs_under_landlock_on_linux() {
        let platform_sandbox = get_platform_sandbox();
        assert_eq!(platform_sandbox, Some(SandboxType::LinuxLandlock));

        let check = assess_command_safety(
            &argv(&["make", "install"]),
            ApprovalPolicyMode::AutoApproveAll,
            CommandSafety::Unknown,
            &ApprovedCommands::new(),
            platform_sandbox,
        );
        assert_eq!(
            check,
            SafetyCheck::AutoApprove {
                sandbox_type: SandboxType::LinuxLandlock
            }
        );
    }

    #[test]
    fn known_safe_commands_skip_the_prompt_in_every_mode() {
        for mode in [
            ApprovalPolicyMode::Manual,
            ApprovalPolicyMode::AutoApproveSafe,
            ApprovalPolicyMode::AutoApproveAll,
        ] {
            let check = assess_command_safety(
                &argv(&["ls"]),
                mode,
                CommandSafety::KnownSafe,
                &ApprovedCommands::new(),
                None,
            );
            assert_eq!(check, NO_SANDBOX, "mode {mode:?}");
        }
    }

    #[test]
    fn always_approved_commands_match_exact_argv() {
        let mut approved = ApprovedCommands::new();
        approved.insert(argv(&["cargo", "build"]));

        let check = assess_command_safety(
            &argv(&["cargo", "build"]),
            ApprovalPolicyMode::Manual,
            CommandSafety::Unknown,
            &approved,
            None,
        );
        assert_eq!(check, NO_SANDBOX);

        let check = assess_command_safety(
            &argv(&["cargo", "build", "--release"]),
            ApprovalPolicyMode::Manual,
            CommandSafety::Unknown,
            &approved,
            None,
        );
        assert_eq!(check, SafetyCheck::AskUser);
    }

    #[test]
    fn composite_scripts_need_auto_approve_safe() {
        let script = argv(&["bash", "-lc", "cat a | wc -l"]);
        let manual = assess_command_safety(
            &script,
            ApprovalPolicyMode::Manual,
            CommandSafety::SafeComposite,
            &ApprovedCommands::new(),
            None,
        );
        assert_eq!(manual, SafetyCheck::AskUser);

        let auto = assess_command_safety(
            &script,
            ApprovalPolicyMode::AutoApproveSafe,
            CommandSafety::SafeComposite,
            &ApprovedCommands::new(),
            None,
        );
        assert_eq!(auto, NO_SANDBOX);
    }

    #[test]
    fn auto_approve_all_requires_a_sandbox() {
        let command = argv(&["make", "install"]);
        let sandboxed = assess_command_safety(
            &command,
            ApprovalPolicyMode::AutoApproveAll,
            CommandSafety::Unknown,
            &ApprovedCommands::new(),
            Some(SandboxType::MacosSeatbelt),
        );
        assert_eq!(
            sandboxed,
            SafetyCheck::AutoApprove {
                sandbox_type: SandboxType::MacosSeatbelt
            }
        );

        let unsandboxed = assess_command_safety(
            &command,
            ApprovalPolicyMode::AutoApproveAll,
            CommandSafety::Unknown,
            &ApprovedCommands::new(),
            None,
        );
        assert_eq!(unsandboxed, SafetyCheck::AskUser);
    }
}
