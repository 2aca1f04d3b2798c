//! Standard type to use with the `--ask-for-approval` CLI option.
//! Available when the `cli` feature is enabled for the crate.

use clap::ValueEnum;

use shellpilot_core::protocol::ApprovalPolicyMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ApprovalModeCliArg {
    /// Only run "known safe" commands (e.g. ls, cat, sed -n) without asking.
    /// Everything else needs an explicit yes.
    Manual,

    /// Additionally run pipelines and `&&` chains made only of known-safe
    /// commands without asking.
    AutoApproveSafe,

    /// Run every command without asking, inside the platform sandbox.
    /// Falls back to asking when no sandbox is available.
    AutoApproveAll,
}

impl From<ApprovalModeCliArg> for ApprovalPolicyMode {
    fn from(value: ApprovalModeCliArg) -> Self {
        match value {
            ApprovalModeCliArg::Manual => ApprovalPolicyMode::Manual,
            ApprovalModeCliArg::AutoApproveSafe => ApprovalPolicyMode::AutoApproveSafe,
            ApprovalModeCliArg::AutoApproveAll => ApprovalPolicyMode::AutoApproveAll,
        }
    }
}
