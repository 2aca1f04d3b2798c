//! Linux sandbox. Landlock keeps the file system read-only outside the
//! writable roots and a seccomp filter blocks network access. Both are
//! installed on a dedicated thread so that only the children spawned from
//! that thread inherit them, never the rest of the process.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use landlock::ABI;
use landlock::Access;
use landlock::AccessFs;
use landlock::CompatLevel;
use landlock::Compatible;
use landlock::Ruleset;
use landlock::RulesetAttr;
use landlock::RulesetCreatedAttr;
use seccompiler::BpfProgram;
use seccompiler::SeccompAction;
use seccompiler::SeccompCmpArgLen;
use seccompiler::SeccompCmpOp;
use seccompiler::SeccompCondition;
use seccompiler::SeccompFilter;
use seccompiler::SeccompRule;
use seccompiler::TargetArch;
use seccompiler::apply_filter;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::AgentErr;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::exec::ExecParams;
use crate::exec::RawExecToolCallOutput;
use crate::exec::SandboxType;
use crate::exec::consume_truncated_output;
use crate::exec::spawn_for_sandbox;

/// Runs `params` to completion on a fresh thread that is locked down first.
pub(crate) async fn exec_under_landlock(
    params: ExecParams,
    timeout: Duration,
) -> Result<RawExecToolCallOutput> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("shellpilot-sandbox".to_string())
        .spawn(move || {
            let _ = tx.send(run_on_sandbox_thread(params, timeout));
        })?;

    rx.await.map_err(|_| {
        AgentErr::Io(io::Error::other(
            "sandbox thread exited without reporting a result",
        ))
    })?
}

fn run_on_sandbox_thread(params: ExecParams, timeout: Duration) -> Result<RawExecToolCallOutput> {
    // The runtime is built before the seccomp filter goes in: its drivers
    // need socket calls the filter denies.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        install_network_seccomp_filter_on_current_thread()?;
        install_filesystem_landlock_rules_on_current_thread(&params.writable_roots)?;
        let child = spawn_for_sandbox(params, SandboxType::LinuxLandlock)?;
        consume_truncated_output(child, timeout).await
    })
}

/// Installs Landlock file-system rules on the current thread allowing read
/// access to the entire file-system while restricting write access to
/// `/dev/null` and one rule per entry of `writable_roots`.
fn install_filesystem_landlock_rules_on_current_thread(
    writable_roots: &[PathBuf],
) -> std::result::Result<(), SandboxErr> {
    let abi = ABI::V5;
    let access_rw = AccessFs::from_all(abi);
    let access_ro = AccessFs::from_read(abi);

    let mut ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(access_rw)?
        .create()?
        .add_rules(landlock::path_beneath_rules(&["/"], access_ro))?
        .add_rules(landlock::path_beneath_rules(&["/dev/null"], access_rw))?
        .set_no_new_privs(true);

    if !writable_roots.is_empty() {
        ruleset = ruleset.add_rules(landlock::path_beneath_rules(writable_roots, access_rw))?;
    }

    let status = ruleset.restrict_self()?;
    debug!(ruleset = ?status.ruleset, "landlock ruleset applied");

    if status.ruleset == landlock::RulesetStatus::NotEnforced {
        return Err(SandboxErr::LandlockRestrict);
    }

    Ok(())
}

/// Installs a seccomp filter that blocks outbound network access except for
/// AF_UNIX domain sockets.
fn install_network_seccomp_filter_on_current_thread() -> std::result::Result<(), SandboxErr> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();

    // An empty rule list matches unconditionally.
    for nr in [
        libc::SYS_connect,
        libc::SYS_accept,
        libc::SYS_accept4,
        libc::SYS_bind,
        libc::SYS_listen,
        libc::SYS_getpeername,
        libc::SYS_getsockname,
        libc::SYS_shutdown,
        libc::SYS_sendto,
        libc::SYS_sendmsg,
        libc::SYS_sendmmsg,
        libc::SYS_recvfrom,
        libc::SYS_recvmsg,
        libc::SYS_recvmmsg,
        libc::SYS_getsockopt,
        libc::SYS_setsockopt,
        libc::SYS_ptrace,
        libc::SYS_socketpair,
    ] {
        rules.insert(nr, vec![]);
    }

    // `socket` is denied unless the domain (first argument) is AF_UNIX.
    let non_unix_rule = SeccompRule::new(vec![SeccompCondition::new(
        0,
        SeccompCmpArgLen::Dword,
        SeccompCmpOp::Ne,
        libc::AF_UNIX as u64,
    )?])?;
    rules.insert(libc::SYS_socket, vec![non_unix_rule]);

    let arch = if cfg!(target_arch = "x86_64") {
        TargetArch::x86_64
    } else if cfg!(target_arch = "aarch64") {
        TargetArch::aarch64
    } else {
        return Err(SandboxErr::SeccompUnsupportedArch(std::env::consts::ARCH));
    };

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        arch,
    )?;
    let prog: BpfProgram = filter.try_into()?;
    apply_filter(&prog)?;

    Ok(())
}
