use std::path::PathBuf;

const MACOS_SEATBELT_BASE_POLICY: &str = include_str!("seatbelt_base_policy.sbpl");

/// When working with `sandbox-exec`, only consider `sandbox-exec` in `/usr/bin`
/// to defend against an attacker trying to inject a malicious version on the
/// PATH. If /usr/bin/sandbox-exec has been tampered with, then the attacker
/// already has root access.
pub const MACOS_PATH_TO_SEATBELT_EXECUTABLE: &str = "/usr/bin/sandbox-exec";

/// Builds the argv for `sandbox-exec`: the policy document, one
/// `-DWRITABLE_ROOT_i=<path>` binding per writable root, then `--` and the
/// untouched command.
///
/// An empty `writable_roots` yields a policy without any `file-write*` clause,
/// i.e. the command runs fully read-only.
pub fn create_seatbelt_command_args(
    command: Vec<String>,
    writable_roots: &[PathBuf],
) -> Vec<String> {
    let (writable_folder_policies, cli_args): (Vec<String>, Vec<String>) = writable_roots
        .iter()
        .enumerate()
        .map(|(index, root)| {
            let param_name = format!("WRITABLE_ROOT_{index}");
            let policy: String = format!("(subpath (param \"{param_name}\"))");
            let cli_arg = format!("-D{param_name}={}", root.to_string_lossy());
            (policy, cli_arg)
        })
        .unzip();

    let file_write_policy = if writable_folder_policies.is_empty() {
        String::new()
    } else {
        format!(
            "(allow file-write*\n{}\n)",
            writable_folder_policies.join(" ")
        )
    };

    let full_policy = format!("{MACOS_SEATBELT_BASE_POLICY}\n{file_write_policy}");
    let mut seatbelt_args: Vec<String> = vec!["-p".to_string(), full_policy];
    seatbelt_args.extend(cli_args);
    seatbelt_args.push("--".to_string());
    seatbelt_args.extend(command);
    seatbelt_args
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_writable_roots_means_no_write_clause() {
        let args = create_seatbelt_command_args(argv(&["ls", "-l"]), &[]);
        assert_eq!(args[0], "-p");
        let policy = &args[1];
        assert!(!policy.contains("(allow file-write*"));
        assert!(!policy.contains("WRITABLE_ROOT_"));
        assert!(!args.iter().any(|a| a.starts_with("-D")));
        assert_eq!(&args[2..], &argv(&["--", "ls", "-l"])[..]);
    }

    #[test]
    fn one_binding_per_writable_root() {
        let roots = vec![
            PathBuf::from("/tmp/project"),
            PathBuf::from("/Users/me/.shellpilot"),
            PathBuf::from("/private/tmp"),
        ];
        let args = create_seatbelt_command_args(argv(&["touch", "x"]), &roots);
        let policy = &args[1];

        assert_eq!(policy.matches("(allow file-write*").count(), 1);
        for index in 0..roots.len() {
            assert!(policy.contains(&format!("(subpath (param \"WRITABLE_ROOT_{index}\"))")));
        }
        assert!(!policy.contains("WRITABLE_ROOT_3"));

        let bindings: Vec<&String> = args.iter().filter(|a| a.starts_with("-D")).collect();
        assert_eq!(
            bindings,
            vec![
                "-DWRITABLE_ROOT_0=/tmp/project",
                "-DWRITABLE_ROOT_1=/Users/me/.shellpilot",
                "-DWRITABLE_ROOT_2=/private/tmp",
            ]
        );
    }

    #[test]
    fn command_is_passed_through_after_separator() {
        let command = argv(&["bash", "-lc", "echo hi > out.txt"]);
        let args = create_seatbelt_command_args(command.clone(), &[PathBuf::from("/w")]);
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(&args[sep + 1..], &command[..]);
    }

    #[test]
    fn base_policy_is_default_deny() {
        let args = create_seatbelt_command_args(argv(&["true"]), &[]);
        assert!(args[1].contains("(deny default)"));
        assert!(args[1].contains("(allow file-read*)"));
        assert!(args[1].contains("(allow sysctl-read"));
    }
}
