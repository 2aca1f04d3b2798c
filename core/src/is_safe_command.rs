use tree_sitter::Node;
use tree_sitter::Parser;
use tree_sitter::Tree;
use tree_sitter_bash::LANGUAGE as BASH;

/// Static safety class of a command, computed without running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSafety {
    /// A single read-only command from the curated list.
    KnownSafe,
    /// A `bash -lc` script that only chains known-safe commands together
    /// with pipes or `&&`/`||`/`;`.
    SafeComposite,
    Unknown,
}

pub fn classify_command(command: &[String]) -> CommandSafety {
    if is_known_safe_command(command) {
        CommandSafety::KnownSafe
    } else if is_safe_composite_command(command) {
        CommandSafety::SafeComposite
    } else {
        CommandSafety::Unknown
    }
}

pub fn is_known_safe_command(command: &[String]) -> bool {
    if is_safe_to_call_with_exec(command) {
        return true;
    }

    if let [script] = command {
        return parse_plain_words(script).is_some_and(|words| is_safe_to_call_with_exec(&words));
    }

    matches!(
        command,
        [bash, flag, script]
            if bash == "bash"
            && flag == "-lc"
            && parse_plain_words(script).is_some_and(|words| is_safe_to_call_with_exec(&words))
    )
}

/// `bash -lc "cat foo | wc -l"` style scripts, or the same script passed as
/// a single argv element, where every command is itself known-safe.
fn is_safe_composite_command(command: &[String]) -> bool {
    let script = match command {
        [script] => script,
        [bash, flag, script] if bash == "bash" && flag == "-lc" => script,
        _ => return false,
    };
    let Some(tree) = try_parse_bash(script) else {
        return false;
    };
    try_parse_safe_command_sequence(&tree, script).is_some_and(|commands| {
        !commands.is_empty() && commands.iter().all(|c| is_safe_to_call_with_exec(c))
    })
}

fn is_safe_to_call_with_exec(command: &[String]) -> bool {
    let cmd0 = command.first().map(String::as_str);

    match cmd0 {
        Some(
            "cat" | "cd" | "echo" | "grep" | "head" | "ls" | "pwd" | "rg" | "tail" | "wc" | "which",
        ) => true,

        Some("find") => {
            // Certain options to `find` can delete files, write to files, or
            // execute arbitrary commands, so we cannot auto-approve the
            // invocation of `find` in such cases.
            #[rustfmt::skip]
            const UNSAFE_FIND_OPTIONS: &[&str] = &[
                // Options that can execute arbitrary commands.
                "-exec", "-execdir", "-ok", "-okdir",
                // Option that deletes matching files.
                "-delete",
                // Options that write pathnames to a file.
                "-fls", "-fprint", "-fprint0", "-fprintf",
            ];

            !command
                .iter()
                .any(|arg| UNSAFE_FIND_OPTIONS.contains(&arg.as_str()))
        }

        // Git
        Some("git") => matches!(
            command.get(1).map(String::as_str),
            Some("branch" | "status" | "log" | "diff" | "show")
        ),

        // Rust
        Some("cargo") if command.get(1).map(String::as_str) == Some("check") => true,

        // Special-case `sed -n {N|M,N}p FILE`
        Some("sed")
            if {
                command.len() == 4
                    && command.get(1).map(String::as_str) == Some("-n")
                    && is_valid_sed_n_arg(command.get(2).map(String::as_str))
                    && command.get(3).map(String::is_empty) == Some(false)
            } =>
        {
            true
        }

        // ── anything else ─────────────────────────────────────────────────
        _ => false,
    }
}

pub(crate) fn try_parse_bash(bash_lc_arg: &str) -> Option<Tree> {
    let lang = BASH.into();
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;

    let old_tree: Option<&Tree> = None;
    parser.parse(bash_lc_arg, old_tree)
}

/// If `script` is a single Bash command whose name and every argument is an
/// ordinary word, return those words in order; otherwise, return `None`.
pub fn parse_plain_words(script: &str) -> Option<Vec<String>> {
    let tree = try_parse_bash(script)?;
    try_parse_single_word_only_command(&tree, script)
}

/// If `tree` represents a single Bash command whose name and every argument is
/// an ordinary `word`, return those words in order; otherwise, return `None`.
///
/// `src` must be the exact source string that was parsed into `tree`, so we can
/// extract the text for every node.
pub fn try_parse_single_word_only_command(tree: &Tree, src: &str) -> Option<Vec<String>> {
    // Any parse error is an immediate rejection.
    if tree.root_node().has_error() {
        return None;
    }

    // (program …) with exactly one statement
    let root = tree.root_node();
    if root.kind() != "program" || root.named_child_count() != 1 {
        return None;
    }

    let cmd = root.named_child(0)?; // (command …)
    words_of_command(cmd, src)
}

/// Walks `program`, `list` and `pipeline` nodes and returns the words of each
/// plain command they contain. Redirections, subshells, substitutions and
/// anything else that is not a plain word make the whole script ineligible.
fn try_parse_safe_command_sequence(tree: &Tree, src: &str) -> Option<Vec<Vec<String>>> {
    fn collect(node: Node, src: &str, out: &mut Vec<Vec<String>>) -> Option<()> {
        match node.kind() {
            "program" | "list" | "pipeline" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.is_named() {
                        collect(child, src, out)?;
                    } else if !matches!(child.kind(), "&&" | "||" | ";" | "|" | "\n") {
                        return None;
                    }
                }
                Some(())
            }
            "command" => {
                out.push(words_of_command(node, src)?);
                Some(())
            }
            _ => None,
        }
    }

    if tree.root_node().has_error() {
        return None;
    }
    let mut commands = Vec::new();
    collect(tree.root_node(), src, &mut commands)?;
    Some(commands)
}

fn words_of_command(cmd: Node, src: &str) -> Option<Vec<String>> {
    if cmd.kind() != "command" {
        return None;
    }

    let mut words = Vec::new();
    let mut cursor = cmd.walk();

    for child in cmd.named_children(&mut cursor) {
        match child.kind() {
            // The command name node wraps one `word` child.
            "command_name" => {
                let word_node = child.named_child(0)?; // make sure it's only a word
                if word_node.kind() != "word" {
                    return None;
                }
                words.push(word_node.utf8_text(src.as_bytes()).ok()?.to_owned());
            }
            // Positional‑argument word (allowed).
            "word" | "number" => {
                words.push(child.utf8_text(src.as_bytes()).ok()?.to_owned());
            }
            "string" => {
                if child.child_count() == 3
                    && child.child(0)?.kind() == "\""
                    && child.child(1)?.kind() == "string_content"
                    && child.child(2)?.kind() == "\""
                {
                    words.push(child.child(1)?.utf8_text(src.as_bytes()).ok()?.to_owned());
                } else {
                    // Anything else means the command is *not* plain words.
                    return None;
                }
            }
            "raw_string" => {
                // Raw string is a single word, but we need to strip the quotes.
                let raw_string = child.utf8_text(src.as_bytes()).ok()?;
                let stripped = raw_string
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))?;
                words.push(stripped.to_owned());
            }
            // Anything else (concatenation, expansion, ...) means the command
            // is *not* plain words.
            _ => return None,
        }
    }

    Some(words)
}

/// Returns true if `arg` matches /^(\d+,)?\d+p$/
fn is_valid_sed_n_arg(arg: Option<&str>) -> bool {
    let Some(s) = arg else {
        return false;
    };

    // must end with 'p', strip it
    let Some(core) = s.strip_suffix('p') else {
        return false;
    };

    let is_number = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());

    // split on ',' and ensure 1 or 2 numeric parts
    let parts: Vec<&str> = core.split(',').collect();
    match parts.as_slice() {
        [num] => is_number(num),
        [a, b] => is_number(a) && is_number(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn vec_str(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn known_safe_examples() {
        assert!(is_safe_to_call_with_exec(&vec_str(&["ls"])));
        assert!(is_safe_to_call_with_exec(&vec_str(&["git", "status"])));
        assert!(is_safe_to_call_with_exec(&vec_str(&[
            "sed", "-n", "1,5p", "file.txt"
        ])));

        // Safe `find` command (no unsafe options).
        assert!(is_safe_to_call_with_exec(&vec_str(&[
            "find", ".", "-name", "file.txt"
        ])));
    }

    #[test]
    fn unknown_or_partial() {
        assert!(!is_safe_to_call_with_exec(&vec_str(&["foo"])));
        assert!(!is_safe_to_call_with_exec(&vec_str(&["git", "fetch"])));
        assert!(!is_safe_to_call_with_exec(&vec_str(&[
            "sed", "-n", "xp", "file.txt"
        ])));

        for args in [
            vec_str(&["find", ".", "-name", "file.txt", "-exec", "rm", "{}", ";"]),
            vec_str(&["find", ".", "-delete", "-name", "file.txt"]),
            vec_str(&["find", ".", "-fprint", "/etc/passwd"]),
        ] {
            assert!(
                !is_safe_to_call_with_exec(&args),
                "expected {args:?} to be unsafe"
            );
        }
    }

    #[test]
    fn bash_lc_safe_examples() {
        assert!(is_known_safe_command(&vec_str(&["bash", "-lc", "ls -1"])));
        assert!(is_known_safe_command(&vec_str(&[
            "bash",
            "-lc",
            "grep -R \"Cargo.toml\" -n"
        ])));
        assert!(is_known_safe_command(&vec_str(&[
            "bash",
            "-lc",
            "sed -n '1,5p' file.txt"
        ])));
    }

    #[test]
    fn single_string_commands_are_parsed() {
        assert!(is_known_safe_command(&vec_str(&["git status"])));
        assert!(!is_known_safe_command(&vec_str(&["rm -rf build"])));
    }

    #[test]
    fn bash_lc_unsafe_examples() {
        assert!(
            !is_known_safe_command(&vec_str(&["bash", "-lc", "git", "status"])),
            "Four arg version is not known to be safe."
        );
        assert!(
            !is_known_safe_command(&vec_str(&["bash", "-lc", "'git status'"])),
            "The extra quoting around 'git status' makes it a program named 'git status' and is therefore unsafe."
        );
        assert!(
            !is_known_safe_command(&vec_str(&["bash", "-lc", "find . -name file.txt -delete"])),
            "Unsafe find option should not be auto‑approved."
        );
    }

    #[test]
    fn composite_scripts_of_safe_commands() {
        assert_eq!(
            classify_command(&vec_str(&["bash", "-lc", "cat foo | wc -l"])),
            CommandSafety::SafeComposite
        );
        assert_eq!(
            classify_command(&vec_str(&["ls && pwd"])),
            CommandSafety::SafeComposite
        );
        assert_eq!(
            classify_command(&vec_str(&["cat foo | sh"])),
            CommandSafety::Unknown
        );
        assert_eq!(
            classify_command(&vec_str(&["cat foo > out.txt"])),
            CommandSafety::Unknown,
            "redirections can write files"
        );
        assert_eq!(classify_command(&vec_str(&["ls"])), CommandSafety::KnownSafe);
    }

    #[test]
    fn test_parse_plain_words() {
        assert_eq!(
            parse_plain_words("sed -n '1,5p' file.txt").unwrap(),
            vec!["sed", "-n", "1,5p", "file.txt"]
        );
        assert_eq!(parse_plain_words("ls -1").unwrap(), vec!["ls", "-1"]);
        assert_eq!(
            parse_plain_words("grep -R \"Cargo.toml\" -n").unwrap(),
            vec!["grep", "-R", "Cargo.toml", "-n"]
        );
        assert_eq!(parse_plain_words("echo $HOME"), None);
        assert_eq!(parse_plain_words("grep -n x f | head"), None);
    }
}
