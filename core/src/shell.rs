//! Decides whether a model-issued argv needs a shell and, if so, how to
//! invoke it.

use crate::is_safe_command::parse_plain_words;

/// True iff `command` is a single string whose content uses shell syntax
/// (pipes, redirects, `&&`, `;`, expansions, subshells, ...).
///
/// An operator in its own argv element is just an argument: only a lone
/// script string is ever handed to a shell.
pub fn requires_shell(command: &[String]) -> bool {
    match command {
        [script] if !script.trim().is_empty() => parse_plain_words(script).is_none(),
        _ => false,
    }
}

/// Returns the argv that will actually be spawned.
///
/// - a lone script that needs a shell becomes `bash -lc <script>`
/// - a lone plain command line is split into its words
/// - anything else is passed through unchanged
pub fn format_invocation(command: Vec<String>) -> Vec<String> {
    if requires_shell(&command) {
        let mut invocation = vec!["bash".to_string(), "-lc".to_string()];
        invocation.extend(command);
        return invocation;
    }

    match command.as_slice() {
        [line] => parse_plain_words(line).unwrap_or_default(),
        _ => command,
    }
}
