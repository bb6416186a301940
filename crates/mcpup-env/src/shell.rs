//! Shell escaping and login-shell wrapping.
//!
//! Wrapping a child command through the user's login shell lets it pick up
//! PATH additions from `.bashrc`/`.zshrc` that a bare `exec` would miss.
//! This matters for upstreams launched from a GUI or service context where
//! the inherited PATH is minimal.

/// Characters that force quoting; anything else is passed through bare.
const UNIX_METACHARS: &[char] = &[
    ' ', '\t', '\n', '$', '`', '"', '\'', '\\', '|', '&', ';', '(', ')', '<', '>', '*', '?', '[',
    ']', '#', '~', '=', '%', '!', '{', '}',
];

const WINDOWS_METACHARS: &[char] = &[' ', '\t', '"', '&', '|', '<', '>', '^', '%'];

/// Escapes a single argument for a POSIX shell using the single-quote wrap
/// convention: `'` becomes `'"'"'`. An empty string becomes `''`.
pub fn escape_unix(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !arg.contains(UNIX_METACHARS) {
        return arg.to_string();
    }
    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

/// Escapes a single argument for `cmd.exe` using double-quote wrapping with
/// `"` doubled to `\"`. An empty string becomes `""`.
pub fn escape_windows(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if !arg.contains(WINDOWS_METACHARS) {
        return arg.to_string();
    }
    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('"');
    for ch in arg.chars() {
        if ch == '"' {
            escaped.push_str("\\\"");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('"');
    escaped
}

trait ContainsAny {
    fn contains(&self, chars: &[char]) -> bool;
}

impl ContainsAny for str {
    fn contains(&self, chars: &[char]) -> bool {
        self.chars().any(|c| chars.contains(&c))
    }
}

/// Joins `command` and `args` into a single escaped command line for the
/// target shell.
fn join_escaped(command: &str, args: &[String], escape: impl Fn(&str) -> String) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(escape(command));
    parts.extend(args.iter().map(|a| escape(a)));
    parts.join(" ")
}

/// The shell-wrapped invocation for a child command: `(program, args)` ready
/// to hand to a process spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Wraps `command args...` through the user's login shell so the child
/// inherits interactive-shell PATH additions.
///
/// Non-Windows (and Git-Bash-like shells on Windows) use `$SHELL -l -c
/// "<escaped command>"`; native Windows uses `cmd.exe /c "<escaped
/// command>"`.
pub fn wrap_with_login_shell(command: &str, args: &[String], shell: &str, is_windows_native: bool) -> WrappedCommand {
    if is_windows_native {
        let line = join_escaped(command, args, escape_windows);
        WrappedCommand {
            program: "cmd.exe".to_string(),
            args: vec!["/c".to_string(), line],
        }
    } else {
        let line = join_escaped(command, args, escape_unix);
        WrappedCommand {
            program: shell.to_string(),
            args: vec!["-l".to_string(), "-c".to_string(), line],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_arg_unquoted() {
        assert_eq!(escape_unix("hello"), "hello");
        assert_eq!(escape_windows("hello"), "hello");
    }

    #[test]
    fn empty_arg() {
        assert_eq!(escape_unix(""), "''");
        assert_eq!(escape_windows(""), "\"\"");
    }

    #[test]
    fn unix_single_quote_escaping() {
        assert_eq!(escape_unix("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn windows_double_quote_escaping() {
        assert_eq!(escape_windows("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn unix_wrap_shape() {
        let wrapped = wrap_with_login_shell("python3", &["-m".to_string(), "srv".to_string()], "/bin/zsh", false);
        assert_eq!(wrapped.program, "/bin/zsh");
        assert_eq!(wrapped.args[0], "-l");
        assert_eq!(wrapped.args[1], "-c");
        assert_eq!(wrapped.args[2], "python3 -m srv");
    }

    #[test]
    fn windows_wrap_shape() {
        let wrapped = wrap_with_login_shell("node", &["server.js".to_string()], "", true);
        assert_eq!(wrapped.program, "cmd.exe");
        assert_eq!(wrapped.args[0], "/c");
        assert_eq!(wrapped.args[1], "node server.js");
    }
}
