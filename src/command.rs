//! Remote shell command composition.
//!
//! Every command sent to a host is built through [`ShellCommand`]. Caller data
//! enters only through [`ShellCommand::arg`] and friends, which quote it for a
//! POSIX shell. Shell syntax (pipes, redirections, `||`, globs) can only be
//! added from `&'static str`, so nothing that reaches the shell unquoted was
//! ever runtime data.
//!
//! ```rust
//! use unitfleet::command::{Escalation, ShellCommand};
//!
//! let cmd = ShellCommand::privileged(Escalation::Sudo, "systemctl")
//!     .arg("restart")
//!     .arg("my app.service");
//! assert_eq!(cmd.render(), "sudo systemctl restart 'my app.service'");
//! ```

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Privilege escalation applied to commands that modify the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Escalation {
    /// Plain `sudo`
    #[default]
    Sudo,
    /// `sudo -n`, fails instead of prompting for a password
    SudoNonInteractive,
    /// Connect as a privileged user, no prefix
    None,
}

impl Escalation {
    fn words(self) -> &'static [&'static str] {
        match self {
            Escalation::Sudo => &["sudo"],
            Escalation::SudoNonInteractive => &["sudo", "-n"],
            Escalation::None => &[],
        }
    }
}

/// Returns true if `c` never needs quoting in a POSIX shell word.
fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '_' | '-')
}

/// Quote a string for use as a single shell word.
///
/// Strings made only of shell-safe characters are returned unchanged; anything
/// else is wrapped in single quotes with embedded quotes rendered as `'\''`.
pub fn quote(s: &str) -> Cow<'_, str> {
    if !s.is_empty() && s.chars().all(is_shell_safe) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', "'\\''")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Literal shell text, never runtime data
    Literal(&'static str),
    /// Runtime data, quoted on render
    Arg(String),
    /// Quoted prefix followed by a literal glob suffix
    Glob {
        prefix: String,
        pattern: &'static str,
    },
}

/// A shell command line assembled from literal syntax and quoted arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    tokens: Vec<Token>,
}

impl ShellCommand {
    /// Start a command with the given program.
    pub fn new(program: &'static str) -> Self {
        Self {
            tokens: vec![Token::Literal(program)],
        }
    }

    /// Start a command that runs `program` with privilege escalation.
    pub fn privileged(escalation: Escalation, program: &'static str) -> Self {
        let mut tokens: Vec<Token> = escalation.words().iter().copied().map(Token::Literal).collect();
        tokens.push(Token::Literal(program));
        Self { tokens }
    }

    /// A fixed script with no runtime data in it.
    pub fn script(text: &'static str) -> Self {
        Self {
            tokens: vec![Token::Literal(text)],
        }
    }

    /// Append a quoted argument.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.tokens.push(Token::Arg(value.into()));
        self
    }

    /// Append several quoted arguments.
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens
            .extend(values.into_iter().map(|v| Token::Arg(v.into())));
        self
    }

    /// Append a literal flag or keyword.
    pub fn flag(mut self, flag: &'static str) -> Self {
        self.tokens.push(Token::Literal(flag));
        self
    }

    /// Append a quoted path prefix immediately followed by an unquoted glob.
    pub fn glob(mut self, prefix: impl Into<String>, pattern: &'static str) -> Self {
        self.tokens.push(Token::Glob {
            prefix: prefix.into(),
            pattern,
        });
        self
    }

    /// `self | next`
    pub fn pipe(self, next: ShellCommand) -> Self {
        self.join("|", next)
    }

    /// `self || next`
    pub fn or_else(self, next: ShellCommand) -> Self {
        self.join("||", next)
    }

    /// `self && next`
    pub fn and_then(self, next: ShellCommand) -> Self {
        self.join("&&", next)
    }

    /// Discard standard output.
    pub fn quiet(mut self) -> Self {
        self.tokens.push(Token::Literal("> /dev/null"));
        self
    }

    /// Discard standard error.
    pub fn no_stderr(mut self) -> Self {
        self.tokens.push(Token::Literal("2> /dev/null"));
        self
    }

    fn join(mut self, operator: &'static str, next: ShellCommand) -> Self {
        self.tokens.push(Token::Literal(operator));
        self.tokens.extend(next.tokens);
        self
    }

    /// Write `content` to `path` byte for byte.
    ///
    /// Renders as `printf '%s' <content> | [sudo] tee <path> > /dev/null`.
    pub fn write_file(escalation: Escalation, path: &str, content: &str) -> Self {
        ShellCommand::new("printf")
            .arg("%s")
            .arg(content)
            .pipe(ShellCommand::privileged(escalation, "tee").arg(path))
            .quiet()
    }

    /// Render the command line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Arg(value) => out.push_str(&quote(value)),
                Token::Glob { prefix, pattern } => {
                    out.push_str(&quote(prefix));
                    out.push_str(pattern);
                }
            }
        }
        out
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
