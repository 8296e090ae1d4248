//! Command line tokenizing and classification (component A).
//!
//! Turns a raw command line into a command plus an ordered list of
//! classified arguments. Quoting and escaping are honored; malformed input
//! never fails, it degrades to a best-effort partial parse.

use std::collections::HashSet;

/// Classification of a single parsed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    /// The command's primary subject (first non-flag token), or a later
    /// standalone positional argument.
    Verb,
    /// A token starting with `-`/`--` that does not take a value.
    Flag,
    /// A token starting with `-`/`--` that is followed by a value.
    Parameter,
    /// The value bound to the preceding [`ArgKind::Parameter`], with a
    /// back-link to that parameter's index in [`ParsedCommand::args`].
    ParameterValue { parameter_index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArg {
    pub text: String,
    pub kind: ArgKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedCommand {
    pub command: Option<String>,
    pub args: Vec<ParsedArg>,
}

impl ParsedCommand {
    /// Re-serializes this parse back into a normalized command line, used to
    /// check parser idempotency (`parse(parse(line).canonical()) == parse(line)`).
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(cmd) = &self.command {
            out.push_str(cmd);
        }
        for arg in &self.args {
            if !out.is_empty() {
                out.push(' ');
            }
            if arg.text.contains(char::is_whitespace) {
                out.push('"');
                out.push_str(&arg.text.replace('\\', "\\\\").replace('"', "\\\""));
                out.push('"');
            } else {
                out.push_str(&arg.text);
            }
        }
        out
    }
}

/// What kind of token the parser expects to complete next, given the current
/// tail of a partially typed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    ParameterValue,
    Verb,
    Flag,
}

/// Hints a caller may supply about command-specific argument schemas. The
/// core treats these as opaque: it has no built-in knowledge of any
/// particular command's flags.
#[derive(Debug, Clone, Default)]
pub struct ParseHints<'a> {
    /// Flags known to never take a value.
    pub known_pure_flags: &'a HashSet<String>,
    /// Flags known to always take a value.
    pub known_value_flags: &'a HashSet<String>,
}

/// Tokenize `line` respecting single/double quotes and backslash escapes.
///
/// Inside double quotes, `\"` becomes `"` and `\\` becomes `\`; every other
/// backslash pair is preserved literally so Windows-style paths such as
/// `D:\source\x` survive untouched. Single quotes suppress all escaping.
/// Unterminated quotes close implicitly at end of input (best-effort parse).
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut have_token = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {
                if have_token {
                    tokens.push(std::mem::take(&mut current));
                    have_token = false;
                }
            }
            '\'' => {
                have_token = true;
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '"' => {
                have_token = true;
                while let Some(&inner) = chars.peek() {
                    if inner == '"' {
                        chars.next();
                        break;
                    }
                    if inner == '\\' {
                        chars.next();
                        match chars.peek() {
                            Some('"') => {
                                current.push('"');
                                chars.next();
                            }
                            Some('\\') => {
                                current.push('\\');
                                chars.next();
                            }
                            _ => current.push('\\'),
                        }
                        continue;
                    }
                    current.push(inner);
                    chars.next();
                }
            }
            other => {
                have_token = true;
                current.push(other);
            }
        }
    }
    if have_token {
        tokens.push(current);
    }
    tokens
}

fn is_flag_like(token: &str) -> bool {
    token.starts_with('-') && token.len() > 1
}

/// Parse `line` into a command plus classified arguments, using default
/// heuristics (no caller-registered flag schema).
pub fn parse(line: &str) -> ParsedCommand {
    parse_with_hints(line, &ParseHints::default())
}

/// Parse `line`, consulting `hints` for flags known to be pure or
/// value-taking. Unregistered flags fall back to heuristic (b) from the
/// component design: a flag candidate followed by a non-flag token is
/// treated as a value-taking Parameter.
pub fn parse_with_hints(line: &str, hints: &ParseHints<'_>) -> ParsedCommand {
    let tokens = tokenize(line);
    let mut parsed = ParsedCommand::default();
    if tokens.is_empty() {
        return parsed;
    }

    let mut iter = tokens.into_iter().peekable();
    parsed.command = iter.next();

    let mut seen_verb = false;
    while let Some(token) = iter.next() {
        if let Some((name, value)) = split_inline_value(&token) {
            let param_index = parsed.args.len();
            parsed.args.push(ParsedArg {
                text: name,
                kind: ArgKind::Parameter,
            });
            parsed.args.push(ParsedArg {
                text: value,
                kind: ArgKind::ParameterValue {
                    parameter_index: param_index,
                },
            });
            continue;
        }

        if is_flag_like(&token) {
            let is_pure = hints.known_pure_flags.contains(&token);
            let is_value_taking = hints.known_value_flags.contains(&token);
            let next_is_value = iter
                .peek()
                .map(|next| !is_flag_like(next))
                .unwrap_or(false);

            if !is_pure && next_is_value && (is_value_taking || !is_pure) {
                let param_index = parsed.args.len();
                parsed.args.push(ParsedArg {
                    text: token,
                    kind: ArgKind::Parameter,
                });
                if let Some(value) = iter.next() {
                    parsed.args.push(ParsedArg {
                        text: value,
                        kind: ArgKind::ParameterValue { parameter_index },
                    });
                }
            } else {
                parsed.args.push(ParsedArg {
                    text: token,
                    kind: ArgKind::Flag,
                });
            }
            continue;
        }

        parsed.args.push(ParsedArg {
            text: token,
            kind: ArgKind::Verb,
        });
        seen_verb = true;
    }
    let _ = seen_verb;

    parsed
}

fn split_inline_value(token: &str) -> Option<(String, String)> {
    if !token.starts_with("--") {
        return None;
    }
    let eq = token.find('=')?;
    let (name, value) = token.split_at(eq);
    Some((name.to_string(), value[1..].to_string()))
}

/// Given the tail of a partially typed command line, determine what kind of
/// token should complete next.
pub fn determine_expected_type(line: &str) -> ExpectedType {
    let parsed = parse(line);
    let ends_with_space = line.ends_with(char::is_whitespace);

    if parsed.command.is_none() {
        return ExpectedType::Verb;
    }

    if let Some(last) = parsed.args.last() {
        if matches!(last.kind, ArgKind::Parameter) && ends_with_space {
            return ExpectedType::ParameterValue;
        }
    } else if ends_with_space {
        return ExpectedType::Verb;
    }

    ExpectedType::Flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_double_quoted_escapes() {
        let tokens = tokenize(r#"git commit -m "hello \"world\"""#);
        assert_eq!(tokens, vec!["git", "commit", "-m", "hello \"world\""]);
    }

    #[test]
    fn preserves_windows_backslash_paths() {
        let tokens = tokenize(r#"cd "D:\source\x""#);
        assert_eq!(tokens, vec!["cd", r"D:\source\x"]);
    }

    #[test]
    fn single_quotes_suppress_escapes() {
        let tokens = tokenize(r"echo 'a\nb'");
        assert_eq!(tokens, vec!["echo", r"a\nb"]);
    }

    #[test]
    fn unterminated_quote_closes_at_end() {
        let tokens = tokenize(r#"echo "unterminated"#);
        assert_eq!(tokens, vec!["echo", "unterminated"]);
    }

    #[test]
    fn classifies_verb_and_flags() {
        let parsed = parse("git commit -m first --amend");
        assert_eq!(parsed.command.as_deref(), Some("git"));
        assert_eq!(parsed.args[0].kind, ArgKind::Verb);
        assert_eq!(parsed.args[0].text, "commit");
        assert_eq!(parsed.args[1].kind, ArgKind::Parameter);
        assert_eq!(parsed.args[1].text, "-m");
        assert_eq!(
            parsed.args[2].kind,
            ArgKind::ParameterValue { parameter_index: 1 }
        );
        assert_eq!(parsed.args[3].kind, ArgKind::Flag);
    }

    #[test]
    fn splits_inline_equals_value() {
        let parsed = parse("scoop install --arch=64bit app");
        let eq_param = parsed
            .args
            .iter()
            .find(|a| a.text == "--arch")
            .expect("param present");
        assert_eq!(eq_param.kind, ArgKind::Parameter);
        let value = parsed
            .args
            .iter()
            .find(|a| a.text == "64bit")
            .expect("value present");
        assert!(matches!(value.kind, ArgKind::ParameterValue { .. }));
    }

    #[test]
    fn pure_flag_hint_is_respected() {
        let pure: HashSet<String> = ["--amend".to_string()].into_iter().collect();
        let value_flags = HashSet::new();
        let hints = ParseHints {
            known_pure_flags: &pure,
            known_value_flags: &value_flags,
        };
        let parsed = parse_with_hints("git commit --amend first", &hints);
        let amend = parsed.args.iter().find(|a| a.text == "--amend").unwrap();
        assert_eq!(amend.kind, ArgKind::Flag);
    }

    #[test]
    fn parse_is_idempotent_on_canonical_form() {
        let line = "git commit -m first --amend";
        let first = parse(line);
        let second = parse(&first.canonical());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_line_parses_to_empty_command() {
        let parsed = parse("   ");
        assert!(parsed.command.is_none());
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn expects_verb_before_any_command() {
        assert_eq!(determine_expected_type(""), ExpectedType::Verb);
    }

    #[test]
    fn expects_parameter_value_after_value_taking_flag() {
        assert_eq!(
            determine_expected_type("git commit -m "),
            ExpectedType::ParameterValue
        );
    }
}
