use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Matches a SQLCMD batch separator line.
fn batch_separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[ \t]*(?i:GO)[ \t]*;?[ \t]*$").unwrap())
}

/// Matches a `$(name)` variable reference.
fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\((\w+)\)").unwrap())
}

/// Minimal SQLCMD-style preprocessor: splits a script into batches on `GO`
/// separator lines and substitutes `$(name)` variable references.
/// References to undefined variables are left in place.
pub(crate) struct Preprocessor<'a> {
    variables: Vec<(&'a str, &'a str)>,
}

impl<'a> Preprocessor<'a> {
    pub(crate) fn new() -> Preprocessor<'a> {
        Preprocessor {
            variables: Vec::new(),
        }
    }

    pub(crate) fn define(mut self, name: &'a str, value: &'a str) -> Preprocessor<'a> {
        self.variables.push((name, value));
        self
    }

    /// Split `text` into its non-blank batches.
    pub(crate) fn process(&self, text: &str) -> Vec<String> {
        let mut batches = Vec::new();
        let mut current = String::new();
        for line in text.lines() {
            if batch_separator_re().is_match(line) {
                flush(&mut batches, &mut current);
            } else {
                current.push_str(&self.substitute(line));
                current.push('\n');
            }
        }
        flush(&mut batches, &mut current);
        batches
    }

    fn substitute(&self, line: &str) -> String {
        variable_re()
            .replace_all(line, |caps: &Captures<'_>| {
                // SQLCMD variable names are case-insensitive
                match self
                    .variables
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&caps[1]))
                {
                    Some((_, value)) => (*value).to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn flush(batches: &mut Vec<String>, current: &mut String) {
    if current.trim().is_empty() {
        current.clear();
    } else {
        batches.push(std::mem::take(current));
    }
}
