//! Static checks run before a dry run.
//!
//! Errors abort the dry run; warnings are reported and the walk proceeds.

use std::collections::HashSet;
use std::fmt;

use super::expand::Expander;
use super::stmt::{Directive, LineType, ParsedLine, Script};
use crate::keybind::Keymap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub line: usize,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.severity, self.message)
    }
}

/// Check `script` against the scope in `expander`.  Issues come back
/// ordered by line number.
pub fn validate_script(script: &Script, expander: &Expander) -> Vec<Issue> {
    let mut v = Validator {
        script,
        expander,
        keymap: Keymap::new(),
        issues: Vec::new(),
        reported: HashSet::new(),
    };
    v.lines(&script.lines, false, false);
    let mut names: Vec<&String> = script.functions.keys().collect();
    names.sort();
    for name in names {
        v.lines(&script.functions[name].body, true, false);
    }
    v.issues.sort_by_key(|i| (i.line, i.severity));
    v.issues
}

/// Returns `true` when `issues` contains an error.
pub fn has_errors(issues: &[Issue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}

struct Validator<'a> {
    script: &'a Script,
    expander: &'a Expander,
    keymap: Keymap,
    issues: Vec<Issue>,
    reported: HashSet<(usize, String)>,
}

impl Validator<'_> {
    fn push(&mut self, line: usize, severity: Severity, message: String) {
        self.issues.push(Issue { line, severity, message });
    }

    fn lines(&mut self, lines: &[ParsedLine], in_function: bool, breakable: bool) {
        for line in lines {
            self.line(line, in_function, breakable);
        }
    }

    fn line(&mut self, line: &ParsedLine, in_function: bool, breakable: bool) {
        match line.line_type {
            LineType::Empty | LineType::Comment => {}
            LineType::Text | LineType::VariableAssign => {
                self.references(line.line_number, &line.trimmed, in_function);
            }
            LineType::Directive | LineType::Conditional => match &line.directive {
                None => self.push(
                    line.line_number,
                    Severity::Error,
                    "directive line has no parsed directive".to_owned(),
                ),
                Some(d) => self.directive(line.line_number, d, in_function, breakable),
            },
        }
    }

    fn directive(&mut self, n: usize, d: &Directive, in_function: bool, breakable: bool) {
        for text in directive_texts(d) {
            self.references(n, text, in_function);
        }

        match d {
            Directive::Key { name } if !self.keymap.is_known(name) => {
                self.push(n, Severity::Error, format!("unknown key '{name}'"));
            }
            Directive::Call { name, .. } if !self.script.functions.contains_key(name) => {
                self.push(
                    n,
                    Severity::Warning,
                    format!("call to undefined function '{name}' (unless an include defines it)"),
                );
            }
            Directive::Break if !breakable => {
                self.push(
                    n,
                    Severity::Warning,
                    "<break> outside retry, repeat, while or switch has no effect".to_owned(),
                );
            }
            _ => {}
        }

        let inner_breakable = breakable || d.kind().is_breakable();
        match d {
            Directive::Switch { cases, default_case, .. } => {
                for case in cases {
                    self.lines(&case.body, in_function, true);
                }
                if let Some(body) = default_case {
                    self.lines(body, in_function, true);
                }
            }
            _ => {
                for block in d.blocks() {
                    self.lines(block, in_function, inner_breakable);
                }
            }
        }
    }

    fn references(&mut self, n: usize, text: &str, in_function: bool) {
        for name in self.expander.plain_references(text) {
            if self.expander.is_set(&name)
                || self.script.metadata.variables.contains(&name)
                || (in_function && name.bytes().all(|b| b.is_ascii_digit()))
            {
                continue;
            }
            if self.reported.insert((n, name.clone())) {
                self.push(n, Severity::Warning, format!("variable '{name}' is not set"));
            }
        }
    }
}

/// Free-text fields of a directive that undergo expansion at run time.
fn directive_texts(d: &Directive) -> Vec<&str> {
    match d {
        Directive::Watch { text, .. }
        | Directive::IfFound { text, .. }
        | Directive::IfNotFound { text, .. }
        | Directive::WhileFound { text, .. }
        | Directive::WhileNotFound { text, .. } => vec![text.as_str()],
        Directive::Include { path } | Directive::Screenshot { path, .. } => vec![path.as_str()],
        Directive::Set { value, .. } => vec![value.as_str()],
        Directive::Call { args, .. } => args.iter().map(String::as_str).collect(),
        Directive::Switch { cases, .. } => cases.iter().map(|c| c.pattern.as_str()).collect(),
        _ => Vec::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
