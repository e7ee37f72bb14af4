//! Variable expansion with bash-like substitution forms.
//!
//! | Sequence           | Meaning                                                   |
//! |--------------------|-----------------------------------------------------------|
//! | `\$`               | Literal `$`                                               |
//! | `${NAME:+value}`   | `value` if NAME is set and non-empty, otherwise nothing   |
//! | `${NAME:=default}` | NAME, or `default` (expanded and stored into NAME)        |
//! | `${NAME:-default}` | NAME, or `default` (not stored)                           |
//! | `$NAME`, `${NAME}` | NAME, or the empty string when unset                      |
//! | `$1`, `${2}`       | Positional parameter inside a function call               |
//! | `{NAME}`           | Clock pseudo-variable or NAME; left as-is when unresolved |
//!
//! The passes run in exactly the order of the table.  Each pass sees the
//! output of the previous one, so a `:-` default that itself mentions
//! `$OTHER` is resolved by the plain-variable pass.
//!
//! Lookup precedence is overrides, then script variables, then the
//! environment.  [`Expander::set`] only ever writes script variables.

use std::sync::Arc;

use regex::{Captures, Regex};

use crate::var::VarStore;

/// Placeholder for an escaped `$` while the substitution passes run.
const ESCAPED_DOLLAR: char = '\u{E000}';

/// Clock-derived names understood by the `{NAME}` form.
pub const CLOCK_VARIABLES: &[&str] = &["timestamp", "date", "time", "datetime", "unix"];

const NAME: &str = r"[A-Za-z_][A-Za-z0-9_]*|[0-9]+";

/// Compiled substitution patterns, shared by every copy of an expander.
#[derive(Debug)]
struct ExpandPatterns {
    use_alternate: Regex,
    assign_default: Regex,
    use_default: Regex,
    plain: Regex,
    brace: Regex,
    assignment: Regex,
}

impl ExpandPatterns {
    fn new() -> Self {
        let re = |src: String| Regex::new(&src).expect("static expansion pattern");
        ExpandPatterns {
            use_alternate: re(format!(r"\$\{{({NAME}):\+([^}}]*)\}}")),
            assign_default: re(format!(r"\$\{{({NAME}):=([^}}]*)\}}")),
            use_default: re(format!(r"\$\{{({NAME}):-([^}}]*)\}}")),
            plain: re(format!(r"\$\{{({NAME})\}}|\$({NAME})")),
            brace: re(r"\{([A-Za-z_][A-Za-z0-9_]*)\}".to_owned()),
            assignment: re(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$".to_owned()),
        }
    }
}

/// Scoped variable storage plus text substitution.
///
/// Cloning an `Expander` copies all three layers by value; the copy and the
/// original evolve independently afterwards.
#[derive(Debug, Clone)]
pub struct Expander {
    env: VarStore,
    vars: VarStore,
    overrides: VarStore,
    patterns: Arc<ExpandPatterns>,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

impl Expander {
    /// An expander with no environment layer.
    pub fn new() -> Self {
        Self::with_layers(VarStore::new(), VarStore::new())
    }

    /// An expander whose environment layer is the current process environment.
    pub fn from_env() -> Self {
        Self::with_layers(VarStore::from_env(), VarStore::new())
    }

    pub fn with_layers(env: VarStore, overrides: VarStore) -> Self {
        Expander {
            env,
            vars: VarStore::new(),
            overrides,
            patterns: Arc::new(ExpandPatterns::new()),
        }
    }

    /// Resolve `name` through overrides, script variables and environment.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.overrides
            .get(name)
            .or_else(|| self.vars.get(name))
            .or_else(|| self.env.get(name))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind a script variable.  Overrides of the same name still win on lookup.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.set(name, value);
    }

    pub fn set_override(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides.set(name, value);
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.set(name, value);
    }

    /// Script variables bound so far (not overrides or environment).
    pub fn variables(&self) -> &VarStore {
        &self.vars
    }

    /// A value copy of this scope with `args` bound as `$1..$n` overrides.
    pub fn scoped_copy(&self, args: &[String]) -> Expander {
        let mut scope = self.clone();
        for (i, arg) in args.iter().enumerate() {
            scope.overrides.set((i + 1).to_string(), arg.clone());
        }
        scope
    }

    /// Apply every substitution pass to `text`.
    pub fn expand(&mut self, text: &str) -> String {
        if !text.contains('$') && !text.contains('{') {
            return text.to_owned();
        }
        let protected = text.replace("\\$", &ESCAPED_DOLLAR.to_string());
        self.substitute(&protected).replace(ESCAPED_DOLLAR, "$")
    }

    /// Passes 2-6 over text whose escaped dollars are already protected.
    /// Values taken from variables come back protected too, so a later pass
    /// never expands a `$` that a variable holds.
    fn substitute(&mut self, protected: &str) -> String {
        let pats = Arc::clone(&self.patterns);

        let s = pats.use_alternate.replace_all(protected, |caps: &Captures| {
            if self.non_empty(&caps[1]) {
                caps[2].to_owned()
            } else {
                String::new()
            }
        });

        let s = pats.assign_default.replace_all(&s, |caps: &Captures| {
            let name = &caps[1];
            match self.get(name) {
                Some(v) if !v.is_empty() => protect(v),
                _ => {
                    let value = self.substitute(&caps[2]);
                    self.set(name, value.replace(ESCAPED_DOLLAR, "$"));
                    value
                }
            }
        });

        let s = pats.use_default.replace_all(&s, |caps: &Captures| {
            match self.get(&caps[1]) {
                Some(v) if !v.is_empty() => protect(v),
                _ => caps[2].to_owned(),
            }
        });

        let s = pats.plain.replace_all(&s, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            self.get(name).unwrap_or("").to_owned()
        });

        let s = pats.brace.replace_all(&s, |caps: &Captures| {
            let name = &caps[1];
            clock_variable(name)
                .or_else(|| self.get(name).map(str::to_owned))
                .unwrap_or_else(|| caps[0].to_owned())
        });

        s.into_owned()
    }

    /// Match `NAME=VALUE` and expand VALUE against the current scope.
    ///
    /// One pair of surrounding double quotes is stripped from VALUE before
    /// expansion.  Returns `None` when `line` is not an assignment.
    pub fn parse_assignment(&mut self, line: &str) -> Option<(String, String)> {
        let caps = self.patterns.assignment.captures(line.trim())?;
        let name = caps[1].to_owned();
        let raw = strip_quotes(&caps[2]).to_owned();
        let value = self.expand(&raw);
        Some((name, value))
    }

    /// Returns `true` when `line` has the `NAME=VALUE` shape.
    pub fn is_assignment(&self, line: &str) -> bool {
        self.patterns.assignment.is_match(line.trim())
    }

    /// Names referenced by plain `$NAME` / `${NAME}` forms in `text`.
    ///
    /// Escaped dollars and the `:+`/`:=`/`:-` forms are not reported, since
    /// those already handle the unset case.
    pub fn plain_references(&self, text: &str) -> Vec<String> {
        let protected = text.replace("\\$", "");
        let stripped = self.patterns.use_alternate.replace_all(&protected, "");
        let stripped = self.patterns.assign_default.replace_all(&stripped, "");
        let stripped = self.patterns.use_default.replace_all(&stripped, "");
        self.patterns
            .plain
            .captures_iter(&stripped)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_owned())
            .collect()
    }

    fn non_empty(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }
}

fn protect(value: &str) -> String {
    value.replace('$', &ESCAPED_DOLLAR.to_string())
}

/// Strip one pair of surrounding double quotes.
pub fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn clock_variable(name: &str) -> Option<String> {
    let now = chrono::Local::now();
    let value = match name {
        "timestamp" => now.format("%Y%m%d_%H%M%S").to_string(),
        "date" => now.format("%Y-%m-%d").to_string(),
        "time" => now.format("%H:%M:%S").to_string(),
        "datetime" => now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "unix" => now.timestamp().to_string(),
        _ => return None,
    };
    Some(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
