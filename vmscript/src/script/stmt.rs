//! Parsed script data model.
//!
//! A script is a sequence of [`ParsedLine`]s.  Control directives that own
//! other lines (conditionals, loops, switch, functions) carry those lines
//! inside their [`Directive`] variant, so the tree is built in the same
//! single pass that classifies lines.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

// ── LineType ──────────────────────────────────────────────────────────────────

/// Classification of one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineType {
    /// Text typed into the VM followed by Enter.
    Text,
    /// `NAME=VALUE`.
    VariableAssign,
    /// `<...>` control directive.
    Directive,
    /// `<...>` directive that tests screen content (`if-found` and friends).
    Conditional,
    /// `# ...`.
    Comment,
    /// Blank or whitespace-only line.
    Empty,
}

impl fmt::Display for LineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineType::Text => "text",
            LineType::VariableAssign => "assignment",
            LineType::Directive => "directive",
            LineType::Conditional => "conditional",
            LineType::Comment => "comment",
            LineType::Empty => "empty",
        };
        f.write_str(name)
    }
}

// ── ParsedLine ────────────────────────────────────────────────────────────────

/// One classified source line.
///
/// `directive` is populated for [`LineType::Directive`] and
/// [`LineType::Conditional`]; `variables` for [`LineType::VariableAssign`];
/// neither for the other types.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// 1-based source line number.
    pub line_number: usize,
    pub original: String,
    pub trimmed: String,
    /// Text after parse-time expansion.  Text lines are expanded again at
    /// execution time, against the scope that is current then.
    pub expanded: String,
    pub line_type: LineType,
    pub directive: Option<Directive>,
    pub variables: Option<HashMap<String, String>>,
}

impl ParsedLine {
    /// A line with no directive and no variables.
    pub fn plain(line_number: usize, original: &str, line_type: LineType) -> Self {
        let trimmed = original.trim().to_owned();
        ParsedLine {
            line_number,
            original: original.to_owned(),
            expanded: trimmed.clone(),
            trimmed,
            line_type,
            directive: None,
            variables: None,
        }
    }

    /// Returns `true` for lines the executor skips.
    pub fn is_blank_or_comment(&self) -> bool {
        matches!(self.line_type, LineType::Empty | LineType::Comment)
    }
}

// ── Directive ─────────────────────────────────────────────────────────────────

/// Image encoding for `<screenshot>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Ppm,
    Png,
}

impl ImageFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ppm" | "pnm" => Some(ImageFormat::Ppm),
            "png" => Some(ImageFormat::Png),
            _ => None,
        }
    }

    /// Guess from a file extension, defaulting to PPM.
    pub fn from_path(path: &str) -> Self {
        path.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_name(ext))
            .unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Ppm => "ppm",
            ImageFormat::Png => "png",
        }
    }
}

/// A `<case "text">` region of a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub pattern: String,
    pub body: Vec<ParsedLine>,
    pub lines: RangeInclusive<usize>,
}

/// A parsed `<...>` directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `<enter>`, `<ctrl+c>`, `<ctrl-alt-del>` …
    Key { name: String },
    /// `<watch "text" 30s>`
    Watch { text: String, timeout: Option<Duration> },
    /// `<console 2>`
    Console { number: u8 },
    /// `<wait 5s>`
    Wait { duration: Duration },
    /// `<exit 3>`
    Exit { code: i32 },
    /// `<if-found "text" 5s>` followed by an implicit block.
    IfFound {
        text: String,
        timeout: Duration,
        block: Vec<ParsedLine>,
        else_block: Vec<ParsedLine>,
    },
    /// `<if-not-found "text" 5s>` followed by an implicit block.
    IfNotFound {
        text: String,
        timeout: Duration,
        block: Vec<ParsedLine>,
        else_block: Vec<ParsedLine>,
    },
    /// `<retry 3>` followed by an implicit block.
    Retry { count: u32, block: Vec<ParsedLine> },
    /// `<repeat 3>` followed by an implicit block.
    Repeat { count: u32, block: Vec<ParsedLine> },
    /// `<while-found "text" 60s poll 2s>`
    WhileFound {
        text: String,
        timeout: Duration,
        poll: Option<Duration>,
        block: Vec<ParsedLine>,
    },
    /// `<while-not-found "text" 60s poll 2s>`
    WhileNotFound {
        text: String,
        timeout: Duration,
        poll: Option<Duration>,
        block: Vec<ParsedLine>,
    },
    Else,
    EndIf,
    Return,
    /// `<switch timeout=30s poll=1s>` … `<end-switch>`
    Switch {
        timeout: Option<Duration>,
        poll: Option<Duration>,
        cases: Vec<SwitchCase>,
        default_case: Option<Vec<ParsedLine>>,
    },
    Case { pattern: String },
    Default,
    EndCase,
    EndSwitch,
    /// `<include "other.vms">`
    Include { path: String },
    /// `<screenshot "shot.png" png>`
    Screenshot { path: String, format: ImageFormat },
    /// `<function name>`.  The body is stored in [`Script::functions`].
    Function { name: String },
    EndFunction,
    /// `<call name arg1 "arg two">`
    Call { name: String, args: Vec<String> },
    Break,
    /// `<set NAME="value">`
    Set { name: String, value: String },
}

/// Field-less discriminant of [`Directive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveType {
    Key,
    Watch,
    Console,
    Wait,
    Exit,
    IfFound,
    IfNotFound,
    Retry,
    Repeat,
    WhileFound,
    WhileNotFound,
    Else,
    EndIf,
    Return,
    Switch,
    Case,
    Default,
    EndCase,
    EndSwitch,
    Include,
    Screenshot,
    Function,
    EndFunction,
    Call,
    Break,
    Set,
}

impl Directive {
    pub fn kind(&self) -> DirectiveType {
        match self {
            Directive::Key { .. } => DirectiveType::Key,
            Directive::Watch { .. } => DirectiveType::Watch,
            Directive::Console { .. } => DirectiveType::Console,
            Directive::Wait { .. } => DirectiveType::Wait,
            Directive::Exit { .. } => DirectiveType::Exit,
            Directive::IfFound { .. } => DirectiveType::IfFound,
            Directive::IfNotFound { .. } => DirectiveType::IfNotFound,
            Directive::Retry { .. } => DirectiveType::Retry,
            Directive::Repeat { .. } => DirectiveType::Repeat,
            Directive::WhileFound { .. } => DirectiveType::WhileFound,
            Directive::WhileNotFound { .. } => DirectiveType::WhileNotFound,
            Directive::Else => DirectiveType::Else,
            Directive::EndIf => DirectiveType::EndIf,
            Directive::Return => DirectiveType::Return,
            Directive::Switch { .. } => DirectiveType::Switch,
            Directive::Case { .. } => DirectiveType::Case,
            Directive::Default => DirectiveType::Default,
            Directive::EndCase => DirectiveType::EndCase,
            Directive::EndSwitch => DirectiveType::EndSwitch,
            Directive::Include { .. } => DirectiveType::Include,
            Directive::Screenshot { .. } => DirectiveType::Screenshot,
            Directive::Function { .. } => DirectiveType::Function,
            Directive::EndFunction => DirectiveType::EndFunction,
            Directive::Call { .. } => DirectiveType::Call,
            Directive::Break => DirectiveType::Break,
            Directive::Set { .. } => DirectiveType::Set,
        }
    }

    /// Nested line lists owned by this directive, in source order.
    pub fn blocks(&self) -> Vec<&[ParsedLine]> {
        match self {
            Directive::IfFound { block, else_block, .. }
            | Directive::IfNotFound { block, else_block, .. } => {
                vec![block.as_slice(), else_block.as_slice()]
            }
            Directive::Retry { block, .. }
            | Directive::Repeat { block, .. }
            | Directive::WhileFound { block, .. }
            | Directive::WhileNotFound { block, .. } => vec![block.as_slice()],
            Directive::Switch { cases, default_case, .. } => {
                let mut v: Vec<&[ParsedLine]> = cases.iter().map(|c| c.body.as_slice()).collect();
                if let Some(d) = default_case {
                    v.push(d.as_slice());
                }
                v
            }
            _ => Vec::new(),
        }
    }
}

impl DirectiveType {
    /// Directives whose body is collected up to a blank line, comment or
    /// the next directive.
    pub fn has_implicit_block(self) -> bool {
        matches!(
            self,
            DirectiveType::IfFound
                | DirectiveType::IfNotFound
                | DirectiveType::Retry
                | DirectiveType::Repeat
                | DirectiveType::WhileFound
                | DirectiveType::WhileNotFound
        )
    }

    /// Directives that may own an `<else>` branch.
    pub fn accepts_else(self) -> bool {
        matches!(self, DirectiveType::IfFound | DirectiveType::IfNotFound)
    }

    /// Bodies in which `<break>` ends the enclosing construct.
    pub fn is_breakable(self) -> bool {
        matches!(
            self,
            DirectiveType::Retry
                | DirectiveType::Repeat
                | DirectiveType::WhileFound
                | DirectiveType::WhileNotFound
                | DirectiveType::Switch
        )
    }
}

// ── Function / Script ─────────────────────────────────────────────────────────

/// A `<function NAME>` … `<end-function>` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub body: Vec<ParsedLine>,
    pub lines: RangeInclusive<usize>,
}

/// Summary counts and names gathered while parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptMetadata {
    pub total_lines: usize,
    pub text_lines: usize,
    pub directive_lines: usize,
    pub assignment_lines: usize,
    pub comment_lines: usize,
    pub empty_lines: usize,
    /// Names bound by `NAME=VALUE` or `<set>` anywhere in the script.
    pub variables: BTreeSet<String>,
    pub functions: BTreeSet<String>,
}

/// A fully parsed script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub lines: Vec<ParsedLine>,
    pub functions: HashMap<String, Function>,
    pub metadata: ScriptMetadata,
}

impl Script {
    /// Visit every line, including lines nested inside blocks and function
    /// bodies.  `in_function` tells whether the line belongs to a function.
    pub fn walk(&self, mut visit: impl FnMut(&ParsedLine, bool)) {
        fn walk_lines(lines: &[ParsedLine], in_function: bool, visit: &mut dyn FnMut(&ParsedLine, bool)) {
            for line in lines {
                visit(line, in_function);
                if let Some(d) = &line.directive {
                    for block in d.blocks() {
                        walk_lines(block, in_function, visit);
                    }
                }
            }
        }
        walk_lines(&self.lines, false, &mut visit);
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        for name in names {
            walk_lines(&self.functions[name].body, true, &mut visit);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_format_from_path() {
        assert_eq!(ImageFormat::from_path("shot.png"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_path("shot.PPM"), ImageFormat::Ppm);
        assert_eq!(ImageFormat::from_path("shot"), ImageFormat::Ppm);
        assert_eq!(ImageFormat::from_path("shot.jpg"), ImageFormat::Ppm);
    }

    #[test]
    fn plain_line_trims() {
        let l = ParsedLine::plain(3, "   ls -la  ", LineType::Text);
        assert_eq!(l.trimmed, "ls -la");
        assert_eq!(l.expanded, "ls -la");
        assert!(l.directive.is_none());
    }

    #[test]
    fn blocks_of_if() {
        let body = ParsedLine::plain(2, "a", LineType::Text);
        let d = Directive::IfFound {
            text: "x".into(),
            timeout: Duration::from_secs(5),
            block: vec![body.clone()],
            else_block: vec![body.clone(), body],
        };
        let blocks = d.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].len(), 1);
        assert_eq!(blocks[1].len(), 2);
        assert_eq!(d.kind(), DirectiveType::IfFound);
    }

    #[test]
    fn implicit_block_kinds() {
        assert!(DirectiveType::Retry.has_implicit_block());
        assert!(!DirectiveType::Switch.has_implicit_block());
        assert!(DirectiveType::IfNotFound.accepts_else());
        assert!(!DirectiveType::Retry.accepts_else());
    }
}
