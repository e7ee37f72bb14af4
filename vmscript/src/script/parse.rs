//! Script parser: line classification and recursive block extraction.
//!
//! Parsing is a single forward pass over the source lines.  Directives that
//! own a body pull it out of the line stream on the spot and hand back the
//! index where the enclosing scan should resume, so nesting needs no
//! separate tree-building phase.
//!
//! Two body shapes exist:
//!
//! - **Implicit** (`retry`, `repeat`, `while-found`, `while-not-found`,
//!   `if-found`, `if-not-found`): the body is every following line up to a
//!   blank line, a comment, or the next `<...>` directive.  If-blocks may
//!   contain one `<else>` and may be closed early with `<end-if>`.  A blank
//!   line can therefore never be part of such a body.
//! - **Explicit** (`switch`, `function`): the body runs to `<end-switch>` /
//!   `<end-function>` and may itself contain any directive, including other
//!   block directives.

use std::collections::HashMap;

use thiserror::Error;

use super::directive::{DirectiveError, DirectivePatterns};
use super::expand::Expander;
use super::stmt::{
    Directive, DirectiveType, Function, LineType, ParsedLine, Script, ScriptMetadata, SwitchCase,
};

// ── Errors ────────────────────────────────────────────────────────────────────

/// A fatal parse error.  Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown directive <{text}>")]
    UnknownDirective { line: usize, text: String },
    #[error("line {line}: invalid directive <{text}>: {message}")]
    Malformed { line: usize, text: String, message: String },
    #[error("line {line}: function '{name}' is missing <end-function>")]
    UnterminatedFunction { line: usize, name: String },
    #[error("line {line}: <switch> is missing <end-switch>")]
    UnterminatedSwitch { line: usize },
    #[error("line {line}: function '{name}' already defined at line {first}")]
    DuplicateFunction { line: usize, name: String, first: usize },
    #[error("line {line}: function '{name}' must be defined at top level")]
    NestedFunction { line: usize, name: String },
    #[error("line {line}: unexpected <{text}>")]
    Unexpected { line: usize, text: String },
    #[error("line {line}: {message}")]
    Switch { line: usize, message: String },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::UnknownDirective { line, .. }
            | ParseError::Malformed { line, .. }
            | ParseError::UnterminatedFunction { line, .. }
            | ParseError::UnterminatedSwitch { line }
            | ParseError::DuplicateFunction { line, .. }
            | ParseError::NestedFunction { line, .. }
            | ParseError::Unexpected { line, .. }
            | ParseError::Switch { line, .. } => *line,
        }
    }
}

// ── Regions ───────────────────────────────────────────────────────────────────

/// Where [`Parser::parse_region`] is scanning; decides which markers end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    TopLevel,
    Function,
    Case,
}

impl Region {
    fn ends_at(self, kind: DirectiveType) -> bool {
        match self {
            Region::TopLevel => false,
            Region::Function => kind == DirectiveType::EndFunction,
            Region::Case => matches!(
                kind,
                DirectiveType::Case
                    | DirectiveType::Default
                    | DirectiveType::EndCase
                    | DirectiveType::EndSwitch
            ),
        }
    }
}

/// Markers that are only legal where some enclosing construct consumes them.
fn is_stray_marker(kind: DirectiveType) -> bool {
    matches!(
        kind,
        DirectiveType::Else
            | DirectiveType::Case
            | DirectiveType::Default
            | DirectiveType::EndCase
            | DirectiveType::EndSwitch
            | DirectiveType::EndFunction
    )
}

/// State accumulated across the whole parse.
#[derive(Debug, Default)]
struct ParseState {
    functions: HashMap<String, Function>,
    metadata: ScriptMetadata,
}

impl ParseState {
    fn count(&mut self, line: &ParsedLine) {
        let m = &mut self.metadata;
        match line.line_type {
            LineType::Text => m.text_lines += 1,
            LineType::VariableAssign => m.assignment_lines += 1,
            LineType::Directive | LineType::Conditional => m.directive_lines += 1,
            LineType::Comment => m.comment_lines += 1,
            LineType::Empty => m.empty_lines += 1,
        }
        if let Some(vars) = &line.variables {
            m.variables.extend(vars.keys().cloned());
        }
        if let Some(Directive::Set { name, .. }) = &line.directive {
            m.variables.insert(name.clone());
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Turns script text into a [`Script`].
///
/// The parser owns a parse-time [`Expander`]: assignments seen during the
/// scan are bound into it so that `expanded` text of later lines reflects
/// them.  Execution re-expands against the runtime scope.
#[derive(Debug)]
pub struct Parser {
    patterns: DirectivePatterns,
    expander: Expander,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::with_expander(Expander::new())
    }

    pub fn with_expander(expander: Expander) -> Self {
        Parser { patterns: DirectivePatterns::new(), expander }
    }

    pub fn expander(&self) -> &Expander {
        &self.expander
    }

    pub fn into_expander(self) -> Expander {
        self.expander
    }

    /// Parse a complete script.
    pub fn parse(&mut self, src: &str) -> Result<Script, ParseError> {
        let raw: Vec<&str> = src.lines().collect();
        let mut state = ParseState::default();
        let (lines, _) = self.parse_region(&raw, 0, Region::TopLevel, &mut state)?;

        let mut metadata = state.metadata;
        metadata.total_lines = raw.len();
        metadata.functions = state.functions.keys().cloned().collect();

        Ok(Script { lines, functions: state.functions, metadata })
    }

    /// Classify a single (already trimmed) line.
    pub fn classify_line(&self, trimmed: &str) -> LineType {
        if trimmed.is_empty() {
            LineType::Empty
        } else if trimmed.starts_with('#') {
            LineType::Comment
        } else if self.expander.is_assignment(trimmed) {
            LineType::VariableAssign
        } else if trimmed.starts_with("\\<") {
            LineType::Text
        } else if is_directive_text(trimmed) {
            let content = directive_content(trimmed);
            if ["&&", "||", "if-found", "if-not-found"].iter().any(|k| content.contains(k)) {
                LineType::Conditional
            } else {
                LineType::Directive
            }
        } else {
            LineType::Text
        }
    }

    /// Parse one source line without looking at its neighbours.
    fn parse_line(&mut self, line_number: usize, original: &str) -> Result<ParsedLine, ParseError> {
        let trimmed = original.trim();
        let line_type = self.classify_line(trimmed);
        let mut line = ParsedLine::plain(line_number, original, line_type);

        match line_type {
            LineType::Empty | LineType::Comment => {}
            LineType::Text => {
                if let Some(unescaped) = trimmed.strip_prefix('\\').filter(|t| t.starts_with('<')) {
                    line.trimmed = unescaped.to_owned();
                }
                line.expanded = self.expander.expand(&line.trimmed);
            }
            LineType::VariableAssign => {
                if let Some((name, value)) = self.expander.parse_assignment(trimmed) {
                    line.expanded = format!("{name}={value}");
                    self.expander.set(name.clone(), value.clone());
                    line.variables = Some(HashMap::from([(name, value)]));
                }
            }
            LineType::Directive | LineType::Conditional => {
                let content = directive_content(trimmed);
                let directive = self.patterns.parse(content).map_err(|e| match e {
                    DirectiveError::Unknown => ParseError::UnknownDirective {
                        line: line_number,
                        text: content.to_owned(),
                    },
                    DirectiveError::Malformed(message) => ParseError::Malformed {
                        line: line_number,
                        text: content.to_owned(),
                        message,
                    },
                })?;
                if let Directive::Set { name, value } = &directive {
                    let value = self.expander.expand(value);
                    self.expander.set(name.clone(), value);
                }
                line.expanded = self.expander.expand(trimmed);
                line.directive = Some(directive);
            }
        }
        Ok(line)
    }

    /// Directive kind of a raw line, if it is a directive line at all.
    fn peek_kind(&self, raw: &str) -> Option<DirectiveType> {
        let trimmed = raw.trim();
        if !is_directive_text(trimmed) || self.expander.is_assignment(trimmed) {
            return None;
        }
        self.patterns.parse(directive_content(trimmed)).ok().map(|d| d.kind())
    }

    /// Scan lines from `start` until the region's terminator (not consumed)
    /// or end of input.  Returns the collected lines and the stop index.
    fn parse_region(
        &mut self,
        raw: &[&str],
        start: usize,
        region: Region,
        state: &mut ParseState,
    ) -> Result<(Vec<ParsedLine>, usize), ParseError> {
        let mut lines = Vec::new();
        let mut i = start;

        while i < raw.len() {
            let line_number = i + 1;
            if let Some(kind) = self.peek_kind(raw[i]) {
                if region.ends_at(kind) {
                    return Ok((lines, i));
                }
            }

            let mut line = self.parse_line(line_number, raw[i])?;
            state.count(&line);

            if line.is_blank_or_comment() {
                if region == Region::TopLevel {
                    lines.push(line);
                }
                i += 1;
                continue;
            }

            let Some(directive) = line.directive.take() else {
                lines.push(line);
                i += 1;
                continue;
            };

            let kind = directive.kind();
            if is_stray_marker(kind) {
                return Err(ParseError::Unexpected {
                    line: line_number,
                    text: directive_content(line.trimmed.as_str()).to_owned(),
                });
            }

            match directive {
                Directive::Function { name } => {
                    if region != Region::TopLevel {
                        return Err(ParseError::NestedFunction { line: line_number, name });
                    }
                    i = self.extract_function(raw, i, name, state)?;
                }
                Directive::Switch { timeout, poll, .. } => {
                    let (cases, default_case, next) = self.extract_switch(raw, i, state)?;
                    line.directive = Some(Directive::Switch { timeout, poll, cases, default_case });
                    lines.push(line);
                    i = next;
                }
                d if kind.has_implicit_block() => {
                    let (d, next) = self.extract_implicit_block(raw, i + 1, d, state)?;
                    line.directive = Some(d);
                    lines.push(line);
                    i = next;
                }
                d => {
                    line.directive = Some(d);
                    lines.push(line);
                    i += 1;
                }
            }
        }
        Ok((lines, i))
    }

    /// Collect the implicit body of `owner`, starting at `start`.
    fn extract_implicit_block(
        &mut self,
        raw: &[&str],
        start: usize,
        owner: Directive,
        state: &mut ParseState,
    ) -> Result<(Directive, usize), ParseError> {
        let accepts_else = owner.kind().accepts_else();
        let mut block = Vec::new();
        let mut else_block = Vec::new();
        let mut in_else = false;
        let mut i = start;

        while i < raw.len() {
            let trimmed = raw[i].trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                break;
            }
            if is_directive_text(trimmed) && !self.expander.is_assignment(trimmed) {
                let kind = self.peek_kind(trimmed);
                if accepts_else && kind == Some(DirectiveType::Else) && !in_else {
                    let marker = self.parse_line(i + 1, raw[i])?;
                    state.count(&marker);
                    in_else = true;
                    i += 1;
                    continue;
                }
                if accepts_else && kind == Some(DirectiveType::EndIf) {
                    let marker = self.parse_line(i + 1, raw[i])?;
                    state.count(&marker);
                    i += 1;
                }
                break;
            }

            let line = self.parse_line(i + 1, raw[i])?;
            state.count(&line);
            if in_else {
                else_block.push(line);
            } else {
                block.push(line);
            }
            i += 1;
        }

        let directive = match owner {
            Directive::IfFound { text, timeout, .. } => {
                Directive::IfFound { text, timeout, block, else_block }
            }
            Directive::IfNotFound { text, timeout, .. } => {
                Directive::IfNotFound { text, timeout, block, else_block }
            }
            Directive::Retry { count, .. } => Directive::Retry { count, block },
            Directive::Repeat { count, .. } => Directive::Repeat { count, block },
            Directive::WhileFound { text, timeout, poll, .. } => {
                Directive::WhileFound { text, timeout, poll, block }
            }
            Directive::WhileNotFound { text, timeout, poll, .. } => {
                Directive::WhileNotFound { text, timeout, poll, block }
            }
            other => other,
        };
        Ok((directive, i))
    }

    /// Parse a `<function>` body.  `at` is the index of the `<function>` line.
    /// Returns the index after `<end-function>`.
    fn extract_function(
        &mut self,
        raw: &[&str],
        at: usize,
        name: String,
        state: &mut ParseState,
    ) -> Result<usize, ParseError> {
        let line = at + 1;
        if let Some(existing) = state.functions.get(&name) {
            return Err(ParseError::DuplicateFunction {
                line,
                name,
                first: *existing.lines.start(),
            });
        }

        let (body, end) = self.parse_region(raw, at + 1, Region::Function, state)?;
        if end >= raw.len() {
            return Err(ParseError::UnterminatedFunction { line, name });
        }
        let marker = self.parse_line(end + 1, raw[end])?;
        state.count(&marker);

        state
            .functions
            .insert(name.clone(), Function { name, body, lines: line..=end + 1 });
        Ok(end + 1)
    }

    /// Parse the cases of a `<switch>`.  `at` is the index of the `<switch>`
    /// line.  Returns the cases, the default body and the index after
    /// `<end-switch>`.
    #[allow(clippy::type_complexity)]
    fn extract_switch(
        &mut self,
        raw: &[&str],
        at: usize,
        state: &mut ParseState,
    ) -> Result<(Vec<SwitchCase>, Option<Vec<ParsedLine>>, usize), ParseError> {
        let switch_line = at + 1;
        let mut cases = Vec::new();
        let mut default_case: Option<Vec<ParsedLine>> = None;
        let mut i = at + 1;

        loop {
            if i >= raw.len() {
                return Err(ParseError::UnterminatedSwitch { line: switch_line });
            }
            let marker = self.parse_line(i + 1, raw[i])?;
            if marker.is_blank_or_comment() {
                state.count(&marker);
                i += 1;
                continue;
            }

            match &marker.directive {
                Some(Directive::EndSwitch) => {
                    state.count(&marker);
                    return Ok((cases, default_case, i + 1));
                }
                Some(Directive::Case { pattern }) => {
                    state.count(&marker);
                    let pattern = pattern.clone();
                    let (body, end) = self.extract_case_body(raw, i, state)?;
                    cases.push(SwitchCase { pattern, body, lines: i + 1..=end });
                    i = end;
                }
                Some(Directive::Default) => {
                    if default_case.is_some() {
                        return Err(ParseError::Switch {
                            line: i + 1,
                            message: format!("second <default> in <switch> at line {switch_line}"),
                        });
                    }
                    state.count(&marker);
                    let (body, end) = self.extract_case_body(raw, i, state)?;
                    default_case = Some(body);
                    i = end;
                }
                _ => {
                    return Err(ParseError::Switch {
                        line: i + 1,
                        message: format!(
                            "expected <case>, <default> or <end-switch> inside <switch>, found {:?}",
                            marker.trimmed
                        ),
                    });
                }
            }
        }
    }

    /// Body of a case starting after the marker at `at`.  Consumes a closing
    /// `<end-case>`; stops before the next `<case>`, `<default>` or
    /// `<end-switch>`.  Returns the body and the resume index.
    fn extract_case_body(
        &mut self,
        raw: &[&str],
        at: usize,
        state: &mut ParseState,
    ) -> Result<(Vec<ParsedLine>, usize), ParseError> {
        let (body, end) = self.parse_region(raw, at + 1, Region::Case, state)?;
        if end < raw.len() && self.peek_kind(raw[end]) == Some(DirectiveType::EndCase) {
            let marker = self.parse_line(end + 1, raw[end])?;
            state.count(&marker);
            return Ok((body, end + 1));
        }
        Ok((body, end))
    }
}

/// `<...>` shape (escaped directives excluded by the caller).
fn is_directive_text(trimmed: &str) -> bool {
    trimmed.len() >= 2 && trimmed.starts_with('<') && trimmed.ends_with('>')
}

/// Text between the angle brackets, trimmed.
fn directive_content(trimmed: &str) -> &str {
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
        .trim()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parse(src: &str) -> Script {
        Parser::new().parse(src).expect("parse failed")
    }

    fn parse_err(src: &str) -> ParseError {
        Parser::new().parse(src).expect_err("expected a parse error")
    }

    fn directive(line: &ParsedLine) -> &Directive {
        line.directive.as_ref().expect("directive")
    }

    #[test]
    fn empty_script() {
        let s = parse("");
        assert!(s.lines.is_empty());
        assert!(s.functions.is_empty());
    }

    #[test]
    fn classification_priority() {
        let p = Parser::new();
        assert_eq!(p.classify_line(""), LineType::Empty);
        assert_eq!(p.classify_line("# <enter>"), LineType::Comment);
        assert_eq!(p.classify_line("HOST=<x>"), LineType::VariableAssign);
        assert_eq!(p.classify_line("\\<enter>"), LineType::Text);
        assert_eq!(p.classify_line("<enter>"), LineType::Directive);
        assert_eq!(p.classify_line(r#"<if-found "x">"#), LineType::Conditional);
        assert_eq!(p.classify_line("ls -la"), LineType::Text);
        assert_eq!(p.classify_line("<<EOF"), LineType::Text);
    }

    #[test]
    fn escaped_directive_becomes_text() {
        let s = parse("\\<enter>");
        assert_eq!(s.lines[0].line_type, LineType::Text);
        assert_eq!(s.lines[0].trimmed, "<enter>");
        assert!(s.lines[0].directive.is_none());
    }

    #[test]
    fn top_level_keeps_comments_and_blanks() {
        let s = parse("# setup\n\nls");
        let types: Vec<LineType> = s.lines.iter().map(|l| l.line_type).collect();
        assert_eq!(types, vec![LineType::Comment, LineType::Empty, LineType::Text]);
        assert_eq!(s.metadata.total_lines, 3);
        assert_eq!(s.metadata.comment_lines, 1);
        assert_eq!(s.metadata.empty_lines, 1);
    }

    #[test]
    fn assignments_expand_at_parse_time() {
        let s = parse("USER=admin\nHOME_DIR=/home/$USER\necho $HOME_DIR");
        assert_eq!(s.lines[1].variables.as_ref().unwrap()["HOME_DIR"], "/home/admin");
        assert_eq!(s.lines[2].expanded, "echo /home/admin");
        assert!(s.metadata.variables.contains("USER"));
        assert!(s.metadata.variables.contains("HOME_DIR"));
    }

    #[test]
    fn function_definition() {
        let s = parse("<function greet>\necho $1\n<end-function>");
        assert!(s.lines.is_empty());
        assert_eq!(s.functions.len(), 1);
        let f = &s.functions["greet"];
        assert_eq!(f.body.len(), 1);
        assert_eq!(f.body[0].trimmed, "echo $1");
        assert_eq!(f.lines, 1..=3);
        assert!(s.metadata.functions.contains("greet"));
    }

    #[test]
    fn missing_end_function_names_the_function() {
        let err = parse_err("<function greet>\necho $1\n");
        assert_eq!(err, ParseError::UnterminatedFunction { line: 1, name: "greet".into() });
        assert!(err.to_string().contains("greet"));
    }

    #[test]
    fn duplicate_and_nested_functions() {
        let err = parse_err("<function a>\n<end-function>\n<function a>\n<end-function>");
        assert!(matches!(err, ParseError::DuplicateFunction { line: 3, first: 1, .. }));
        let err = parse_err("<function a>\n<function b>\n<end-function>\n<end-function>");
        assert!(matches!(err, ParseError::NestedFunction { line: 2, .. }));
    }

    #[test]
    fn retry_block_stops_at_blank_line() {
        let s = parse("<retry 3>\nsystemctl restart nginx\ncurl localhost\n\necho done");
        assert_eq!(s.lines.len(), 3);
        match directive(&s.lines[0]) {
            Directive::Retry { count, block } => {
                assert_eq!(*count, 3);
                assert_eq!(block.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.lines[1].line_type, LineType::Empty);
        assert_eq!(s.lines[2].trimmed, "echo done");
    }

    #[test]
    fn implicit_block_stops_at_comment_and_directive() {
        let s = parse("<repeat 2>\na\n# note\nb");
        assert!(matches!(directive(&s.lines[0]), Directive::Repeat { block, .. } if block.len() == 1));
        let s = parse("<repeat 2>\na\n<enter>\nb");
        assert!(matches!(directive(&s.lines[0]), Directive::Repeat { block, .. } if block.len() == 1));
        assert!(matches!(directive(&s.lines[1]), Directive::Key { .. }));
        assert_eq!(s.lines[2].trimmed, "b");
    }

    #[test]
    fn implicit_block_keeps_assignments_and_escaped_text() {
        let s = parse("<repeat 2>\nN=1\n\\<not a directive>\n");
        match directive(&s.lines[0]) {
            Directive::Repeat { block, .. } => {
                assert_eq!(block.len(), 2);
                assert_eq!(block[0].line_type, LineType::VariableAssign);
                assert_eq!(block[1].trimmed, "<not a directive>");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn if_found_with_else() {
        let s = parse("<if-found \"ok\" 5s>\ntext\n<else>\ntext2\n\nafter");
        match directive(&s.lines[0]) {
            Directive::IfFound { text, timeout, block, else_block } => {
                assert_eq!(text, "ok");
                assert_eq!(*timeout, Duration::from_secs(5));
                assert_eq!(block.len(), 1);
                assert_eq!(block[0].trimmed, "text");
                assert_eq!(else_block.len(), 1);
                assert_eq!(else_block[0].trimmed, "text2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.lines.last().unwrap().trimmed, "after");
        assert_eq!(s.lines[0].line_type, LineType::Conditional);
    }

    #[test]
    fn end_if_closes_block() {
        let s = parse("<if-not-found \"err\">\nok\n<end-if>\nnext");
        assert_eq!(s.lines.len(), 2);
        assert!(matches!(
            directive(&s.lines[0]),
            Directive::IfNotFound { block, else_block, .. } if block.len() == 1 && else_block.is_empty()
        ));
        assert_eq!(s.lines[1].trimmed, "next");
    }

    #[test]
    fn else_outside_if_is_an_error() {
        let err = parse_err("<retry 2>\na\n<else>\nb");
        assert!(matches!(err, ParseError::Unexpected { line: 3, .. }));
    }

    #[test]
    fn while_blocks() {
        let s = parse("<while-found \"Installing\" 10m poll 5s>\n<enter>");
        match directive(&s.lines[0]) {
            Directive::WhileFound { block, poll, .. } => {
                assert!(block.is_empty());
                assert_eq!(*poll, Some(Duration::from_secs(5)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn switch_with_cases_and_default() {
        let src = "\
<switch timeout=10s>
<case \"Ubuntu\">
apt-get update
<end-case>
# distro probe
<case \"Fedora\">
dnf check-update
<default>
echo unknown
<end-case>
<end-switch>
done";
        let s = parse(src);
        assert_eq!(s.lines.len(), 2);
        match directive(&s.lines[0]) {
            Directive::Switch { timeout, cases, default_case, .. } => {
                assert_eq!(*timeout, Some(Duration::from_secs(10)));
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].pattern, "Ubuntu");
                assert_eq!(cases[0].body.len(), 1);
                assert_eq!(cases[0].lines, 2..=4);
                assert_eq!(cases[1].pattern, "Fedora");
                assert_eq!(cases[1].body[0].trimmed, "dnf check-update");
                let default = default_case.as_ref().unwrap();
                assert_eq!(default[0].trimmed, "echo unknown");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.lines[1].trimmed, "done");
    }

    #[test]
    fn switch_case_bodies_nest_blocks() {
        let src = "\
<switch>
<case \"login:\">
<retry 2>
root

<break>
<end-case>
<end-switch>";
        let s = parse(src);
        match directive(&s.lines[0]) {
            Directive::Switch { cases, .. } => {
                let body = &cases[0].body;
                assert_eq!(body.len(), 2);
                assert!(matches!(directive(&body[0]), Directive::Retry { block, .. } if block.len() == 1));
                assert!(matches!(directive(&body[1]), Directive::Break));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unterminated_switch() {
        let err = parse_err("<switch>\n<case \"a\">\nx\n");
        assert_eq!(err, ParseError::UnterminatedSwitch { line: 1 });
    }

    #[test]
    fn junk_inside_switch() {
        let err = parse_err("<switch>\nls\n<end-switch>");
        assert!(matches!(err, ParseError::Switch { line: 2, .. }));
    }

    #[test]
    fn function_bodies_nest_blocks_and_switches() {
        let src = "\
<function login>
<watch \"login:\" 30s>
$1
<if-found \"Password:\">
$2

<switch>
<case \"$ \">
<return>
<end-switch>
<end-function>
<call login root secret>";
        let s = parse(src);
        let f = &s.functions["login"];
        let kinds: Vec<DirectiveType> = f
            .body
            .iter()
            .filter_map(|l| l.directive.as_ref().map(Directive::kind))
            .collect();
        assert_eq!(kinds, vec![DirectiveType::Watch, DirectiveType::IfFound, DirectiveType::Switch]);
        assert_eq!(f.body.len(), 4);
        assert!(matches!(
            directive(&s.lines[0]),
            Directive::Call { name, args } if name == "login" && args.len() == 2
        ));
    }

    #[test]
    fn unknown_directive_reports_line_and_text() {
        let err = parse_err("ls\n<frobnicate now>");
        assert_eq!(
            err,
            ParseError::UnknownDirective { line: 2, text: "frobnicate now".into() }
        );
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn malformed_directive() {
        let err = parse_err("<console 42>");
        assert!(matches!(err, ParseError::Malformed { line: 1, .. }));
    }

    #[test]
    fn set_directive_feeds_parse_time_scope() {
        let s = parse("<set TARGET=\"prod\">\ndeploy $TARGET");
        assert_eq!(s.lines[1].expanded, "deploy prod");
        assert!(s.metadata.variables.contains("TARGET"));
    }

    #[test]
    fn metadata_counts_nested_lines() {
        let s = parse("<retry 2>\na\nb\n<function f>\nc\n<end-function>");
        assert_eq!(s.metadata.text_lines, 3);
        assert_eq!(s.metadata.directive_lines, 3);
    }

    #[test]
    fn stray_end_if_is_kept() {
        let s = parse("<end-if>");
        assert!(matches!(directive(&s.lines[0]), Directive::EndIf));
    }
}
