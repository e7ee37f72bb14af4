//! Script executor.
//!
//! The [`Executor`] walks a parsed [`Script`] against an [`ExecutionMode`].
//! Text lines are typed, directives are dispatched, and screen-dependent
//! directives poll OCR captures through a [`ScreenTracker`].
//!
//! Before every executable line, at every nesting level, the global
//! deadline is checked and the debugger (if any) is consulted.  Errors from
//! a line are wrapped with its line number; nested blocks therefore produce
//! a chain such as `line 4: retry failed after 3 attempts: line 5: …`.
//!
//! Dry runs use the same walker: the mode narrates instead of acting, both
//! branches of a conditional and every case of a switch are visited, and
//! loops run their body once.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, debug_span, info, warn};

use super::expand::Expander;
use super::parse::{ParseError, Parser};
use super::stmt::{Directive, Function, ImageFormat, LineType, ParsedLine, Script, SwitchCase};
use super::validate::{has_errors, validate_script, Issue, Severity};
use crate::debugger::{DebugAction, DebugError, Debugger};
use crate::keybind::Keymap;
use crate::mode::{ExecutionMode, ModeError};
use crate::pattern::CaseMatcher;
use crate::screen::ScreenTracker;

/// Exit code reported when the global deadline passes.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when the debugger stops the script.
pub const EXIT_STOPPED: i32 = 130;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<ExecError>,
    },
    #[error("script timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("stopped from the debugger")]
    Stopped,
    #[error("unknown key '{0}'")]
    UnknownKey(String),
    #[error("undefined function '{0}'")]
    UndefinedFunction(String),
    #[error("text {text:?} did not appear within {timeout:?} (waited {elapsed:?})")]
    WatchTimeout { text: String, timeout: Duration, elapsed: Duration },
    #[error("text {text:?} still {state} after {elapsed:?} (timeout {timeout:?})")]
    WhileTimeout { text: String, state: &'static str, timeout: Duration, elapsed: Duration },
    #[error("retry failed after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<ExecError> },
    #[error("repeat failed on iteration {iteration} of {count}: {source}")]
    RepeatFailed {
        iteration: u32,
        count: u32,
        #[source]
        source: Box<ExecError>,
    },
    #[error("include cycle: {0} is already being executed")]
    IncludeCycle(PathBuf),
    #[error("cannot read {path}: {source}")]
    Include {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("in {path}: {source}")]
    IncludeParse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("directive line has no parsed directive")]
    MissingDirective,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Debugger(#[from] DebugError),
}

impl ExecError {
    fn at_line(self, line: usize) -> ExecError {
        match self {
            // Already positioned (a nested line) or not line-specific.
            e @ (ExecError::AtLine { .. } | ExecError::Timeout { .. } | ExecError::Stopped) => e,
            e => ExecError::AtLine { line, source: Box::new(e) },
        }
    }

    /// The innermost error under any line-number wrappers.
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::AtLine { source, .. } => source.root(),
            e => e,
        }
    }

    /// Errors that end the run no matter which construct they occur in.
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), ExecError::Timeout { .. } | ExecError::Stopped)
    }

    pub fn exit_code(&self) -> i32 {
        match self.root() {
            ExecError::Timeout { .. } => EXIT_TIMEOUT,
            ExecError::Stopped => EXIT_STOPPED,
            _ => 1,
        }
    }
}

// ── ControlFlow ───────────────────────────────────────────────────────────────

/// Non-error signals that unwind nested blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Leave the innermost retry, repeat, while or switch.
    Break,
    /// Leave the current function (or end the script at top level).
    Return,
    /// End the script with this code.
    Exit(i32),
}

// ── Settings / context / result ───────────────────────────────────────────────

/// Tunables that scripts do not spell out themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    /// Deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Interval between screen captures while polling.
    pub poll_interval: Duration,
    /// Pause between `<retry>` attempts.
    pub retry_delay: Duration,
    /// `<watch>` timeout when the directive gives none.
    pub watch_timeout: Duration,
    /// `<switch>` timeout when the directive gives none.
    pub switch_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        ExecutorSettings {
            timeout: None,
            poll_interval: Duration::from_millis(500),
            retry_delay: Duration::from_secs(1),
            watch_timeout: Duration::from_secs(30),
            switch_timeout: Duration::from_secs(30),
        }
    }
}

/// One active `<call>`.  The positional parameters themselves live in the
/// call's scoped [`Expander`].
#[derive(Debug, Clone)]
pub struct FunctionCallContext {
    pub name: String,
    pub args: Vec<String>,
    pub call_line: usize,
}

/// Mutable state of one run.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Line currently executing.
    pub line: usize,
    pub expander: Expander,
    pub call_stack: Vec<FunctionCallContext>,
    pub started: Instant,
    pub lines_executed: usize,
    functions: HashMap<String, Rc<Function>>,
    include_stack: Vec<PathBuf>,
    base_dir: PathBuf,
    /// Breakable constructs enclosing the current line within this frame.
    loop_depth: usize,
}

impl ExecutionContext {
    fn new(expander: Expander) -> Self {
        ExecutionContext {
            line: 0,
            expander,
            call_stack: Vec::new(),
            started: Instant::now(),
            lines_executed: 0,
            functions: HashMap::new(),
            include_stack: Vec::new(),
            base_dir: PathBuf::from("."),
            loop_depth: 0,
        }
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Outcome of [`Executor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub lines_executed: usize,
    pub duration: Duration,
    pub error: Option<String>,
    /// Validation findings (dry runs only).
    pub issues: Vec<Issue>,
}

// ── Executor ──────────────────────────────────────────────────────────────────

pub struct Executor<M: ExecutionMode> {
    mode: M,
    settings: ExecutorSettings,
    keymap: Keymap,
    screen: ScreenTracker,
    debugger: Option<Box<dyn Debugger>>,
    ctx: ExecutionContext,
}

impl<M: ExecutionMode> Executor<M> {
    pub fn new(mode: M, expander: Expander, settings: ExecutorSettings) -> Self {
        Executor {
            mode,
            settings,
            keymap: Keymap::new(),
            screen: ScreenTracker::new(),
            debugger: None,
            ctx: ExecutionContext::new(expander),
        }
    }

    pub fn with_debugger(mut self, debugger: Box<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Directory that relative `<include>` paths resolve against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ctx.base_dir = dir.into();
        self
    }

    /// Record `path` as the running script, for base directory and include
    /// cycle detection.
    pub fn with_script_path(mut self, path: &Path) -> Self {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            self.ctx.base_dir = dir.to_path_buf();
        }
        self.ctx.include_stack.push(canonical(path));
        self
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn into_mode(self) -> M {
        self.mode
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn expander(&self) -> &Expander {
        &self.ctx.expander
    }

    /// Run `script` to completion.
    pub fn execute(&mut self, script: &Script) -> ExecutionResult {
        self.ctx.started = Instant::now();
        self.ctx.lines_executed = 0;
        self.ctx.functions = script
            .functions
            .iter()
            .map(|(name, f)| (name.clone(), Rc::new(f.clone())))
            .collect();

        let mut issues = Vec::new();
        if self.mode.is_dry_run() {
            issues = validate_script(script, &self.ctx.expander);
            for issue in &issues {
                match issue.severity {
                    Severity::Error => warn!(line = issue.line, "{}", issue.message),
                    Severity::Warning => info!(line = issue.line, "{}", issue.message),
                }
            }
            if has_errors(&issues) {
                let summary: Vec<String> = issues
                    .iter()
                    .filter(|i| i.severity == Severity::Error)
                    .map(Issue::to_string)
                    .collect();
                let err = ExecError::Validation(summary.join("; "));
                return self.finish(Err(err), issues);
            }
        }

        let outcome = self.exec_block(&script.lines);
        self.finish(outcome, issues)
    }

    fn finish(&self, outcome: Result<Option<ControlFlow>, ExecError>, issues: Vec<Issue>) -> ExecutionResult {
        let duration = self.ctx.started.elapsed();
        let (exit_code, error) = match outcome {
            Ok(Some(ControlFlow::Exit(code))) => (code, None),
            Ok(_) => (0, None),
            Err(e) => {
                warn!(error = %e, "script failed");
                (e.exit_code(), Some(e.to_string()))
            }
        };
        info!(exit_code, lines = self.ctx.lines_executed, ?duration, "script finished");
        ExecutionResult {
            success: exit_code == 0 && error.is_none(),
            exit_code,
            lines_executed: self.ctx.lines_executed,
            duration,
            error,
            issues,
        }
    }

    // ── Walking ───────────────────────────────────────────────────────────────

    /// Execute lines in order until one yields a control-flow signal.
    pub fn exec_block(&mut self, lines: &[ParsedLine]) -> Result<Option<ControlFlow>, ExecError> {
        for line in lines {
            if let Some(cf) = self.exec_line(line)? {
                return Ok(Some(cf));
            }
        }
        Ok(None)
    }

    /// Execute one line: deadline, debugger, dispatch, bookkeeping.
    pub fn exec_line(&mut self, line: &ParsedLine) -> Result<Option<ControlFlow>, ExecError> {
        if line.is_blank_or_comment() {
            return Ok(None);
        }
        self.check_timeout()?;
        self.ctx.line = line.line_number;
        self.consult_debugger(line)?;

        let cf = self.dispatch(line).map_err(|e| e.at_line(line.line_number))?;
        self.ctx.lines_executed += 1;
        Ok(cf)
    }

    fn dispatch(&mut self, line: &ParsedLine) -> Result<Option<ControlFlow>, ExecError> {
        match line.line_type {
            LineType::Empty | LineType::Comment => Ok(None),
            LineType::Text => {
                let text = self.ctx.expander.expand(&line.trimmed);
                debug!(line = line.line_number, %text, "type");
                self.mode.send_text(&format!("{text}\n"))?;
                Ok(None)
            }
            LineType::VariableAssign => {
                if let Some((name, value)) = self.ctx.expander.parse_assignment(&line.trimmed) {
                    debug!(%name, %value, "assign");
                    self.ctx.expander.set(name, value);
                }
                Ok(None)
            }
            LineType::Directive | LineType::Conditional => {
                let directive = line.directive.as_ref().ok_or(ExecError::MissingDirective)?;
                self.exec_directive(directive, line.line_number)
            }
        }
    }

    fn exec_directive(&mut self, d: &Directive, line: usize) -> Result<Option<ControlFlow>, ExecError> {
        let dry = self.mode.is_dry_run();
        match d {
            Directive::Key { name } => {
                let key = self
                    .keymap
                    .resolve(name)
                    .ok_or_else(|| ExecError::UnknownKey(name.clone()))?;
                self.mode.send_key(&key)?;
                Ok(None)
            }

            Directive::Watch { text, timeout } => {
                let text = self.ctx.expander.expand(text);
                let timeout = timeout.unwrap_or(self.settings.watch_timeout);
                if dry {
                    self.mode.narrate(&format!("wait up to {timeout:?} for {text:?}"));
                    return Ok(None);
                }
                self.watch(&text, timeout)?;
                Ok(None)
            }

            Directive::Console { number } => {
                self.mode.switch_console(*number)?;
                Ok(None)
            }

            Directive::Wait { duration } => {
                self.sleep(*duration)?;
                Ok(None)
            }

            Directive::Exit { code } => {
                info!(code, "exit");
                Ok(Some(ControlFlow::Exit(*code)))
            }

            Directive::IfFound { text, timeout, block, else_block } => {
                self.exec_if(text, *timeout, true, block, else_block)
            }
            Directive::IfNotFound { text, timeout, block, else_block } => {
                self.exec_if(text, *timeout, false, block, else_block)
            }

            Directive::Retry { count, block } => self.exec_retry(*count, block),
            Directive::Repeat { count, block } => self.exec_repeat(*count, block),

            Directive::WhileFound { text, timeout, poll, block } => {
                self.exec_while(text, true, *timeout, *poll, block)
            }
            Directive::WhileNotFound { text, timeout, poll, block } => {
                self.exec_while(text, false, *timeout, *poll, block)
            }

            Directive::Switch { timeout, poll, cases, default_case } => {
                self.exec_switch(*timeout, *poll, cases, default_case.as_deref())
            }

            Directive::Include { path } => self.exec_include(path),

            Directive::Screenshot { path, format } => {
                let path = self.ctx.expander.expand(path);
                self.mode.screenshot(Path::new(&path), *format)?;
                Ok(None)
            }

            Directive::Call { name, args } => self.exec_call(name, args, line),

            Directive::Return => Ok(Some(ControlFlow::Return)),

            Directive::Break => {
                let debugging = self.debugger.as_ref().is_some_and(|d| d.is_enabled());
                if self.ctx.loop_depth > 0 && !debugging {
                    Ok(Some(ControlFlow::Break))
                } else {
                    debug!(line, "<break> has no enclosing loop here; ignored");
                    Ok(None)
                }
            }

            Directive::Set { name, value } => {
                let value = self.ctx.expander.expand(value);
                debug!(%name, %value, "set");
                self.ctx.expander.set(name.clone(), value);
                Ok(None)
            }

            // Structural markers are consumed by the parser; a stray
            // <end-if> is harmless.
            Directive::Else
            | Directive::EndIf
            | Directive::Case { .. }
            | Directive::Default
            | Directive::EndCase
            | Directive::EndSwitch
            | Directive::Function { .. }
            | Directive::EndFunction => Ok(None),
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    /// Run a loop or switch body; `<break>` inside it is live.
    fn exec_breakable(&mut self, block: &[ParsedLine]) -> Result<Option<ControlFlow>, ExecError> {
        self.ctx.loop_depth += 1;
        let result = self.exec_block(block);
        self.ctx.loop_depth -= 1;
        result
    }

    fn exec_if(
        &mut self,
        text: &str,
        timeout: Duration,
        want_found: bool,
        block: &[ParsedLine],
        else_block: &[ParsedLine],
    ) -> Result<Option<ControlFlow>, ExecError> {
        let text = self.ctx.expander.expand(text);
        let verb = if want_found { "if-found" } else { "if-not-found" };

        if self.mode.is_dry_run() {
            self.mode.narrate(&format!("{verb} {text:?} (up to {timeout:?}): then-branch"));
            if let Some(cf) = self.exec_block(block)? {
                return Ok(Some(cf));
            }
            if !else_block.is_empty() {
                self.mode.narrate(&format!("{verb} {text:?}: else-branch"));
            }
            return self.exec_block(else_block);
        }

        let found = self.poll_for(&text, timeout)?;
        let take_then = found == want_found;
        info!(%text, found, branch = if take_then { "then" } else { "else" }, "{verb}");
        self.exec_block(if take_then { block } else { else_block })
    }

    fn exec_retry(&mut self, count: u32, block: &[ParsedLine]) -> Result<Option<ControlFlow>, ExecError> {
        if self.mode.is_dry_run() {
            self.mode.narrate(&format!("retry up to {count} times"));
            return self.exec_loop_body_once(block);
        }

        let mut last = None;
        for attempt in 1..=count {
            match self.exec_breakable(block) {
                Ok(Some(ControlFlow::Break)) | Ok(None) => return Ok(None),
                Ok(cf) => return Ok(cf),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(attempt, count, error = %e, "retry attempt failed");
                    last = Some(e);
                    if attempt < count {
                        self.sleep(self.settings.retry_delay)?;
                    }
                }
            }
        }
        match last {
            Some(e) => Err(ExecError::RetryExhausted { attempts: count, last: Box::new(e) }),
            None => Ok(None),
        }
    }

    fn exec_repeat(&mut self, count: u32, block: &[ParsedLine]) -> Result<Option<ControlFlow>, ExecError> {
        if self.mode.is_dry_run() {
            self.mode.narrate(&format!("repeat {count} times"));
            return self.exec_loop_body_once(block);
        }

        for iteration in 1..=count {
            debug!(iteration, count, "repeat");
            match self.exec_breakable(block) {
                Ok(Some(ControlFlow::Break)) => break,
                Ok(None) => {}
                Ok(cf) => return Ok(cf),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    return Err(ExecError::RepeatFailed { iteration, count, source: Box::new(e) })
                }
            }
        }
        Ok(None)
    }

    fn exec_while(
        &mut self,
        text: &str,
        want_found: bool,
        timeout: Duration,
        poll: Option<Duration>,
        block: &[ParsedLine],
    ) -> Result<Option<ControlFlow>, ExecError> {
        let text = self.ctx.expander.expand(text);
        let poll = poll.unwrap_or(self.settings.poll_interval);
        let verb = if want_found { "while-found" } else { "while-not-found" };

        if self.mode.is_dry_run() {
            self.mode.narrate(&format!("{verb} {text:?} (up to {timeout:?}, every {poll:?})"));
            return self.exec_loop_body_once(block);
        }

        let start = Instant::now();
        let mut ticks = 0u32;
        loop {
            if let Some(found) = self.probe(&text) {
                if found != want_found {
                    info!(%text, ticks, "{verb} condition cleared");
                    return Ok(None);
                }
                ticks += 1;
                match self.exec_breakable(block)? {
                    Some(ControlFlow::Break) => return Ok(None),
                    Some(cf) => return Ok(Some(cf)),
                    None => {}
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                let state = if want_found { "present" } else { "absent" };
                return Err(ExecError::WhileTimeout { text, state, timeout, elapsed });
            }
            self.sleep(poll.min(timeout - elapsed))?;
        }
    }

    fn exec_switch(
        &mut self,
        timeout: Option<Duration>,
        poll: Option<Duration>,
        cases: &[SwitchCase],
        default_case: Option<&[ParsedLine]>,
    ) -> Result<Option<ControlFlow>, ExecError> {
        let timeout = timeout.unwrap_or(self.settings.switch_timeout);
        let poll = poll.unwrap_or(self.settings.poll_interval);
        let patterns: Vec<String> = cases.iter().map(|c| self.ctx.expander.expand(&c.pattern)).collect();

        if self.mode.is_dry_run() {
            self.mode.narrate(&format!("switch over {} cases (up to {timeout:?})", cases.len()));
            for (case, pattern) in cases.iter().zip(&patterns) {
                self.mode.narrate(&format!("case {pattern:?}"));
                if let Some(cf) = self.exec_case(&case.body)? {
                    return Ok(Some(cf));
                }
            }
            if let Some(body) = default_case {
                self.mode.narrate("default case");
                return self.exec_case(body);
            }
            return Ok(None);
        }

        let matcher = CaseMatcher::new(&patterns);
        let start = Instant::now();
        loop {
            if let Some(rows) = self.capture() {
                let hit = matcher.select(&rows);
                self.screen.observe(rows);
                if let Some(hit) = hit {
                    info!(case = %patterns[hit.case], row = hit.row, "switch matched");
                    return self.exec_case(&cases[hit.case].body);
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            self.sleep(poll.min(timeout - elapsed))?;
        }

        match default_case {
            Some(body) => {
                info!("switch: no case matched; running default");
                self.exec_case(body)
            }
            None => {
                info!("switch: no case matched");
                Ok(None)
            }
        }
    }

    fn exec_case(&mut self, body: &[ParsedLine]) -> Result<Option<ControlFlow>, ExecError> {
        match self.exec_breakable(body)? {
            Some(ControlFlow::Break) => Ok(None),
            cf => Ok(cf),
        }
    }

    fn exec_loop_body_once(&mut self, block: &[ParsedLine]) -> Result<Option<ControlFlow>, ExecError> {
        match self.exec_breakable(block)? {
            Some(ControlFlow::Break) => Ok(None),
            cf => Ok(cf),
        }
    }

    // ── Functions and includes ────────────────────────────────────────────────

    fn exec_call(&mut self, name: &str, args: &[String], line: usize) -> Result<Option<ControlFlow>, ExecError> {
        let function = self
            .ctx
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::UndefinedFunction(name.to_owned()))?;
        let args: Vec<String> = args.iter().map(|a| self.ctx.expander.expand(a)).collect();

        if self.mode.is_dry_run() {
            self.mode.narrate(&format!("call {name} {args:?}"));
            if self.ctx.call_stack.iter().any(|c| c.name == name) {
                self.mode.narrate(&format!("{name} is recursive; not expanded again"));
                return Ok(None);
            }
        }

        let callee = self.ctx.expander.scoped_copy(&args);
        let caller = std::mem::replace(&mut self.ctx.expander, callee);
        let outer_depth = std::mem::replace(&mut self.ctx.loop_depth, 0);
        self.ctx.call_stack.push(FunctionCallContext {
            name: name.to_owned(),
            args,
            call_line: line,
        });

        let span = debug_span!("call", function = name, depth = self.ctx.call_stack.len());
        let result = span.in_scope(|| self.exec_block(&function.body));

        self.ctx.call_stack.pop();
        self.ctx.loop_depth = outer_depth;
        self.ctx.expander = caller;

        match result? {
            Some(ControlFlow::Exit(code)) => Ok(Some(ControlFlow::Exit(code))),
            _ => Ok(None),
        }
    }

    fn exec_include(&mut self, path: &str) -> Result<Option<ControlFlow>, ExecError> {
        let expanded = self.ctx.expander.expand(path);
        let resolved = self.ctx.base_dir.join(&expanded);
        let key = canonical(&resolved);
        if self.ctx.include_stack.contains(&key) {
            return Err(ExecError::IncludeCycle(resolved));
        }

        let src = fs::read_to_string(&resolved)
            .map_err(|source| ExecError::Include { path: resolved.clone(), source })?;
        let mut parser = Parser::with_expander(self.ctx.expander.clone());
        let script = parser
            .parse(&src)
            .map_err(|source| ExecError::IncludeParse { path: resolved.clone(), source })?;
        info!(path = %resolved.display(), lines = script.lines.len(), "include");

        for (name, function) in script.functions {
            self.ctx.functions.insert(name, Rc::new(function));
        }

        // An included file is its own frame: a <break> in it never reaches
        // a loop or switch around the <include>.
        let dir = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
        let outer_dir = std::mem::replace(&mut self.ctx.base_dir, dir);
        let outer_depth = std::mem::replace(&mut self.ctx.loop_depth, 0);
        self.ctx.include_stack.push(key);
        let result = self.exec_block(&script.lines);
        self.ctx.include_stack.pop();
        self.ctx.loop_depth = outer_depth;
        self.ctx.base_dir = outer_dir;

        match result? {
            Some(ControlFlow::Exit(code)) => Ok(Some(ControlFlow::Exit(code))),
            _ => Ok(None),
        }
    }

    // ── Time and screen ───────────────────────────────────────────────────────

    fn remaining(&self) -> Option<Duration> {
        self.settings
            .timeout
            .map(|t| t.saturating_sub(self.ctx.started.elapsed()))
    }

    fn check_timeout(&self) -> Result<(), ExecError> {
        match self.remaining() {
            Some(rem) if rem.is_zero() => Err(ExecError::Timeout { elapsed: self.ctx.started.elapsed() }),
            _ => Ok(()),
        }
    }

    /// Wait, but never past the global deadline.
    fn sleep(&mut self, duration: Duration) -> Result<(), ExecError> {
        if self.mode.is_dry_run() {
            self.mode.wait(duration);
            return Ok(());
        }
        match self.remaining() {
            Some(rem) if rem < duration => {
                self.mode.wait(rem);
                Err(ExecError::Timeout { elapsed: self.ctx.started.elapsed() })
            }
            _ => {
                self.mode.wait(duration);
                Ok(())
            }
        }
    }

    /// Capture the screen; failures are logged and yield `None`.
    fn capture(&mut self) -> Option<Vec<String>> {
        match self.mode.capture_screen() {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(error = %e, "screen capture failed");
                None
            }
        }
    }

    /// Whether `text` is on screen now; `None` when capture failed.
    fn probe(&mut self, text: &str) -> Option<bool> {
        let rows = self.capture()?;
        Some(self.screen.search(rows, text).found())
    }

    /// Poll until `text` appears or `timeout` passes.
    fn poll_for(&mut self, text: &str, timeout: Duration) -> Result<bool, ExecError> {
        let start = Instant::now();
        loop {
            if self.probe(text) == Some(true) {
                return Ok(true);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            self.check_timeout()?;
            self.sleep(self.settings.poll_interval.min(timeout - elapsed))?;
        }
    }

    fn watch(&mut self, text: &str, timeout: Duration) -> Result<(), ExecError> {
        let start = Instant::now();
        if self.poll_for(text, timeout)? {
            info!(%text, waited = ?start.elapsed(), "watch matched");
            Ok(())
        } else {
            Err(ExecError::WatchTimeout { text: text.to_owned(), timeout, elapsed: start.elapsed() })
        }
    }

    // ── Debugger ──────────────────────────────────────────────────────────────

    fn consult_debugger(&mut self, line: &ParsedLine) -> Result<(), ExecError> {
        let Some(debugger) = self.debugger.as_mut() else {
            return Ok(());
        };
        if !debugger.is_enabled() || !debugger.should_break(line) {
            return Ok(());
        }
        match debugger.handle_break(line, &self.ctx.expander)? {
            DebugAction::Stop => Err(ExecError::Stopped),
            DebugAction::Screenshot(path) => {
                let format = ImageFormat::from_path(&path.to_string_lossy());
                self.mode.screenshot(&path, format)?;
                Ok(())
            }
            DebugAction::Continue | DebugAction::Step => Ok(()),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
