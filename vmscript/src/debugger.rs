//! Interactive line debugger.
//!
//! The executor consults a [`Debugger`] before every executable line.  When
//! it decides to stop, [`Debugger::handle_break`] shows the line and reads
//! a command.  [`StepDebugger`] is the terminal implementation.
//!
//! ## Commands
//!
//! | Input           | Effect                                  |
//! |-----------------|-----------------------------------------|
//! | Enter, `s`      | execute this line, stop at the next one |
//! | `c`             | run until the next breakpoint           |
//! | `b N` / `d N`   | add / delete a breakpoint at line N     |
//! | `p NAME`        | print a variable                        |
//! | `shot PATH`     | take a screenshot, then continue        |
//! | `q`             | stop the script                         |

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use thiserror::Error;

use crate::script::expand::Expander;
use crate::script::stmt::ParsedLine;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("debugger I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What the executor should do after a break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugAction {
    Continue,
    Step,
    Stop,
    Screenshot(PathBuf),
}

pub trait Debugger {
    /// A disabled debugger is never consulted.  While enabled, `<break>`
    /// does not end loops.
    fn is_enabled(&self) -> bool;
    fn should_break(&self, line: &ParsedLine) -> bool;
    fn handle_break(&mut self, line: &ParsedLine, scope: &Expander) -> Result<DebugAction, DebugError>;
}

// ── StepDebugger ──────────────────────────────────────────────────────────────

pub struct StepDebugger {
    stepping: bool,
    breakpoints: BTreeSet<usize>,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl StepDebugger {
    pub fn new(input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        StepDebugger { stepping: true, breakpoints: BTreeSet::new(), input, output }
    }

    /// Read commands from stdin, write to stderr.
    pub fn stdio() -> Self {
        Self::new(Box::new(io::BufReader::new(io::stdin())), Box::new(io::stderr()))
    }

    /// Start in step mode (`true`) or run to the first breakpoint.
    pub fn stepping(mut self, on: bool) -> Self {
        self.stepping = on;
        self
    }

    pub fn with_breakpoints(mut self, lines: impl IntoIterator<Item = usize>) -> Self {
        self.breakpoints.extend(lines);
        self
    }

    pub fn breakpoints(&self) -> &BTreeSet<usize> {
        &self.breakpoints
    }

    fn show(&mut self, line: &ParsedLine) -> io::Result<()> {
        queue!(
            self.output,
            SetForegroundColor(Color::Yellow),
            Print(format!("{:>5} ", line.line_number)),
            ResetColor,
            Print(&line.trimmed),
            Print("\n")
        )?;
        if line.expanded != line.trimmed && line.directive.is_none() {
            queue!(
                self.output,
                SetForegroundColor(Color::DarkGrey),
                Print(format!("      = {}\n", line.expanded)),
                ResetColor
            )?;
        }
        Ok(())
    }

    fn note(&mut self, text: &str) -> io::Result<()> {
        queue!(self.output, SetForegroundColor(Color::Cyan), Print(text), Print("\n"), ResetColor)
    }

    fn prompt(&mut self) -> io::Result<Option<String>> {
        queue!(self.output, SetForegroundColor(Color::Green), Print("(debug) "), ResetColor)?;
        self.output.flush()?;
        let mut buf = String::new();
        if self.input.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        Ok(Some(buf.trim().to_owned()))
    }
}

impl Debugger for StepDebugger {
    fn is_enabled(&self) -> bool {
        true
    }

    fn should_break(&self, line: &ParsedLine) -> bool {
        self.stepping || self.breakpoints.contains(&line.line_number)
    }

    fn handle_break(&mut self, line: &ParsedLine, scope: &Expander) -> Result<DebugAction, DebugError> {
        self.show(line)?;
        loop {
            let Some(input) = self.prompt()? else {
                return Ok(DebugAction::Stop);
            };
            let (cmd, arg) = match input.split_once(char::is_whitespace) {
                Some((c, a)) => (c, a.trim()),
                None => (input.as_str(), ""),
            };
            match cmd {
                "" | "s" | "step" => {
                    self.stepping = true;
                    return Ok(DebugAction::Step);
                }
                "c" | "continue" => {
                    self.stepping = false;
                    return Ok(DebugAction::Continue);
                }
                "q" | "quit" => return Ok(DebugAction::Stop),
                "shot" | "screenshot" if !arg.is_empty() => {
                    return Ok(DebugAction::Screenshot(PathBuf::from(arg)));
                }
                "b" | "break" | "d" | "delete" => match arg.parse::<usize>() {
                    Ok(n) => {
                        let msg = if cmd.starts_with('b') {
                            self.breakpoints.insert(n);
                            format!("breakpoint at line {n}")
                        } else if self.breakpoints.remove(&n) {
                            format!("deleted breakpoint at line {n}")
                        } else {
                            format!("no breakpoint at line {n}")
                        };
                        self.note(&msg)?;
                    }
                    Err(_) => self.note("usage: b N | d N")?,
                },
                "p" | "print" if !arg.is_empty() => {
                    let msg = match scope.get(arg) {
                        Some(v) => format!("{arg} = {v:?}"),
                        None => format!("{arg} is not set"),
                    };
                    self.note(&msg)?;
                }
                _ => self.note("commands: s(tep) c(ontinue) b N, d N, p NAME, shot PATH, q(uit)")?,
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
