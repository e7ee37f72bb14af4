//! Directive-content recognition.
//!
//! The text between `<` and `>` is tried against an ordered list of
//! matchers; the first one that recognises it wins.  A matcher either
//! declines (`None`), accepts (`Some(Ok)`), or recognises the shape but
//! rejects a value (`Some(Err)`, e.g. `<console 900>`).
//!
//! | Syntax                                             | Directive            |
//! |----------------------------------------------------|----------------------|
//! | `enter`, `ctrl+c`, `ctrl-alt-del`                  | key sequence         |
//! | `watch "text" [dur]`                               | wait for text        |
//! | `console N`                                        | switch VT            |
//! | `wait dur`                                         | sleep                |
//! | `exit [N]`                                         | end script           |
//! | `if-found "text" [dur]`, `if-not-found …`          | conditional block    |
//! | `retry N`, `repeat N`                              | loop block           |
//! | `while-found "text" dur [poll dur]`, `while-not-…` | polling loop block   |
//! | `else`, `end-if`, `return`                         | markers              |
//! | `switch [timeout=dur] [poll=dur]`                  | screen switch        |
//! | `case "text"`, `default`, `end-case`, `end-switch` | switch markers       |
//! | `include "path"`                                   | run another script   |
//! | `screenshot "path" [ppm\|png]`                     | capture the screen   |
//! | `function NAME`, `end-function`                    | function definition  |
//! | `call NAME [args…]`                                | function call        |
//! | `break`                                            | leave loop / switch  |
//! | `set NAME="value"`                                 | bind a variable      |
//!
//! Durations are an integer with an optional `ms`, `s` or `m` suffix; a
//! bare integer is seconds.

use std::time::Duration;

use regex::{Captures, Regex};

use super::stmt::{Directive, ImageFormat};

/// Default timeout of `<if-found>` / `<if-not-found>` without an explicit one.
pub const DEFAULT_IF_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker words that look like key names but are not.
const RESERVED: &[&str] = &[
    "else",
    "end-if",
    "return",
    "switch",
    "default",
    "end-case",
    "end-switch",
    "end-function",
    "break",
    "exit",
];

const DUR: &str = r"\d+(?:ms|s|m)?";

/// Why a directive's content was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    /// No matcher recognised the content.
    Unknown,
    /// A matcher recognised the shape but a value is invalid.
    Malformed(String),
}

type MatchResult = Option<Result<Directive, DirectiveError>>;
type Matcher = fn(&DirectivePatterns, &str) -> MatchResult;

/// Compiled directive patterns.  Built once per parser and never mutated.
#[derive(Debug)]
pub struct DirectivePatterns {
    key: Regex,
    watch: Regex,
    console: Regex,
    wait: Regex,
    exit: Regex,
    if_found: Regex,
    counted: Regex,
    while_found: Regex,
    switch: Regex,
    switch_opt: Regex,
    case: Regex,
    include: Regex,
    screenshot: Regex,
    function: Regex,
    call: Regex,
    set: Regex,
}

impl Default for DirectivePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectivePatterns {
    pub fn new() -> Self {
        let re = |src: String| Regex::new(&src).expect("static directive pattern");
        DirectivePatterns {
            key: re(r"^[A-Za-z0-9]+(?:[+-][A-Za-z0-9]+)*$".to_owned()),
            watch: re(format!(r#"^watch\s+"([^"]*)"(?:\s+({DUR}))?$"#)),
            console: re(r"^console\s+(\d+)$".to_owned()),
            wait: re(format!(r"^wait\s+({DUR})$")),
            exit: re(r"^exit(?:\s+(-?\d+))?$".to_owned()),
            if_found: re(format!(r#"^(if-found|if-not-found)\s+"([^"]*)"(?:\s+({DUR}))?$"#)),
            counted: re(r"^(retry|repeat)\s+(\d+)$".to_owned()),
            while_found: re(format!(
                r#"^(while-found|while-not-found)\s+"([^"]*)"\s+({DUR})(?:\s+poll\s+({DUR}))?$"#
            )),
            switch: re(format!(r"^switch((?:\s+(?:timeout|poll)=(?:{DUR}))*)$")),
            switch_opt: re(format!(r"(timeout|poll)=({DUR})")),
            case: re(r#"^case\s+"([^"]*)"$"#.to_owned()),
            include: re(r#"^include\s+"([^"]+)"$"#.to_owned()),
            screenshot: re(r#"^screenshot\s+"([^"]+)"(?:\s+([A-Za-z]+))?$"#.to_owned()),
            function: re(r"^function\s+([A-Za-z_][A-Za-z0-9_-]*)$".to_owned()),
            call: re(r"^call\s+([A-Za-z_][A-Za-z0-9_-]*)(?:\s+(.*))?$".to_owned()),
            set: re(r#"^set\s+([A-Za-z_][A-Za-z0-9_]*)=(?:"([^"]*)"|(\S*))$"#.to_owned()),
        }
    }

    /// Recognise the content of a `<...>` directive (without the brackets).
    pub fn parse(&self, content: &str) -> Result<Directive, DirectiveError> {
        let content = content.trim();
        for matcher in MATCHERS {
            if let Some(result) = matcher(self, content) {
                return result;
            }
        }
        Err(DirectiveError::Unknown)
    }
}

/// Matchers in priority order.
const MATCHERS: &[Matcher] = &[
    match_key,
    match_watch,
    match_console,
    match_wait,
    match_exit,
    match_if,
    match_counted,
    match_while,
    match_keyword,
    match_switch,
    match_case,
    match_include,
    match_screenshot,
    match_function,
    match_call,
    match_set,
];

fn match_key(p: &DirectivePatterns, s: &str) -> MatchResult {
    if RESERVED.contains(&s) || !p.key.is_match(s) {
        return None;
    }
    Some(Ok(Directive::Key { name: s.to_owned() }))
}

fn match_watch(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.watch.captures(s)?;
    Some(optional_duration(&caps, 2).map(|timeout| Directive::Watch {
        text: caps[1].to_owned(),
        timeout,
    }))
}

fn match_console(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.console.captures(s)?;
    Some(match caps[1].parse::<u8>() {
        Ok(n) if (1..=12).contains(&n) => Ok(Directive::Console { number: n }),
        _ => Err(DirectiveError::Malformed(format!(
            "console number must be between 1 and 12, got {}",
            &caps[1]
        ))),
    })
}

fn match_wait(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.wait.captures(s)?;
    Some(required_duration(&caps, 1).map(|duration| Directive::Wait { duration }))
}

fn match_exit(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.exit.captures(s)?;
    let code = match caps.get(1) {
        None => 0,
        Some(m) => match m.as_str().parse::<i32>() {
            Ok(c) => c,
            Err(e) => return Some(Err(DirectiveError::Malformed(format!("exit code: {e}")))),
        },
    };
    Some(Ok(Directive::Exit { code }))
}

fn match_if(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.if_found.captures(s)?;
    let timeout = match optional_duration(&caps, 3) {
        Ok(t) => t.unwrap_or(DEFAULT_IF_TIMEOUT),
        Err(e) => return Some(Err(e)),
    };
    let text = caps[2].to_owned();
    let directive = if &caps[1] == "if-found" {
        Directive::IfFound { text, timeout, block: Vec::new(), else_block: Vec::new() }
    } else {
        Directive::IfNotFound { text, timeout, block: Vec::new(), else_block: Vec::new() }
    };
    Some(Ok(directive))
}

fn match_counted(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.counted.captures(s)?;
    let count = match caps[2].parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => {
            return Some(Err(DirectiveError::Malformed(format!(
                "{} count must be a positive integer, got {}",
                &caps[1], &caps[2]
            ))))
        }
    };
    Some(Ok(if &caps[1] == "retry" {
        Directive::Retry { count, block: Vec::new() }
    } else {
        Directive::Repeat { count, block: Vec::new() }
    }))
}

fn match_while(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.while_found.captures(s)?;
    let timeout = match required_duration(&caps, 3) {
        Ok(t) => t,
        Err(e) => return Some(Err(e)),
    };
    let poll = match optional_duration(&caps, 4) {
        Ok(p) => p,
        Err(e) => return Some(Err(e)),
    };
    let text = caps[2].to_owned();
    Some(Ok(if &caps[1] == "while-found" {
        Directive::WhileFound { text, timeout, poll, block: Vec::new() }
    } else {
        Directive::WhileNotFound { text, timeout, poll, block: Vec::new() }
    }))
}

fn match_keyword(_: &DirectivePatterns, s: &str) -> MatchResult {
    let d = match s {
        "else" => Directive::Else,
        "end-if" => Directive::EndIf,
        "return" => Directive::Return,
        "default" => Directive::Default,
        "end-case" => Directive::EndCase,
        "end-switch" => Directive::EndSwitch,
        "end-function" => Directive::EndFunction,
        "break" => Directive::Break,
        _ => return None,
    };
    Some(Ok(d))
}

fn match_switch(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.switch.captures(s)?;
    let mut timeout = None;
    let mut poll = None;
    for opt in p.switch_opt.captures_iter(&caps[1]) {
        let value = match parse_duration(&opt[2]) {
            Some(d) => d,
            None => return Some(Err(bad_duration(&opt[2]))),
        };
        if &opt[1] == "timeout" {
            timeout = Some(value);
        } else {
            poll = Some(value);
        }
    }
    Some(Ok(Directive::Switch { timeout, poll, cases: Vec::new(), default_case: None }))
}

fn match_case(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.case.captures(s)?;
    Some(Ok(Directive::Case { pattern: caps[1].to_owned() }))
}

fn match_include(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.include.captures(s)?;
    Some(Ok(Directive::Include { path: caps[1].to_owned() }))
}

fn match_screenshot(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.screenshot.captures(s)?;
    let path = caps[1].to_owned();
    let format = match caps.get(2) {
        None => ImageFormat::from_path(&path),
        Some(m) => match ImageFormat::from_name(m.as_str()) {
            Some(f) => f,
            None => {
                return Some(Err(DirectiveError::Malformed(format!(
                    "unsupported screenshot format {:?} (expected ppm or png)",
                    m.as_str()
                ))))
            }
        },
    };
    Some(Ok(Directive::Screenshot { path, format }))
}

fn match_function(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.function.captures(s)?;
    Some(Ok(Directive::Function { name: caps[1].to_owned() }))
}

fn match_call(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.call.captures(s)?;
    let args = caps.get(2).map(|m| split_args(m.as_str())).unwrap_or_default();
    Some(Ok(Directive::Call { name: caps[1].to_owned(), args }))
}

fn match_set(p: &DirectivePatterns, s: &str) -> MatchResult {
    let caps = p.set.captures(s)?;
    let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
    Some(Ok(Directive::Set { name: caps[1].to_owned(), value: value.to_owned() }))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse `500ms`, `5s`, `2m` or a bare `5` (seconds).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(n)),
        "s" => Some(Duration::from_secs(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}

fn bad_duration(s: &str) -> DirectiveError {
    DirectiveError::Malformed(format!("invalid duration {s:?}"))
}

fn required_duration(caps: &Captures<'_>, group: usize) -> Result<Duration, DirectiveError> {
    let raw = &caps[group];
    parse_duration(raw).ok_or_else(|| bad_duration(raw))
}

fn optional_duration(caps: &Captures<'_>, group: usize) -> Result<Option<Duration>, DirectiveError> {
    match caps.get(group) {
        None => Ok(None),
        Some(m) => parse_duration(m.as_str()).map(Some).ok_or_else(|| bad_duration(m.as_str())),
    }
}

/// Split `s` into whitespace-delimited words, honouring double-quoted
/// strings and `\"` escapes within them.
pub fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── Tests ─────────────────────────────────────────────────────────────────────
