//! Command-line argument parsing.
//!
//! Usage:
//!   vmscript [-nksvq] [-f[<file>]] [-m<monitor>] [-t<timeout>] [-b<line>]…
//!            [-D<NAME=value>]… <script>

use std::path::PathBuf;
use std::time::Duration;

use crate::script::directive::parse_duration;

pub const USAGE: &str = "Usage: vmscript [-nksvq] [-f[<file>]] [-m<monitor>] [-t<timeout>] \
                         [-b<line>]... [-D<NAME=value>]... <script>";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Script to run.
    pub script: PathBuf,
    /// Config-file specification.
    pub config: ConfigFile,
    /// Monitor address override (`-m<addr>`).
    pub monitor: Option<String>,
    /// Global timeout override (`-t<dur>`).
    pub timeout: Option<Duration>,
    /// Narrate instead of driving the VM (`-n`).
    pub dry_run: bool,
    /// Parse and validate only (`-k`).
    pub check: bool,
    /// Start the debugger in step mode (`-s`).
    pub step: bool,
    /// Debugger breakpoints (`-b<line>`).
    pub breakpoints: Vec<usize>,
    /// Variables predefined on the command line (`-DNAME=value`).
    pub defines: Vec<(String, String)>,
    /// Each `-v` raises the log level by one.
    pub verbose: u8,
    /// Errors only (`-q`).
    pub quiet: bool,
}

/// How to choose the config file.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// Use the per-user config file when it exists (default).
    #[default]
    Search,
    /// `-f` with no file argument: no config file.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

impl CliArgs {
    /// Whether an interactive debugger is needed.
    pub fn debugging(&self) -> bool {
        self.step || !self.breakpoints.is_empty()
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'n' => args.dry_run = true,
                'k' => args.check = true,
                's' => args.step = true,
                'v' => args.verbose = args.verbose.saturating_add(1),
                'q' => args.quiet = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') && i + 2 < argv.len() {
                        // Separate: -f <file> <script>
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                flag @ ('m' | 't' | 'b' | 'D') => {
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{flag} requires an argument"));
                    };
                    apply_value(&mut args, flag, value)?;
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    match positional.len() {
        0 => return Err("no script given".to_owned()),
        1 => args.script = PathBuf::from(positional.remove(0)),
        n => return Err(format!("too many arguments ({n})")),
    }

    Ok(args)
}

fn apply_value(args: &mut CliArgs, flag: char, value: String) -> Result<(), String> {
    match flag {
        'm' => args.monitor = Some(value),
        't' => {
            let d = parse_duration(&value).ok_or_else(|| format!("invalid timeout: {value}"))?;
            args.timeout = Some(d);
        }
        'b' => {
            let line = value
                .parse()
                .map_err(|_| format!("invalid breakpoint line: {value}"))?;
            args.breakpoints.push(line);
        }
        _ => {
            let (name, val) = value
                .split_once('=')
                .filter(|(n, _)| !n.is_empty())
                .ok_or_else(|| format!("-D expects NAME=value, got {value:?}"))?;
            args.defines.push((name.to_owned(), val.to_owned()));
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
