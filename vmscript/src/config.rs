//! `vmscript.conf` configuration file parser.
//!
//! One setting per line:
//!
//! | Line                      | Action                                   |
//! |---------------------------|------------------------------------------|
//! | `monitor = unix:/run/vm`  | QEMU monitor address                     |
//! | `tesseract = /usr/bin/…`  | OCR program                              |
//! | `tessdata = /path`        | `--tessdata-dir` for the OCR program     |
//! | `lang = eng`              | OCR language                             |
//! | `psm = 6`                 | OCR page segmentation mode               |
//! | `columns = 80`            | console width (OCR rows are cut to it)   |
//! | `rows = 25`               | console height                           |
//! | `key_delay = 20ms`        | pause between typed characters           |
//! | `timeout = 30m`           | deadline for the whole script            |
//! | `poll = 500ms`            | screen polling interval                  |
//! | `retry_delay = 1s`        | pause between `<retry>` attempts         |
//! | `watch_timeout = 30s`     | default `<watch>` timeout                |
//! | `switch_timeout = 30s`    | default `<switch>` timeout               |
//! | `set NAME=value`          | predefine a script variable              |
//! | Lines starting with `#`/`;` | comment, ignored                       |
//!
//! Durations take the same `ms`/`s`/`m` suffixes as scripts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;

use crate::ocr::TesseractOcr;
use crate::script::directive::{parse_duration, split_args};
use crate::script::expand::strip_quotes;
use crate::script::interp::ExecutorSettings;
use crate::var::VarStore;

/// A non-fatal error on one line of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Parsed configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub monitor: Option<String>,
    pub ocr: TesseractOcr,
    pub key_delay: Duration,
    pub settings: ExecutorSettings,
    pub vars: VarStore,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.  Bad lines are reported and skipped; every
    /// good line still takes effect.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Err(message) = config.apply_line(line) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    fn apply_line(&mut self, line: &str) -> Result<(), String> {
        if let Some(rest) = line.strip_prefix("set ") {
            return parse_set(rest.trim(), &mut self.vars);
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("expected 'name = value', found {line:?}"))?;
        let key = key.trim();
        let value = strip_quotes(value.trim());

        match key {
            "monitor" => self.monitor = Some(value.to_owned()),
            "tesseract" => self.ocr.program = PathBuf::from(value),
            "tessdata" => self.ocr.tessdata = Some(PathBuf::from(value)),
            "lang" => self.ocr.lang = value.to_owned(),
            "psm" => self.ocr.psm = number(key, value)?,
            "columns" => self.ocr.columns = number(key, value)?,
            "rows" => self.ocr.rows = number(key, value)?,
            "key_delay" => self.key_delay = duration(key, value)?,
            "timeout" => self.settings.timeout = Some(duration(key, value)?),
            "poll" => self.settings.poll_interval = duration(key, value)?,
            "retry_delay" => self.settings.retry_delay = duration(key, value)?,
            "watch_timeout" => self.settings.watch_timeout = duration(key, value)?,
            "switch_timeout" => self.settings.switch_timeout = duration(key, value)?,
            _ => return Err(format!("unknown setting '{key}'")),
        }
        Ok(())
    }
}

/// `NAME=value` or `NAME value`.
fn parse_set(args: &str, vars: &mut VarStore) -> Result<(), String> {
    let tokens = split_args(args);
    match tokens.as_slice() {
        [single] => match single.split_once('=') {
            Some((name, value)) if valid_name(name) => {
                vars.set(name, value);
                Ok(())
            }
            _ => Err(format!("set: expected NAME=value, found {single:?}")),
        },
        [name, value] if valid_name(name) => {
            vars.set(name.as_str(), value.as_str());
            Ok(())
        }
        _ => Err(format!("set: expected NAME=value, found {args:?}")),
    }
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{key}: invalid number {value:?}"))
}

fn duration(key: &str, value: &str) -> Result<Duration, String> {
    parse_duration(value).ok_or_else(|| format!("{key}: invalid duration {value:?}"))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// `<config dir>/vmscript.conf` for the current user, if a home is known.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "vmscript").map(|dirs| dirs.config_dir().join("vmscript.conf"))
}

/// The default config file, when it exists.
pub fn find_user_config() -> Option<PathBuf> {
    default_path().filter(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
