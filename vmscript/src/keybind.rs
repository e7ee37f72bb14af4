//! Symbolic key names and typed characters → transport key codes.
//!
//! ## Key code format
//!
//! Key codes use the QEMU monitor's `sendkey` notation: key names joined
//! with `-`, modifiers first (`ctrl-alt-delete`, `shift-a`, `ret`).  The
//! script side is more forgiving: names are case-insensitive, `+` and `-`
//! both join a chord, and common aliases (`enter`, `esc`, `del`, `pgup`)
//! are accepted.

use std::collections::HashMap;
use std::fmt;

// ── KeyCode ───────────────────────────────────────────────────────────────────

/// A single key chord in transport notation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCode(String);

impl KeyCode {
    pub fn new(code: impl Into<String>) -> Self {
        KeyCode(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Keymap ────────────────────────────────────────────────────────────────────

/// Script key names → transport key names.
#[derive(Debug, Clone)]
pub struct Keymap {
    keys: HashMap<String, &'static str>,
    modifiers: HashMap<&'static str, &'static str>,
}

impl Default for Keymap {
    fn default() -> Self {
        Self::new()
    }
}

impl Keymap {
    /// The standard table: named keys, letters, digits, F-keys and modifiers.
    pub fn new() -> Self {
        let mut keys: HashMap<String, &'static str> = HashMap::new();
        let named: &[(&str, &'static str)] = &[
            ("enter", "ret"),
            ("ret", "ret"),
            ("tab", "tab"),
            ("esc", "esc"),
            ("escape", "esc"),
            ("backspace", "backspace"),
            ("bs", "backspace"),
            ("delete", "delete"),
            ("del", "delete"),
            ("insert", "insert"),
            ("ins", "insert"),
            ("home", "home"),
            ("end", "end"),
            ("pgup", "pgup"),
            ("pageup", "pgup"),
            ("pgdn", "pgdn"),
            ("pagedown", "pgdn"),
            ("up", "up"),
            ("down", "down"),
            ("left", "left"),
            ("right", "right"),
            ("space", "spc"),
            ("spc", "spc"),
            ("minus", "minus"),
            ("equal", "equal"),
            ("comma", "comma"),
            ("dot", "dot"),
            ("slash", "slash"),
            ("sysrq", "sysrq"),
            ("print", "print"),
            ("pause", "pause"),
        ];
        for &(name, code) in named {
            keys.insert(name.to_owned(), code);
        }
        for &name in LETTERS.iter().chain(DIGITS.iter()).chain(FKEYS.iter()) {
            keys.insert(name.to_owned(), name);
        }

        let modifiers: HashMap<&'static str, &'static str> = [
            ("ctrl", "ctrl"),
            ("control", "ctrl"),
            ("alt", "alt"),
            ("shift", "shift"),
            ("meta", "meta_l"),
            ("super", "meta_l"),
            ("win", "meta_l"),
        ]
        .into_iter()
        .collect();

        Keymap { keys, modifiers }
    }

    /// Resolve a script key name such as `enter`, `ctrl+c` or `ctrl-alt-del`.
    ///
    /// Every part but the last must be a modifier.  Returns `None` for any
    /// unknown part.
    pub fn resolve(&self, name: &str) -> Option<KeyCode> {
        let lower = name.trim().to_ascii_lowercase();
        let parts: Vec<&str> = lower.split(['+', '-']).collect();
        let (last, mods) = parts.split_last()?;
        let mut code = Vec::with_capacity(parts.len());
        for m in mods {
            code.push(*self.modifiers.get(m)?);
        }
        code.push(*self.keys.get(*last)?);
        Some(KeyCode(code.join("-")))
    }

    /// Returns `true` when [`resolve`](Self::resolve) would succeed.
    pub fn is_known(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// Key chord that types `ch`, or `None` for characters with no key.
pub fn char_key(ch: char) -> Option<KeyCode> {
    let code = match ch {
        'a'..='z' | '0'..='9' => ch.to_string(),
        'A'..='Z' => format!("shift-{}", ch.to_ascii_lowercase()),
        ' ' => "spc".to_owned(),
        '\n' => "ret".to_owned(),
        '\t' => "tab".to_owned(),
        _ => {
            let (shift, base) = punctuation(ch)?;
            if shift {
                format!("shift-{base}")
            } else {
                base.to_owned()
            }
        }
    };
    Some(KeyCode(code))
}

/// Key chords that type `text`.  Characters without a key are skipped.
pub fn text_keys(text: &str) -> Vec<KeyCode> {
    text.chars().filter_map(char_key).collect()
}

fn punctuation(ch: char) -> Option<(bool, &'static str)> {
    let entry = match ch {
        '-' => (false, "minus"),
        '=' => (false, "equal"),
        '[' => (false, "bracket_left"),
        ']' => (false, "bracket_right"),
        '\\' => (false, "backslash"),
        ';' => (false, "semicolon"),
        '\'' => (false, "apostrophe"),
        '`' => (false, "grave_accent"),
        ',' => (false, "comma"),
        '.' => (false, "dot"),
        '/' => (false, "slash"),
        '_' => (true, "minus"),
        '+' => (true, "equal"),
        '{' => (true, "bracket_left"),
        '}' => (true, "bracket_right"),
        '|' => (true, "backslash"),
        ':' => (true, "semicolon"),
        '"' => (true, "apostrophe"),
        '~' => (true, "grave_accent"),
        '<' => (true, "comma"),
        '>' => (true, "dot"),
        '?' => (true, "slash"),
        '!' => (true, "1"),
        '@' => (true, "2"),
        '#' => (true, "3"),
        '$' => (true, "4"),
        '%' => (true, "5"),
        '^' => (true, "6"),
        '&' => (true, "7"),
        '*' => (true, "8"),
        '(' => (true, "9"),
        ')' => (true, "0"),
        _ => return None,
    };
    Some(entry)
}

const LETTERS: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s",
    "t", "u", "v", "w", "x", "y", "z",
];

const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

const FKEYS: [&str; 12] = [
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
];

// ── Tests ─────────────────────────────────────────────────────────────────────
