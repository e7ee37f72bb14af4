//! Incremental screen diff over successive OCR captures.
//!
//! ## Terminology
//!
//! * **Capture**: the OCR text of one screen, one entry per row.
//!
//! * **Scroll offset**: how many rows the console scrolled between two
//!   captures.  A row at index `i` in the previous capture is found at
//!   index `i - offset` in the current one.
//!
//! * **New line**: a current row that was not on the previous screen, or
//!   that extends the aligned previous row (a prompt that was partially
//!   drawn when the last capture was taken).
//!
//! Searching new lines first keeps the per-poll cost proportional to the
//! fresh console output instead of the whole screen.

use std::collections::HashSet;

/// Agreement needed across the rows after an anchor pair.
const ALIGN_THRESHOLD: f64 = 0.6;
/// How many rows after an anchor pair are compared.
const ALIGN_LOOKAHEAD: usize = 3;

// ── ScreenDiff ────────────────────────────────────────────────────────────────

/// Result of comparing two captures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenDiff {
    /// Detected scroll offset, `None` when there was no previous capture or
    /// no alignment validated.
    pub offset: Option<isize>,
    /// New rows, most recent (bottom) first.
    pub new_lines: Vec<String>,
}

/// Compare `previous` and `current` captures.
pub fn diff(previous: Option<&[String]>, current: &[String]) -> ScreenDiff {
    let prev = match previous {
        Some(p) if !p.is_empty() => p,
        _ => {
            return ScreenDiff {
                offset: None,
                new_lines: bottom_up(current.iter().filter(|l| !is_blank(l))),
            }
        }
    };

    let offset = find_offset(prev, current);
    let seen: HashSet<&str> = prev.iter().map(String::as_str).collect();

    let new_lines = current.iter().enumerate().filter(|(j, line)| {
        if is_blank(line) {
            return false;
        }
        if !seen.contains(line.as_str()) {
            return true;
        }
        match offset.and_then(|off| aligned(prev, *j, off)) {
            Some(old) => line.len() > old.len() && line.starts_with(old.as_str()),
            None => false,
        }
    });

    ScreenDiff {
        offset,
        new_lines: bottom_up(new_lines.map(|(_, l)| l)),
    }
}

/// Smallest-magnitude offset whose anchor validates, preferring positive
/// (scrolled-up) offsets on ties.
fn find_offset(prev: &[String], cur: &[String]) -> Option<isize> {
    let max = prev.len().max(cur.len()) as isize;
    for magnitude in 0..max {
        let candidates = if magnitude == 0 { vec![0] } else { vec![magnitude, -magnitude] };
        for off in candidates {
            if anchors(prev, cur, off).any(|j| validates(prev, cur, j, off)) {
                return Some(off);
            }
        }
    }
    None
}

/// Current-row indices whose aligned previous row has the same non-blank text.
fn anchors<'a>(prev: &'a [String], cur: &'a [String], off: isize) -> impl Iterator<Item = usize> + 'a {
    (0..cur.len()).filter(move |&j| {
        !is_blank(&cur[j]) && aligned(prev, j, off).is_some_and(|p| *p == cur[j])
    })
}

/// Rows after the anchor agree when equal or when the current row extends
/// the previous one.
fn validates(prev: &[String], cur: &[String], j: usize, off: isize) -> bool {
    let mut compared = 0usize;
    let mut agreed = 0usize;
    for k in 1..=ALIGN_LOOKAHEAD {
        let Some(c) = cur.get(j + k) else { break };
        let Some(p) = aligned(prev, j + k, off) else { break };
        compared += 1;
        if c.starts_with(p.as_str()) {
            agreed += 1;
        }
    }
    compared == 0 || agreed as f64 / compared as f64 >= ALIGN_THRESHOLD
}

/// The previous row aligned with current row `j` under `off`.
fn aligned(prev: &[String], j: usize, off: isize) -> Option<&String> {
    let i = j as isize + off;
    if i < 0 {
        return None;
    }
    prev.get(i as usize)
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn bottom_up<'a>(lines: impl DoubleEndedIterator<Item = &'a String>) -> Vec<String> {
    lines.rev().cloned().collect()
}

// ── ScreenTracker ─────────────────────────────────────────────────────────────

/// Outcome of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    /// Found among the new lines.
    New,
    /// Found only by the full-screen fallback.
    Screen,
    Miss,
}

impl Hit {
    pub fn found(self) -> bool {
        !matches!(self, Hit::Miss)
    }
}

/// Remembers the last capture and searches new captures incrementally.
#[derive(Debug, Default)]
pub struct ScreenTracker {
    last: Option<Vec<String>>,
}

impl ScreenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `capture` against the last capture and make it the new last.
    pub fn observe(&mut self, capture: Vec<String>) -> ScreenDiff {
        let d = diff(self.last.as_deref(), &capture);
        self.last = Some(capture);
        d
    }

    /// Record `capture` and search it for `needle`.
    pub fn search(&mut self, capture: Vec<String>, needle: &str) -> Hit {
        let d = self.observe(capture);
        if d.new_lines.iter().any(|l| l.contains(needle)) {
            return Hit::New;
        }
        let on_screen = self
            .last
            .as_ref()
            .is_some_and(|screen| screen.iter().any(|l| l.contains(needle)));
        if on_screen {
            Hit::Screen
        } else {
            Hit::Miss
        }
    }

    pub fn last(&self) -> Option<&[String]> {
        self.last.as_deref()
    }

    /// Forget the last capture; the next one counts as entirely new.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
