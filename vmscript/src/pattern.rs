//! Multi-pattern matching for `<switch>` cases.
//!
//! A switch may declare many cases and is re-evaluated on every poll, so
//! all case patterns are compiled into one [`aho_corasick`] automaton and
//! each captured row is scanned once.
//!
//! ## Selection rule
//!
//! Rows are visited bottom-up (most recent console output first).  Within
//! a row, the case declared first wins among all cases whose text occurs
//! in it.  The first row with any match decides.

use aho_corasick::AhoCorasick;

/// Compiled set of case patterns.
#[derive(Debug, Clone)]
pub struct CaseMatcher {
    automaton: AhoCorasick,
    len: usize,
}

/// Which case matched and on which row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseMatch {
    /// Index into the declared case list.
    pub case: usize,
    /// Index of the matching row in the capture.
    pub row: usize,
}

impl CaseMatcher {
    /// Compile `patterns` in declaration order.
    pub fn new<P: AsRef<str>>(patterns: &[P]) -> Self {
        let automaton = AhoCorasick::new(patterns.iter().map(|p| p.as_ref()));
        CaseMatcher { automaton, len: patterns.len() }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowest-index case whose pattern occurs in `row`.
    pub fn best_in_row(&self, row: &str) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        self.automaton
            .find_overlapping_iter(row)
            .map(|m| m.pattern())
            .min()
    }

    /// Apply the selection rule to a whole capture.
    pub fn select(&self, rows: &[String]) -> Option<CaseMatch> {
        rows.iter()
            .enumerate()
            .rev()
            .find_map(|(row, text)| self.best_in_row(text).map(|case| CaseMatch { case, row }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
