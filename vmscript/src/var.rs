//! String-valued variable layer.
//!
//! The expander keeps three of these (environment, script variables and
//! overrides) and consults them in precedence order.  A layer on its own has
//! no notion of precedence; it is a plain name → value table.

use std::collections::HashMap;

/// One layer of string variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarStore {
    vars: HashMap<String, String>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the process environment.  Non-UTF-8 entries are skipped.
    pub fn from_env() -> Self {
        std::env::vars().collect()
    }

    /// Set (or overwrite) a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Remove a variable.  Returns `true` if it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Copy every entry of `other` into this layer, overwriting duplicates.
    pub fn merge(&mut self, other: &VarStore) {
        for (k, v) in other.iter() {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Variable names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VarStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = VarStore::new();
        for (k, v) in iter {
            store.set(k, v);
        }
        store
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut vars = VarStore::new();
        vars.set("HOST", "db01");
        assert_eq!(vars.get("HOST"), Some("db01"));
    }

    #[test]
    fn overwrite() {
        let mut vars = VarStore::new();
        vars.set("x", "old");
        vars.set("x", "new");
        assert_eq!(vars.get("x"), Some("new"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn unset() {
        let mut vars = VarStore::new();
        vars.set("gone", "bye");
        assert!(vars.unset("gone"));
        assert_eq!(vars.get("gone"), None);
        assert!(!vars.unset("gone"));
    }

    #[test]
    fn merge_overwrites() {
        let mut a: VarStore = [("A", "1"), ("B", "2")].into_iter().collect();
        let b: VarStore = [("B", "3"), ("C", "4")].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.get("A"), Some("1"));
        assert_eq!(a.get("B"), Some("3"));
        assert_eq!(a.get("C"), Some("4"));
    }

    #[test]
    fn names_sorted() {
        let vars: VarStore = [("b", ""), ("a", ""), ("c", "")].into_iter().collect();
        assert_eq!(vars.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_value_is_still_present() {
        let mut vars = VarStore::new();
        vars.set("EMPTY", "");
        assert!(vars.contains("EMPTY"));
        assert!(!vars.is_empty());
    }
}
