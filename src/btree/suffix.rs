//! Auxiliary suffix-sharing index for `ends_with`/`contains` (§4.9): every
//! inserted string is decomposed into all of its tails (the suffixes
//! starting at each char boundary), each tail mapped back to the original
//! string(s) that produced it. `ends_with` is then an exact lookup on that
//! map, and `contains` a prefix scan over it, since a string contains
//! `needle` iff `needle` is a prefix of one of its tails.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
pub struct SuffixIndex {
    tails: BTreeMap<String, BTreeSet<String>>,
}

impl SuffixIndex {
    pub fn add(&mut self, s: &str) {
        for i in tail_starts(s) {
            self.tails.entry(s[i..].to_string()).or_default().insert(s.to_string());
        }
    }

    pub fn remove(&mut self, s: &str) {
        for i in tail_starts(s) {
            let tail = &s[i..];
            if let Some(set) = self.tails.get_mut(tail) {
                set.remove(s);
                if set.is_empty() {
                    self.tails.remove(tail);
                }
            }
        }
    }

    /// Strings whose tail at some start position equals `suffix` exactly —
    /// i.e. strings ending in `suffix`.
    pub fn ends_with(&self, suffix: &str) -> Vec<String> {
        self.tails.get(suffix).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    /// Strings with a tail that starts with `needle` — i.e. strings
    /// containing `needle` as a substring.
    pub fn contains(&self, needle: &str) -> Vec<String> {
        let mut out = BTreeSet::new();
        for (tail, originals) in self.tails.range(needle.to_string()..) {
            if !tail.starts_with(needle) {
                break;
            }
            out.extend(originals.iter().cloned());
        }
        out.into_iter().collect()
    }
}

fn tail_starts(s: &str) -> impl Iterator<Item = usize> + '_ {
    (0..s.len()).filter(|&i| s.is_char_boundary(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ends_with_matches_exact_tail() {
        let mut idx = SuffixIndex::default();
        idx.add("hello");
        idx.add("yellow");
        idx.add("mellow");

        assert_eq!(idx.ends_with("hello"), vec!["hello".to_string()]);
        assert_eq!(idx.ends_with("llow"), vec!["mellow".to_string(), "yellow".to_string()]);
        assert!(idx.ends_with("zzz").is_empty());
    }

    #[test]
    fn contains_matches_any_tail_prefix() {
        let mut idx = SuffixIndex::default();
        idx.add("hello");
        idx.add("yellow");
        idx.add("mellow");

        assert_eq!(idx.contains("ell"), vec!["hello".to_string(), "mellow".to_string(), "yellow".to_string()]);
        assert_eq!(idx.contains("y"), vec!["yellow".to_string()]);
        assert!(idx.contains("zzz").is_empty());
    }

    #[test]
    fn remove_drops_all_of_a_strings_tails() {
        let mut idx = SuffixIndex::default();
        idx.add("hello");
        idx.add("mellow");
        idx.remove("hello");

        assert!(idx.ends_with("hello").is_empty());
        assert_eq!(idx.contains("ell"), vec!["mellow".to_string()]);
    }

    #[test]
    fn handles_multibyte_strings_without_panicking_on_char_boundaries() {
        let mut idx = SuffixIndex::default();
        idx.add("caf\u{e9}s");
        assert_eq!(idx.ends_with("s"), vec!["caf\u{e9}s".to_string()]);
        assert_eq!(idx.contains("\u{e9}"), vec!["caf\u{e9}s".to_string()]);
    }
}
