//! Size-tiered merge candidate selection (§4.7) behind a `MergePolicy`
//! trait, implemented by `none`/`immediate`/`multiway`/`geometric`
//! strategies (see DESIGN.md for what this is grounded on). Barrels are
//! ranked by `num_docs` (SPEC_FULL §F "doc-count-based merge-candidate
//! ordering") since the manifest never tracks on-disk byte size.

use crate::core::config::MergeStrategy;
use crate::manifest::BarrelDescriptor;

/// Decides which live barrels, if any, should be merged next. Implementations
/// only ever see the barrels the scheduler isn't already merging.
pub trait MergePolicy: Send + Sync {
    /// Names of barrels to merge together, oldest first, or `None` if no
    /// merge is warranted right now.
    fn select(&self, barrels: &[BarrelDescriptor]) -> Option<Vec<String>>;
}

pub struct NeverMerge;

impl MergePolicy for NeverMerge {
    fn select(&self, _barrels: &[BarrelDescriptor]) -> Option<Vec<String>> {
        None
    }
}

/// After every flush, merge the two smallest adjacent-by-size barrels if
/// their size ratio is within `max_ratio` (§4.7 "immediate").
pub struct ImmediateMerge {
    pub max_ratio: f64,
}

impl Default for ImmediateMerge {
    fn default() -> Self {
        ImmediateMerge { max_ratio: 4.0 }
    }
}

impl MergePolicy for ImmediateMerge {
    fn select(&self, barrels: &[BarrelDescriptor]) -> Option<Vec<String>> {
        if barrels.len() < 2 {
            return None;
        }
        let mut sorted: Vec<&BarrelDescriptor> = barrels.iter().collect();
        sorted.sort_by_key(|b| b.num_docs);
        let small = sorted[0];
        let big = sorted[1];
        let ratio = big.num_docs.max(1) as f64 / small.num_docs.max(1) as f64;
        if ratio <= self.max_ratio {
            Some(vec![small.name.clone(), big.name.clone()])
        } else {
            None
        }
    }
}

/// When `k` barrels of similar size accumulate, merge them all in one pass
/// (§4.7 "multiway").
pub struct MultiwayMerge {
    pub k: usize,
    pub size_tolerance: f64,
}

impl MultiwayMerge {
    pub fn new(k: usize) -> Self {
        MultiwayMerge { k, size_tolerance: 3.0 }
    }
}

impl MergePolicy for MultiwayMerge {
    fn select(&self, barrels: &[BarrelDescriptor]) -> Option<Vec<String>> {
        if barrels.len() < self.k {
            return None;
        }
        let mut sorted: Vec<&BarrelDescriptor> = barrels.iter().collect();
        sorted.sort_by_key(|b| b.num_docs);
        for window in sorted.windows(self.k) {
            let min = window.first().unwrap().num_docs.max(1) as f64;
            let max = window.last().unwrap().num_docs.max(1) as f64;
            if max / min <= self.size_tolerance {
                return Some(window.iter().map(|b| b.name.clone()).collect());
            }
        }
        None
    }
}

/// Partition barrels into geometric size classes (each `growth_factor`
/// larger than the last); when a class has `k` members, collapse it (§4.7
/// "geometric", the default for large indexes).
pub struct GeometricMerge {
    pub k: usize,
    pub growth_factor: f64,
}

impl GeometricMerge {
    pub fn new(k: usize) -> Self {
        GeometricMerge { k, growth_factor: 3.0 }
    }

    fn size_class(&self, num_docs: u32) -> i64 {
        let size = num_docs.max(1) as f64;
        (size.ln() / self.growth_factor.ln()).floor() as i64
    }
}

impl MergePolicy for GeometricMerge {
    fn select(&self, barrels: &[BarrelDescriptor]) -> Option<Vec<String>> {
        if barrels.is_empty() {
            return None;
        }
        let mut classes: std::collections::BTreeMap<i64, Vec<&BarrelDescriptor>> = Default::default();
        for b in barrels {
            classes.entry(self.size_class(b.num_docs)).or_default().push(b);
        }
        for members in classes.values() {
            if members.len() >= self.k {
                return Some(members.iter().take(self.k).map(|b| b.name.clone()).collect());
            }
        }
        None
    }
}

/// Build the policy configured by `strategy` (§6 `merge_strategy`).
pub fn from_strategy(strategy: MergeStrategy) -> Box<dyn MergePolicy> {
    match strategy {
        MergeStrategy::None => Box::new(NeverMerge),
        MergeStrategy::Immediate => Box::new(ImmediateMerge::default()),
        MergeStrategy::Multiway { k } => Box::new(MultiwayMerge::new(k)),
        MergeStrategy::Geometric { k } => Box::new(GeometricMerge::new(k)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CollectionId, DocId};

    fn barrel(name: &str, num_docs: u32) -> BarrelDescriptor {
        BarrelDescriptor {
            name: name.to_string(),
            base_doc_ids: vec![(CollectionId(0), DocId(1))],
            num_docs,
            max_doc_id: DocId(num_docs),
            has_update_docs: false,
        }
    }

    #[test]
    fn never_merge_always_declines() {
        let barrels = vec![barrel("0", 10), barrel("1", 10)];
        assert!(NeverMerge.select(&barrels).is_none());
    }

    #[test]
    fn immediate_merge_picks_two_similar_sized_barrels() {
        let policy = ImmediateMerge::default();
        let barrels = vec![barrel("0", 100), barrel("1", 110), barrel("2", 5000)];
        let picked = policy.select(&barrels).unwrap();
        assert_eq!(picked, vec!["0".to_string(), "1".to_string()]);
    }

    #[test]
    fn immediate_merge_declines_when_sizes_diverge() {
        let policy = ImmediateMerge::default();
        let barrels = vec![barrel("0", 10), barrel("1", 1000)];
        assert!(policy.select(&barrels).is_none());
    }

    #[test]
    fn multiway_merge_waits_for_k_similar_barrels() {
        let policy = MultiwayMerge::new(3);
        let few = vec![barrel("0", 100), barrel("1", 100)];
        assert!(policy.select(&few).is_none());

        let enough = vec![barrel("0", 100), barrel("1", 110), barrel("2", 120)];
        let picked = policy.select(&enough).unwrap();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn geometric_merge_collapses_a_full_size_class() {
        let policy = GeometricMerge::new(3);
        let barrels = vec![
            barrel("0", 10),
            barrel("1", 11),
            barrel("2", 12),
            barrel("3", 10_000),
        ];
        let picked = policy.select(&barrels).unwrap();
        assert_eq!(picked.len(), 3);
        assert!(!picked.contains(&"3".to_string()));
    }
}
