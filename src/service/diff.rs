//! Symmetric set difference driving address and slave updates

use std::collections::BTreeSet;

/// Elements to remove from and add to a current set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    pub remove: Vec<T>,
    pub add: Vec<T>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Compute what turns `current` into `desired`
///
/// Elements present in both are left out. Both lists come back sorted.
pub fn symmetric_diff<T: Ord + Clone>(current: &BTreeSet<T>, desired: &BTreeSet<T>) -> Diff<T> {
    Diff {
        remove: current.difference(desired).cloned().collect(),
        add: desired.difference(current).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn apply(current: &BTreeSet<String>, diff: &Diff<String>) -> BTreeSet<String> {
        let mut result = current.clone();
        for item in &diff.remove {
            assert!(result.remove(item));
        }
        for item in &diff.add {
            assert!(result.insert(item.clone()));
        }
        result
    }

    #[test]
    fn test_diff_leaves_common_elements() {
        let diff = symmetric_diff(&set(&["a", "b", "c"]), &set(&["b", "c", "d"]));
        assert_eq!(diff.remove, vec!["a"]);
        assert_eq!(diff.add, vec!["d"]);
    }

    #[test]
    fn test_applying_diff_yields_desired() {
        let cases = [
            (set(&[]), set(&[])),
            (set(&[]), set(&["10.0.0.1/24"])),
            (set(&["10.0.0.1/24"]), set(&[])),
            (set(&["a", "b"]), set(&["a", "b"])),
            (set(&["a", "b", "c"]), set(&["x", "y"])),
            (set(&["eth1", "eth2"]), set(&["eth2", "eth3", "eth4"])),
        ];

        for (current, desired) in &cases {
            let diff = symmetric_diff(current, desired);
            assert!(diff.remove.iter().all(|r| !diff.add.contains(r)));
            assert_eq!(&apply(current, &diff), desired);
        }
    }

    #[test]
    fn test_equal_sets_produce_empty_diff() {
        let current = set(&["a", "b"]);
        assert!(symmetric_diff(&current, &current.clone()).is_empty());
    }
}
