//! Engagement tag sets.

use crate::inventory::Container;
use std::collections::HashSet;
use std::hash::Hash;

/// Whether both sides hold the same elements, ignoring order and duplicates
pub fn same_elements<T, A, B>(a: A, b: B) -> bool
where
    T: Eq + Hash,
    A: IntoIterator<Item = T>,
    B: IntoIterator<Item = T>,
{
    let left: HashSet<T> = a.into_iter().collect();
    let right: HashSet<T> = b.into_iter().collect();
    left == right
}

/// Tags describing the images currently running in a pod.
///
/// Empty when no container has a resolved digest. Otherwise each container
/// contributes its digest, or its lower-cased image reference when the digest
/// is missing; first occurrence order is kept and duplicates dropped.
pub fn current_tags(containers: &[Container]) -> Vec<String> {
    if containers.iter().all(|c| c.digest.is_empty()) {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    containers
        .iter()
        .map(|c| {
            if c.digest.is_empty() {
                c.image.to_lowercase()
            } else {
                c.digest.clone()
            }
        })
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}
