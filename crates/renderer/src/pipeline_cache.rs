//! Shader-keyed pipeline deduplication.
//!
//! Drawables that name the same shader share one [`Arc`]ed pipeline. Setup
//! runs in two passes:
//!
//! 1. [`group_by_shader`] makes drawables with equal keys contiguous, keeping
//!    the order in which each key was first seen.
//! 2. [`assign_pipelines`] walks the grouped list and builds a pipeline only
//!    for the first drawable of each key, recording it as the owner in a
//!    [`PipelineCache`].
//!
//! The cache is rebuilt from scratch on every swapchain recreation and is
//! read-only while frames are in flight.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::{debug, warn};

/// Result of [`PipelineCache::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was new and now maps to the given owner.
    Inserted,
    /// The key already had an owner. The existing owner is kept.
    AlreadyOwned(usize),
    /// The key was new but the cache was already at its declared capacity.
    /// The key is stored anyway.
    OverCapacity,
}

/// Maps a shader identifier to the index of the drawable that owns the
/// pipeline built for it. The first insert for a key wins.
#[derive(Debug, Default)]
pub struct PipelineCache {
    owners: HashMap<String, usize>,
    capacity: usize,
}

impl PipelineCache {
    /// Creates an empty cache sized for `capacity` distinct shaders.
    ///
    /// `capacity` is normally the number of drawables, which bounds the
    /// number of distinct keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            owners: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `owner_index` as the owner of `key` unless the key already has
    /// one.
    pub fn insert(&mut self, key: &str, owner_index: usize) -> InsertOutcome {
        let len = self.owners.len();
        match self.owners.entry(key.to_owned()) {
            Entry::Occupied(entry) => InsertOutcome::AlreadyOwned(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(owner_index);
                if len >= self.capacity {
                    warn!(
                        "Pipeline cache over capacity ({} entries), storing '{}' anyway",
                        self.capacity, key
                    );
                    InsertOutcome::OverCapacity
                } else {
                    InsertOutcome::Inserted
                }
            }
        }
    }

    /// Index of the drawable owning `key`'s pipeline, if any.
    pub fn search(&self, key: &str) -> Option<usize> {
        self.owners.get(key).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discards every entry. Pipelines themselves are owned by the drawables
    /// and are unaffected.
    pub fn destroy(self) {
        debug!("Destroying pipeline cache with {} entries", self.owners.len());
    }
}

/// Reorders `items` so that items with the same key are adjacent.
///
/// Groups appear in the order their key was first seen, and items keep their
/// relative order inside a group.
pub fn group_by_shader<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut group_of: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();

    for item in items {
        let index = match group_of.entry(key(&item).to_owned()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                groups.push(Vec::new());
                *entry.insert(groups.len() - 1)
            }
        };
        groups[index].push(item);
    }

    groups.into_iter().flatten().collect()
}

/// Resolves one pipeline per entry of `keys`, building each distinct key at
/// most once.
///
/// `keys` should already be grouped with [`group_by_shader`]. A key equal to
/// the previous one reuses that pipeline directly. A key seen earlier but not
/// adjacent is still found through `cache`, so nothing is ever built twice.
pub fn assign_pipelines<P, F>(
    cache: &mut PipelineCache,
    keys: &[&str],
    mut build: F,
) -> turt_rhi::RhiResult<Vec<Arc<P>>>
where
    F: FnMut(&str) -> turt_rhi::RhiResult<P>,
{
    let mut assigned: Vec<Arc<P>> = Vec::with_capacity(keys.len());

    for (index, &key) in keys.iter().enumerate() {
        if index > 0 && keys[index - 1] == key {
            let previous = Arc::clone(&assigned[index - 1]);
            assigned.push(previous);
            continue;
        }

        if let Some(owner) = cache.search(key) {
            debug!("Shader '{}' is not grouped, reusing pipeline of #{}", key, owner);
            let shared = Arc::clone(&assigned[owner]);
            assigned.push(shared);
            continue;
        }

        debug!("Building pipeline for shader '{}' (owner #{})", key, index);
        let pipeline = Arc::new(build(key)?);
        cache.insert(key, index);
        assigned.push(pipeline);
    }

    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_finds_every_inserted_key() {
        let keys = ["basic", "glow", "wire", "a", "ab", "ba"];
        let mut cache = PipelineCache::new(keys.len());

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(cache.insert(key, i), InsertOutcome::Inserted);
        }

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(cache.search(key), Some(i));
        }
        assert_eq!(cache.search("missing"), None);
        assert_eq!(cache.len(), keys.len());
    }

    #[test]
    fn test_first_insert_wins() {
        let mut cache = PipelineCache::new(2);
        assert_eq!(cache.insert("shader", 0), InsertOutcome::Inserted);
        assert_eq!(cache.search("shader"), Some(0));

        assert_eq!(cache.insert("shader", 1), InsertOutcome::AlreadyOwned(0));
        assert_eq!(cache.search("shader"), Some(0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_over_capacity_still_stores() {
        let mut cache = PipelineCache::new(1);
        assert_eq!(cache.insert("one", 0), InsertOutcome::Inserted);
        assert_eq!(cache.insert("two", 1), InsertOutcome::OverCapacity);
        assert_eq!(cache.search("two"), Some(1));
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_zero_capacity() {
        let mut cache = PipelineCache::new(0);
        assert!(cache.is_empty());
        assert_eq!(cache.insert("x", 0), InsertOutcome::OverCapacity);
        assert_eq!(cache.search("x"), Some(0));
    }

    #[test]
    fn test_group_by_shader_is_stable() {
        let items = vec![
            ("a", 0),
            ("b", 1),
            ("a", 2),
            ("c", 3),
            ("b", 4),
            ("a", 5),
        ];
        let grouped = group_by_shader(items, |item| item.0);
        let order: Vec<usize> = grouped.iter().map(|item| item.1).collect();
        assert_eq!(order, vec![0, 2, 5, 1, 4, 3]);
    }

    #[test]
    fn test_group_by_shader_empty() {
        let grouped: Vec<(&str, u32)> = group_by_shader(Vec::new(), |item| item.0);
        assert!(grouped.is_empty());
    }

    #[test]
    fn test_shared_shader_builds_once() {
        let keys = ["shader", "shader"];
        let mut cache = PipelineCache::new(keys.len());
        let mut builds = 0;

        let pipelines = assign_pipelines(&mut cache, &keys, |key| {
            builds += 1;
            Ok(key.to_owned())
        })
        .unwrap();

        assert_eq!(builds, 1);
        assert_eq!(cache.search("shader"), Some(0));
        assert!(Arc::ptr_eq(&pipelines[0], &pipelines[1]));
    }

    #[test]
    fn test_owner_recorded_before_second_drawable() {
        let keys = ["shader", "shader"];
        let mut cache = PipelineCache::new(keys.len());

        let first = assign_pipelines(&mut cache, &keys[..1], |key| Ok(key.to_owned())).unwrap();
        assert_eq!(cache.search("shader"), Some(0));
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_distinct_shaders_build_separately() {
        let keys = ["a", "a", "b", "c", "c"];
        let mut cache = PipelineCache::new(keys.len());
        let mut built = Vec::new();

        let pipelines = assign_pipelines(&mut cache, &keys, |key| {
            built.push(key.to_owned());
            Ok(built.len())
        })
        .unwrap();

        assert_eq!(built, vec!["a", "b", "c"]);
        assert!(Arc::ptr_eq(&pipelines[0], &pipelines[1]));
        assert!(!Arc::ptr_eq(&pipelines[1], &pipelines[2]));
        assert!(Arc::ptr_eq(&pipelines[3], &pipelines[4]));
        assert_eq!(cache.search("c"), Some(3));
    }

    #[test]
    fn test_ungrouped_keys_still_share() {
        let keys = ["a", "b", "a"];
        let mut cache = PipelineCache::new(keys.len());
        let mut builds = 0;

        let pipelines = assign_pipelines(&mut cache, &keys, |_| {
            builds += 1;
            Ok(builds)
        })
        .unwrap();

        assert_eq!(builds, 2);
        assert!(Arc::ptr_eq(&pipelines[0], &pipelines[2]));
    }

    #[test]
    fn test_build_error_propagates() {
        let keys = ["ok", "broken"];
        let mut cache = PipelineCache::new(keys.len());

        let result = assign_pipelines(&mut cache, &keys, |key| {
            if key == "broken" {
                Err(turt_rhi::RhiError::ShaderError("missing".to_string()))
            } else {
                Ok(())
            }
        });

        assert!(result.is_err());
        assert_eq!(cache.search("broken"), None);
    }
}
