// src/packages/cache.rs

//! Virtual-package table cache, scoped by relevant group set
//!
//! The same virtual name can resolve differently for clients with
//! different group membership (e.g. architecture groups), so tables are
//! cached per distinct group list, never globally. The cache is an
//! explicit object with a defined lifecycle: injected into the
//! collection, cleared on source reload.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Virtual name to provider set
pub type VpkgTable = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Default)]
pub struct CollectionCache {
    tables: Mutex<HashMap<Vec<String>, Arc<VpkgTable>>>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the table for a group set, building it on first use
    pub fn vpkg_table<F>(&self, groups: &[String], build: F) -> Arc<VpkgTable>
    where
        F: FnOnce() -> VpkgTable,
    {
        let mut tables = self.tables.lock().expect("cache lock poisoned");
        if let Some(table) = tables.get(groups) {
            return table.clone();
        }
        let table = Arc::new(build());
        tables.insert(groups.to_vec(), table.clone());
        table
    }

    /// Drop all cached tables; called when sources reload
    pub fn clear(&self) {
        self.tables.lock().expect("cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.tables.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_once_per_group_set() {
        let cache = CollectionCache::new();
        let groups = vec!["x86_64".to_string()];
        let mut builds = 0;

        for _ in 0..3 {
            cache.vpkg_table(&groups, || {
                builds += 1;
                VpkgTable::new()
            });
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_group_sets_get_distinct_tables() {
        let cache = CollectionCache::new();
        cache.vpkg_table(&["a".to_string()], VpkgTable::new);
        cache.vpkg_table(&["b".to_string()], VpkgTable::new);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear() {
        let cache = CollectionCache::new();
        cache.vpkg_table(&[], VpkgTable::new);
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
