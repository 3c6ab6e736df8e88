// src/identity.rs

//! Client identity: who a configuration is being built for
//!
//! Built once per request by the metadata subsystem and read-only
//! afterward. Group order matters for nothing; the set is kept ordered so
//! group-scoped caches can use the membership list as a stable key.

use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Identity and facts for one client
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Canonical hostname
    pub hostname: String,
    /// Resolved alternate names
    pub aliases: HashSet<String>,
    /// Group membership, including derived groups
    pub groups: BTreeSet<String>,
    /// Probed key-value facts
    pub facts: BTreeMap<String, String>,
}

impl ClientIdentity {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            aliases: HashSet::new(),
            groups: BTreeSet::new(),
            facts: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    /// Membership list in stable order, usable as a cache key
    pub fn group_key(&self) -> Vec<String> {
        self.groups.iter().cloned().collect()
    }
}
