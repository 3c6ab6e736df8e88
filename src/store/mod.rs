// src/store/mod.rs

//! Versioned store of declarative entry layers
//!
//! Each logical entry name maps to a set of candidate layers, one per
//! specificity. Backed conceptually by a directory tree where a file's
//! name encodes its specificity suffix; the store itself only exposes the
//! parsed layer set. Published snapshots are immutable, so concurrent
//! builds for different clients need no locking once they hold one.

use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use crate::specificity::Specificity;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};
use walkdir::WalkDir;

/// One candidate definition of an entry's content
#[derive(Debug, Clone)]
pub struct EntryLayer {
    pub specificity: Specificity,
    /// Source filename, used as the final lexical tie-break
    pub source: String,
    /// Raw content payload, possibly a template
    pub data: String,
}

impl EntryLayer {
    pub fn new(specificity: Specificity, source: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            specificity,
            source: source.into(),
            data: data.into(),
        }
    }
}

/// Layer sets indexed by logical entry name
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: HashMap<String, Vec<EntryLayer>>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, name: impl Into<String>, layer: EntryLayer) {
        self.entries.entry(name.into()).or_default().push(layer);
    }

    pub fn layers(&self, name: &str) -> &[EntryLayer] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn invalidate(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Load a store from a directory tree.
    ///
    /// Each leaf directory is one logical entry; files inside are layers
    /// named `<basename>[.suffix]` where the suffix encodes specificity.
    /// A malformed suffix rejects that layer with a logged error; the
    /// rest of the store loads normally.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut store = Self::new();

        for dirent in WalkDir::new(root).min_depth(1) {
            let dirent = dirent.map_err(|e| {
                Error::Config(format!("cannot walk {}: {e}", root.display()))
            })?;
            if !dirent.file_type().is_file() {
                continue;
            }
            let file_path = dirent.path();
            let parent = match file_path.parent().and_then(|p| p.strip_prefix(root).ok()) {
                Some(rel) if !rel.as_os_str().is_empty() => rel,
                _ => {
                    debug!("skipping top-level file {}", file_path.display());
                    continue;
                }
            };
            let logical = parent.to_string_lossy().into_owned();
            let base = match parent.file_name() {
                Some(base) => base.to_string_lossy().into_owned(),
                None => continue,
            };
            let filename = dirent.file_name().to_string_lossy().into_owned();

            match Specificity::from_filename(&base, &filename) {
                Ok(specificity) => {
                    let data = std::fs::read_to_string(file_path)?;
                    store.put(logical, EntryLayer::new(specificity, filename, data));
                }
                Err(err) => {
                    error!("rejecting layer {}: {err}", file_path.display());
                }
            }
        }

        Ok(store)
    }

    /// Select the best-matching layer for a client.
    ///
    /// Pure and deterministic for a fixed store snapshot: filter layers to
    /// those matching the client, then order host over group over all,
    /// group layers by descending priority, and finally by source
    /// filename. Returns `None` when nothing matches; callers decide
    /// whether that is fatal.
    pub fn best_matching(
        &self,
        name: &str,
        client: &ClientIdentity,
    ) -> Option<&EntryLayer> {
        let mut matching: Vec<&EntryLayer> = self
            .layers(name)
            .iter()
            .filter(|layer| layer.specificity.matches(client))
            .collect();
        if matching.is_empty() {
            return None;
        }

        matching.sort_by(|a, b| {
            b.specificity
                .score()
                .cmp(&a.specificity.score())
                .then_with(|| a.source.cmp(&b.source))
        });

        if matching.len() > 1 && matching[0].specificity.score() == matching[1].specificity.score()
        {
            debug!(
                "layers {} and {} for '{name}' tie on specificity; using lexical order",
                matching[0].source, matching[1].source
            );
        }

        Some(matching[0])
    }
}

/// Atomically swappable store snapshot.
///
/// Readers take a cheap `Arc` clone and keep a consistent view for the
/// whole build even if the underlying tree reloads mid-flight.
#[derive(Debug)]
pub struct StoreHandle {
    inner: RwLock<Arc<EntryStore>>,
}

impl StoreHandle {
    pub fn new(store: EntryStore) -> Self {
        Self {
            inner: RwLock::new(Arc::new(store)),
        }
    }

    pub fn snapshot(&self) -> Arc<EntryStore> {
        self.inner.read().expect("store lock poisoned").clone()
    }

    /// Publish a freshly built snapshot; in-flight readers keep the old one
    pub fn publish(&self, store: EntryStore) {
        *self.inner.write().expect("store lock poisoned") = Arc::new(store);
    }
}
