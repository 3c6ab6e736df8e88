// src/builder/mod.rs

//! Configuration document builder
//!
//! Orchestrates the entry store, the generator registry, and package
//! completion to produce one complete configuration document per client
//! request. Failure is entry-scoped: an entry that cannot be bound is
//! marked failed in place and its siblings still resolve. Only a
//! metadata failure for the whole client yields the `error` document.

mod generator;

pub use generator::{BindContext, Generator, OnDemandGenerator, TemplateGenerator, render_template};

use crate::document::{ConfigDocument, Configuration, Entry, EntryKind, Structure};
use crate::identity::ClientIdentity;
use crate::metadata::MetadataSource;
use crate::packages::Collection;
use crate::store::StoreHandle;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Builds fully bound configuration documents for clients.
///
/// Safe to share across concurrent requests: each build takes one store
/// snapshot up front and never mutates shared state.
pub struct Builder {
    store: Arc<StoreHandle>,
    collection: Collection,
    generators: Vec<Arc<dyn Generator>>,
    revision: String,
}

impl Builder {
    pub fn new(store: Arc<StoreHandle>, collection: Collection) -> Self {
        Self {
            store,
            collection,
            generators: Vec::new(),
            revision: String::from("0"),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn register(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generators.push(generator);
        self
    }

    /// Build a document for an authenticated hostname, using metadata to
    /// assemble identity and requested structures. Metadata failure is
    /// the one request-scoped error and produces the error document.
    pub fn build_for(&self, metadata: &dyn MetadataSource, hostname: &str) -> ConfigDocument {
        let client = match metadata.identity(hostname) {
            Ok(client) => client,
            Err(err) => {
                error!("metadata failure for client {hostname}: {err}");
                return ConfigDocument::error("metadata", err.to_string());
            }
        };
        let structures = metadata.structures(&client);
        ConfigDocument::Config(self.build(&client, &structures))
    }

    /// Bind all structures for a client into a concrete configuration
    pub fn build(&self, client: &ClientIdentity, structures: &[Structure]) -> Configuration {
        debug!("building configuration for {}", client.hostname);
        let snapshot = self.store.snapshot();
        let ctx = BindContext {
            client,
            store: &snapshot,
        };

        let mut config = Configuration::new(self.revision.clone());
        let mut requested: BTreeSet<String> = BTreeSet::new();
        let mut declared: BTreeSet<String> = BTreeSet::new();

        for structure in structures {
            let mut bound = structure.clone();
            bound.entries_mut().retain_mut(|entry| {
                if entry.kind == EntryKind::PackageGroup {
                    let category = entry.attr("category").map(str::to_string);
                    let members = self.collection.packages_from_group(
                        client,
                        &entry.name,
                        category.as_deref(),
                    );
                    if members.is_empty() {
                        warn!(
                            "package group '{}' is empty for client {}",
                            entry.name, client.hostname
                        );
                    }
                    requested.extend(members);
                    // group references never reach the client
                    return false;
                }
                if entry.kind == EntryKind::Package {
                    requested.insert(entry.name.clone());
                    declared.insert(entry.name.clone());
                }
                self.bind_entry(entry, &ctx);
                true
            });
            config.structures.push(bound);
        }

        let (closure, unknown) = self.collection.complete(client, &requested);
        if !unknown.is_empty() {
            warn!(
                "client {}: unknown packages {:?}",
                client.hostname, unknown
            );
        }

        let added: Vec<Entry> = closure
            .iter()
            .filter(|name| !declared.contains(*name))
            .map(|name| Entry::new(EntryKind::Package, name.clone()).with_attr("origin", "deps"))
            .collect();
        if !added.is_empty() {
            debug!(
                "client {}: completion added {} packages",
                client.hostname,
                added.len()
            );
            config.structures.push(Structure::Independent(added));
        }

        config
    }

    /// Bind one entry, converting any error into an entry-scoped failure
    fn bind_entry(&self, entry: &mut Entry, ctx: &BindContext<'_>) {
        let handlers: Vec<&Arc<dyn Generator>> = self
            .generators
            .iter()
            .filter(|g| g.handles(entry))
            .collect();

        match handlers.as_slice() {
            [] => {
                if entry.kind == EntryKind::Path && entry.text.is_none() {
                    error!(
                        "no generator for required entry {}:{}",
                        entry.kind, entry.name
                    );
                    entry.mark_failure("no generator for entry");
                }
            }
            [generator] => {
                if let Err(err) = generator.bind(entry, ctx) {
                    error!(
                        "failed to bind {}:{} for {}: {err}",
                        entry.kind, entry.name, ctx.client.hostname
                    );
                    entry.mark_failure(err.to_string());
                }
            }
            multiple => {
                let names: Vec<&str> = multiple.iter().map(|g| g.name()).collect();
                error!(
                    "{}:{} served by multiple generators: {}",
                    entry.kind,
                    entry.name,
                    names.join(", ")
                );
                entry.mark_failure("served by multiple generators");
            }
        }
    }
}
