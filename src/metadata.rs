// src/metadata.rs

//! Client metadata: identities and requested structures
//!
//! The real metadata subsystem (group inheritance, probes, categories)
//! lives outside the engine; the builder only needs something that can
//! hand it a `ClientIdentity` and the abstract structures requested for
//! that client. `StaticMetadata` reads both from a TOML description.

use crate::document::{Bundle, Entry, EntryKind, Structure};
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Where the builder learns who a client is and what it wants
pub trait MetadataSource: Send + Sync {
    /// Assemble the identity for a hostname
    fn identity(&self, hostname: &str) -> Result<ClientIdentity>;

    /// The abstract structures (unbound bundles) requested for a client
    fn structures(&self, client: &ClientIdentity) -> Vec<Structure>;
}

/// One entry inside a bundle description
#[derive(Debug, Clone, Deserialize)]
struct EntrySpec {
    kind: String,
    name: String,
    #[serde(flatten)]
    attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSpec {
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    bundles: Vec<String>,
    #[serde(default)]
    facts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BundleSpec {
    entries: Vec<EntrySpec>,
}

/// Declarative metadata loaded from a TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct StaticMetadata {
    clients: BTreeMap<String, ClientSpec>,
    #[serde(default)]
    bundles: BTreeMap<String, BundleSpec>,
}

impl StaticMetadata {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let metadata: StaticMetadata = toml::from_str(raw)?;
        Ok(metadata)
    }
}

impl MetadataSource for StaticMetadata {
    fn identity(&self, hostname: &str) -> Result<ClientIdentity> {
        let spec = self
            .clients
            .get(hostname)
            .ok_or_else(|| Error::Metadata(hostname.to_string()))?;
        let mut identity = ClientIdentity::new(hostname)
            .with_groups(spec.groups.iter().cloned());
        for alias in &spec.aliases {
            identity = identity.with_alias(alias.clone());
        }
        for (key, value) in &spec.facts {
            identity = identity.with_fact(key.clone(), value.clone());
        }
        Ok(identity)
    }

    fn structures(&self, client: &ClientIdentity) -> Vec<Structure> {
        let Some(spec) = self.clients.get(&client.hostname) else {
            return Vec::new();
        };
        let mut structures = Vec::new();
        for bundle_name in &spec.bundles {
            let Some(bundle_spec) = self.bundles.get(bundle_name) else {
                warn!("client {} requests unknown bundle {bundle_name}", client.hostname);
                continue;
            };
            let mut bundle = Bundle::new(bundle_name.clone());
            for entry_spec in &bundle_spec.entries {
                match EntryKind::from_str(&entry_spec.kind) {
                    Ok(kind) => {
                        let mut entry = Entry::new(kind, entry_spec.name.clone());
                        for (key, value) in &entry_spec.attrs {
                            entry.set_attr(key.clone(), value.clone());
                        }
                        bundle.entries.push(entry);
                    }
                    Err(_) => {
                        warn!(
                            "bundle {bundle_name}: unknown entry kind '{}'",
                            entry_spec.kind
                        );
                    }
                }
            }
            structures.push(Structure::Bundle(bundle));
        }
        structures
    }
}
