// src/builder/generator.rs

//! Content generators: how an abstract entry gets its concrete payload
//!
//! A generator binds content into an entry for one client. Template
//! generators substitute client facts into stored layer data; on-demand
//! generators create material the first time any client asks for it and
//! persist it back to their backing directory.

use crate::document::{Entry, EntryKind};
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use crate::store::EntryStore;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a generator may consult while binding one entry.
///
/// The store reference is a single snapshot taken at the start of the
/// build, so every entry in one document resolves against the same view.
pub struct BindContext<'a> {
    pub client: &'a ClientIdentity,
    pub store: &'a EntryStore,
}

/// Binds concrete content into entries it recognizes
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this generator can bind the given entry
    fn handles(&self, entry: &Entry) -> bool;

    /// Bind content and attributes into the entry for this client.
    /// Errors are entry-scoped; the caller marks the entry failed and
    /// moves on.
    fn bind(&self, entry: &mut Entry, ctx: &BindContext<'_>) -> Result<()>;
}

/// Substitute `${hostname}` and `${fact}` references against a client
pub fn render_template(template: &str, client: &ClientIdentity) -> String {
    let mut rendered = template.replace("${hostname}", &client.hostname);
    for (key, value) in &client.facts {
        rendered = rendered.replace(&format!("${{{key}}}"), value);
    }
    rendered
}

/// Binds Path entries from stored layers, rendering fact templates.
///
/// The logical store name of a path entry is its name without the
/// leading slash, e.g. `/etc/motd` lives under `etc/motd`.
pub struct TemplateGenerator {
    defaults: Vec<(String, String)>,
}

impl TemplateGenerator {
    pub fn new() -> Self {
        Self {
            defaults: vec![
                ("type".to_string(), "file".to_string()),
                ("owner".to_string(), "root".to_string()),
                ("group".to_string(), "root".to_string()),
                ("mode".to_string(), "0644".to_string()),
            ],
        }
    }
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    fn handles(&self, entry: &Entry) -> bool {
        entry.kind == EntryKind::Path
    }

    fn bind(&self, entry: &mut Entry, ctx: &BindContext<'_>) -> Result<()> {
        let logical = entry.name.trim_start_matches('/').to_string();
        let layer = ctx
            .store
            .best_matching(&logical, ctx.client)
            .ok_or_else(|| Error::Resolution {
                name: entry.name.clone(),
                client: ctx.client.hostname.clone(),
            })?;

        debug!(
            "bound {} for {} from layer {} ({})",
            entry.name, ctx.client.hostname, layer.source, layer.specificity
        );
        entry.text = Some(render_template(&layer.data, ctx.client));
        for (key, value) in &self.defaults {
            if !entry.attrs.contains_key(key) {
                entry.set_attr(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Generates per-host material on first request and persists it.
///
/// Concurrent requests for the same not-yet-generated name must not race
/// to write the same file twice: the first requester claims the name in
/// an in-flight set and generates; everyone else polls for the artifact
/// with a bounded retry count before giving up.
pub struct OnDemandGenerator {
    label: String,
    dir: PathBuf,
    inflight: Mutex<HashSet<String>>,
    produce: Box<dyn Fn(&str, &ClientIdentity) -> Result<String> + Send + Sync>,
    poll_interval: Duration,
    poll_retries: u32,
}

impl OnDemandGenerator {
    pub fn new<F>(label: impl Into<String>, dir: impl Into<PathBuf>, produce: F) -> Self
    where
        F: Fn(&str, &ClientIdentity) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            dir: dir.into(),
            inflight: Mutex::new(HashSet::new()),
            produce: Box::new(produce),
            poll_interval: Duration::from_millis(50),
            poll_retries: 20,
        }
    }

    /// Artifact path for one entry bound to one host
    fn artifact_path(&self, entry_name: &str, hostname: &str) -> PathBuf {
        let base = entry_name.trim_start_matches('/').replace('/', "_");
        self.dir.join(format!("{base}.H_{hostname}"))
    }

    fn generate(&self, entry: &Entry, client: &ClientIdentity, target: &PathBuf) -> Result<String> {
        let content = (self.produce)(entry.name.as_str(), client).map_err(|e| {
            Error::Generation {
                name: entry.name.clone(),
                client: client.hostname.clone(),
                reason: e.to_string(),
            }
        })?;

        fs::create_dir_all(&self.dir)?;
        // write-then-rename so a concurrent reader never sees a partial file
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(target)
            .map_err(|e| Error::Io(e.error))?;
        Ok(content)
    }
}

impl Generator for OnDemandGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    fn handles(&self, entry: &Entry) -> bool {
        entry.kind == EntryKind::Path && entry.attr("generated") == Some("true")
    }

    fn bind(&self, entry: &mut Entry, ctx: &BindContext<'_>) -> Result<()> {
        let target = self.artifact_path(&entry.name, &ctx.client.hostname);

        if let Ok(existing) = fs::read_to_string(&target) {
            entry.text = Some(existing);
            return Ok(());
        }

        let claimed = self
            .inflight
            .lock()
            .expect("inflight lock poisoned")
            .insert(target.to_string_lossy().into_owned());

        if claimed {
            // the artifact may have landed between the first check and the claim
            if let Ok(existing) = fs::read_to_string(&target) {
                self.inflight
                    .lock()
                    .expect("inflight lock poisoned")
                    .remove(&target.to_string_lossy().into_owned());
                entry.text = Some(existing);
                return Ok(());
            }
            let result = self.generate(entry, ctx.client, &target);
            self.inflight
                .lock()
                .expect("inflight lock poisoned")
                .remove(&target.to_string_lossy().into_owned());
            entry.text = Some(result?);
            return Ok(());
        }

        // another request is generating this artifact; wait for it to land
        for _ in 0..self.poll_retries {
            std::thread::sleep(self.poll_interval);
            if let Ok(existing) = fs::read_to_string(&target) {
                entry.text = Some(existing);
                return Ok(());
            }
        }
        warn!(
            "{}: gave up waiting for generated artifact {}",
            self.label,
            target.display()
        );
        Err(Error::Generation {
            name: entry.name.clone(),
            client: ctx.client.hostname.clone(),
            reason: "timed out waiting for concurrent generation".to_string(),
        })
    }
}
