// src/reconcile/tools.rs

//! Tool driver capability interface and registry
//!
//! A tool is an external capability provider (package manager wrapper,
//! file operations, service manager) that can verify, install, and
//! remove specific entry kinds. Dispatch is resolved once at
//! registration time into a kind-to-tool table; nothing is looked up by
//! naming convention at call time.

use crate::document::{Bundle, Entry, EntryId, EntryKind};
use crate::error::Result;
use log::{error, info, warn};
use std::collections::HashMap;

/// Capability interface implemented by every driver
pub trait Tool {
    fn name(&self) -> &str;

    /// Entry kinds this tool claims
    fn kinds(&self) -> Vec<EntryKind>;

    fn handles(&self, entry: &Entry) -> bool {
        self.kinds().contains(&entry.kind)
    }

    /// Entries that failed to bind server-side cannot be verified
    fn can_verify(&self, entry: &Entry) -> bool {
        self.handles(entry) && !entry.is_failed()
    }

    /// Check whether the host currently satisfies the entry
    fn verify(&mut self, entry: &Entry) -> Result<bool>;

    fn can_install(&self, entry: &Entry) -> bool {
        self.handles(entry) && !entry.is_failed()
    }

    /// Bring the host into compliance for one entry; returns whether the
    /// entry is now good
    fn install(&mut self, entry: &Entry) -> Result<bool>;

    /// Remove extra entries of this tool's kinds; per-batch, failures
    /// are reported through the Result and never cascade
    fn remove(&mut self, entries: &[Entry]) -> Result<()>;

    /// Entries present on the host but absent from the specification
    fn find_extra(&mut self) -> Vec<Entry> {
        Vec::new()
    }

    /// Called after install for each bundle that had entries modified
    fn bundle_updated(&mut self, bundle: &Bundle) {
        let _ = bundle;
    }

    /// Called after install for each bundle left untouched
    fn bundle_not_updated(&mut self, bundle: &Bundle) {
        let _ = bundle;
    }
}

/// Registered tools with kind dispatch fixed at registration time
#[derive(Default)]
pub struct ToolSet {
    tools: Vec<Box<dyn Tool>>,
    by_kind: HashMap<EntryKind, usize>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; the first tool to claim a kind keeps it
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let index = self.tools.len();
        for kind in tool.kinds() {
            match self.by_kind.entry(kind) {
                std::collections::hash_map::Entry::Occupied(existing) => {
                    warn!(
                        "tool {} also claims {kind}; keeping {}",
                        tool.name(),
                        self.tools[*existing.get()].name()
                    );
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(index);
                }
            }
        }
        info!("loaded tool driver {}", tool.name());
        self.tools.push(tool);
    }

    /// Register a tool whose construction may fail; a driver that cannot
    /// initialize is excluded from the run while the others continue
    pub fn register_or_skip(&mut self, tool: Result<Box<dyn Tool>>) {
        match tool {
            Ok(tool) => self.register(tool),
            Err(err) => warn!("excluding tool driver: {err}"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    fn tool_for(&mut self, entry: &Entry) -> Option<&mut Box<dyn Tool>> {
        let index = *self.by_kind.get(&entry.kind)?;
        Some(&mut self.tools[index])
    }

    /// Whether any registered tool handles this entry
    pub fn handles(&self, entry: &Entry) -> bool {
        self.by_kind.contains_key(&entry.kind)
    }

    /// Verify one entry through its claiming tool. `None` means no tool
    /// could verify it; the entry stays in its current state.
    pub fn verify(&mut self, entry: &Entry) -> Option<Result<bool>> {
        let tool = self.tool_for(entry)?;
        if !tool.can_verify(entry) {
            return None;
        }
        Some(tool.verify(entry))
    }

    /// Install one entry through its claiming tool
    pub fn install(&mut self, entry: &Entry) -> Option<Result<bool>> {
        let tool = self.tool_for(entry)?;
        if !tool.can_install(entry) {
            return None;
        }
        Some(tool.install(entry))
    }

    /// Remove extra entries, batched per claiming tool. Returns the ids
    /// actually removed; a failing batch is logged and never blocks the
    /// other batches.
    pub fn remove(&mut self, entries: &[Entry]) -> Vec<EntryId> {
        let mut batches: HashMap<usize, Vec<Entry>> = HashMap::new();
        for entry in entries {
            if let Some(index) = self.by_kind.get(&entry.kind) {
                batches.entry(*index).or_default().push(entry.clone());
            } else {
                warn!("no tool removes {}:{}", entry.kind, entry.name);
            }
        }
        let mut removed = Vec::new();
        for (index, batch) in batches {
            match self.tools[index].remove(&batch) {
                Ok(()) => removed.extend(batch.iter().map(Entry::id)),
                Err(err) => error!("{}.remove failed: {err}", self.tools[index].name()),
            }
        }
        removed
    }

    /// Collect extra entries from every tool
    pub fn find_extra(&mut self) -> Vec<Entry> {
        let mut extra = Vec::new();
        for tool in &mut self.tools {
            extra.extend(tool.find_extra());
        }
        extra
    }

    pub fn bundle_updated(&mut self, bundle: &Bundle) {
        for tool in &mut self.tools {
            tool.bundle_updated(bundle);
        }
    }

    pub fn bundle_not_updated(&mut self, bundle: &Bundle) {
        for tool in &mut self.tools {
            tool.bundle_not_updated(bundle);
        }
    }
}
