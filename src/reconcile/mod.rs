// src/reconcile/mod.rs

//! Client reconciliation engine
//!
//! Takes one configuration document and a set of tool drivers and
//! computes the minimal sequence of verify/install/remove operations to
//! bring the host into compliance. Phases run strictly in order:
//!
//! ```text
//! Init -> Inventoried -> Decided -> Installed -> Removed -> (ReInventoried) -> Finished
//! ```
//!
//! A tool failure for one entry never aborts processing of its siblings;
//! the entry is left bad and reported. Only run-level preconditions
//! (lock, transport) abort a run, and those live in the agent, not here.

mod stats;
mod tools;

pub use stats::{OpStamps, RunState, RunStatistics};
pub use tools::{Tool, ToolSet};

use crate::config::{AgentOptions, DecisionMode, RemovalScope, matches_decision_list};
use crate::document::{Bundle, Configuration, Entry, EntryId, EntryKind};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Per-entry verification state for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unknown,
    Good,
    Bad,
}

/// Where a run currently is in its phase sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Inventoried,
    Decided,
    Installed,
    Removed,
    ReInventoried,
    Finished,
}

/// Asks the operator about individual operations in interactive mode
pub trait Prompter {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Approves everything without asking
pub struct Unattended;

impl Prompter for Unattended {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// One client run: document, drivers, and per-entry state
pub struct Reconciler {
    config: Configuration,
    tools: ToolSet,
    options: AgentOptions,
    prompter: Box<dyn Prompter>,
    entries: BTreeMap<EntryId, Entry>,
    states: BTreeMap<EntryId, EntryState>,
    extra: Vec<Entry>,
    whitelist: Vec<EntryId>,
    blacklist: BTreeSet<EntryId>,
    removal: Vec<Entry>,
    modified: Vec<EntryId>,
    skipped_bundles: Vec<String>,
    pub stamps: OpStamps,
    phase: Phase,
}

impl Reconciler {
    pub fn new(config: Configuration, tools: ToolSet, options: AgentOptions) -> Self {
        Self {
            config,
            tools,
            options,
            prompter: Box::new(Unattended),
            entries: BTreeMap::new(),
            states: BTreeMap::new(),
            extra: Vec::new(),
            whitelist: Vec::new(),
            blacklist: BTreeSet::new(),
            removal: Vec::new(),
            modified: Vec::new(),
            skipped_bundles: Vec::new(),
            stamps: OpStamps::new(),
            phase: Phase::Init,
        }
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state_of(&self, id: &EntryId) -> EntryState {
        self.states.get(id).copied().unwrap_or(EntryState::Unknown)
    }

    pub fn whitelist(&self) -> &[EntryId] {
        &self.whitelist
    }

    pub fn removal(&self) -> &[Entry] {
        &self.removal
    }

    pub fn modified(&self) -> &[EntryId] {
        &self.modified
    }

    pub fn extra(&self) -> &[Entry] {
        &self.extra
    }

    pub fn skipped_bundles(&self) -> &[String] {
        &self.skipped_bundles
    }

    fn count(&self, state: EntryState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    /// Bundles selected by the include/skip options. When an include
    /// list is given, Independent structures are out of scope too.
    fn selected_bundle_names(&self) -> Vec<String> {
        let all: Vec<String> = self.config.bundles().map(|b| b.name.clone()).collect();
        for wanted in &self.options.bundles {
            if !all.contains(wanted) {
                info!("bundle {wanted} not found in configuration");
            }
        }
        all.into_iter()
            .filter(|name| {
                (self.options.bundles.is_empty() || self.options.bundles.contains(name))
                    && !self.options.skip_bundles.contains(name)
            })
            .collect()
    }

    /// Whether an entry is in scope for installation this run
    fn in_scope(&self, id: &EntryId, selected: &[String]) -> bool {
        match self.config.bundle_of(id) {
            Some(bundle) => selected.iter().any(|name| name == bundle),
            // independent entries are in scope unless a bundle list narrows the run
            None => self.options.bundles.is_empty(),
        }
    }

    /// Verify all entries, find extra entries, and build the state map
    pub fn inventory(&mut self) {
        self.entries.clear();
        self.states.clear();

        for entry in self.config.all_entries() {
            let id = entry.id();
            if self.entries.insert(id.clone(), entry.clone()).is_some() {
                debug!("entry {id} is included multiple times");
            }
            self.states.insert(id, EntryState::Unknown);
        }

        let unhandled: Vec<EntryId> = self
            .entries
            .values()
            .filter(|e| !self.tools.handles(e))
            .map(Entry::id)
            .collect();
        for id in &unhandled {
            error!("entry {id} is not handled by any tool");
        }

        for (id, entry) in &self.entries {
            let state = match self.tools.verify(entry) {
                Some(Ok(true)) => EntryState::Good,
                Some(Ok(false)) => EntryState::Bad,
                Some(Err(err)) => {
                    error!("verify failed for {id}: {err}");
                    EntryState::Bad
                }
                None => EntryState::Bad,
            };
            self.states.insert(id.clone(), state);
        }

        self.extra = self.tools.find_extra();
        self.phase = Phase::Inventoried;
    }

    /// Ask the prompter about each entry, keeping only approved ones
    fn prompt_filter(&self, verb: &str, ids: Vec<EntryId>) -> Vec<EntryId> {
        let mut sorted = ids;
        sorted.sort();
        sorted
            .into_iter()
            .filter(|id| {
                let prompt = match self.entries.get(id).and_then(|e| e.attr("qtext")) {
                    Some(qtext) => qtext.to_string(),
                    None => format!("{verb} {}: {}? (y/N): ", id.kind, id.name),
                };
                self.prompter.confirm(&prompt)
            })
            .collect()
    }

    /// Compute the whitelist and removal sets
    pub fn decide(&mut self) {
        self.removal = match self.options.remove {
            RemovalScope::None => Vec::new(),
            RemovalScope::All => self.extra.clone(),
            RemovalScope::Services => self
                .extra
                .iter()
                .filter(|e| e.kind == EntryKind::Service)
                .cloned()
                .collect(),
            RemovalScope::Packages => self
                .extra
                .iter()
                .filter(|e| e.kind == EntryKind::Package)
                .cloned()
                .collect(),
            RemovalScope::Users => self
                .extra
                .iter()
                .filter(|e| matches!(e.kind, EntryKind::User | EntryKind::Group))
                .cloned()
                .collect(),
        };

        let candidates: Vec<EntryId> = self
            .states
            .iter()
            .filter(|(_, state)| **state == EntryState::Bad)
            .map(|(id, _)| id.clone())
            .collect();

        let selected = self.selected_bundle_names();
        self.whitelist = candidates
            .iter()
            .filter(|id| self.in_scope(id, &selected))
            .cloned()
            .collect();

        match self.options.decision {
            DecisionMode::None => {}
            DecisionMode::Whitelist => {
                let suppressed: Vec<EntryId> = self
                    .whitelist
                    .iter()
                    .filter(|id| !matches_decision_list(&self.options.decision_list, id))
                    .cloned()
                    .collect();
                if !suppressed.is_empty() {
                    info!("whitelist mode: suppressing installation of {suppressed:?}");
                    self.whitelist.retain(|id| !suppressed.contains(id));
                }
            }
            DecisionMode::Blacklist => {
                let suppressed: Vec<EntryId> = self
                    .whitelist
                    .iter()
                    .filter(|id| matches_decision_list(&self.options.decision_list, id))
                    .cloned()
                    .collect();
                if !suppressed.is_empty() {
                    info!("blacklist mode: suppressing installation of {suppressed:?}");
                    self.whitelist.retain(|id| !suppressed.contains(id));
                }
            }
        }

        self.run_prereq_actions(&selected);

        if self.options.dry_run {
            if !self.whitelist.is_empty() {
                info!(
                    "dry run: suppressing installation of {:?}",
                    self.whitelist
                );
                self.whitelist.clear();
            }
            if !self.removal.is_empty() {
                info!(
                    "dry run: suppressing removal of {:?}",
                    self.removal.iter().map(Entry::id).collect::<Vec<_>>()
                );
                self.removal.clear();
            }
        }

        if self.options.interactive {
            let pending = std::mem::take(&mut self.whitelist);
            self.whitelist = self.prompt_filter("Install", pending);
            let removal_ids =
                self.prompt_filter("Remove", self.removal.iter().map(Entry::id).collect());
            self.removal.retain(|e| removal_ids.contains(&e.id()));
        }

        self.blacklist = candidates
            .into_iter()
            .filter(|id| !self.whitelist.contains(id))
            .collect();

        self.phase = Phase::Decided;
    }

    /// Run each selected bundle's prerequisite actions; a failed action
    /// takes the whole bundle out of the whitelist
    fn run_prereq_actions(&mut self, selected: &[String]) {
        let bundles: Vec<Bundle> = self
            .config
            .bundles()
            .filter(|b| selected.iter().any(|name| *name == b.name))
            .cloned()
            .collect();

        for bundle in bundles {
            let bundle_modified = bundle
                .entries
                .iter()
                .any(|e| self.whitelist.contains(&e.id()));
            let actions: Vec<Entry> = bundle
                .prereq_actions()
                .filter(|a| bundle_modified || a.attr("when") == Some("always"))
                .cloned()
                .collect();
            if actions.is_empty() {
                continue;
            }

            if self.options.dry_run {
                info!(
                    "dry run: not running prerequisite actions for bundle {}",
                    bundle.name
                );
                continue;
            }

            let mut approved = actions;
            if self.options.interactive {
                let kept = self.prompt_filter(
                    "Run action",
                    approved.iter().map(Entry::id).collect(),
                );
                approved.retain(|a| kept.contains(&a.id()));
            }

            let mut failed = false;
            for action in &approved {
                let state = match self.tools.install(action) {
                    Some(Ok(true)) => EntryState::Good,
                    Some(Ok(false)) => EntryState::Bad,
                    Some(Err(err)) => {
                        error!("action {} failed: {err}", action.name);
                        EntryState::Bad
                    }
                    None => {
                        error!("no tool runs action {}", action.name);
                        EntryState::Bad
                    }
                };
                self.states.insert(action.id(), state);
                if state != EntryState::Good {
                    failed = true;
                }
            }

            if failed {
                info!("bundle {} failed prerequisite action", bundle.name);
                let dropped: Vec<EntryId> = self
                    .whitelist
                    .iter()
                    .filter(|id| bundle.contains(id))
                    .cloned()
                    .collect();
                if !dropped.is_empty() {
                    info!(
                        "not installing entries from bundle {}: {dropped:?}",
                        bundle.name
                    );
                    self.whitelist.retain(|id| !dropped.contains(id));
                }
                self.skipped_bundles.push(bundle.name.clone());
            }
        }
    }

    /// Install one entry and record the outcome
    fn install_one(&mut self, id: &EntryId) {
        let Some(entry) = self.entries.get(id).cloned() else {
            return;
        };
        match self.tools.install(&entry) {
            Some(Ok(true)) => {
                self.states.insert(id.clone(), EntryState::Good);
                self.modified.push(id.clone());
            }
            Some(Ok(false)) => {
                warn!("install left {id} unsatisfied");
            }
            Some(Err(err)) => {
                error!("install failed for {id}: {err}");
            }
            None => {
                warn!("no tool installs {id}");
            }
        }
    }

    /// Install the whitelist, then re-verify bundles that were touched
    pub fn install(&mut self) {
        for id in self.whitelist.clone() {
            self.install_one(&id);
        }

        let modified_bundles: Vec<Bundle> = self
            .config
            .bundles()
            .filter(|b| self.modified.iter().any(|id| b.contains(id)))
            .cloned()
            .collect();

        if !self.modified.is_empty() && !modified_bundles.is_empty() {
            info!(
                "the following bundles have been modified: {:?}",
                modified_bundles
                    .iter()
                    .map(|b| b.name.as_str())
                    .collect::<Vec<_>>()
            );

            // bundle members can have order-dependent effects on each
            // other; re-verify everything in a touched bundle
            for bundle in &modified_bundles {
                for entry in &bundle.entries {
                    if let Some(Ok(good)) = self.tools.verify(entry) {
                        self.states.insert(
                            entry.id(),
                            if good { EntryState::Good } else { EntryState::Bad },
                        );
                    }
                }
            }

            let clobbered: Vec<EntryId> = modified_bundles
                .iter()
                .flat_map(|b| b.entries.iter())
                .map(Entry::id)
                .filter(|id| {
                    self.state_of(id) == EntryState::Bad && !self.blacklist.contains(id)
                })
                .collect();
            if !clobbered.is_empty() {
                debug!("found clobbered entries: {clobbered:?}");
                if !self.options.interactive {
                    for id in clobbered {
                        self.install_one(&id);
                    }
                }
            }
        }

        let selected = self.selected_bundle_names();
        let all_bundles: Vec<Bundle> = self.config.bundles().cloned().collect();
        for bundle in &all_bundles {
            if !selected.iter().any(|name| *name == bundle.name) {
                continue;
            }
            if modified_bundles.iter().any(|b| b.name == bundle.name) {
                debug!("bundle {} was modified", bundle.name);
                self.tools.bundle_updated(bundle);
            } else {
                debug!("bundle {} was not modified", bundle.name);
                self.tools.bundle_not_updated(bundle);
            }
        }

        self.phase = Phase::Installed;
    }

    /// Remove the extra entries selected for removal
    pub fn remove(&mut self) {
        if !self.removal.is_empty() {
            let removed = self.tools.remove(&self.removal);
            self.extra.retain(|e| !removed.contains(&e.id()));
        }
        self.phase = Phase::Removed;
    }

    /// Re-verify bundles containing modified entries for an accurate
    /// final snapshot
    pub fn re_inventory(&mut self) {
        if self.modified.is_empty() || self.options.dry_run {
            return;
        }
        info!("rechecking bundles with modified entries");
        let bundles: Vec<Bundle> = self
            .config
            .bundles()
            .filter(|b| self.modified.iter().any(|id| b.contains(id)))
            .cloned()
            .collect();
        for bundle in &bundles {
            for entry in &bundle.entries {
                if let Some(Ok(good)) = self.tools.verify(entry) {
                    self.states.insert(
                        entry.id(),
                        if good { EntryState::Good } else { EntryState::Bad },
                    );
                }
            }
        }
        self.phase = Phase::ReInventoried;
    }

    /// Print a state summary for one phase
    pub fn display_state(&self, label: &str) {
        info!("phase: {label}");
        info!("correct entries:        {}", self.count(EntryState::Good));
        info!("incorrect entries:      {}", self.count(EntryState::Bad));
        if label == "final" {
            for (id, state) in &self.states {
                if *state == EntryState::Bad {
                    info!("  bad: {id}");
                }
            }
        }
        info!("total managed entries:  {}", self.states.len());
        info!("unmanaged entries:      {}", self.extra.len());
        if self.count(EntryState::Bad) == 0 && self.extra.is_empty() {
            info!("all entries correct");
        }
    }

    /// Run all phases in order
    pub fn execute(&mut self) {
        self.inventory();
        self.stamps.stamp("inventory");
        self.display_state("initial");
        self.decide();
        self.install();
        self.stamps.stamp("install");
        self.remove();
        self.stamps.stamp("remove");
        if !self.modified.is_empty() {
            self.re_inventory();
            self.stamps.stamp("reinventory");
        }
        self.stamps.stamp("finished");
        self.display_state("final");
        self.phase = Phase::Finished;
    }

    /// Summarize the run for upload
    pub fn statistics(&self) -> RunStatistics {
        let bad: Vec<EntryId> = self
            .states
            .iter()
            .filter(|(_, state)| **state == EntryState::Bad)
            .map(|(id, _)| id.clone())
            .collect();
        RunStatistics {
            revision: self.config.revision.clone(),
            total: self.states.len(),
            good: self.count(EntryState::Good),
            bad,
            modified: self.modified.clone(),
            extra: self.extra.iter().map(Entry::id).collect(),
            stamps: self.stamps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Structure;
    use crate::error::Result;
    use std::sync::{Arc, Mutex};

    /// Shared inner state so tests can inspect a tool after the
    /// reconciler takes ownership of it
    #[derive(Default)]
    struct MockState {
        host: BTreeMap<EntryId, bool>,
        installs: Vec<EntryId>,
        removes: Vec<EntryId>,
        extra: Vec<Entry>,
        refuse_install: BTreeSet<EntryId>,
        clobber: Option<(EntryId, EntryId)>,
    }

    #[derive(Clone)]
    struct MockTool {
        inner: Arc<Mutex<MockState>>,
    }

    impl MockTool {
        fn new() -> (Self, Arc<Mutex<MockState>>) {
            let inner = Arc::new(Mutex::new(MockState::default()));
            (Self { inner: inner.clone() }, inner)
        }
    }

    impl Tool for MockTool {
        fn name(&self) -> &str {
            "mock"
        }

        fn kinds(&self) -> Vec<EntryKind> {
            vec![
                EntryKind::Path,
                EntryKind::Package,
                EntryKind::Service,
                EntryKind::Action,
            ]
        }

        fn verify(&mut self, entry: &Entry) -> Result<bool> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.host.get(&entry.id()).copied().unwrap_or(false))
        }

        fn install(&mut self, entry: &Entry) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            let id = entry.id();
            inner.installs.push(id.clone());
            if inner.refuse_install.contains(&id) {
                return Ok(false);
            }
            inner.host.insert(id.clone(), true);
            if let Some((trigger, victim)) = inner.clobber.clone() {
                if trigger == id {
                    inner.host.insert(victim, false);
                }
            }
            Ok(true)
        }

        fn remove(&mut self, entries: &[Entry]) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            for entry in entries {
                inner.removes.push(entry.id());
            }
            Ok(())
        }

        fn find_extra(&mut self) -> Vec<Entry> {
            self.inner.lock().unwrap().extra.clone()
        }
    }

    fn id(kind: EntryKind, name: &str) -> EntryId {
        EntryId::new(kind, name)
    }

    fn three_entry_config() -> Configuration {
        let mut config = Configuration::new("1");
        config.structures.push(Structure::Bundle(
            Bundle::new("base")
                .with_entry(Entry::new(EntryKind::Path, "/etc/motd"))
                .with_entry(Entry::new(EntryKind::Package, "nginx"))
                .with_entry(Entry::new(EntryKind::Service, "sshd")),
        ));
        config
    }

    fn reconciler(config: Configuration, options: AgentOptions) -> (Reconciler, Arc<Mutex<MockState>>) {
        let (tool, state) = MockTool::new();
        let mut tools = ToolSet::new();
        tools.register(Box::new(tool));
        (Reconciler::new(config, tools, options), state)
    }

    #[test]
    fn test_two_bad_one_good() {
        let (mut engine, state) = reconciler(three_entry_config(), AgentOptions::default());
        state
            .lock()
            .unwrap()
            .host
            .insert(id(EntryKind::Service, "sshd"), true);

        engine.inventory();
        assert_eq!(engine.state_of(&id(EntryKind::Service, "sshd")), EntryState::Good);

        engine.decide();
        let mut expected = vec![
            id(EntryKind::Package, "nginx"),
            id(EntryKind::Path, "/etc/motd"),
        ];
        expected.sort();
        let mut whitelist = engine.whitelist().to_vec();
        whitelist.sort();
        assert_eq!(whitelist, expected);

        engine.install();
        let stats = engine.statistics();
        assert_eq!(stats.bad.len(), 0);
        assert_eq!(stats.modified.len(), 2);
        assert_eq!(stats.state(), RunState::Clean);
    }

    #[test]
    fn test_execute_runs_phases_in_order() {
        let (mut engine, _state) = reconciler(three_entry_config(), AgentOptions::default());
        engine.execute();
        assert_eq!(engine.phase(), Phase::Finished);
        let stats = engine.statistics();
        assert!(stats.stamps.get("inventory").is_some());
        assert!(stats.stamps.get("install").is_some());
        assert!(stats.stamps.get("remove").is_some());
        assert!(stats.stamps.get("finished").is_some());
    }

    #[test]
    fn test_bundle_prereq_gating() {
        let mut config = Configuration::new("1");
        config.structures.push(Structure::Bundle(
            Bundle::new("gated")
                .with_entry(
                    Entry::new(EntryKind::Action, "prep")
                        .with_attr("command", "/bin/false")
                        .with_attr("timing", "pre"),
                )
                .with_entry(Entry::new(EntryKind::Package, "nginx")),
        ));

        let (mut engine, state) = reconciler(config, AgentOptions::default());
        state
            .lock()
            .unwrap()
            .refuse_install
            .insert(id(EntryKind::Action, "prep"));

        engine.inventory();
        engine.decide();
        assert!(engine.whitelist().is_empty());
        assert_eq!(engine.skipped_bundles(), &["gated".to_string()]);

        engine.install();
        // nothing but the failed action was ever dispatched
        let installs = state.lock().unwrap().installs.clone();
        assert_eq!(installs, vec![id(EntryKind::Action, "prep")]);
    }

    #[test]
    fn test_dry_run_never_mutates() {
        let options = AgentOptions {
            dry_run: true,
            remove: RemovalScope::All,
            ..AgentOptions::default()
        };
        let (mut engine, state) = reconciler(three_entry_config(), options);
        state.lock().unwrap().extra =
            vec![Entry::new(EntryKind::Package, "telnetd")];

        engine.execute();

        let inner = state.lock().unwrap();
        assert!(inner.installs.is_empty());
        assert!(inner.removes.is_empty());
        drop(inner);
        assert!(engine.whitelist().is_empty());
        assert!(engine.removal().is_empty());
    }

    #[test]
    fn test_removal_scope_filters_extra() {
        let options = AgentOptions {
            remove: RemovalScope::Packages,
            ..AgentOptions::default()
        };
        let (mut engine, state) = reconciler(three_entry_config(), options);
        state.lock().unwrap().extra = vec![
            Entry::new(EntryKind::Package, "telnetd"),
            Entry::new(EntryKind::Service, "telnet"),
        ];

        engine.inventory();
        engine.decide();
        let removal_ids: Vec<EntryId> = engine.removal().iter().map(Entry::id).collect();
        assert_eq!(removal_ids, vec![id(EntryKind::Package, "telnetd")]);

        engine.remove();
        let removes = state.lock().unwrap().removes.clone();
        assert_eq!(removes, vec![id(EntryKind::Package, "telnetd")]);
        // the removed package no longer counts as extra; the out-of-scope
        // service does
        let left: Vec<EntryId> = engine.extra().iter().map(Entry::id).collect();
        assert_eq!(left, vec![id(EntryKind::Service, "telnet")]);
    }

    #[test]
    fn test_clobbered_bundle_member_reinstalled() {
        let mut config = Configuration::new("1");
        config.structures.push(Structure::Bundle(
            Bundle::new("web")
                .with_entry(Entry::new(EntryKind::Package, "nginx"))
                .with_entry(Entry::new(EntryKind::Path, "/etc/nginx.conf")),
        ));

        let (mut engine, state) = reconciler(config, AgentOptions::default());
        {
            let mut inner = state.lock().unwrap();
            // the config file starts out good, but installing the
            // package resets it
            inner.host.insert(id(EntryKind::Path, "/etc/nginx.conf"), true);
            inner.clobber = Some((
                id(EntryKind::Package, "nginx"),
                id(EntryKind::Path, "/etc/nginx.conf"),
            ));
        }

        engine.inventory();
        engine.decide();
        assert_eq!(engine.whitelist(), &[id(EntryKind::Package, "nginx")]);

        engine.install();
        assert_eq!(
            engine.state_of(&id(EntryKind::Path, "/etc/nginx.conf")),
            EntryState::Good
        );
        let installs = state.lock().unwrap().installs.clone();
        assert_eq!(
            installs,
            vec![
                id(EntryKind::Package, "nginx"),
                id(EntryKind::Path, "/etc/nginx.conf"),
            ]
        );
    }

    #[test]
    fn test_decision_whitelist_mode() {
        let options = AgentOptions {
            decision: DecisionMode::Whitelist,
            decision_list: vec!["Package:*".to_string()],
            ..AgentOptions::default()
        };
        let (mut engine, _state) = reconciler(three_entry_config(), options);
        engine.inventory();
        engine.decide();
        assert_eq!(engine.whitelist(), &[id(EntryKind::Package, "nginx")]);
    }

    #[test]
    fn test_bundle_filter_limits_scope() {
        let mut config = three_entry_config();
        config.structures.push(Structure::Bundle(
            Bundle::new("other").with_entry(Entry::new(EntryKind::Package, "vim")),
        ));
        let options = AgentOptions {
            bundles: vec!["other".to_string()],
            ..AgentOptions::default()
        };
        let (mut engine, _state) = reconciler(config, options);
        engine.inventory();
        engine.decide();
        assert_eq!(engine.whitelist(), &[id(EntryKind::Package, "vim")]);
    }

    struct DeclineAll;
    impl Prompter for DeclineAll {
        fn confirm(&self, _prompt: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_interactive_decline_installs_nothing() {
        let options = AgentOptions {
            interactive: true,
            ..AgentOptions::default()
        };
        let (engine, state) = reconciler(three_entry_config(), options);
        let mut engine = engine.with_prompter(Box::new(DeclineAll));
        engine.execute();
        assert!(state.lock().unwrap().installs.is_empty());
        assert!(engine.whitelist().is_empty());
    }

    #[test]
    fn test_failed_bind_entry_counts_bad_but_not_installed() {
        let mut config = Configuration::new("1");
        let mut bad_entry = Entry::new(EntryKind::Path, "/etc/broken");
        bad_entry.mark_failure("no matching layer");
        config.structures.push(Structure::Bundle(
            Bundle::new("b").with_entry(bad_entry),
        ));

        let (mut engine, state) = reconciler(config, AgentOptions::default());
        engine.execute();
        assert_eq!(
            engine.state_of(&id(EntryKind::Path, "/etc/broken")),
            EntryState::Bad
        );
        assert!(state.lock().unwrap().installs.is_empty());
        assert_eq!(engine.statistics().state(), RunState::Dirty);
    }
}
