// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

use concord::document::{Entry, EntryId, EntryKind};
use concord::packages::{Collection, CollectionCache, StaticSource};
use concord::reconcile::{Tool, ToolSet};
use concord::store::{EntryStore, StoreHandle};
use concord::{Builder, Result, StaticMetadata, TemplateGenerator};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Write a small entry-layer repository on disk.
///
/// `/etc/motd` carries all-hosts, group, and host-specific layers;
/// `/etc/ntp.conf` carries a single templated all-hosts layer. Returns
/// the TempDir - keep it alive to prevent cleanup.
pub fn setup_repo() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let motd = tmp.path().join("etc/motd");
    std::fs::create_dir_all(&motd).unwrap();
    std::fs::write(motd.join("motd"), "generic banner\n").unwrap();
    std::fs::write(motd.join("motd.G50_web"), "web banner\n").unwrap();
    std::fs::write(motd.join("motd.H_node2"), "node2 banner\n").unwrap();

    let ntp = tmp.path().join("etc/ntp.conf");
    std::fs::create_dir_all(&ntp).unwrap();
    std::fs::write(ntp.join("ntp.conf"), "server ${ntp_server}\n").unwrap();

    tmp
}

/// Client and bundle metadata used across the integration suites
pub fn sample_metadata() -> StaticMetadata {
    StaticMetadata::parse(
        r#"
        [clients.node1]
        groups = ["web", "x86_64"]
        bundles = ["web"]

        [clients.node1.facts]
        ntp_server = "ntp.example.com"

        [clients.node2]
        groups = ["web", "x86_64"]
        bundles = ["web"]

        [clients.node2.facts]
        ntp_server = "ntp.example.com"

        [bundles.web]
        entries = [
            { kind = "Path", name = "/etc/motd" },
            { kind = "Path", name = "/etc/ntp.conf" },
            { kind = "Package", name = "nginx" },
            { kind = "PackageGroup", name = "base" },
            { kind = "Service", name = "nginx" },
        ]
    "#,
    )
    .unwrap()
}

/// Package metadata matching the sample bundles
pub fn sample_source() -> StaticSource {
    StaticSource::new()
        .package("nginx", ["openssl"])
        .package("openssl", Vec::<String>::new())
        .package("coreutils", Vec::<String>::new())
        .group_member("base", "coreutils", None)
}

/// A builder wired against the sample repository and sources
pub fn sample_builder(repo: &TempDir) -> Builder {
    let store = EntryStore::load_dir(repo.path()).unwrap();
    let collection = Collection::new(
        vec![Arc::new(sample_source())],
        Arc::new(CollectionCache::new()),
    );
    Builder::new(Arc::new(StoreHandle::new(store)), collection)
        .with_revision("42")
        .register(Arc::new(TemplateGenerator::new()))
}

/// Observable driver state shared between a test and its tool
#[derive(Default)]
pub struct DriverState {
    pub host: BTreeMap<EntryId, bool>,
    pub installs: Vec<EntryId>,
    pub removes: Vec<EntryId>,
    pub extra: Vec<Entry>,
    pub refuse_install: BTreeSet<EntryId>,
}

/// An in-memory driver claiming every entry kind the engine ships
pub struct FakeDriver {
    state: Arc<Mutex<DriverState>>,
}

impl FakeDriver {
    pub fn new() -> (Self, Arc<Mutex<DriverState>>) {
        let state = Arc::new(Mutex::new(DriverState::default()));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl Tool for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    fn kinds(&self) -> Vec<EntryKind> {
        vec![
            EntryKind::Path,
            EntryKind::Package,
            EntryKind::Service,
            EntryKind::Action,
            EntryKind::User,
            EntryKind::Group,
        ]
    }

    fn verify(&mut self, entry: &Entry) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.host.get(&entry.id()).copied().unwrap_or(false))
    }

    fn install(&mut self, entry: &Entry) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let id = entry.id();
        state.installs.push(id.clone());
        if state.refuse_install.contains(&id) {
            return Ok(false);
        }
        state.host.insert(id, true);
        Ok(true)
    }

    fn remove(&mut self, entries: &[Entry]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for entry in entries {
            state.removes.push(entry.id());
            state.host.remove(&entry.id());
        }
        Ok(())
    }

    fn find_extra(&mut self) -> Vec<Entry> {
        self.state.lock().unwrap().extra.clone()
    }
}

/// A tool set holding one fake driver
pub fn fake_toolset() -> (ToolSet, Arc<Mutex<DriverState>>) {
    let (driver, state) = FakeDriver::new();
    let mut tools = ToolSet::new();
    tools.register(Box::new(driver));
    (tools, state)
}
