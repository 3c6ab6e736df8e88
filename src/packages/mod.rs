// src/packages/mod.rs

//! Dependency-aware package-set completion
//!
//! Given an initial requested package set and sources of package
//! metadata (dependencies, virtual packages, providers), compute the
//! transitive closure of packages that must be present. Names that no
//! source recognizes are accumulated separately rather than aborting
//! completion.

mod cache;

pub use cache::{CollectionCache, VpkgTable};

use crate::identity::ClientIdentity;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// A source of package metadata, scoped by a client's relevant groups
pub trait PackageSource: Send + Sync {
    /// Whether `name` is a concrete package known to this source
    fn is_package(&self, groups: &[String], name: &str) -> bool;

    /// Virtual names and their provider sets for this group scope
    fn vpkgs(&self, groups: &[String]) -> VpkgTable;

    /// Declared dependencies of a concrete package
    fn get_deps(&self, groups: &[String], name: &str) -> Vec<String>;

    /// Members of a named package group, optionally narrowed by category
    fn get_group(&self, groups: &[String], group_name: &str, category: Option<&str>)
        -> Vec<String>;

    /// Which of the client's groups this source keys its metadata by
    fn relevant_groups(&self, client: &ClientIdentity) -> Vec<String>;

    /// Reclassify or drop unknown items (e.g. architecture exclusions).
    /// May have side effects inside the source.
    fn filter_unknown(&self, unknown: &mut BTreeSet<String>) {
        let _ = unknown;
    }
}

/// The set of sources consulted for one client's completion
pub struct Collection {
    sources: Vec<Arc<dyn PackageSource>>,
    cache: Arc<CollectionCache>,
}

impl Collection {
    pub fn new(sources: Vec<Arc<dyn PackageSource>>, cache: Arc<CollectionCache>) -> Self {
        Self { sources, cache }
    }

    /// Sorted union of the groups each source considers relevant
    pub fn relevant_groups(&self, client: &ClientIdentity) -> Vec<String> {
        let mut groups: BTreeSet<String> = BTreeSet::new();
        for source in &self.sources {
            groups.extend(source.relevant_groups(client));
        }
        groups.into_iter().collect()
    }

    fn is_package(&self, groups: &[String], name: &str) -> bool {
        self.sources.iter().any(|s| s.is_package(groups, name))
    }

    fn get_deps(&self, groups: &[String], name: &str) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        for source in &self.sources {
            deps.extend(source.get_deps(groups, name));
        }
        deps
    }

    fn build_vpkg_table(&self, groups: &[String]) -> VpkgTable {
        let mut table = VpkgTable::new();
        for source in &self.sources {
            for (vpkg, providers) in source.vpkgs(groups) {
                table.entry(vpkg).or_default().extend(providers);
            }
        }
        table
    }

    fn filter_unknown(&self, unknown: &mut BTreeSet<String>) {
        for source in &self.sources {
            source.filter_unknown(unknown);
        }
    }

    /// Expand a named package group into its member packages
    pub fn packages_from_group(
        &self,
        client: &ClientIdentity,
        group_name: &str,
        category: Option<&str>,
    ) -> Vec<String> {
        let groups = self.relevant_groups(client);
        let mut members = BTreeSet::new();
        for source in &self.sources {
            members.extend(source.get_group(&groups, group_name, category));
        }
        members.into_iter().collect()
    }

    /// Build the complete package list and the set of unresolvable names.
    ///
    /// Worklist fixed point over four per-item classifications:
    /// concrete packages expand their dependencies; virtual names with a
    /// single provider pull that provider in; names that are both a
    /// package and a virtual name prefer an already-selected provider and
    /// are otherwise forced concrete only when explicitly requested or on
    /// the final pass. The final pass runs once after the worklists
    /// drain, so the loop terminates: every round either shrinks a
    /// worklist or flips the final-pass flag at most once. Ordered sets
    /// keep the outcome independent of hash order.
    pub fn complete(
        &self,
        client: &ClientIdentity,
        requested: &BTreeSet<String>,
    ) -> (BTreeSet<String>, BTreeSet<String>) {
        let groups = self.relevant_groups(client);
        let vpkg_table = self
            .cache
            .vpkg_table(&groups, || self.build_vpkg_table(&groups));

        let mut unclassified: BTreeSet<String> = requested.clone();
        let mut vpkgs: BTreeSet<String> = BTreeSet::new();
        let mut both: BTreeSet<String> = BTreeSet::new();
        let mut pkgs: BTreeSet<String> = BTreeSet::new();

        let mut packages: BTreeSet<String> = BTreeSet::new();
        let mut examined: BTreeSet<String> = BTreeSet::new();
        let mut unknown: BTreeSet<String> = BTreeSet::new();

        let mut final_pass = false;
        let mut really_done = false;

        while !unclassified.is_empty() || !pkgs.is_empty() || !both.is_empty() || final_pass {
            if really_done {
                break;
            }
            if unclassified.is_empty() && pkgs.is_empty() && both.is_empty() {
                // one more pass then exit
                really_done = true;
            }

            while let Some(current) = unclassified.pop_first() {
                examined.insert(current.clone());
                let is_pkg = self.is_package(&groups, &current);
                let is_vpkg = vpkg_table.contains_key(&current);
                match (is_pkg, is_vpkg) {
                    (true, true) => both.insert(current),
                    (true, false) => pkgs.insert(current),
                    (false, true) => vpkgs.insert(current),
                    (false, false) => unknown.insert(current),
                };
            }

            while let Some(current) = pkgs.pop_first() {
                let deps = self.get_deps(&groups, &current);
                let new_deps: Vec<&String> =
                    deps.iter().filter(|d| !examined.contains(*d)).collect();
                if !new_deps.is_empty() {
                    debug!("package {current} added requirements {new_deps:?}");
                }
                for dep in &new_deps {
                    unclassified.insert((*dep).clone());
                }
                packages.insert(current);
            }

            // virtual names: a single provider is pulled in; multiple
            // providers never force a choice
            let mut satisfied: Vec<String> = Vec::new();
            for current in &vpkgs {
                let providers = &vpkg_table[current];
                if providers.len() == 1 {
                    debug!("requirement {current} satisfied by {providers:?}");
                    for provider in providers {
                        if !examined.contains(provider) {
                            unclassified.insert(provider.clone());
                        }
                    }
                } else {
                    let selected: Vec<&String> = providers
                        .iter()
                        .filter(|p| packages.contains(*p))
                        .collect();
                    debug!("requirement {current} satisfied by {selected:?}");
                }
                satisfied.push(current.clone());
            }
            for name in satisfied {
                vpkgs.remove(&name);
            }

            // names that are both a literal package and a virtual name
            let mut resolved: Vec<String> = Vec::new();
            for current in &both {
                let has_selected_provider =
                    vpkg_table[current].iter().any(|p| packages.contains(p));
                if has_selected_provider {
                    resolved.push(current.clone());
                } else if requested.contains(current) || final_pass {
                    pkgs.insert(current.clone());
                    resolved.push(current.clone());
                }
            }
            for name in resolved {
                both.remove(&name);
            }

            final_pass = unclassified.is_empty() && pkgs.is_empty();
            self.filter_unknown(&mut unknown);
        }

        (packages, unknown)
    }
}

/// In-memory package metadata, declared up front.
///
/// Useful for tests and for feeding the engine from a static description
/// when no live repository source is wired in.
#[derive(Debug, Default)]
pub struct StaticSource {
    packages: BTreeMap<String, Vec<String>>,
    vpkgs: VpkgTable,
    groups: BTreeMap<String, Vec<(String, Option<String>)>>,
    relevant: Vec<String>,
    ignored: BTreeSet<String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a concrete package with its dependency list
    pub fn package<I, S>(mut self, name: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages
            .insert(name.into(), deps.into_iter().map(Into::into).collect());
        self
    }

    /// Declare a virtual name and one of its providers
    pub fn provides(mut self, vpkg: impl Into<String>, provider: impl Into<String>) -> Self {
        self.vpkgs
            .entry(vpkg.into())
            .or_default()
            .insert(provider.into());
        self
    }

    /// Declare a member of a named package group
    pub fn group_member(
        mut self,
        group_name: impl Into<String>,
        member: impl Into<String>,
        category: Option<&str>,
    ) -> Self {
        self.groups
            .entry(group_name.into())
            .or_default()
            .push((member.into(), category.map(str::to_string)));
        self
    }

    /// Which client groups scope this source (e.g. an architecture group)
    pub fn relevant_to<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relevant = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Names silently dropped from the unknown set (platform exclusions)
    pub fn ignoring(mut self, name: impl Into<String>) -> Self {
        self.ignored.insert(name.into());
        self
    }
}

impl PackageSource for StaticSource {
    fn is_package(&self, _groups: &[String], name: &str) -> bool {
        self.packages.contains_key(name)
    }

    fn vpkgs(&self, _groups: &[String]) -> VpkgTable {
        self.vpkgs.clone()
    }

    fn get_deps(&self, _groups: &[String], name: &str) -> Vec<String> {
        self.packages.get(name).cloned().unwrap_or_default()
    }

    fn get_group(
        &self,
        _groups: &[String],
        group_name: &str,
        category: Option<&str>,
    ) -> Vec<String> {
        self.groups
            .get(group_name)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, cat)| category.is_none() || cat.as_deref() == category)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn relevant_groups(&self, client: &ClientIdentity) -> Vec<String> {
        self.relevant
            .iter()
            .filter(|g| client.groups.contains(*g))
            .cloned()
            .collect()
    }

    fn filter_unknown(&self, unknown: &mut BTreeSet<String>) {
        for name in &self.ignored {
            unknown.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientIdentity {
        ClientIdentity::new("h1").with_groups(["x86_64"])
    }

    fn collection(source: StaticSource) -> Collection {
        Collection::new(vec![Arc::new(source)], Arc::new(CollectionCache::new()))
    }

    fn names<I: IntoIterator<Item = &'static str>>(items: I) -> BTreeSet<String> {
        items.into_iter().map(str::to_string).collect()
    }

    #[test]
    fn test_simple_closure() {
        let coll = collection(
            StaticSource::new()
                .package("nginx", ["openssl", "zlib"])
                .package("openssl", Vec::<String>::new())
                .package("zlib", Vec::<String>::new()),
        );
        let (closure, unknown) = coll.complete(&client(), &names(["nginx"]));
        assert_eq!(closure, names(["nginx", "openssl", "zlib"]));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_closure_is_idempotent() {
        let coll = collection(
            StaticSource::new()
                .package("a", ["b"])
                .package("b", ["c"])
                .package("c", Vec::<String>::new()),
        );
        let (first, _) = coll.complete(&client(), &names(["a"]));
        let (second, unknown) = coll.complete(&client(), &first);
        assert_eq!(first, second);
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let coll = collection(StaticSource::new().package("a", ["b"]).package("b", ["a"]));
        let (closure, unknown) = coll.complete(&client(), &names(["a"]));
        assert_eq!(closure, names(["a", "b"]));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_single_provider_vpkg_resolves_to_provider() {
        let coll = collection(
            StaticSource::new()
                .package("postfix", Vec::<String>::new())
                .provides("mail-transport-agent", "postfix"),
        );
        let (closure, unknown) = coll.complete(&client(), &names(["mail-transport-agent"]));
        assert_eq!(closure, names(["postfix"]));
        assert!(!closure.contains("mail-transport-agent"));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_multi_provider_vpkg_forces_no_choice() {
        let coll = collection(
            StaticSource::new()
                .package("postfix", Vec::<String>::new())
                .package("exim4", Vec::<String>::new())
                .provides("mail-transport-agent", "postfix")
                .provides("mail-transport-agent", "exim4"),
        );
        let (closure, unknown) = coll.complete(&client(), &names(["mail-transport-agent"]));
        assert!(closure.is_empty());
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_multi_provider_vpkg_satisfied_by_selected_provider() {
        let coll = collection(
            StaticSource::new()
                .package("postfix", Vec::<String>::new())
                .package("exim4", Vec::<String>::new())
                .package("mailx", ["mail-transport-agent"])
                .provides("mail-transport-agent", "postfix")
                .provides("mail-transport-agent", "exim4"),
        );
        let (closure, _) = coll.complete(&client(), &names(["mailx", "postfix"]));
        assert!(closure.contains("postfix"));
        assert!(!closure.contains("exim4"));
    }

    #[test]
    fn test_unknown_propagates() {
        let coll = collection(StaticSource::new().package("real", Vec::<String>::new()));
        let (closure, unknown) = coll.complete(&client(), &names(["real", "nonexistent-pkg"]));
        assert!(closure.contains("real"));
        assert!(!closure.contains("nonexistent-pkg"));
        assert_eq!(unknown, names(["nonexistent-pkg"]));
    }

    #[test]
    fn test_filter_unknown_drops_ignored() {
        let coll = collection(
            StaticSource::new()
                .package("real", Vec::<String>::new())
                .ignoring("ia32-shim"),
        );
        let (_, unknown) = coll.complete(&client(), &names(["real", "ia32-shim"]));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_both_prefers_selected_provider() {
        // "ssh" is a real package but also a virtual name provided by
        // openssh; once openssh is selected the literal ssh package is
        // not pulled in
        let coll = collection(
            StaticSource::new()
                .package("ssh", Vec::<String>::new())
                .package("openssh", Vec::<String>::new())
                .package("tool", ["ssh", "openssh"])
                .provides("ssh", "openssh"),
        );
        let (closure, _) = coll.complete(&client(), &names(["tool"]));
        assert!(closure.contains("openssh"));
        assert!(!closure.contains("ssh"));
    }

    #[test]
    fn test_both_forced_direct_when_requested() {
        let coll = collection(
            StaticSource::new()
                .package("ssh", Vec::<String>::new())
                .package("openssh", Vec::<String>::new())
                .provides("ssh", "openssh"),
        );
        let (closure, _) = coll.complete(&client(), &names(["ssh"]));
        assert!(closure.contains("ssh"));
    }

    #[test]
    fn test_group_expansion() {
        let coll = collection(
            StaticSource::new()
                .group_member("base", "coreutils", None)
                .group_member("base", "vim", Some("optional")),
        );
        let all = coll.packages_from_group(&client(), "base", None);
        assert_eq!(all, vec!["coreutils".to_string(), "vim".to_string()]);
        let optional = coll.packages_from_group(&client(), "base", Some("optional"));
        assert_eq!(optional, vec!["vim".to_string()]);
    }

    #[test]
    fn test_vpkg_cache_scoped_by_relevant_groups() {
        let cache = Arc::new(CollectionCache::new());
        let source = StaticSource::new()
            .package("p", Vec::<String>::new())
            .relevant_to(["x86_64", "aarch64"]);
        let coll = Collection::new(vec![Arc::new(source)], cache.clone());

        let intel = ClientIdentity::new("h1").with_groups(["x86_64"]);
        let arm = ClientIdentity::new("h2").with_groups(["aarch64"]);
        coll.complete(&intel, &names(["p"]));
        coll.complete(&arm, &names(["p"]));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
