// src/config.rs

//! Agent options
//!
//! Loaded from a TOML options file with serde defaults; the CLI layers
//! its own overrides on top. Everything the reconciliation engine and
//! the run orchestration consult lives here.

use crate::document::EntryId;
use crate::error::Result;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Which classes of extra entries may be removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalScope {
    #[default]
    None,
    All,
    Services,
    Packages,
    Users,
}

/// Decision mode: restrict or exclude installation by entry patterns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    #[default]
    None,
    Whitelist,
    Blacklist,
}

/// Transport endpoint and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_endpoint() -> String {
    "https://localhost:6789".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

impl TransportOptions {
    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint)
            .map_err(|e| crate::error::Error::Config(format!("bad endpoint: {e}")))
    }
}

/// Options consulted by the client agent and reconciliation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOptions {
    /// Log decisions but never mutate the host
    #[serde(default)]
    pub dry_run: bool,

    /// Ask before each install or removal
    #[serde(default)]
    pub interactive: bool,

    /// Which extra entries are eligible for removal
    #[serde(default)]
    pub remove: RemovalScope,

    /// Only reconcile these bundles (empty means all)
    #[serde(default)]
    pub bundles: Vec<String>,

    /// Bundles to leave untouched
    #[serde(default)]
    pub skip_bundles: Vec<String>,

    /// Decision mode for install filtering
    #[serde(default)]
    pub decision: DecisionMode,

    /// `Tag:name` patterns for the decision mode; `*` wildcards allowed
    /// in either position
    #[serde(default)]
    pub decision_list: Vec<String>,

    /// Whether a probe failure aborts the run
    #[serde(default = "default_probe_exit")]
    pub probe_exit: bool,

    /// Advisory run lock path
    #[serde(default = "default_lockfile")]
    pub lockfile: PathBuf,

    #[serde(default)]
    pub transport: TransportOptions,
}

fn default_probe_exit() -> bool {
    true
}

fn default_lockfile() -> PathBuf {
    PathBuf::from("/var/lock/concord-agent.lock")
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            interactive: false,
            remove: RemovalScope::None,
            bundles: Vec::new(),
            skip_bundles: Vec::new(),
            decision: DecisionMode::None,
            decision_list: Vec::new(),
            probe_exit: default_probe_exit(),
            lockfile: default_lockfile(),
            transport: TransportOptions::default(),
        }
    }
}

impl AgentOptions {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let options: AgentOptions = toml::from_str(&raw)?;
        Ok(options)
    }
}

/// Match an entry id against a `Tag:name` pattern list.
///
/// Both positions accept `*` wildcards, so `Package:*` matches every
/// package and `*:/etc/motd` matches any tag with that name.
pub fn matches_decision_list(patterns: &[String], id: &EntryId) -> bool {
    let tag = id.kind.to_string();
    patterns.iter().any(|pattern| {
        let Some((tag_pat, name_pat)) = pattern.split_once(':') else {
            return false;
        };
        let tag_ok = Pattern::new(tag_pat).map(|p| p.matches(&tag)).unwrap_or(false);
        let name_ok = Pattern::new(name_pat)
            .map(|p| p.matches(&id.name))
            .unwrap_or(false);
        tag_ok && name_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EntryKind;

    #[test]
    fn test_defaults() {
        let options = AgentOptions::default();
        assert!(!options.dry_run);
        assert!(options.probe_exit);
        assert_eq!(options.remove, RemovalScope::None);
        assert_eq!(options.transport.retries, 3);
        assert_eq!(options.transport.retry_delay_secs, 1);
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            dry_run = true
            remove = "packages"
            bundles = ["web"]
            decision = "whitelist"
            decision_list = ["Package:nginx*"]

            [transport]
            endpoint = "https://cfg.example.com:6789"
            retries = 5
        "#;
        let options: AgentOptions = toml::from_str(raw).unwrap();
        assert!(options.dry_run);
        assert_eq!(options.remove, RemovalScope::Packages);
        assert_eq!(options.decision, DecisionMode::Whitelist);
        assert_eq!(options.transport.retries, 5);
        assert_eq!(
            options.transport.endpoint_url().unwrap().host_str(),
            Some("cfg.example.com")
        );
    }

    #[test]
    fn test_decision_list_wildcards() {
        let patterns = vec!["Package:nginx*".to_string(), "*:/etc/motd".to_string()];
        assert!(matches_decision_list(
            &patterns,
            &EntryId::new(EntryKind::Package, "nginx-core")
        ));
        assert!(matches_decision_list(
            &patterns,
            &EntryId::new(EntryKind::Path, "/etc/motd")
        ));
        assert!(!matches_decision_list(
            &patterns,
            &EntryId::new(EntryKind::Service, "sshd")
        ));
    }
}
