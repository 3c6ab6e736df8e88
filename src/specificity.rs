// src/specificity.rs

//! Entry specificity: how narrowly a definition applies
//!
//! A definition applies to all hosts, to one group at a numeric priority,
//! or to a single host. The on-disk encoding is a filename suffix:
//! `<name>` for all hosts, `<name>.G<prio>_<group>` for a group, and
//! `<name>.H_<hostname>` for one host.

use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// How narrowly one entry definition applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specificity {
    /// Applies to every host
    All,
    /// Applies to members of a group, at a numeric priority
    Group { name: String, priority: u32 },
    /// Applies to exactly one host
    Host(String),
}

fn suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:H_(?P<hostname>\S+)|G(?P<prio>\d+)_(?P<group>\S+))$").unwrap()
    })
}

impl Specificity {
    /// Parse a specificity from a filename, given the logical entry name.
    ///
    /// `file.conf` is unconditional, `file.conf.G50_webservers` is
    /// group-scoped, `file.conf.H_node1` is host-scoped. Anything after
    /// the base name that does not parse as a suffix is an error; the
    /// caller rejects the layer and keeps going.
    pub fn from_filename(base: &str, filename: &str) -> Result<Self> {
        if filename == base {
            return Ok(Specificity::All);
        }
        let suffix = filename
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(|| Error::Specificity(filename.to_string()))?;

        let caps = suffix_regex()
            .captures(suffix)
            .ok_or_else(|| Error::Specificity(filename.to_string()))?;

        if let Some(host) = caps.name("hostname") {
            Ok(Specificity::Host(host.as_str().to_string()))
        } else {
            let priority = caps["prio"]
                .parse::<u32>()
                .map_err(|_| Error::Specificity(filename.to_string()))?;
            Ok(Specificity::Group {
                name: caps["group"].to_string(),
                priority,
            })
        }
    }

    /// Whether this definition applies to the given client
    pub fn matches(&self, client: &ClientIdentity) -> bool {
        match self {
            Specificity::All => true,
            Specificity::Group { name, .. } => client.groups.contains(name),
            Specificity::Host(hostname) => {
                client.hostname == *hostname || client.aliases.contains(hostname)
            }
        }
    }

    /// Rank for most-specific-wins ordering: host beats group beats all,
    /// and among groups a higher priority wins.
    pub fn score(&self) -> (u8, u32) {
        match self {
            Specificity::All => (0, 0),
            Specificity::Group { priority, .. } => (1, *priority),
            Specificity::Host(_) => (2, 0),
        }
    }
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specificity::All => write!(f, "all"),
            Specificity::Group { name, priority } => write!(f, "group {name} (prio {priority})"),
            Specificity::Host(hostname) => write!(f, "host {hostname}"),
        }
    }
}
