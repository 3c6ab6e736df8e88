// src/lib.rs

//! Concord configuration management engine
//!
//! A central server holds a declarative specification of desired host
//! configuration; clients fetch a per-host configuration document over
//! an authenticated channel and reconcile the host against it.
//!
//! # Architecture
//!
//! - Specificity-based resolution: entry definitions apply to all hosts,
//!   a group at a priority, or one host; the most specific match wins
//! - Dependency completion: requested package sets expand to a transitive
//!   closure over package and virtual-package metadata
//! - Entry-scoped failure: a bad entry is marked failed in place; the
//!   rest of the document still resolves and applies
//! - Reconciliation state machine: inventory, decide, install, remove,
//!   re-inventory, with per-entry state and run statistics

pub mod agent;
pub mod builder;
pub mod config;
pub mod diff;
pub mod document;
mod error;
pub mod identity;
pub mod lock;
pub mod metadata;
pub mod packages;
pub mod probes;
pub mod proxy;
pub mod reconcile;
pub mod specificity;
pub mod store;

pub use agent::Agent;
pub use builder::{BindContext, Builder, Generator, OnDemandGenerator, TemplateGenerator};
pub use config::{AgentOptions, DecisionMode, RemovalScope, TransportOptions};
pub use diff::{DiffLimits, DiffOutcome, compute_diff};
pub use document::{
    Bundle, ConfigDocument, Configuration, Entry, EntryId, EntryKind, Structure,
};
pub use error::{Error, Result};
pub use identity::ClientIdentity;
pub use lock::RunLock;
pub use metadata::{MetadataSource, StaticMetadata};
pub use packages::{Collection, CollectionCache, PackageSource, StaticSource};
pub use probes::{Probe, ProbeRunner};
pub use proxy::{RetryProxy, ServerProxy};
pub use reconcile::{
    EntryState, OpStamps, Phase, Prompter, Reconciler, RunState, RunStatistics, Tool, ToolSet,
};
pub use specificity::Specificity;
pub use store::{EntryLayer, EntryStore, StoreHandle};
