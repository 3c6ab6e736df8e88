// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use concord::document::{ConfigDocument, Entry, EntryKind};
use concord::packages::{Collection, CollectionCache, StaticSource};
use concord::reconcile::{Reconciler, Tool, ToolSet};
use concord::store::{EntryStore, StoreHandle};
use concord::{AgentOptions, Builder, StaticMetadata, TemplateGenerator};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "concord")]
#[command(author, version, about = "Configuration management engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the configuration document for one client
    Build {
        /// Directory tree of entry layers
        #[arg(short, long)]
        repo: PathBuf,
        /// Client and bundle metadata (TOML)
        #[arg(short, long)]
        metadata: PathBuf,
        /// Package metadata (TOML), optional
        #[arg(short, long)]
        packages: Option<PathBuf>,
        /// Hostname to build for
        client: String,
    },
    /// Parse a configuration document and summarize it
    Check {
        /// Path to a serialized configuration document
        document: PathBuf,
    },
    /// Dry-run a document through the reconciliation engine
    Run {
        /// Path to a serialized configuration document
        document: PathBuf,
        /// Agent options file (TOML)
        #[arg(short, long)]
        options: Option<PathBuf>,
    },
}

/// Package metadata file: names to dependency lists, plus virtual names
#[derive(Debug, Deserialize)]
struct PackageFile {
    #[serde(default)]
    packages: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    provides: BTreeMap<String, Vec<String>>,
}

fn load_source(path: Option<&PathBuf>) -> Result<StaticSource> {
    let Some(path) = path else {
        return Ok(StaticSource::new());
    };
    let raw = std::fs::read_to_string(path)?;
    let file: PackageFile = toml::from_str(&raw)?;
    let mut source = StaticSource::new();
    for (name, deps) in file.packages {
        source = source.package(name, deps);
    }
    for (vpkg, providers) in file.provides {
        for provider in providers {
            source = source.provides(vpkg.clone(), provider);
        }
    }
    Ok(source)
}

/// Reports every entry as absent; used for offline dry runs where no
/// real drivers are wired in
struct ReportTool;

impl Tool for ReportTool {
    fn name(&self) -> &str {
        "report"
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

    fn verify(&mut self, _entry: &Entry) -> concord::Result<bool> {
        Ok(false)
    }

    fn install(&mut self, _entry: &Entry) -> concord::Result<bool> {
        Ok(false)
    }

    fn remove(&mut self, _entries: &[Entry]) -> concord::Result<()> {
        Ok(())
    }
}

fn summarize(document: &ConfigDocument) {
    match document {
        ConfigDocument::Config(config) => {
            println!("revision: {}", config.revision);
            for structure in &config.structures {
                match structure.bundle_name() {
                    Some(name) => println!("bundle {name}: {} entries", structure.entries().len()),
                    None => println!("independent: {} entries", structure.entries().len()),
                }
            }
            let failed: Vec<&Entry> = config.all_entries().filter(|e| e.is_failed()).collect();
            println!(
                "total entries: {} ({} failed to bind)",
                config.all_entries().count(),
                failed.len()
            );
            for entry in failed {
                println!(
                    "  failed {}:{}: {}",
                    entry.kind,
                    entry.name,
                    entry.attr("failure").unwrap_or("unknown")
                );
            }
        }
        ConfigDocument::Error(err) => {
            println!("server error ({}): {}", err.kind, err.message);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build {
            repo,
            metadata,
            packages,
            client,
        }) => {
            info!("building configuration for {client}");
            let store = EntryStore::load_dir(&repo)?;
            let metadata = StaticMetadata::load(&metadata)?;
            let source = load_source(packages.as_ref())?;
            let collection = Collection::new(
                vec![Arc::new(source)],
                Arc::new(CollectionCache::new()),
            );
            let builder = Builder::new(Arc::new(StoreHandle::new(store)), collection)
                .register(Arc::new(TemplateGenerator::new()));
            let document = builder.build_for(&metadata, &client);
            println!("{}", document.to_xml()?);
            Ok(())
        }
        Some(Commands::Check { document }) => {
            let raw = std::fs::read_to_string(&document)?;
            let parsed = ConfigDocument::from_xml(&raw)?;
            summarize(&parsed);
            Ok(())
        }
        Some(Commands::Run { document, options }) => {
            let raw = std::fs::read_to_string(&document)?;
            let config = match ConfigDocument::from_xml(&raw)? {
                ConfigDocument::Config(config) => config,
                ConfigDocument::Error(err) => {
                    anyhow::bail!("server error ({}): {}", err.kind, err.message);
                }
            };
            let mut agent_options = match options {
                Some(path) => AgentOptions::load(&path)?,
                None => AgentOptions::default(),
            };
            // no real drivers here; never mutate
            agent_options.dry_run = true;

            let mut tools = ToolSet::new();
            tools.register(Box::new(ReportTool));
            let mut engine = Reconciler::new(config, tools, agent_options);
            engine.execute();
            let stats = engine.statistics();
            println!("{}", stats.to_xml()?);
            Ok(())
        }
        None => {
            println!("Concord v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'concord --help' for usage information");
            Ok(())
        }
    }
}
