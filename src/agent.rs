// src/agent.rs

//! Client run orchestration
//!
//! One agent run: acquire the run lock, execute probes, upload probe
//! data, download and parse the configuration document, reconcile, and
//! upload statistics. Run-level preconditions (lock, transport, a server
//! error document, probe failure under the fatal policy) abort the run;
//! everything else degrades per entry inside the reconciler.

use crate::config::AgentOptions;
use crate::document::ConfigDocument;
use crate::error::{Error, Result};
use crate::lock::RunLock;
use crate::probes::{Probe, ProbeRunner, probe_data_xml};
use crate::proxy::ServerProxy;
use crate::reconcile::{OpStamps, Prompter, Reconciler, RunStatistics, ToolSet};
use tracing::info;
use uuid::Uuid;

/// Drives one full client run against a server proxy
pub struct Agent {
    options: AgentOptions,
    proxy: Box<dyn ServerProxy>,
    probe_runner: ProbeRunner,
    prompter: Option<Box<dyn Prompter>>,
    run_id: Uuid,
}

impl Agent {
    pub fn new(options: AgentOptions, proxy: Box<dyn ServerProxy>) -> Self {
        Self {
            options,
            proxy,
            probe_runner: ProbeRunner::default(),
            prompter: None,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_probe_runner(mut self, runner: ProbeRunner) -> Self {
        self.probe_runner = runner;
        self
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute one run and return the statistics that were uploaded
    pub fn run(&mut self, tools: ToolSet) -> Result<RunStatistics> {
        info!("starting agent run {}", self.run_id);
        let mut stamps = OpStamps::new();
        stamps.stamp("start");

        let _lock = RunLock::acquire(&self.options.lockfile)?;

        let probe_list = self.proxy.get_probes()?;
        let probes = Probe::parse_list(&probe_list)?;
        if !probes.is_empty() {
            let data = self
                .probe_runner
                .run_all(&probes, self.options.probe_exit)?;
            self.proxy.recv_probe_data(&probe_data_xml(&data)?)?;
        }
        stamps.stamp("probe_upload");

        let raw = self.proxy.get_config()?;
        stamps.stamp("config_download");

        let config = match ConfigDocument::from_xml(&raw)? {
            ConfigDocument::Config(config) => config,
            ConfigDocument::Error(err) => {
                return Err(Error::Server {
                    kind: err.kind,
                    message: err.message,
                });
            }
        };
        stamps.stamp("config_parse");

        let mut engine = Reconciler::new(config, tools, self.options.clone());
        if let Some(prompter) = self.prompter.take() {
            engine = engine.with_prompter(prompter);
        }
        engine.stamps = stamps;
        engine.execute();

        let stats = engine.statistics();
        self.proxy.recv_stats(&stats.to_xml()?)?;
        info!("agent run {} finished", self.run_id);
        Ok(stats)
    }
}
