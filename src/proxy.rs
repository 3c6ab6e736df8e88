// src/proxy.rs

//! Server proxy interface and retry policy
//!
//! The engine never speaks a wire protocol itself; it consumes four
//! logical operations over serialized documents, authenticated by the
//! transport underneath. Network failures retry up to a capped count
//! with a fixed delay, then surface as a fatal run error.

use crate::config::TransportOptions;
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::warn;

/// The four logical client-to-server operations
pub trait ServerProxy {
    /// Fetch the probe list document
    fn get_probes(&mut self) -> Result<String>;

    /// Upload probe results
    fn recv_probe_data(&mut self, data: &str) -> Result<()>;

    /// Fetch the serialized configuration document
    fn get_config(&mut self) -> Result<String>;

    /// Upload the serialized statistics document
    fn recv_stats(&mut self, stats: &str) -> Result<()>;
}

/// Wraps a proxy with capped retries and a fixed inter-retry delay
pub struct RetryProxy<T: ServerProxy> {
    inner: T,
    endpoint: String,
    retries: u32,
    delay: Duration,
}

impl<T: ServerProxy> RetryProxy<T> {
    pub fn new(inner: T, options: &TransportOptions) -> Self {
        Self {
            inner,
            endpoint: options.endpoint.clone(),
            retries: options.retries.max(1),
            delay: Duration::from_secs(options.retry_delay_secs),
        }
    }

    fn retry<R>(
        &mut self,
        operation: &str,
        mut call: impl FnMut(&mut T) -> Result<R>,
    ) -> Result<R> {
        let mut last: Option<Error> = None;
        for attempt in 1..=self.retries {
            match call(&mut self.inner) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        "{operation} attempt {attempt}/{} failed: {err}",
                        self.retries
                    );
                    last = Some(err);
                    if attempt < self.retries {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
        Err(Error::Transport {
            endpoint: self.endpoint.clone(),
            reason: last
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }
}

impl<T: ServerProxy> ServerProxy for RetryProxy<T> {
    fn get_probes(&mut self) -> Result<String> {
        self.retry("GetProbes", |inner| inner.get_probes())
    }

    fn recv_probe_data(&mut self, data: &str) -> Result<()> {
        self.retry("RecvProbeData", |inner| inner.recv_probe_data(data))
    }

    fn get_config(&mut self) -> Result<String> {
        self.retry("GetConfig", |inner| inner.get_config())
    }

    fn recv_stats(&mut self, stats: &str) -> Result<()> {
        self.retry("RecvStats", |inner| inner.recv_stats(stats))
    }
}
