// src/probes.rs

//! Probe execution
//!
//! Probes are small scripts the server sends to learn facts about a
//! client before building its configuration. Each script is spilled to a
//! temp file and executed with a bounded timeout; a probe that exceeds
//! its timeout is a failed probe, never a hang of the whole run. Whether
//! a failed probe aborts the run is the caller's probe-exit policy.

use crate::error::{Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{error, info};
use wait_timeout::ChildExt;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// One probe script to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub name: String,
    pub interpreter: String,
    pub source: String,
    pub script: String,
}

impl Probe {
    /// Parse the probe list document the server sends
    pub fn parse_list(input: &str) -> Result<Vec<Probe>> {
        let mut reader = Reader::from_str(input);
        let mut probes = Vec::new();
        let mut open: Option<Probe> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == b"probe" => {
                    let mut probe = Probe {
                        name: String::new(),
                        interpreter: "/bin/sh".to_string(),
                        source: String::new(),
                        script: String::new(),
                    };
                    for attr in e.attributes() {
                        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
                        let value = attr.unescape_value()?.into_owned();
                        match attr.key.as_ref() {
                            b"name" => probe.name = value,
                            b"interpreter" => probe.interpreter = value,
                            b"source" => probe.source = value,
                            _ => {}
                        }
                    }
                    if probe.name.is_empty() {
                        return Err(Error::Xml("probe without a name".to_string()));
                    }
                    open = Some(probe);
                }
                Event::Text(t) => {
                    if let Some(probe) = open.as_mut() {
                        probe.script.push_str(&t.unescape()?);
                    }
                }
                Event::End(e) if e.name().as_ref() == b"probe" => {
                    if let Some(probe) = open.take() {
                        probes.push(probe);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(probes)
    }
}

/// Serialize probe results for upload
pub fn probe_data_xml(data: &BTreeMap<String, String>) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Start(BytesStart::new("probe-data")))?;
    for (name, value) in data {
        let mut elem = BytesStart::new("probe");
        elem.push_attribute(("name", name.as_str()));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new("probe")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("probe-data")))?;
    String::from_utf8(writer.into_inner()).map_err(|e| Error::Xml(e.to_string()))
}

/// Executes probes with a per-probe timeout
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    timeout: Duration,
}

impl ProbeRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run one probe and return its trimmed stdout
    pub fn run(&self, probe: &Probe) -> Result<String> {
        info!("running probe {}", probe.name);

        let mut script = tempfile::NamedTempFile::new()?;
        script.write_all(probe.script.as_bytes())?;
        script.flush()?;

        let mut child = Command::new(&probe.interpreter)
            .arg(script.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Probe {
                name: probe.name.clone(),
                reason: format!("failed to spawn {}: {e}", probe.interpreter),
            })?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Probe {
                    name: probe.name.clone(),
                    reason: format!("timed out after {:?}", self.timeout),
                });
            }
        };

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output)?;
        }

        if !status.success() {
            return Err(Error::Probe {
                name: probe.name.clone(),
                reason: format!("return value {status}"),
            });
        }
        Ok(output.trim_end().to_string())
    }

    /// Run every probe; the probe-exit policy decides whether a failure
    /// aborts the run or is only logged
    pub fn run_all(
        &self,
        probes: &[Probe],
        probe_exit: bool,
    ) -> Result<BTreeMap<String, String>> {
        let mut results = BTreeMap::new();
        for probe in probes {
            match self.run(probe) {
                Ok(output) => {
                    results.insert(probe.name.clone(), output);
                }
                Err(err) if probe_exit => return Err(err),
                Err(err) => {
                    error!("{err}");
                }
            }
        }
        Ok(results)
    }
}

impl Default for ProbeRunner {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(name: &str, script: &str) -> Probe {
        Probe {
            name: name.to_string(),
            interpreter: "/bin/sh".to_string(),
            source: "test".to_string(),
            script: script.to_string(),
        }
    }

    #[test]
    fn test_parse_probe_list() {
        let xml = r#"<probes>
            <probe name="arch" interpreter="/bin/sh" source="core">uname -m</probe>
            <probe name="os" source="core">uname -s</probe>
        </probes>"#;
        let probes = Probe::parse_list(xml).unwrap();
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].name, "arch");
        assert_eq!(probes[0].script, "uname -m");
        assert_eq!(probes[1].interpreter, "/bin/sh");
    }

    #[test]
    fn test_run_captures_stdout() {
        let runner = ProbeRunner::default();
        let output = runner.run(&probe("echo", "echo fact-value")).unwrap();
        assert_eq!(output, "fact-value");
    }

    #[test]
    fn test_failing_probe_reports_status() {
        let runner = ProbeRunner::default();
        let err = runner.run(&probe("fail", "exit 3")).unwrap_err();
        assert!(matches!(err, Error::Probe { .. }));
    }

    #[test]
    fn test_timeout_is_a_probe_failure() {
        let runner = ProbeRunner::new(Duration::from_millis(100));
        let err = runner.run(&probe("slow", "sleep 5")).unwrap_err();
        match err {
            Error::Probe { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected probe failure, got {other}"),
        }
    }

    #[test]
    fn test_run_all_logged_policy_continues() {
        let runner = ProbeRunner::default();
        let probes = vec![probe("bad", "exit 1"), probe("good", "echo ok")];
        let results = runner.run_all(&probes, false).unwrap();
        assert_eq!(results.get("good").map(String::as_str), Some("ok"));
        assert!(!results.contains_key("bad"));
    }

    #[test]
    fn test_run_all_fatal_policy_aborts() {
        let runner = ProbeRunner::default();
        let probes = vec![probe("bad", "exit 1"), probe("good", "echo ok")];
        assert!(runner.run_all(&probes, true).is_err());
    }

    #[test]
    fn test_probe_data_round_trip_shape() {
        let mut data = BTreeMap::new();
        data.insert("arch".to_string(), "x86_64".to_string());
        let xml = probe_data_xml(&data).unwrap();
        assert!(xml.contains(r#"<probe name="arch">x86_64</probe>"#));
    }
}
