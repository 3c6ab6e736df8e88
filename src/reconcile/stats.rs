// src/reconcile/stats.rs

//! Run statistics and operation timestamps
//!
//! Created at run start, appended to throughout, serialized once at run
//! end. Entry lists carry tag and name only; payloads never leave the
//! host through the statistics channel.

use crate::document::EntryId;
use crate::error::{Error, Result};
use chrono::Utc;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::collections::BTreeMap;

/// Named epoch timestamps for run phases
#[derive(Debug, Clone, Default)]
pub struct OpStamps {
    stamps: BTreeMap<String, i64>,
}

impl OpStamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current time under a phase name
    pub fn stamp(&mut self, name: impl Into<String>) {
        self.stamps.insert(name.into(), Utc::now().timestamp());
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.stamps.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.stamps.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Overall run outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Clean,
    Dirty,
}

impl RunState {
    fn as_str(&self) -> &'static str {
        match self {
            RunState::Clean => "clean",
            RunState::Dirty => "dirty",
        }
    }
}

/// Summary of one reconciliation run
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub revision: String,
    pub total: usize,
    pub good: usize,
    pub bad: Vec<EntryId>,
    pub modified: Vec<EntryId>,
    pub extra: Vec<EntryId>,
    pub stamps: OpStamps,
}

impl RunStatistics {
    pub fn state(&self) -> RunState {
        if self.bad.is_empty() {
            RunState::Clean
        } else {
            RunState::Dirty
        }
    }

    /// Serialize to the statistics wire form
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let total = self.total.to_string();
        let good = self.good.to_string();
        let mut root = BytesStart::new("Statistics");
        root.push_attribute(("total", total.as_str()));
        root.push_attribute(("good", good.as_str()));
        root.push_attribute(("state", self.state().as_str()));
        root.push_attribute(("revision", self.revision.as_str()));
        writer.write_event(Event::Start(root))?;

        for (label, ids) in [
            ("Modified", &self.modified),
            ("Extra", &self.extra),
            ("Bad", &self.bad),
        ] {
            writer.write_event(Event::Start(BytesStart::new(label)))?;
            for id in ids {
                let tag = id.kind.to_string();
                let mut elem = BytesStart::new(tag.as_str());
                elem.push_attribute(("name", id.name.as_str()));
                writer.write_event(Event::Empty(elem))?;
            }
            writer.write_event(Event::End(BytesEnd::new(label)))?;
        }

        let pairs: Vec<(String, String)> = self
            .stamps
            .iter()
            .map(|(name, at)| (name.to_string(), at.to_string()))
            .collect();
        let mut stamps = BytesStart::new("OpStamps");
        for (name, at) in &pairs {
            stamps.push_attribute((name.as_str(), at.as_str()));
        }
        writer.write_event(Event::Empty(stamps))?;

        writer.write_event(Event::End(BytesEnd::new("Statistics")))?;
        String::from_utf8(writer.into_inner()).map_err(|e| Error::Xml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EntryKind;

    fn stats(bad: Vec<EntryId>) -> RunStatistics {
        RunStatistics {
            revision: "3".to_string(),
            total: 4,
            good: 4 - bad.len(),
            bad,
            modified: vec![EntryId::new(EntryKind::Package, "nginx")],
            extra: vec![EntryId::new(EntryKind::Service, "telnetd")],
            stamps: OpStamps::new(),
        }
    }

    #[test]
    fn test_state_clean_iff_no_bad() {
        assert_eq!(stats(Vec::new()).state(), RunState::Clean);
        assert_eq!(
            stats(vec![EntryId::new(EntryKind::Path, "/etc/motd")]).state(),
            RunState::Dirty
        );
    }

    #[test]
    fn test_xml_lists_ids_without_payload() {
        let mut s = stats(vec![EntryId::new(EntryKind::Path, "/etc/motd")]);
        s.stamps.stamp("start");
        let xml = s.to_xml().unwrap();
        assert!(xml.contains(r#"state="dirty""#));
        assert!(xml.contains(r#"<Package name="nginx"/>"#));
        assert!(xml.contains(r#"<Path name="/etc/motd"/>"#));
        assert!(xml.contains("OpStamps"));
        assert!(xml.contains("start="));
    }

    #[test]
    fn test_stamps_ordered_and_retrievable() {
        let mut stamps = OpStamps::new();
        stamps.stamp("start");
        stamps.stamp("finished");
        assert!(stamps.get("start").is_some());
        assert!(stamps.get("missing").is_none());
        let names: Vec<&str> = stamps.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["finished", "start"]);
    }
}
