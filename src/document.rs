// src/document.rs

//! Configuration document model and XML wire format
//!
//! A document is an ordered tree of typed entries, grouped into named
//! Bundles (reasoned about as a unit, with optional prerequisite Action
//! entries) and Independent blocks (ungrouped entries such as completed
//! package lists). A document may instead be a single `error` element;
//! that is a well-defined failure response, not a protocol violation.

use crate::error::{Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Entry tags understood by the engine
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString,
)]
pub enum EntryKind {
    Path,
    Package,
    /// Reference to a named package group; replaced by concrete
    /// packages during document building, never delivered to clients
    PackageGroup,
    Service,
    Action,
    PostInstall,
    #[strum(serialize = "POSIXUser")]
    User,
    #[strum(serialize = "POSIXGroup")]
    Group,
}

/// Stable identity of an entry: tag plus name.
///
/// This is the only key ever used for per-entry state maps. Entries are
/// rebuilt on every request, so object identity is never meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    pub kind: EntryKind,
    pub name: String,
}

impl EntryId {
    pub fn new(kind: EntryKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// One declarative configuration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub text: Option<String>,
}

impl Entry {
    pub fn new(kind: EntryKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attrs: BTreeMap::new(),
            text: None,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn id(&self) -> EntryId {
        EntryId::new(self.kind, self.name.clone())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Mark this entry as failed to bind; the rest of the document is
    /// unaffected.
    pub fn mark_failure(&mut self, reason: impl Into<String>) {
        self.attrs.insert("failure".to_string(), reason.into());
    }

    pub fn is_failed(&self) -> bool {
        self.attrs.contains_key("failure")
    }
}

/// A named, ordered group of entries distributed as a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub entries: Vec<Entry>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Prerequisite actions: Action entries that do not run post-install
    pub fn prereq_actions(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Action && e.attr("timing") != Some("post"))
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.iter().any(|e| e.id() == *id)
    }
}

/// Top-level grouping inside a configuration document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    Bundle(Bundle),
    /// Ungrouped entries, e.g. completed package lists
    Independent(Vec<Entry>),
}

impl Structure {
    pub fn entries(&self) -> &[Entry] {
        match self {
            Structure::Bundle(b) => &b.entries,
            Structure::Independent(entries) => entries,
        }
    }

    pub fn entries_mut(&mut self) -> &mut Vec<Entry> {
        match self {
            Structure::Bundle(b) => &mut b.entries,
            Structure::Independent(entries) => entries,
        }
    }

    pub fn bundle_name(&self) -> Option<&str> {
        match self {
            Structure::Bundle(b) => Some(&b.name),
            Structure::Independent(_) => None,
        }
    }
}

/// A fully bound configuration for one client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    pub revision: String,
    pub structures: Vec<Structure>,
}

impl Configuration {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            structures: Vec::new(),
        }
    }

    pub fn all_entries(&self) -> impl Iterator<Item = &Entry> {
        self.structures.iter().flat_map(|s| s.entries().iter())
    }

    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.structures.iter().filter_map(|s| match s {
            Structure::Bundle(b) => Some(b),
            Structure::Independent(_) => None,
        })
    }

    /// Name of the bundle containing the given entry, if any
    pub fn bundle_of(&self, id: &EntryId) -> Option<&str> {
        self.bundles()
            .find(|b| b.contains(id))
            .map(|b| b.name.as_str())
    }
}

/// A server-side failure delivered in place of a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentError {
    pub kind: String,
    pub message: String,
}

/// What the server hands back for a configuration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDocument {
    Config(Configuration),
    Error(DocumentError),
}

impl ConfigDocument {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigDocument::Error(DocumentError {
            kind: kind.into(),
            message: message.into(),
        })
    }

    /// Serialize to the XML wire form
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        match self {
            ConfigDocument::Config(config) => write_configuration(&mut writer, config)?,
            ConfigDocument::Error(err) => {
                let mut elem = BytesStart::new("error");
                elem.push_attribute(("type", err.kind.as_str()));
                writer.write_event(Event::Start(elem))?;
                writer.write_event(Event::Text(BytesText::new(&err.message)))?;
                writer.write_event(Event::End(BytesEnd::new("error")))?;
            }
        }
        String::from_utf8(writer.into_inner()).map_err(|e| Error::Xml(e.to_string()))
    }

    /// Parse the XML wire form
    pub fn from_xml(input: &str) -> Result<Self> {
        let mut reader = Reader::from_str(input);
        let mut config = Configuration::default();
        let mut saw_config = false;
        let mut current: Option<Structure> = None;
        let mut open_entry: Option<Entry> = None;
        let mut error_doc: Option<DocumentError> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e)
                    if e.name().as_ref() == b"Configuration" =>
                {
                    saw_config = true;
                    config.revision = attr_value(&e, "revision")?.unwrap_or_default();
                }
                Event::Start(e) if e.name().as_ref() == b"error" => {
                    error_doc = Some(DocumentError {
                        kind: attr_value(&e, "type")?.unwrap_or_default(),
                        message: String::new(),
                    });
                }
                Event::Start(e) if e.name().as_ref() == b"Bundle" => {
                    let name = attr_value(&e, "name")?
                        .ok_or_else(|| Error::Xml("Bundle without a name".to_string()))?;
                    current = Some(Structure::Bundle(Bundle::new(name)));
                }
                Event::Empty(e) if e.name().as_ref() == b"Bundle" => {
                    let name = attr_value(&e, "name")?
                        .ok_or_else(|| Error::Xml("Bundle without a name".to_string()))?;
                    config.structures.push(Structure::Bundle(Bundle::new(name)));
                }
                Event::Start(e) if e.name().as_ref() == b"Independent" => {
                    current = Some(Structure::Independent(Vec::new()));
                }
                Event::Empty(e) if e.name().as_ref() == b"Independent" => {
                    config.structures.push(Structure::Independent(Vec::new()));
                }
                Event::Start(e) => {
                    let entry = parse_entry(&e)?;
                    open_entry = Some(entry);
                }
                Event::Empty(e) => {
                    let entry = parse_entry(&e)?;
                    match current.as_mut() {
                        Some(structure) => structure.entries_mut().push(entry),
                        None => {
                            return Err(Error::Xml(format!(
                                "entry '{}' outside any structure",
                                entry.name
                            )));
                        }
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    if let Some(err) = error_doc.as_mut() {
                        err.message.push_str(&text);
                    } else if let Some(entry) = open_entry.as_mut() {
                        if !text.trim().is_empty() {
                            entry.text = Some(text);
                        }
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"Configuration" => {}
                    b"error" => {}
                    b"Bundle" | b"Independent" => {
                        if let Some(structure) = current.take() {
                            config.structures.push(structure);
                        }
                    }
                    _ => {
                        if let Some(entry) = open_entry.take() {
                            match current.as_mut() {
                                Some(structure) => structure.entries_mut().push(entry),
                                None => {
                                    return Err(Error::Xml(format!(
                                        "entry '{}' outside any structure",
                                        entry.name
                                    )));
                                }
                            }
                        }
                    }
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(err) = error_doc {
            return Ok(ConfigDocument::Error(DocumentError {
                kind: err.kind,
                message: err.message.trim().to_string(),
            }));
        }
        if !saw_config {
            return Err(Error::Xml("no Configuration or error element".to_string()));
        }
        Ok(ConfigDocument::Config(config))
    }
}

fn write_configuration(writer: &mut Writer<Vec<u8>>, config: &Configuration) -> Result<()> {
    let mut root = BytesStart::new("Configuration");
    root.push_attribute(("revision", config.revision.as_str()));
    writer.write_event(Event::Start(root))?;

    for structure in &config.structures {
        let (tag, entries) = match structure {
            Structure::Bundle(b) => {
                let mut elem = BytesStart::new("Bundle");
                elem.push_attribute(("name", b.name.as_str()));
                writer.write_event(Event::Start(elem))?;
                ("Bundle", &b.entries)
            }
            Structure::Independent(entries) => {
                writer.write_event(Event::Start(BytesStart::new("Independent")))?;
                ("Independent", entries)
            }
        };
        for entry in entries {
            write_entry(writer, entry)?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Configuration")))?;
    Ok(())
}

fn write_entry(writer: &mut Writer<Vec<u8>>, entry: &Entry) -> Result<()> {
    let tag = entry.kind.to_string();
    let mut elem = BytesStart::new(tag.as_str());
    elem.push_attribute(("name", entry.name.as_str()));
    for (key, value) in &entry.attrs {
        elem.push_attribute((key.as_str(), value.as_str()));
    }
    match &entry.text {
        Some(text) => {
            writer.write_event(Event::Start(elem))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        }
        None => writer.write_event(Event::Empty(elem))?,
    }
    Ok(())
}

fn parse_entry(e: &BytesStart<'_>) -> Result<Entry> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let kind = EntryKind::from_str(&tag)
        .map_err(|_| Error::Xml(format!("unknown entry tag '{tag}'")))?;

    let mut name = None;
    let mut attrs = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        if key == "name" {
            name = Some(value);
        } else {
            attrs.insert(key, value);
        }
    }

    let name = name.ok_or_else(|| Error::Xml(format!("{tag} entry without a name")))?;
    Ok(Entry {
        kind,
        name,
        attrs,
        text: None,
    })
}

fn attr_value(e: &BytesStart<'_>, wanted: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
        if attr.key.as_ref() == wanted.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        let mut config = Configuration::new("42");
        config.structures.push(Structure::Bundle(
            Bundle::new("web")
                .with_entry(
                    Entry::new(EntryKind::Path, "/etc/motd")
                        .with_attr("type", "file")
                        .with_attr("owner", "root")
                        .with_text("hello"),
                )
                .with_entry(
                    Entry::new(EntryKind::Action, "prep")
                        .with_attr("command", "/bin/true")
                        .with_attr("timing", "pre"),
                ),
        ));
        config.structures.push(Structure::Independent(vec![
            Entry::new(EntryKind::Package, "nginx").with_attr("version", "1.24.0"),
        ]));
        config
    }

    #[test]
    fn test_document_round_trip() {
        let doc = ConfigDocument::Config(sample());
        let xml = doc.to_xml().unwrap();
        let parsed = ConfigDocument::from_xml(&xml).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_error_document_round_trip() {
        let doc = ConfigDocument::error("metadata", "no such client");
        let xml = doc.to_xml().unwrap();
        match ConfigDocument::from_xml(&xml).unwrap() {
            ConfigDocument::Error(err) => {
                assert_eq!(err.kind, "metadata");
                assert_eq!(err.message, "no such client");
            }
            other => panic!("expected error document, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let xml = r#"<Configuration revision="1"><Bundle name="b"><Widget name="x"/></Bundle></Configuration>"#;
        assert!(ConfigDocument::from_xml(xml).is_err());
    }

    #[test]
    fn test_entry_outside_structure_rejected() {
        let xml = r#"<Configuration revision="1"><Package name="nginx"/></Configuration>"#;
        assert!(ConfigDocument::from_xml(xml).is_err());
    }

    #[test]
    fn test_failure_marker() {
        let mut entry = Entry::new(EntryKind::Path, "/etc/motd");
        assert!(!entry.is_failed());
        entry.mark_failure("no matching layer");
        assert!(entry.is_failed());
        assert_eq!(entry.attr("failure"), Some("no matching layer"));
    }

    #[test]
    fn test_prereq_actions_exclude_post() {
        let bundle = Bundle::new("b")
            .with_entry(Entry::new(EntryKind::Action, "pre").with_attr("timing", "pre"))
            .with_entry(Entry::new(EntryKind::Action, "post").with_attr("timing", "post"))
            .with_entry(Entry::new(EntryKind::Path, "/x"));
        let names: Vec<_> = bundle.prereq_actions().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["pre"]);
    }

    #[test]
    fn test_bundle_of() {
        let config = sample();
        let id = EntryId::new(EntryKind::Path, "/etc/motd");
        assert_eq!(config.bundle_of(&id), Some("web"));
        let pkg = EntryId::new(EntryKind::Package, "nginx");
        assert_eq!(config.bundle_of(&pkg), None);
    }
}
