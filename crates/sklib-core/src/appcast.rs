//! Sparkle appcast maintenance.
//!
//! The appcast is an RSS feed clients poll for updates. Each release is an
//! `<item>` holding an `<enclosure url="…" sparkle:version="…"/>`. New items
//! are prepended so the feed stays newest-first.
//!
//! Documents are held as a small element tree so anything this module does
//! not understand (titles, release notes, extra attributes) survives a
//! rewrite untouched.
//!
//! A missing or unparseable feed is never an error: [`update`] substitutes
//! [`AppcastDocument::empty`] and carries on.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Sparkle XML namespace.
pub const SPARKLE_NS: &str = "http://www.andymatuschak.org/xml-namespaces/sparkle";

/// Dublin Core XML namespace.
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

/// Errors from appcast parsing and serialization.
#[derive(Error, Debug)]
pub enum AppcastError {
    /// The document is not well-formed XML.
    #[error("malformed appcast: {0}")]
    Parse(String),

    /// The document is XML but not an RSS feed.
    #[error("appcast root element is <{0}>, expected <rss>")]
    NotRss(String),

    /// Writing the document failed.
    #[error("failed to serialize appcast: {0}")]
    Write(String),
}

/// Result alias for appcast operations.
pub type AppcastResult<T> = Result<T, AppcastError>;

/// One release in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppcastEntry {
    /// Download URL of the release artifact.
    pub url: String,
    /// Version label, without a `v` prefix.
    pub version: String,
}

impl AppcastEntry {
    /// Build an entry.
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
        }
    }

    fn to_item(&self) -> Element {
        let mut enclosure = Element::new("enclosure");
        enclosure.attrs.push(("url".into(), self.url.clone()));
        enclosure
            .attrs
            .push(("sparkle:version".into(), self.version.clone()));

        let mut item = Element::new("item");
        item.children.push(Node::Element(enclosure));
        item
    }

    fn from_item(item: &Element) -> Option<Self> {
        let enclosure = item.child("enclosure")?;
        Some(Self {
            url: enclosure.attr("url").unwrap_or_default().to_string(),
            version: enclosure
                .attr("sparkle:version")
                .unwrap_or_default()
                .to_string(),
        })
    }
}

// ──────────────────────────────────────────────
// Element tree
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }
}

// ──────────────────────────────────────────────
// Document
// ──────────────────────────────────────────────

/// An RSS appcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppcastDocument {
    root: Element,
}

impl Default for AppcastDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl AppcastDocument {
    /// The canonical feed with no releases.
    pub fn empty() -> Self {
        let mut rss = Element::new("rss");
        rss.attrs = vec![
            ("xmlns:sparkle".into(), SPARKLE_NS.into()),
            ("xmlns:dc".into(), DC_NS.into()),
            ("version".into(), "2.0".into()),
        ];
        rss.children.push(Node::Element(Element::new("channel")));
        Self { root: rss }
    }

    /// Parse a feed. Fails on malformed XML or a non-`<rss>` root.
    pub fn parse(xml: &str) -> AppcastResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event().map_err(parse_err)? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let el = element_from(&start)?;
                    attach(&mut stack, &mut root, el);
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| AppcastError::Parse("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, el);
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(parse_err)?.into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(AppcastError::Parse(format!("unclosed <{}>", open.name)));
        }
        let root = root.ok_or_else(|| AppcastError::Parse("empty document".into()))?;
        if root.name != "rss" {
            return Err(AppcastError::NotRss(root.name));
        }
        Ok(Self { root })
    }

    /// Parse `xml`, falling back to [`empty`](Self::empty) when absent or broken.
    pub fn parse_or_empty(xml: Option<&str>) -> Self {
        let Some(xml) = xml else {
            debug!("no existing appcast, starting from empty feed");
            return Self::empty();
        };
        match Self::parse(xml) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, "existing appcast unreadable, starting from empty feed");
                Self::empty()
            }
        }
    }

    /// Releases in feed order, newest first.
    pub fn entries(&self) -> Vec<AppcastEntry> {
        self.root
            .child("channel")
            .map(|channel| {
                channel
                    .elements()
                    .filter(|el| el.name == "item")
                    .filter_map(AppcastEntry::from_item)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Put `entry` at the top of the feed.
    pub fn prepend(&mut self, entry: &AppcastEntry) {
        if self.root.child("channel").is_none() {
            self.root
                .children
                .push(Node::Element(Element::new("channel")));
        }
        let Some(channel) = self.root.child_mut("channel") else {
            return;
        };

        let first_item = channel
            .children
            .iter()
            .position(|node| matches!(node, Node::Element(el) if el.name == "item"))
            .unwrap_or(channel.children.len());
        channel
            .children
            .insert(first_item, Node::Element(entry.to_item()));
    }

    /// Serialize with an XML declaration and two-space indentation.
    pub fn to_xml(&self) -> AppcastResult<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(write_err)?;
        write_element(&mut writer, &self.root)?;

        let mut xml = String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| AppcastError::Write(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }
}

/// Prepend `entry` to `existing` (absent or unparseable feeds start empty).
///
/// Never fails.
pub fn update(existing: Option<&str>, entry: &AppcastEntry) -> AppcastDocument {
    let mut doc = AppcastDocument::parse_or_empty(existing);
    doc.prepend(entry);
    doc
}

// ──────────────────────────────────────────────
// Internal helpers
// ──────────────────────────────────────────────

fn parse_err(err: impl std::fmt::Display) -> AppcastError {
    AppcastError::Parse(err.to_string())
}

fn write_err(err: impl std::fmt::Display) -> AppcastError {
    AppcastError::Write(err.to_string())
}

fn element_from(start: &BytesStart<'_>) -> AppcastResult<Element> {
    let mut el = Element::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(parse_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(parse_err)?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(el)),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, el: &Element) -> AppcastResult<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if el.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(write_err);
    }

    writer.write_event(Event::Start(start)).map_err(write_err)?;
    for child in &el.children {
        match child {
            Node::Element(inner) => write_element(writer, inner)?,
            Node::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_err)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .map_err(write_err)
}
