//! Generic attributed XML tree
//!
//! [`parse`] turns well-formed XML into an [`XmlNode`] tree. Attributes, text
//! and CDATA live in separate slots so they can never collide with child
//! element names; when serialized they appear under [`ATTRIBUTE_PREFIX`],
//! [`TEXT_KEY`] and [`CDATA_KEY`] respectively.
//!
//! A child element name that occurs more than once becomes an
//! [`Occurrence::Sequence`]; a single occurrence stays [`Occurrence::Single`].
//! Consumers resolve the shape once through [`Occurrence::first`] or
//! [`Occurrence::iter`].
//!
//! Character data segments of an element are joined as written, and the
//! joined text is trimmed once when the element closes.
//!
//! The parser is reentrant: embedded documents (such as encoded rule
//! descriptions) are parsed by calling [`parse`] again.

use std::collections::BTreeMap;
use std::slice;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Result, StigError};

pub const ATTRIBUTE_PREFIX: &str = "@_";
pub const TEXT_KEY: &str = "#text";
pub const CDATA_KEY: &str = "_cdata";

/// One or more child elements sharing a name
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence {
    Single(XmlNode),
    Sequence(Vec<XmlNode>),
}

impl Occurrence {
    /// The first node, whichever shape the upstream document used
    pub fn first(&self) -> &XmlNode {
        match self {
            Occurrence::Single(node) => node,
            // a sequence is only ever built from two or more nodes
            Occurrence::Sequence(nodes) => &nodes[0],
        }
    }

    pub fn iter(&self) -> slice::Iter<'_, XmlNode> {
        match self {
            Occurrence::Single(node) => slice::from_ref(node).iter(),
            Occurrence::Sequence(nodes) => nodes.iter(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            Occurrence::Single(_) => 1,
            Occurrence::Sequence(nodes) => nodes.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_sequence(&self) -> bool {
        matches!(self, Occurrence::Sequence(_))
    }

    fn push(&mut self, node: XmlNode) {
        match self {
            Occurrence::Sequence(nodes) => nodes.push(node),
            Occurrence::Single(existing) => {
                let first = std::mem::take(existing);
                *self = Occurrence::Sequence(vec![first, node]);
            }
        }
    }
}

/// An element (or the synthetic document root) in the parsed tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    cdata: Option<String>,
    children: BTreeMap<String, Occurrence>,
}

impl XmlNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Concatenated character data of this element, excluding its children
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn cdata(&self) -> Option<&str> {
        self.cdata.as_deref()
    }

    pub fn child(&self, name: &str) -> Option<&Occurrence> {
        self.children.get(name)
    }

    pub fn first_child(&self, name: &str) -> Option<&XmlNode> {
        self.child(name).map(Occurrence::first)
    }

    /// Text of the first child called `name`, falling back to its CDATA
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.first_child(name)
            .and_then(|child| child.text().or_else(|| child.cdata()))
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.attributes.is_empty()
            && self.text.is_none()
            && self.cdata.is_none()
            && self.children.is_empty()
    }

    fn is_text_only(&self) -> bool {
        self.attributes.is_empty() && self.cdata.is_none() && self.children.is_empty()
    }

    fn append_child(&mut self, name: String, node: XmlNode) {
        match self.children.get_mut(&name) {
            Some(occurrence) => occurrence.push(node),
            None => {
                self.children.insert(name, Occurrence::Single(node));
            }
        }
    }

    fn append_text(slot: &mut Option<String>, value: &str) {
        match slot {
            Some(existing) => existing.push_str(value),
            None => *slot = Some(value.to_string()),
        }
    }

    /// Trim the joined text once the element is complete.
    fn close(mut self) -> Self {
        if let Some(text) = self.text.take() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                self.text = Some(trimmed.to_string());
            }
        }
        self
    }
}

impl Serialize for XmlNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.is_text_only() {
            if let Some(text) = &self.text {
                return serializer.serialize_str(text);
            }
        }

        let mut map = serializer.serialize_map(None)?;
        for (name, value) in &self.attributes {
            map.serialize_entry(&format!("{}{}", ATTRIBUTE_PREFIX, name), value)?;
        }
        if let Some(text) = &self.text {
            map.serialize_entry(TEXT_KEY, text)?;
        }
        if let Some(cdata) = &self.cdata {
            map.serialize_entry(CDATA_KEY, cdata)?;
        }
        for (name, occurrence) in &self.children {
            match occurrence {
                Occurrence::Single(node) => map.serialize_entry(name, node)?,
                Occurrence::Sequence(nodes) => map.serialize_entry(name, nodes)?,
            }
        }
        map.end()
    }
}

/// Parse a well-formed XML string into a tree rooted at a synthetic document
/// node whose children are the top-level elements.
pub fn parse(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<(String, XmlNode)> = vec![(String::new(), XmlNode::default())];

    loop {
        let event = reader.read_event().map_err(|e| parse_error(&reader, e))?;
        match event {
            Event::Start(start) => {
                let (name, node) = open_element(&start)?;
                stack.push((name, node));
            }
            Event::Empty(start) => {
                let (name, node) = open_element(&start)?;
                current(&mut stack).append_child(name, node);
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(StigError::Parse {
                        details: "end tag without matching start tag".to_string(),
                    });
                }
                if let Some((name, node)) = stack.pop() {
                    current(&mut stack).append_child(name, node.close());
                }
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(|e| parse_error(&reader, e))?;
                XmlNode::append_text(&mut current(&mut stack).text, &value);
            }
            Event::CData(cdata) => {
                let value = String::from_utf8_lossy(&cdata);
                XmlNode::append_text(&mut current(&mut stack).cdata, &value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        let (name, _) = &stack[stack.len() - 1];
        return Err(StigError::Parse {
            details: format!("element '{}' is never closed", name),
        });
    }

    let (_, document) = stack.remove(0);
    let document = document.close();
    if document.children.is_empty() {
        return Err(StigError::Parse {
            details: "document contains no elements".to_string(),
        });
    }
    Ok(document)
}

fn current(stack: &mut [(String, XmlNode)]) -> &mut XmlNode {
    let last = stack.len() - 1;
    &mut stack[last].1
}

fn open_element(start: &BytesStart<'_>) -> Result<(String, XmlNode)> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut node = XmlNode::default();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| StigError::Parse {
            details: format!("malformed attribute on '{}': {}", name, e),
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(|e| StigError::Parse {
            details: format!("attribute '{}' on '{}': {}", key, name, e),
        })?;
        node.attributes.insert(key, value.into_owned());
    }

    Ok((name, node))
}

fn parse_error(reader: &Reader<&[u8]>, error: impl std::fmt::Display) -> StigError {
    StigError::Parse {
        details: format!("at byte {}: {}", reader.buffer_position(), error),
    }
}
