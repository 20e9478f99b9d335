//! A small owned XML tree over quick-xml events.
//!
//! OOXML parts are edited structurally (runs split, paragraphs spliced,
//! styles copied between parts), which needs random access that a pull
//! parser does not give. Parts are small enough to hold in memory.
//!
//! Names are kept as written, prefix included (`w:p`, `r:id`); Word always
//! uses the conventional prefixes for the namespaces we touch.

use crate::error::{OfferError, Result};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            XmlNode::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            XmlNode::Element(e) => Some(e),
            _ => None,
        }
    }

    /// True for an element with the given qualified name.
    pub fn is(&self, name: &str) -> bool {
        self.as_element().is_some_and(|e| e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| k != key);
    }

    /// Child elements, skipping text and comments.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(XmlNode::as_element_mut)
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    /// Direct text content (concatenated text children).
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![XmlNode::Text(text.into())];
    }

    /// Visit this element and every descendant element, depth first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Element)) {
        f(self);
        for child in self.elements() {
            child.walk(f);
        }
    }

    /// Mutable depth-first visit of this element and every descendant element.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        f(self);
        for child in self.elements_mut() {
            child.walk_mut(f);
        }
    }

    /// Follow a path of child indices (into `children`).
    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &idx in path {
            current = current.children.get_mut(idx)?.as_element_mut()?;
        }
        Some(current)
    }
}

/// A parsed XML part: the root element plus whether the source carried a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub root: Element,
}

impl XmlDocument {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| OfferError::MalformedDocument(format!("part is not UTF-8: {e}")))?;
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);

        let mut reader = Reader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                OfferError::MalformedDocument(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                ))
            })?;
            match event {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, XmlNode::Element(element))?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        OfferError::MalformedDocument("unbalanced end tag".into())
                    })?;
                    attach(&mut stack, &mut root, XmlNode::Element(element))?;
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| OfferError::MalformedDocument(e.to_string()))?;
                    if !stack.is_empty() {
                        push_child(&mut stack, XmlNode::Text(text.into_owned()));
                    }
                }
                Event::CData(c) => {
                    if !stack.is_empty() {
                        let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        push_child(&mut stack, XmlNode::CData(text));
                    }
                }
                Event::Comment(c) => {
                    if !stack.is_empty() {
                        let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        push_child(&mut stack, XmlNode::Comment(text));
                    }
                }
                // Declaration is regenerated on write; PIs and doctypes do not occur in OOXML parts.
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(OfferError::MalformedDocument(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }
        root.map(XmlDocument::new)
            .ok_or_else(|| OfferError::MalformedDocument("part has no root element".into()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_write_error)?;
        // Word expects the root on its own line after the declaration.
        writer
            .write_event(Event::Text(BytesText::from_escaped("\r\n")))
            .map_err(xml_write_error)?;
        write_element(&mut writer, &self.root)?;
        Ok(writer.into_inner())
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| OfferError::MalformedDocument(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| OfferError::MalformedDocument(e.to_string()))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn push_child(stack: &mut [Element], node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, node: XmlNode) -> Result<()> {
    if stack.is_empty() {
        let XmlNode::Element(element) = node else {
            return Ok(());
        };
        if root.is_some() {
            return Err(OfferError::MalformedDocument(
                "more than one root element".into(),
            ));
        }
        *root = Some(element);
    } else {
        push_child(stack, node);
    }
    Ok(())
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (k, v) in &element.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if element.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(xml_write_error)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(xml_write_error)?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(xml_write_error)?,
            XmlNode::CData(t) => writer
                .write_event(Event::CData(BytesCData::new(t.as_str())))
                .map_err(xml_write_error)?,
            XmlNode::Comment(t) => writer
                .write_event(Event::Comment(BytesText::from_escaped(t.as_str())))
                .map_err(xml_write_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_write_error)?;
    Ok(())
}

fn xml_write_error(e: impl std::fmt::Display) -> OfferError {
    OfferError::Internal(format!("XML write failed: {e}"))
}
