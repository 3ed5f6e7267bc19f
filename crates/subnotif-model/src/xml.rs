// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! XML encoding of data trees and notifications, and a small element reader
//! used to decode RPC inputs and subtree filters.
//!
//! YANG modules are mapped to XML namespaces through the [SchemaContext]. The
//! writer only uses default namespace declarations: an `xmlns` attribute is
//! added whenever the namespace differs from the enclosing element's.

use crate::{
    filter::{FilterNode, SubtreeFilter},
    node::{Node, NodeName},
    notification::format_date_time,
    schema::SchemaContext,
    NOTIFICATION_NS,
};
use chrono::{DateTime, Utc};
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    name::ResolveResult,
    reader::NsReader,
};
use std::io;

#[derive(Debug, strum_macros::Display)]
pub enum XmlWriterError {
    #[strum(to_string = "no XML namespace is known for module `{0}`")]
    UndefinedNamespace(String),

    #[strum(to_string = "std::io:Error: `{0}`")]
    StdIo(io::Error),

    #[strum(to_string = "invalid UTF-8 output: `{0}`")]
    Utf8Error(std::string::FromUtf8Error),
}

impl std::error::Error for XmlWriterError {}

impl From<io::Error> for XmlWriterError {
    fn from(value: io::Error) -> Self {
        Self::StdIo(value)
    }
}

impl From<std::string::FromUtf8Error> for XmlWriterError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

/// Transform a data tree into an XML stream of characters
pub struct XmlWriter<'a, T: io::Write> {
    inner: quick_xml::writer::Writer<T>,
    schema: &'a SchemaContext,
    // Default namespace in effect for each open element
    namespaces: Vec<Option<String>>,
}

impl<'a, T: io::Write> XmlWriter<'a, T> {
    pub fn new(inner: quick_xml::writer::Writer<T>, schema: &'a SchemaContext) -> Self {
        Self {
            inner,
            schema,
            namespaces: vec![],
        }
    }

    fn current_namespace(&self) -> Option<&str> {
        self.namespaces.last().and_then(|ns| ns.as_deref())
    }

    /// Create a start tag, declaring `namespace` as the default namespace if
    /// it differs from the enclosing one. `None` inherits the parent's.
    fn create_element(&self, name: &str, namespace: Option<&str>) -> BytesStart<'static> {
        let mut start = BytesStart::new(name.to_string());
        if let Some(namespace) = namespace {
            if self.current_namespace() != Some(namespace) {
                start.push_attribute(("xmlns", namespace));
            }
        }
        start
    }

    pub fn start_element(&mut self, name: &str, namespace: Option<&str>) -> io::Result<()> {
        let start = self.create_element(name, namespace);
        let effective = namespace
            .map(str::to_string)
            .or_else(|| self.current_namespace().map(str::to_string));
        self.namespaces.push(effective);
        self.inner.write_event(Event::Start(start))
    }

    pub fn end_element(&mut self, name: &str) -> io::Result<()> {
        self.namespaces.pop();
        self.inner.write_event(Event::End(BytesEnd::new(name)))
    }

    pub fn empty_element(&mut self, name: &str, namespace: Option<&str>) -> io::Result<()> {
        let start = self.create_element(name, namespace);
        self.inner.write_event(Event::Empty(start))
    }

    pub fn text_element(
        &mut self,
        name: &str,
        namespace: Option<&str>,
        text: &str,
    ) -> io::Result<()> {
        if text.is_empty() {
            return self.empty_element(name, namespace);
        }
        self.start_element(name, namespace)?;
        self.inner.write_event(Event::Text(BytesText::new(text)))?;
        self.end_element(name)
    }

    fn namespace_of(&self, name: &NodeName) -> Result<Option<&'a str>, XmlWriterError> {
        match name.module() {
            None => Ok(None),
            Some(module) => self
                .schema
                .namespace_of(module)
                .map(Some)
                .ok_or_else(|| XmlWriterError::UndefinedNamespace(module.to_string())),
        }
    }

    /// Writes `node`, namespaces are declared only for module changes.
    pub fn write_node(
        &mut self,
        node: &Node,
        parent_module: Option<&str>,
    ) -> Result<(), XmlWriterError> {
        let module = node.name().effective_module(parent_module);
        let namespace = if module == parent_module {
            None
        } else {
            self.namespace_of(node.name())?
        };
        let name = node.name().name();
        match node {
            Node::Container { children, .. } if children.is_empty() => {
                self.empty_element(name, namespace)?;
            }
            Node::Container { children, .. } => {
                self.start_element(name, namespace)?;
                for child in children {
                    self.write_node(child, module)?;
                }
                self.end_element(name)?;
            }
            Node::List { entries, .. } => {
                for entry in entries {
                    self.start_element(name, namespace)?;
                    for child in entry {
                        self.write_node(child, module)?;
                    }
                    self.end_element(name)?;
                }
            }
            Node::Leaf { value, .. } => {
                self.text_element(name, namespace, &value.to_string())?;
            }
            Node::LeafList { values, .. } => {
                for value in values {
                    self.text_element(name, namespace, &value.to_string())?;
                }
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub fn encode_node(node: &Node, schema: &SchemaContext) -> Result<String, XmlWriterError> {
    let mut writer = XmlWriter::new(quick_xml::writer::Writer::new(vec![]), schema);
    writer.write_node(node, None)?;
    Ok(String::from_utf8(writer.into_inner())?)
}

/// NETCONF notification envelope (RFC 5277 Section 4)
pub fn encode_notification(
    event_time: DateTime<Utc>,
    body: &Node,
    schema: &SchemaContext,
) -> Result<String, XmlWriterError> {
    let mut writer = XmlWriter::new(quick_xml::writer::Writer::new(vec![]), schema);
    writer.start_element("notification", Some(NOTIFICATION_NS))?;
    writer.text_element(
        "eventTime",
        None,
        &format_date_time(event_time).to_string(),
    )?;
    writer.write_node(body, None)?;
    writer.end_element("notification")?;
    Ok(String::from_utf8(writer.into_inner())?)
}

#[derive(Debug, strum_macros::Display)]
pub enum ParsingError {
    /// Unexpected XML token found
    #[strum(to_string = "expecting {expecting} but found {found:?}")]
    WrongToken {
        expecting: String,
        found: Event<'static>,
    },

    #[strum(to_string = "required XML element `{0}` is missing")]
    MissingElement(String),

    /// Invalid value error when converting from XML provided value to Rust type
    #[strum(to_string = "invalid value: `{0}`")]
    InvalidValue(String),

    #[strum(to_string = "undeclared namespace prefix `{0}`")]
    UnknownPrefix(String),

    #[strum(to_string = "namespace `{0}` does not belong to any known module")]
    UnknownNamespace(String),

    /// Error when trying to decode UTF-8
    #[strum(to_string = "{0}")]
    Utf8Error(std::str::Utf8Error),

    /// Error from quick-xml
    #[strum(to_string = "{0}")]
    QuickXml(quick_xml::Error),

    #[strum(to_string = "Found EOF while expecting data")]
    Eof,

    /// Error from quick-xml encoding
    #[strum(to_string = "{0}")]
    EncodingError(quick_xml::encoding::EncodingError),
}

impl PartialEq for ParsingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::WrongToken {
                    expecting: left_exp,
                    found: left_found,
                },
                Self::WrongToken {
                    expecting: right_exp,
                    found: right_found,
                },
            ) => left_exp == right_exp && left_found == right_found,
            (Self::MissingElement(left), Self::MissingElement(right)) => left == right,
            (Self::InvalidValue(left), Self::InvalidValue(right)) => left == right,
            (Self::UnknownPrefix(left), Self::UnknownPrefix(right)) => left == right,
            (Self::UnknownNamespace(left), Self::UnknownNamespace(right)) => left == right,
            (Self::Utf8Error(left), Self::Utf8Error(right)) => left == right,
            (Self::QuickXml(left), Self::QuickXml(right)) => left.to_string() == right.to_string(),
            (Self::Eof, Self::Eof) => true,
            (Self::EncodingError(left), Self::EncodingError(right)) => left == right,
            _ => false,
        }
    }
}

impl std::error::Error for ParsingError {}

impl From<quick_xml::Error> for ParsingError {
    fn from(value: quick_xml::Error) -> Self {
        Self::QuickXml(value)
    }
}

impl From<std::str::Utf8Error> for ParsingError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<quick_xml::encoding::EncodingError> for ParsingError {
    fn from(value: quick_xml::encoding::EncodingError) -> Self {
        Self::EncodingError(value)
    }
}

/// An XML element with its namespace resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    namespace: Option<String>,
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Text content with surrounding whitespace removed
    pub fn text(&self) -> &str {
        self.text.trim()
    }
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }
    pub fn is_tag(&self, namespace: Option<&str>, name: &str) -> bool {
        self.namespace.as_deref() == namespace && self.name == name
    }
}

/// Transform an XML stream of characters into [XmlElement]s
pub struct XmlParser<R: Sized> {
    ns_reader: NsReader<R>,
    current: Event<'static>,
    buf: Vec<u8>,
}

impl<R: io::BufRead> XmlParser<R> {
    pub fn new(mut ns_reader: NsReader<R>) -> Result<Self, ParsingError> {
        let mut buf: Vec<u8> = vec![];
        let current = ns_reader.read_event_into(&mut buf)?.into_owned();
        buf.clear();
        Ok(Self {
            ns_reader,
            current,
            buf,
        })
    }

    /// read one more tag
    pub fn next_event(&mut self) -> Result<Event<'static>, ParsingError> {
        self.buf.clear();
        let evt = self.ns_reader.read_event_into(&mut self.buf)?.into_owned();
        Ok(std::mem::replace(&mut self.current, evt))
    }

    pub const fn peek(&self) -> &Event<'static> {
        &self.current
    }

    /// skip the XML declaration, comments and whitespace before the root
    pub fn skip_prolog(&mut self) -> Result<(), ParsingError> {
        loop {
            match self.peek() {
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {
                    self.next_event()?;
                }
                Event::Text(text) if text.iter().all(u8::is_ascii_whitespace) => {
                    self.next_event()?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Reads the element at the current position, including its descendants
    pub fn read_element(&mut self) -> Result<XmlElement, ParsingError> {
        let (start, has_children) = match self.peek() {
            Event::Start(start) => (start.clone(), true),
            Event::Empty(start) => (start.clone(), false),
            Event::Eof => return Err(ParsingError::Eof),
            found => {
                return Err(ParsingError::WrongToken {
                    expecting: "element".to_string(),
                    found: found.clone(),
                })
            }
        };
        let (resolved, local) = self.ns_reader.resolve_element(start.name());
        let namespace = match resolved {
            ResolveResult::Bound(ns) => Some(std::str::from_utf8(ns.into_inner())?.to_string()),
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => {
                return Err(ParsingError::UnknownPrefix(
                    String::from_utf8_lossy(&prefix).to_string(),
                ))
            }
        };
        let name = std::str::from_utf8(local.into_inner())?.to_string();
        self.next_event()?;
        let mut element = XmlElement {
            namespace,
            name,
            text: String::new(),
            children: vec![],
        };
        if !has_children {
            return Ok(element);
        }
        loop {
            match self.peek() {
                Event::Start(_) | Event::Empty(_) => {
                    let child = self.read_element()?;
                    element.children.push(child);
                }
                Event::Text(escaped) => {
                    let decoded = escaped.decode()?;
                    element.text.push_str(decoded.as_ref());
                    self.next_event()?;
                }
                Event::CData(unescaped) => {
                    let decoded = unescaped.decode()?;
                    element.text.push_str(decoded.as_ref());
                    self.next_event()?;
                }
                Event::GeneralRef(general_ref) => {
                    let decoded = general_ref.decode()?;
                    let replaced = match decoded.as_ref() {
                        "quot" => "\"",
                        "apos" => "'",
                        "amp" => "&",
                        "lt" => "<",
                        "gt" => ">",
                        _ => decoded.as_ref(),
                    };
                    element.text.push_str(replaced);
                    self.next_event()?;
                }
                Event::End(_) => {
                    self.next_event()?;
                    return Ok(element);
                }
                Event::Eof => return Err(ParsingError::Eof),
                _ => {
                    self.next_event()?;
                }
            }
        }
    }
}

/// Parses a whole document and returns its root element
pub fn parse_document(xml: &str) -> Result<XmlElement, ParsingError> {
    let mut parser = XmlParser::new(NsReader::from_reader(xml.as_bytes()))?;
    parser.skip_prolog()?;
    parser.read_element()
}

fn filter_node(element: &XmlElement, schema: &SchemaContext) -> Result<FilterNode, ParsingError> {
    let name = match element.namespace() {
        None => NodeName::local(element.name()),
        Some(namespace) => {
            let module = schema
                .module_by_namespace(namespace)
                .ok_or_else(|| ParsingError::UnknownNamespace(namespace.to_string()))?;
            NodeName::qualified(module, element.name())
        }
    };
    if !element.children().is_empty() {
        let children = element
            .children()
            .iter()
            .map(|child| filter_node(child, schema))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterNode::containment(name, children))
    } else if element.text().is_empty() {
        Ok(FilterNode::selection(name))
    } else {
        Ok(FilterNode::content_match(name, element.text()))
    }
}

/// Decodes the children of a `<stream-subtree-filter>` element.
pub fn filter_from_xml(
    element: &XmlElement,
    schema: &SchemaContext,
) -> Result<SubtreeFilter, ParsingError> {
    let roots = element
        .children()
        .iter()
        .map(|child| filter_node(child, schema))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SubtreeFilter::new(roots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::LeafValue,
        tests::{inventory, toaster_restocked, toaster_schema, TOASTER_MODULE, TOASTER_NS},
        SUBSCRIBED_NOTIFICATIONS_NS,
    };
    use chrono::TimeZone;

    #[test]
    fn test_encode_notification() {
        let event_time = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let xml = encode_notification(event_time, &toaster_restocked(5), &toaster_schema())
            .unwrap();
        assert_eq!(
            xml,
            "<notification xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\">\
             <eventTime>2026-03-04T05:06:07Z</eventTime>\
             <toasterRestocked xmlns=\"http://netconfcentral.org/ns/toaster\">\
             <amountOfBread>5</amountOfBread>\
             </toasterRestocked>\
             </notification>"
        );
    }

    #[test]
    fn test_encode_lists_and_escaping() {
        let xml = encode_node(&inventory(), &toaster_schema()).unwrap();
        assert_eq!(
            xml,
            "<inventory xmlns=\"http://netconfcentral.org/ns/toaster\">\
             <entry><id>1</id><name>wheat</name><tags>bread</tags><tags>brown</tags></entry>\
             <entry><id>2</id><name>rye</name></entry>\
             <location><building>B1</building></location>\
             </inventory>"
        );

        let escaped = Node::leaf(NodeName::qualified(TOASTER_MODULE, "note"), "a<b & c");
        assert_eq!(
            encode_node(&escaped, &toaster_schema()).unwrap(),
            "<note xmlns=\"http://netconfcentral.org/ns/toaster\">a&lt;b &amp; c</note>"
        );

        let empty = Node::leaf(NodeName::qualified(TOASTER_MODULE, "flag"), LeafValue::Empty);
        assert_eq!(
            encode_node(&empty, &toaster_schema()).unwrap(),
            "<flag xmlns=\"http://netconfcentral.org/ns/toaster\"/>"
        );
    }

    #[test]
    fn test_encode_unknown_module() {
        let node = Node::container(NodeName::qualified("unknown", "event"), vec![]);
        assert!(matches!(
            encode_node(&node, &toaster_schema()),
            Err(XmlWriterError::UndefinedNamespace(module)) if module == "unknown"
        ));
    }

    #[test]
    fn test_parse_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <establish-subscription xmlns="urn:ietf:params:xml:ns:yang:ietf-subscribed-notifications"
                                    xmlns:t="http://netconfcentral.org/ns/toaster">
              <stream>NETCONF</stream>
              <stream-subtree-filter>
                <t:toasterRestocked><t:amountOfBread>&lt;5</t:amountOfBread></t:toasterRestocked>
              </stream-subtree-filter>
              <empty/>
            </establish-subscription>"#;
        let root = parse_document(xml).unwrap();
        assert!(root.is_tag(Some(SUBSCRIBED_NOTIFICATIONS_NS), "establish-subscription"));
        assert_eq!(root.children().len(), 3);
        assert_eq!(root.child("stream").map(XmlElement::text), Some("NETCONF"));
        assert_eq!(root.child("empty").map(XmlElement::text), Some(""));

        let filter = root.child("stream-subtree-filter").unwrap();
        let restocked = &filter.children()[0];
        assert_eq!(restocked.namespace(), Some(TOASTER_NS));
        assert_eq!(restocked.children()[0].text(), "<5");
    }

    #[test]
    fn test_filter_from_xml() {
        let xml = r#"<stream-subtree-filter xmlns="urn:ietf:params:xml:ns:yang:ietf-subscribed-notifications">
              <inventory xmlns="http://netconfcentral.org/ns/toaster">
                <entry><id/><name>wheat</name></entry>
              </inventory>
            </stream-subtree-filter>"#;
        let element = parse_document(xml).unwrap();
        let filter = filter_from_xml(&element, &toaster_schema()).unwrap();
        assert_eq!(
            filter,
            SubtreeFilter::new(vec![FilterNode::containment(
                NodeName::qualified(TOASTER_MODULE, "inventory"),
                vec![FilterNode::containment(
                    NodeName::qualified(TOASTER_MODULE, "entry"),
                    vec![
                        FilterNode::selection(NodeName::qualified(TOASTER_MODULE, "id")),
                        FilterNode::content_match(
                            NodeName::qualified(TOASTER_MODULE, "name"),
                            "wheat"
                        ),
                    ]
                )]
            )])
        );
        assert!(filter.validate(&toaster_schema()).is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_document(""), Err(ParsingError::Eof));
        assert_eq!(
            parse_document("<x:a/>"),
            Err(ParsingError::UnknownPrefix("x".to_string()))
        );

        let unknown_ns = parse_document(r#"<f><e xmlns="urn:unknown"/></f>"#).unwrap();
        assert_eq!(
            filter_from_xml(&unknown_ns, &toaster_schema()),
            Err(ParsingError::UnknownNamespace("urn:unknown".to_string()))
        );
    }
}
