//! Namespace-agnostic XML flattening using quick-xml
//!
//! ONVIF firmwares disagree on namespace prefixes (`tt:`, `ns2:`, none), so
//! every element is recorded by its local name only. Mismatched tags are a
//! parse error, which is what "structurally valid" means for a probe.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::OnvifError;

#[derive(Debug, Clone, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<usize>,
}

/// Flattened element tree in document order
#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self, OnvifError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let idx = push_node(&mut nodes, &e, stack.last().copied())?;
                    stack.push(idx);
                }
                Ok(Event::Empty(e)) => {
                    push_node(&mut nodes, &e, stack.last().copied())?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(e)) => {
                    if let Some(&idx) = stack.last() {
                        let text = e
                            .unescape()
                            .map_err(|e| OnvifError::Xml(e.to_string()))?;
                        nodes[idx].text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(&idx) = stack.last() {
                        nodes[idx]
                            .text
                            .push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(OnvifError::Xml(format!(
                        "at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
        }

        if nodes.is_empty() {
            return Err(OnvifError::Xml("document has no elements".to_string()));
        }
        if !stack.is_empty() {
            return Err(OnvifError::Xml("document ended inside an element".to_string()));
        }

        Ok(Self { nodes })
    }

    /// Indices of every element with this local name
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.name == name)
            .map(|(i, _)| i)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named(name).next().is_some()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.nodes[idx].name
    }

    pub fn text(&self, idx: usize) -> &str {
        self.nodes[idx].text.trim()
    }

    pub fn attr(&self, idx: usize, key: &str) -> Option<&str> {
        self.nodes[idx]
            .attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn parent_name(&self, idx: usize) -> Option<&str> {
        self.nodes[idx].parent.map(|p| self.name(p))
    }

    /// First direct child with this local name
    pub fn child(&self, idx: usize, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .skip(idx + 1)
            .find(|(_, n)| n.parent == Some(idx) && n.name == name)
            .map(|(i, _)| i)
    }

    pub fn has_ancestor(&self, idx: usize, name: &str) -> bool {
        let mut cur = self.nodes[idx].parent;
        while let Some(p) = cur {
            if self.nodes[p].name == name {
                return true;
            }
            cur = self.nodes[p].parent;
        }
        false
    }

    /// Text of the first element with this local name
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.named(name).next().map(|i| self.text(i))
    }
}

fn push_node(nodes: &mut Vec<Node>, e: &BytesStart<'_>, parent: Option<usize>) -> Result<usize, OnvifError> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| OnvifError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| OnvifError::Xml(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }

    nodes.push(Node {
        name,
        attrs,
        text: String::new(),
        parent,
    });
    Ok(nodes.len() - 1)
}

/// Reason text and subcodes of a SOAP 1.2 (or 1.1) fault, if the document is one
pub fn parse_fault(doc: &Document) -> Option<(String, Vec<String>)> {
    if !doc.contains("Fault") {
        return None;
    }

    let reason = doc
        .named("Text")
        .find(|&i| doc.has_ancestor(i, "Reason"))
        .map(|i| doc.text(i).to_string())
        .or_else(|| doc.first_text("faultstring").map(str::to_string))
        .unwrap_or_else(|| "unspecified fault".to_string());

    let codes = doc
        .named("Value")
        .filter(|&i| doc.has_ancestor(i, "Code"))
        .map(|i| doc.text(i).to_string())
        .collect();

    Some((reason, codes))
}
