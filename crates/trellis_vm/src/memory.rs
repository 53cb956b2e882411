//! An in-memory [`OutputTree`].
//!
//! Every mutating call bumps a counter, which is how tests observe that a
//! pass touched nothing.

use std::fmt::Write;

use trellis_foundation::NodeId;

use crate::tree::OutputTree;

#[derive(Clone, Debug, PartialEq, Eq)]
enum NodeKind {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A simple tree of elements, text, and comments.
#[derive(Clone, Debug, Default)]
pub struct MemoryTree {
    nodes: Vec<NodeData>,
    mutations: u64,
}

impl MemoryTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of mutating calls made so far.
    #[must_use]
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Returns the children of a node.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map_or(&[], |data| data.children.as_slice())
    }

    /// Returns the parent of a node.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|data| data.parent)
    }

    /// Returns an attribute of an element.
    #[must_use]
    pub fn attribute(&self, element: NodeId, name: &str) -> Option<&str> {
        match &self.node(element)?.kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    /// Returns the concatenated text below a node, ignoring comments.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    /// Serializes the children of a node.
    #[must_use]
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_node(child, &mut out);
        }
        out
    }

    /// Serializes a node and its children.
    #[must_use]
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    fn node(&self, node: NodeId) -> Option<&NodeData> {
        usize::try_from(node.raw()).ok().and_then(|i| self.nodes.get(i))
    }

    fn node_mut(&mut self, node: NodeId) -> Option<&mut NodeData> {
        usize::try_from(node.raw()).ok().and_then(|i| self.nodes.get_mut(i))
    }

    fn create(&mut self, kind: NodeKind) -> NodeId {
        self.mutations += 1;
        let id = NodeId::new(self.nodes.len() as u64);
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(data) = self.node_mut(parent) {
            data.children.retain(|&child| child != node);
        }
        if let Some(data) = self.node_mut(node) {
            data.parent = None;
        }
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.node(node) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            NodeKind::Element { .. } => {
                for &child in &data.children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.node(node) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(text) => {
                let _ = write!(out, "<!--{text}-->");
            }
            NodeKind::Element { tag, attributes } => {
                let _ = write!(out, "<{tag}");
                for (name, value) in attributes {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for &child in &data.children {
                    self.write_node(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

impl OutputTree for MemoryTree {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.create(NodeKind::Element {
            tag: tag.to_string(),
            attributes: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.create(NodeKind::Text(text.to_string()))
    }

    fn create_comment(&mut self, text: &str) -> NodeId {
        self.create(NodeKind::Comment(text.to_string()))
    }

    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        self.mutations += 1;
        self.detach(node);
        let Some(data) = self.node_mut(parent) else {
            return;
        };
        let position = reference
            .and_then(|r| data.children.iter().position(|&child| child == r))
            .unwrap_or(data.children.len());
        data.children.insert(position, node);
        if let Some(data) = self.node_mut(node) {
            data.parent = Some(parent);
        }
    }

    fn remove_child(&mut self, parent: NodeId, node: NodeId) {
        self.mutations += 1;
        if self.parent(node) == Some(parent) {
            self.detach(node);
        }
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(node)?);
        let index = siblings.iter().position(|&child| child == node)?;
        siblings.get(index + 1).copied()
    }

    fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) {
        self.mutations += 1;
        if let Some(NodeKind::Element { attributes, .. }) =
            self.node_mut(element).map(|data| &mut data.kind)
        {
            match attributes.iter_mut().find(|(key, _)| key == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    fn remove_attribute(&mut self, element: NodeId, name: &str) {
        self.mutations += 1;
        if let Some(NodeKind::Element { attributes, .. }) =
            self.node_mut(element).map(|data| &mut data.kind)
        {
            attributes.retain(|(key, _)| key != name);
        }
    }

    fn set_text(&mut self, node: NodeId, text: &str) {
        self.mutations += 1;
        if let Some(data) = self.node_mut(node) {
            if let NodeKind::Text(current) | NodeKind::Comment(current) = &mut data.kind {
                *current = text.to_string();
            }
        }
    }
}
