//! Output tree mutation primitives and an in-memory implementation.

use std::fmt::Write as _;
use std::rc::Rc;

use crate::vnode::{Attributes, Value};
use crate::{NodeError, NodeId};

/// Attribute namespace an element is created in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Namespace {
    #[default]
    Html,
    Svg,
}

/// Shape of an existing output node, used when adopting pre-rendered output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKind {
    Element(String),
    Text(String),
    Container,
}

/// Creates and mutates concrete output nodes on behalf of the reconciler.
pub trait Applier {
    fn create_element(&mut self, tag: &str, namespace: Namespace) -> NodeId;
    fn create_text(&mut self, text: &str) -> NodeId;
    fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), NodeError>;
    fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &Value,
        namespace: Namespace,
    ) -> Result<(), NodeError>;
    fn remove_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        namespace: Namespace,
    ) -> Result<(), NodeError>;

    /// Moves `child` under `parent`, before `anchor` or at the end when the
    /// anchor is `None`. A child already attached elsewhere is detached first.
    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), NodeError>;

    /// Detaches `id` from its parent and releases it with its descendants.
    fn remove(&mut self, id: NodeId) -> Result<(), NodeError>;

    fn children(&self, id: NodeId) -> Result<Vec<NodeId>, NodeError>;
    fn host_kind(&self, id: NodeId) -> Result<HostKind, NodeError>;
    fn attributes(&self, id: NodeId) -> Result<Attributes, NodeError>;

    /// Writes the difference between two attribute maps: vanished names are
    /// removed, changed or new ones are written, equal ones are left alone.
    fn apply_props(
        &mut self,
        id: NodeId,
        old: &Attributes,
        new: &Attributes,
        namespace: Namespace,
    ) -> Result<(), NodeError> {
        for name in old.keys() {
            if !new.contains_key(name) {
                self.remove_attribute(id, name, namespace)?;
            }
        }
        for (name, value) in new {
            if old.get(name) != Some(value) {
                self.set_attribute(id, name, value, namespace)?;
            }
        }
        Ok(())
    }

    /// Namespace an element with `tag` is created in below a `parent` namespace.
    fn element_namespace(&self, tag: &str, parent: Namespace) -> Namespace {
        if tag == "svg" {
            Namespace::Svg
        } else {
            parent
        }
    }

    /// Namespace the children of an element with `tag` are created in.
    fn child_namespace(&self, tag: &str, own: Namespace) -> Namespace {
        if tag == "foreignObject" {
            Namespace::Html
        } else {
            own
        }
    }
}

#[derive(Clone, Debug)]
enum MemoryKind {
    Container,
    Element { tag: String, namespace: Namespace },
    Text(String),
}

/// Node stored by [`MemoryApplier`].
#[derive(Clone, Debug)]
pub struct MemoryNode {
    kind: MemoryKind,
    attributes: Attributes,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl MemoryNode {
    fn new(kind: MemoryKind) -> Self {
        Self {
            kind,
            attributes: Attributes::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            MemoryKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MemoryKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match &self.kind {
            MemoryKind::Element { namespace, .. } => Some(*namespace),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Output tree held in memory, serialisable to HTML-like markup.
#[derive(Default)]
pub struct MemoryApplier {
    nodes: Vec<Option<MemoryNode>>,
}

impl MemoryApplier {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn alloc(&mut self, node: MemoryNode) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(node));
        id
    }

    /// Creates a detached container to render into.
    pub fn create_root(&mut self) -> NodeId {
        self.alloc(MemoryNode::new(MemoryKind::Container))
    }

    pub fn node(&self, id: NodeId) -> Result<&MemoryNode, NodeError> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(NodeError::Missing { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode, NodeError> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(NodeError::Missing { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a new element under `parent`, for preparing pre-rendered output.
    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> Result<NodeId, NodeError> {
        let id = self.create_element(tag, Namespace::Html);
        self.insert_before(parent, id, None)?;
        Ok(id)
    }

    /// Appends a new text node under `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, NodeError> {
        let id = self.create_text(text);
        self.insert_before(parent, id, None)?;
        Ok(id)
    }

    /// Invokes the listener registered as `on<event>` (case-insensitive) on
    /// `id`. Returns whether a listener ran.
    pub fn dispatch(&self, id: NodeId, event: &str, payload: &Value) -> Result<bool, NodeError> {
        let wanted = format!("on{}", event.to_ascii_lowercase());
        let listener = self
            .node(id)?
            .attributes
            .iter()
            .find(|(name, _)| name.to_ascii_lowercase() == wanted)
            .and_then(|(_, value)| value.as_callback().cloned());
        match listener {
            Some(callback) => {
                callback.emit(payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Concatenated text of every text node below `id`.
    pub fn text_content(&self, id: NodeId) -> Result<String, NodeError> {
        let mut out = String::new();
        self.collect_text(id, &mut out)?;
        Ok(out)
    }

    fn collect_text(&self, id: NodeId, out: &mut String) -> Result<(), NodeError> {
        let node = self.node(id)?;
        if let MemoryKind::Text(text) = &node.kind {
            out.push_str(text);
        }
        for &child in &node.children {
            self.collect_text(child, out)?;
        }
        Ok(())
    }

    /// Markup of the children of `id`.
    pub fn inner_html(&self, id: NodeId) -> Result<String, NodeError> {
        let mut out = String::new();
        for &child in &self.node(id)?.children {
            self.write_html(child, &mut out)?;
        }
        Ok(out)
    }

    /// Markup of `id` itself.
    pub fn outer_html(&self, id: NodeId) -> Result<String, NodeError> {
        let mut out = String::new();
        self.write_html(id, &mut out)?;
        Ok(out)
    }

    fn write_html(&self, id: NodeId, out: &mut String) -> Result<(), NodeError> {
        let node = self.node(id)?;
        match &node.kind {
            MemoryKind::Text(text) => out.push_str(&escape(text, false)),
            MemoryKind::Container => {
                for &child in &node.children {
                    self.write_html(child, out)?;
                }
            }
            MemoryKind::Element { tag, .. } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in &node.attributes {
                    if let Some(text) = value.to_attribute_string() {
                        let _ = write!(out, " {name}=\"{}\"", escape(&text, true));
                    }
                }
                out.push('>');
                for &child in &node.children {
                    self.write_html(child, out)?;
                }
                let _ = write!(out, "</{tag}>");
            }
        }
        Ok(())
    }

    pub fn dump_tree(&self, root: Option<NodeId>) -> String {
        let mut output = String::new();
        if let Some(root_id) = root {
            self.dump_node(&mut output, root_id, 0);
        } else {
            output.push_str("(no root)\n");
        }
        output
    }

    fn dump_node(&self, output: &mut String, id: NodeId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Ok(node) => {
                let label = match &node.kind {
                    MemoryKind::Container => "#container".to_string(),
                    MemoryKind::Element { tag, .. } => format!("<{tag}>"),
                    MemoryKind::Text(text) => format!("#text {text:?}"),
                };
                let _ = writeln!(output, "{indent}[{id}] {label}");
                for &child in &node.children {
                    self.dump_node(output, child, depth + 1);
                }
            }
            Err(_) => {
                let _ = writeln!(output, "{indent}[{id}] (missing)");
            }
        }
    }

    fn detach(&mut self, id: NodeId) -> Result<(), NodeError> {
        let parent = self.node(id)?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|&c| c != id);
            self.node_mut(id)?.parent = None;
        }
        Ok(())
    }

    fn release(&mut self, id: NodeId) {
        let children = match self.nodes.get_mut(id).and_then(Option::take) {
            Some(node) => node.children,
            None => return,
        };
        for child in children {
            self.release(child);
        }
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

impl Applier for MemoryApplier {
    fn create_element(&mut self, tag: &str, namespace: Namespace) -> NodeId {
        self.alloc(MemoryNode::new(MemoryKind::Element {
            tag: tag.to_string(),
            namespace,
        }))
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(MemoryNode::new(MemoryKind::Text(text.to_string())))
    }

    fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), NodeError> {
        match &mut self.node_mut(id)?.kind {
            MemoryKind::Text(current) => {
                current.clear();
                current.push_str(text);
                Ok(())
            }
            _ => Err(NodeError::TypeMismatch {
                id,
                expected: "text node",
            }),
        }
    }

    fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &Value,
        _namespace: Namespace,
    ) -> Result<(), NodeError> {
        let node = self.node_mut(id)?;
        if matches!(value, Value::Null | Value::Bool(false)) {
            node.attributes.shift_remove(name);
        } else {
            node.attributes.insert(Rc::from(name), value.clone());
        }
        Ok(())
    }

    fn remove_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        _namespace: Namespace,
    ) -> Result<(), NodeError> {
        self.node_mut(id)?.attributes.shift_remove(name);
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), NodeError> {
        self.node(parent)?;
        self.detach(child)?;
        let siblings = &mut self.node_mut(parent)?.children;
        match anchor {
            Some(anchor) => {
                let index = siblings
                    .iter()
                    .position(|&c| c == anchor)
                    .ok_or(NodeError::NotAChild {
                        parent,
                        child: anchor,
                    })?;
                siblings.insert(index, child);
            }
            None => siblings.push(child),
        }
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.detach(id)?;
        self.release(id);
        Ok(())
    }

    fn children(&self, id: NodeId) -> Result<Vec<NodeId>, NodeError> {
        Ok(self.node(id)?.children.clone())
    }

    fn host_kind(&self, id: NodeId) -> Result<HostKind, NodeError> {
        Ok(match &self.node(id)?.kind {
            MemoryKind::Container => HostKind::Container,
            MemoryKind::Element { tag, .. } => HostKind::Element(tag.clone()),
            MemoryKind::Text(text) => HostKind::Text(text.clone()),
        })
    }

    fn attributes(&self, id: NodeId) -> Result<Attributes, NodeError> {
        Ok(self.node(id)?.attributes.clone())
    }
}
