//! Testing utilities and harness for vtree

use indexmap::IndexMap;
use vtree_core::{
    Applier, Attributes, HostKind, MemoryApplier, Namespace, NodeError, NodeId, RenderError,
    Renderer, RendererConfig, Value, VNode,
};

/// Mutation counts keyed by `<target>.<method>(<arguments>)`.
pub type CallLog = IndexMap<String, usize>;

/// In-memory applier that counts every mutation of attached output.
///
/// Nodes are described the way a DOM call log would: elements as
/// `<tag>textContent`, text nodes as `#text`, roots as `#root`, attribute
/// values by their kind. Creating detached nodes is not a mutation and is not
/// recorded.
#[derive(Default)]
pub struct RecordingApplier {
    inner: MemoryApplier,
    log: CallLog,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryApplier {
        &self.inner
    }

    /// Direct access for preparing pre-existing output; changes made through
    /// it are not recorded.
    pub fn memory_mut(&mut self) -> &mut MemoryApplier {
        &mut self.inner
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn describe(&self, id: NodeId) -> String {
        match self.inner.host_kind(id) {
            Ok(HostKind::Element(tag)) => {
                let text = self.inner.text_content(id).unwrap_or_default();
                format!("<{tag}>{text}")
            }
            Ok(HostKind::Text(_)) => "#text".to_string(),
            Ok(HostKind::Container) => {
                let text = self.inner.text_content(id).unwrap_or_default();
                format!("#root{text}")
            }
            Err(_) => format!("#missing{id}"),
        }
    }

    fn record(&mut self, target: NodeId, call: String) {
        let key = format!("{}.{call}", self.describe(target));
        *self.log.entry(key).or_insert(0) += 1;
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Int(_) | Value::Float(_) => "Number",
        Value::Str(_) => "String",
        Value::List(_) => "Array",
        Value::Callback(_) => "Function",
        Value::Any(_) => "Object",
    }
}

impl Applier for RecordingApplier {
    fn create_element(&mut self, tag: &str, namespace: Namespace) -> NodeId {
        self.inner.create_element(tag, namespace)
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.inner.create_text(text)
    }

    fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), NodeError> {
        self.record(id, "setData(String)".to_string());
        self.inner.set_text(id, text)
    }

    fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &Value,
        namespace: Namespace,
    ) -> Result<(), NodeError> {
        self.record(id, format!("setAttribute(String, {})", value_kind(value)));
        self.inner.set_attribute(id, name, value, namespace)
    }

    fn remove_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        namespace: Namespace,
    ) -> Result<(), NodeError> {
        self.record(id, "removeAttribute(String)".to_string());
        self.inner.remove_attribute(id, name, namespace)
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), NodeError> {
        let call = match anchor {
            Some(anchor) => format!(
                "insertBefore({}, {})",
                self.describe(child),
                self.describe(anchor)
            ),
            None => format!("appendChild({})", self.describe(child)),
        };
        self.record(parent, call);
        self.inner.insert_before(parent, child, anchor)
    }

    fn remove(&mut self, id: NodeId) -> Result<(), NodeError> {
        if let Some(parent) = self.inner.node(id)?.parent() {
            let call = format!("removeChild({})", self.describe(id));
            self.record(parent, call);
        }
        self.inner.remove(id)
    }

    fn children(&self, id: NodeId) -> Result<Vec<NodeId>, NodeError> {
        self.inner.children(id)
    }

    fn host_kind(&self, id: NodeId) -> Result<HostKind, NodeError> {
        self.inner.host_kind(id)
    }

    fn attributes(&self, id: NodeId) -> Result<Attributes, NodeError> {
        self.inner.attributes(id)
    }
}

/// Headless harness owning a renderer over a [`RecordingApplier`] and one
/// scratch root.
pub struct TestRenderer {
    renderer: Renderer<RecordingApplier>,
    scratch: NodeId,
}

impl TestRenderer {
    pub fn new() -> Self {
        Self::with_config(RendererConfig::default())
    }

    pub fn with_config(config: RendererConfig) -> Self {
        let mut applier = RecordingApplier::new();
        let scratch = applier.memory_mut().create_root();
        Self {
            renderer: Renderer::new(applier).with_config(config),
            scratch,
        }
    }

    pub fn scratch(&self) -> NodeId {
        self.scratch
    }

    /// Renders into the scratch root, then drains queued renders and effects.
    pub fn render(&mut self, vnode: VNode) -> Result<(), RenderError> {
        self.renderer.render(vnode, self.scratch)?;
        self.rerender()
    }

    pub fn hydrate(&mut self, vnode: VNode) -> Result<(), RenderError> {
        self.renderer.hydrate(vnode, self.scratch)?;
        self.rerender()
    }

    /// Flushes queued renders and after-paint effects until both are idle.
    pub fn rerender(&mut self) -> Result<(), RenderError> {
        loop {
            let rendered = self.renderer.flush()?;
            let effects = self.renderer.flush_effects();
            if rendered == 0 && effects == 0 {
                return Ok(());
            }
        }
    }

    /// Replaces the scratch content with raw markup-equivalent nodes built by
    /// `build`, without recording, and clears the log.
    pub fn prepare(&mut self, build: impl FnOnce(&mut MemoryApplier, NodeId)) {
        let scratch = self.scratch;
        build(self.renderer.applier_mut().memory_mut(), scratch);
        self.clear_log();
    }

    pub fn html(&self) -> String {
        self.renderer
            .applier()
            .memory()
            .inner_html(self.scratch)
            .unwrap_or_default()
    }

    pub fn log(&self) -> CallLog {
        self.renderer.applier().log().clone()
    }

    pub fn clear_log(&mut self) {
        self.renderer.applier_mut().clear_log();
    }

    pub fn renderer(&mut self) -> &mut Renderer<RecordingApplier> {
        &mut self.renderer
    }

    pub fn memory(&self) -> &MemoryApplier {
        self.renderer.applier().memory()
    }

    /// Output nodes currently attached to the scratch root.
    pub fn root_children(&self) -> Vec<NodeId> {
        self.children_of(self.scratch)
    }

    /// Output nodes currently attached to `id`; empty for unknown ids.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.memory()
            .node(id)
            .map(|node| node.children().to_vec())
            .unwrap_or_default()
    }
}

impl Default for TestRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` against a fresh [`TestRenderer`].
pub fn run_test_render<R>(f: impl FnOnce(&mut TestRenderer) -> R) -> R {
    let mut renderer = TestRenderer::new();
    f(&mut renderer)
}

/// Builds a log from `(key, count)` pairs for comparison.
pub fn call_log<'a>(entries: impl IntoIterator<Item = (&'a str, usize)>) -> CallLog {
    entries
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect()
}

/// `<ul>` markup wrapping `items`.
pub fn ul(items: &str) -> String {
    format!("<ul>{items}</ul>")
}

/// `<li>` markup wrapping `text`.
pub fn li(text: &str) -> String {
    format!("<li>{text}</li>")
}

/// Appends `<ul>` with one `<li>` per entry of `items` under `parent`.
pub fn build_list(
    memory: &mut MemoryApplier,
    parent: NodeId,
    items: &[&str],
) -> Result<NodeId, NodeError> {
    let list = memory.append_element(parent, "ul")?;
    for item in items {
        let entry = memory.append_element(list, "li")?;
        memory.append_text(entry, item)?;
    }
    Ok(list)
}

/// Child list mixing numbers, strings, elements, a component, holes and a
/// nested list; renders as [`MIXED_ARRAY_HTML`].
pub fn mixed_array() -> Vec<VNode> {
    let foo = vtree_core::ComponentType::function(
        |_cx: &mut vtree_core::RenderContext<'_>, _props: &vtree_core::Props| Ok(VNode::text("d")),
    );
    let mut children = Vec::new();
    vtree_core::IntoChildren::push_into(
        (
            0,
            "a",
            "b",
            VNode::element("span").child("c"),
            VNode::component(&foo, vtree_core::Props::new()),
            Option::<VNode>::None,
            false,
            vec!["e", "f"],
            1,
        ),
        &mut children,
    );
    children
}

pub const MIXED_ARRAY_HTML: &str = "0ab<span>c</span>def1";
