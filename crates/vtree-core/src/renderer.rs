//! Entry points: rendering into output roots and flushing queued work.

use std::rc::Rc;

use crate::applier::{Applier, HostKind, Namespace};
use crate::collections::map::HashMap;
use crate::component::{ComponentCell, ComponentHandle};
use crate::context::ContextMap;
use crate::diff::{Excess, Frame, HostSlot, Reconciler, Rendered};
use crate::lifecycle::{run_commits, CommitTask};
use crate::options::Options;
use crate::runtime::{Runtime, RuntimeHandle};
use crate::vnode::VNode;
use crate::{NodeId, RenderError};

/// When deferred effects run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EffectTiming {
    /// Queued until the host calls [`Renderer::flush_effects`], after paint.
    #[default]
    Deferred,
    /// Run at the end of every commit.
    Immediate,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RendererConfig {
    pub effect_timing: EffectTiming,
}

/// How pre-existing output children of a root are treated on mount.
enum Mount {
    /// Reuse whatever the root already holds on first render.
    Fresh,
    /// Reuse only the given node.
    Replace(NodeId),
    /// Adopt every existing child, dropping any previous tree bookkeeping.
    Hydrate,
}

/// Renders virtual trees into output roots through an [`Applier`].
pub struct Renderer<A: Applier> {
    applier: A,
    runtime: Runtime,
    roots: HashMap<NodeId, Rc<HostSlot>>,
    options: Options,
    config: RendererConfig,
}

impl<A: Applier> Renderer<A> {
    pub fn new(applier: A) -> Self {
        Self::with_runtime(applier, Runtime::default())
    }

    pub fn with_runtime(applier: A, runtime: Runtime) -> Self {
        Self {
            applier,
            runtime,
            roots: HashMap::default(),
            options: Options::default(),
            config: RendererConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RendererConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Renders `vnode` as the only content of `root`.
    ///
    /// The first render into a root reuses matching nodes it already holds
    /// and removes the rest. An error no component recovers from leaves the
    /// root empty.
    pub fn render(&mut self, vnode: VNode, root: NodeId) -> Result<(), RenderError> {
        self.render_root(vnode, root, Mount::Fresh)
    }

    /// Like [`render`](Self::render), but when `existing` is given only that
    /// node is considered for reuse.
    pub fn render_with(
        &mut self,
        vnode: VNode,
        root: NodeId,
        existing: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let mount = existing.map_or(Mount::Fresh, Mount::Replace);
        self.render_root(vnode, root, mount)
    }

    /// Attaches to output produced elsewhere: existing children of `root` are
    /// adopted where they match and patched where they differ.
    pub fn hydrate(&mut self, vnode: VNode, root: NodeId) -> Result<(), RenderError> {
        self.render_root(vnode, root, Mount::Hydrate)
    }

    /// Unmounts everything rendered into `root`. Returns whether there was
    /// anything to unmount.
    pub fn unmount(&mut self, root: NodeId) -> Result<bool, RenderError> {
        let Some(host) = self.roots.remove(&root) else {
            return Ok(false);
        };
        let mut reconciler = Reconciler::new(&mut self.applier, self.runtime.handle(), &self.options);
        for child in host.take_children() {
            reconciler.unmount(child, None, false)?;
        }
        log::debug!("unmounted root #{root}");
        Ok(true)
    }

    fn render_root(&mut self, vnode: VNode, root: NodeId, mount: Mount) -> Result<(), RenderError> {
        let wrapped = VNode::fragment(vnode);
        let existing = self.roots.get(&root).cloned();
        let host = existing.clone().unwrap_or_else(|| HostSlot::new(root));
        let (excess, stale): (Excess, Vec<Rendered>) = match (&existing, mount) {
            (_, Mount::Hydrate) => (Some(self.existing_children(root)?), host.take_children()),
            (_, Mount::Replace(node)) => (Some(vec![Some(node)]), Vec::new()),
            (Some(_), Mount::Fresh) => (None, Vec::new()),
            (None, Mount::Fresh) => (Some(self.existing_children(root)?), Vec::new()),
        };

        let result = {
            let mut reconciler =
                Reconciler::new(&mut self.applier, self.runtime.handle(), &self.options);
            diff_root(&mut reconciler, &host, &wrapped, excess, stale).map(|()| reconciler.finish())
        };
        match result {
            Ok(tasks) => {
                self.roots.insert(root, host);
                self.commit(tasks, root);
                log::debug!("rendered root #{root}");
                Ok(())
            }
            Err(error) => {
                log::error!("render into root #{root} failed: {error}");
                self.roots.remove(&root);
                self.clear_root(&host);
                Err(error)
            }
        }
    }

    fn existing_children(&self, root: NodeId) -> Result<Vec<Option<NodeId>>, RenderError> {
        Ok(self.applier.children(root)?.into_iter().map(Some).collect())
    }

    /// Tears down whatever survived a failed render and empties the root.
    fn clear_root(&mut self, host: &Rc<HostSlot>) {
        let mut reconciler = Reconciler::new(&mut self.applier, self.runtime.handle(), &self.options);
        for child in host.take_children() {
            if let Err(err) = reconciler.unmount(child, None, true) {
                log::warn!("unmount after failed render: {err}");
            }
        }
        let children = match self.applier.children(host.node()) {
            Ok(children) => children,
            Err(err) => {
                log::warn!("cannot clear root #{}: {err}", host.node());
                return;
            }
        };
        for child in children {
            if let Err(err) = self.applier.remove(child) {
                log::warn!("cannot remove #{child} from root #{}: {err}", host.node());
            }
        }
    }

    fn commit(&mut self, tasks: Vec<CommitTask>, root: NodeId) {
        run_commits(tasks, &self.runtime.handle());
        if let Some(hook) = &self.options.commit {
            hook(root);
        }
        if self.config.effect_timing == EffectTiming::Immediate {
            self.flush_effects();
        }
    }

    /// Re-renders every dirty component, shallowest first, until the queue is
    /// empty. Components enqueued while flushing are handled in the same call.
    /// Returns how many components rendered.
    pub fn flush(&mut self) -> Result<usize, RenderError> {
        let handle = self.runtime.handle();
        handle.begin_flush();
        let result = self.drain_render_queue(&handle);
        handle.end_flush();
        if let Err(err) = &result {
            log::error!("flush failed: {err}");
        }
        result
    }

    fn drain_render_queue(&mut self, handle: &RuntimeHandle) -> Result<usize, RenderError> {
        let mut rendered = 0;
        while let Some(component) = handle.pop_render() {
            if !component.dirty.get() || !component.mounted.get() {
                continue;
            }
            self.rerender(&component)?;
            rendered += 1;
        }
        if rendered > 0 {
            log::debug!("flush rendered {rendered} components");
        }
        Ok(rendered)
    }

    fn rerender(&mut self, component: &Rc<ComponentCell>) -> Result<(), RenderError> {
        let Some(host) = component.host.borrow().upgrade() else {
            component.dirty.set(false);
            return Ok(());
        };
        let vnode = component.vnode.borrow().clone();
        let context = component.context.borrow().clone();
        let ancestor = component.ancestor.upgrade();
        let frame = Frame {
            host: &host,
            context: &context,
            namespace: component.namespace.get(),
            ancestor: ancestor.as_ref(),
        };
        let tasks = {
            let mut reconciler =
                Reconciler::new(&mut self.applier, self.runtime.handle(), &self.options);
            reconciler.render_component(frame, component, &vnode, &mut None)?;
            reconciler.place(&host)?;
            reconciler.finish()
        };
        self.commit(tasks, host.node());
        Ok(())
    }

    /// Runs deferred effects queued by earlier commits. Returns how many
    /// components had effects to run.
    pub fn flush_effects(&mut self) -> usize {
        let mut ran = 0;
        for weak in self.runtime.handle().take_after_paint() {
            let Some(component) = weak.upgrade() else {
                continue;
            };
            component.after_paint_queued.set(false);
            if component.mounted.get() {
                component.run_effects(false);
                ran += 1;
            }
        }
        ran
    }

    /// Re-renders `component` right away, bypassing `should_update` and the
    /// dirty check. A queued render of the same component becomes a no-op.
    pub fn force_update(&mut self, component: &ComponentHandle) -> Result<(), RenderError> {
        let cell = &component.0;
        if !cell.mounted.get() {
            return Ok(());
        }
        cell.force.set(true);
        let result = self.rerender(cell);
        if let Err(err) = &result {
            cell.force.set(false);
            log::error!("forced update of {} #{} failed: {err}", cell.name, cell.id);
        }
        result
    }

    /// Like [`force_update`](Self::force_update); `callback` runs once the
    /// forced render has committed.
    pub fn force_update_with(
        &mut self,
        component: &ComponentHandle,
        callback: impl FnOnce() + 'static,
    ) -> Result<(), RenderError> {
        if component.0.mounted.get() {
            component.0.render_callbacks.borrow_mut().push(Box::new(callback));
        }
        self.force_update(component)
    }

    pub fn needs_flush(&self) -> bool {
        self.runtime.needs_flush()
    }

    pub fn has_pending_effects(&self) -> bool {
        self.runtime.has_pending_effects()
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn applier_mut(&mut self) -> &mut A {
        &mut self.applier
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

fn diff_root(
    reconciler: &mut Reconciler<'_>,
    host: &Rc<HostSlot>,
    vnode: &VNode,
    mut excess: Excess,
    stale: Vec<Rendered>,
) -> Result<(), RenderError> {
    // hydration keeps the nodes of the previous tree for adoption
    for old in stale {
        reconciler.unmount(old, None, true)?;
    }
    let namespace = match reconciler.applier.host_kind(host.node())? {
        HostKind::Element(tag) => {
            let own = reconciler.applier.element_namespace(&tag, Namespace::Html);
            reconciler.applier.child_namespace(&tag, own)
        }
        HostKind::Text(_) | HostKind::Container => Namespace::Html,
    };
    let context = ContextMap::new();
    let frame = Frame {
        host,
        context: &context,
        namespace,
        ancestor: None,
    };
    let old = host.take_children().pop();
    let rendered = reconciler.diff(frame, vnode, old, &mut excess)?;
    host.replace_children(vec![rendered]);
    if let Some(leftovers) = excess {
        for node in leftovers.into_iter().flatten() {
            reconciler.applier.remove(node)?;
        }
    }
    reconciler.place(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::MemoryApplier;

    fn renderer() -> (Renderer<MemoryApplier>, NodeId) {
        let mut applier = MemoryApplier::new();
        let root = applier.create_root();
        (Renderer::new(applier), root)
    }

    fn html(renderer: &Renderer<MemoryApplier>, root: NodeId) -> String {
        renderer.applier().inner_html(root).expect("root exists")
    }

    #[test]
    fn renders_and_patches_elements() {
        let (mut renderer, root) = renderer();
        renderer
            .render(VNode::element("div").attr("id", "a").child("hi"), root)
            .expect("first render");
        assert_eq!(html(&renderer, root), r#"<div id="a">hi</div>"#);
        renderer
            .render(VNode::element("div").attr("class", "b").child("there"), root)
            .expect("second render");
        assert_eq!(html(&renderer, root), r#"<div class="b">there</div>"#);
    }

    #[test]
    fn unmount_empties_the_root() {
        let (mut renderer, root) = renderer();
        renderer
            .render(VNode::fragment(("a", VNode::element("b"))), root)
            .expect("render");
        assert_eq!(renderer.unmount(root), Ok(true));
        assert_eq!(html(&renderer, root), "");
        assert_eq!(renderer.unmount(root), Ok(false));
    }

    #[test]
    fn first_render_reuses_existing_children() {
        let (mut renderer, root) = renderer();
        let existing = renderer
            .applier_mut()
            .append_element(root, "p")
            .expect("append");
        renderer
            .applier_mut()
            .append_element(root, "span")
            .expect("append");
        renderer.render(VNode::element("p").child("x"), root).expect("render");
        let children = renderer.applier().children(root).expect("children");
        assert_eq!(children, vec![existing]);
        assert_eq!(html(&renderer, root), "<p>x</p>");
    }
}
