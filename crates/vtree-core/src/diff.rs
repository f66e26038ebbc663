//! Reconciliation of a new virtual tree against the previously rendered one.

use std::cell::RefCell;
use std::rc::Rc;

use crate::applier::{Applier, HostKind, Namespace};
use crate::collections::map::HashMap;
use crate::component::ComponentCell;
use crate::context::ContextMap;
use crate::lifecycle::CommitTask;
use crate::options::Options;
use crate::runtime::RuntimeHandle;
use crate::vnode::{Attributes, NodeKind, NodeRef, RefTarget, VNode};
use crate::{NodeId, RenderError};

/// Pre-existing output children still available for adoption while
/// hydrating; `None` outside hydration.
pub(crate) type Excess = Option<Vec<Option<NodeId>>>;

/// One output parent and the rendered children placed into it.
pub(crate) struct HostSlot {
    node: NodeId,
    children: RefCell<Vec<Rendered>>,
}

impl HostSlot {
    pub(crate) fn new(node: NodeId) -> Rc<Self> {
        Rc::new(Self {
            node,
            children: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn take_children(&self) -> Vec<Rendered> {
        self.children.take()
    }

    pub(crate) fn replace_children(&self, children: Vec<Rendered>) {
        *self.children.borrow_mut() = children;
    }

    /// Output nodes of the slot's children in document order.
    pub(crate) fn output_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for child in self.children.borrow().iter() {
            child.collect_nodes(&mut out);
        }
        out
    }
}

/// Reconciler-owned record of what a VNode realised into.
pub(crate) struct Rendered {
    pub(crate) vnode: VNode,
    pub(crate) kind: RenderedKind,
}

pub(crate) enum RenderedKind {
    Element { slot: Rc<HostSlot> },
    Text { node: NodeId },
    Fragment { children: Vec<Rendered> },
    Component { instance: Rc<ComponentCell> },
}

impl Rendered {
    /// Appends the top-level output nodes of this subtree; fragments and
    /// components contribute their children's nodes.
    pub(crate) fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        match &self.kind {
            RenderedKind::Element { slot } => out.push(slot.node),
            RenderedKind::Text { node } => out.push(*node),
            RenderedKind::Fragment { children } => {
                for child in children {
                    child.collect_nodes(out);
                }
            }
            RenderedKind::Component { instance } => {
                if let Some(subtree) = instance.subtree.borrow().as_ref() {
                    subtree.collect_nodes(out);
                }
            }
        }
    }
}

/// Where a diff happens: output parent, inherited context, namespace and the
/// nearest enclosing component.
#[derive(Clone, Copy)]
pub(crate) struct Frame<'f> {
    pub(crate) host: &'f Rc<HostSlot>,
    pub(crate) context: &'f ContextMap,
    pub(crate) namespace: Namespace,
    pub(crate) ancestor: Option<&'f Rc<ComponentCell>>,
}

pub(crate) struct Reconciler<'a> {
    pub(crate) applier: &'a mut dyn Applier,
    pub(crate) runtime: RuntimeHandle,
    pub(crate) options: &'a Options,
    pub(crate) commits: Vec<CommitTask>,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(
        applier: &'a mut dyn Applier,
        runtime: RuntimeHandle,
        options: &'a Options,
    ) -> Self {
        Self {
            applier,
            runtime,
            options,
            commits: Vec::new(),
        }
    }

    /// Commit work gathered during the pass, children before parents.
    pub(crate) fn finish(self) -> Vec<CommitTask> {
        self.commits
    }

    pub(crate) fn diff(
        &mut self,
        frame: Frame<'_>,
        new: &VNode,
        old: Option<Rendered>,
        excess: &mut Excess,
    ) -> Result<Rendered, RenderError> {
        let old = match old {
            Some(old) if old.vnode.same_type_and_key(new) => Some(old),
            Some(old) => {
                self.unmount(old, frame.ancestor, false)?;
                None
            }
            None => None,
        };
        let options = self.options;
        Options::notify(&options.diff, new);
        log::trace!("diff {:?}", new.kind());

        let rendered = match new.kind() {
            NodeKind::Element(tag) => self.diff_element(frame, new, tag, old, excess)?,
            NodeKind::Text(text) => self.diff_text(new, text, old, excess)?,
            NodeKind::Fragment => {
                let old_children = match old {
                    Some(Rendered {
                        kind: RenderedKind::Fragment { children },
                        ..
                    }) => children,
                    _ => Vec::new(),
                };
                let children = self.diff_children(frame, new.child_nodes(), old_children, excess)?;
                Rendered {
                    vnode: new.clone(),
                    kind: RenderedKind::Fragment { children },
                }
            }
            NodeKind::Component(ty) => self.diff_component(frame, new, ty, old, excess)?,
        };

        Options::notify(&options.diffed, new);
        Ok(rendered)
    }

    /// Diffs a child list into the frame's output parent without placing it;
    /// unmatched old children are unmounted. On failure every child, old or
    /// already diffed, has been torn down.
    pub(crate) fn diff_children(
        &mut self,
        frame: Frame<'_>,
        new_children: &[VNode],
        old_children: Vec<Rendered>,
        excess: &mut Excess,
    ) -> Result<Vec<Rendered>, RenderError> {
        let mut old: Vec<Option<Rendered>> = old_children.into_iter().map(Some).collect();
        let mut out: Vec<Rendered> = Vec::with_capacity(new_children.len());
        for (index, child) in new_children.iter().enumerate() {
            let matched = take_match(&mut old, index, child);
            match self.diff(frame, child, matched, excess) {
                Ok(rendered) => out.push(rendered),
                Err(error) => {
                    for rendered in out.into_iter().chain(old.into_iter().flatten()) {
                        self.discard(Some(rendered.vnode), rendered.kind, frame.ancestor);
                    }
                    return Err(error);
                }
            }
        }
        for leftover in old.into_iter().flatten() {
            self.unmount(leftover, frame.ancestor, false)?;
        }
        Ok(out)
    }

    fn diff_text(
        &mut self,
        new: &VNode,
        text: &str,
        old: Option<Rendered>,
        excess: &mut Excess,
    ) -> Result<Rendered, RenderError> {
        let node = match old {
            Some(Rendered {
                vnode,
                kind: RenderedKind::Text { node },
            }) => {
                let unchanged = matches!(vnode.kind(), NodeKind::Text(previous) if &**previous == text);
                if !unchanged {
                    if let Err(error) = self.applier.set_text(node, text) {
                        self.discard(Some(vnode), RenderedKind::Text { node }, None);
                        return Err(error.into());
                    }
                }
                node
            }
            _ => match self.adopt(excess, |kind| matches!(kind, HostKind::Text(_)))? {
                Some((node, HostKind::Text(existing))) => {
                    if existing != text {
                        self.applier.set_text(node, text)?;
                    }
                    node
                }
                _ => self.applier.create_text(text),
            },
        };
        Ok(Rendered {
            vnode: new.clone(),
            kind: RenderedKind::Text { node },
        })
    }

    fn diff_element(
        &mut self,
        frame: Frame<'_>,
        new: &VNode,
        tag: &str,
        old: Option<Rendered>,
        excess: &mut Excess,
    ) -> Result<Rendered, RenderError> {
        let namespace = self.applier.element_namespace(tag, frame.namespace);
        let mut child_excess: Excess = None;
        let mut adopted_attrs = Attributes::new();
        let (slot, old_vnode) = match old {
            Some(Rendered {
                vnode,
                kind: RenderedKind::Element { slot },
            }) => {
                if VNode::ptr_eq(&vnode, new) {
                    return Ok(Rendered {
                        vnode,
                        kind: RenderedKind::Element { slot },
                    });
                }
                (slot, Some(vnode))
            }
            _ => {
                let adopted = self.adopt(
                    excess,
                    |kind| matches!(kind, HostKind::Element(existing) if existing == tag),
                )?;
                match adopted {
                    Some((node, _)) => {
                        let existing = self.applier.children(node)?;
                        child_excess = Some(existing.into_iter().map(Some).collect());
                        adopted_attrs = self.applier.attributes(node)?;
                        (HostSlot::new(node), None)
                    }
                    None => (HostSlot::new(self.applier.create_element(tag, namespace)), None),
                }
            }
        };
        let old_attrs = old_vnode
            .as_ref()
            .map_or(&adopted_attrs, |vnode| vnode.props().attrs());
        let patched = self.patch_element(
            frame,
            new,
            tag,
            namespace,
            &slot,
            old_attrs,
            old_vnode.as_ref().and_then(VNode::node_ref),
            child_excess,
        );
        if let Err(error) = patched {
            self.discard(old_vnode, RenderedKind::Element { slot }, frame.ancestor);
            return Err(error);
        }

        Ok(Rendered {
            vnode: new.clone(),
            kind: RenderedKind::Element { slot },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn patch_element(
        &mut self,
        frame: Frame<'_>,
        new: &VNode,
        tag: &str,
        namespace: Namespace,
        slot: &Rc<HostSlot>,
        old_attrs: &Attributes,
        old_ref: Option<&NodeRef>,
        mut child_excess: Excess,
    ) -> Result<(), RenderError> {
        let node = slot.node;
        let child_frame = Frame {
            host: slot,
            namespace: self.applier.child_namespace(tag, namespace),
            ..frame
        };
        let old_children = slot.take_children();
        let children =
            self.diff_children(child_frame, new.child_nodes(), old_children, &mut child_excess)?;
        slot.replace_children(children);
        if let Some(leftovers) = child_excess {
            for leftover in leftovers.into_iter().flatten() {
                self.applier.remove(leftover)?;
            }
        }
        self.place(slot)?;

        self.applier
            .apply_props(node, old_attrs, new.props().attrs(), namespace)?;

        if let Some(node_ref) = new.node_ref() {
            let unchanged = old_ref.is_some_and(|previous| previous.ptr_eq(node_ref));
            if !unchanged {
                self.apply_ref(node_ref, Some(RefTarget::Node(node)), frame.ancestor)?;
            }
        }
        Ok(())
    }

    /// Takes the first pre-existing output node accepted by `accept`.
    fn adopt(
        &mut self,
        excess: &mut Excess,
        accept: impl Fn(&HostKind) -> bool,
    ) -> Result<Option<(NodeId, HostKind)>, RenderError> {
        let Some(candidates) = excess.as_mut() else {
            return Ok(None);
        };
        for candidate in candidates.iter_mut() {
            let Some(node) = *candidate else { continue };
            let kind = self.applier.host_kind(node)?;
            if accept(&kind) {
                *candidate = None;
                return Ok(Some((node, kind)));
            }
        }
        Ok(None)
    }

    /// Brings the output parent's child order in line with the slot's
    /// rendered children, moving only nodes off the longest run that is
    /// already in order.
    pub(crate) fn place(&mut self, slot: &HostSlot) -> Result<(), RenderError> {
        let desired = slot.output_nodes();
        let actual = self.applier.children(slot.node)?;
        if actual == desired {
            return Ok(());
        }
        let position: HashMap<NodeId, usize> =
            actual.iter().enumerate().map(|(i, &node)| (node, i)).collect();
        let sources: Vec<Option<usize>> = desired
            .iter()
            .map(|node| position.get(node).copied())
            .collect();
        let stable = stable_positions(&sources);

        let mut anchors = vec![None; desired.len()];
        let mut next_stable = None;
        for index in (0..desired.len()).rev() {
            anchors[index] = next_stable;
            if stable[index] {
                next_stable = Some(desired[index]);
            }
        }
        for (index, &node) in desired.iter().enumerate() {
            if !stable[index] {
                log::trace!("place #{node} under #{} before {:?}", slot.node, anchors[index]);
                self.applier.insert_before(slot.node, node, anchors[index])?;
            }
        }
        Ok(())
    }

    pub(crate) fn apply_ref(
        &mut self,
        node_ref: &NodeRef,
        target: Option<RefTarget>,
        ancestor: Option<&Rc<ComponentCell>>,
    ) -> Result<(), RenderError> {
        match node_ref.apply(target) {
            Ok(()) => Ok(()),
            Err(error) => self.catch_error(error, ancestor),
        }
    }

    /// Tears down a rendered subtree: refs are cleared, components run their
    /// unmount work, and output nodes are removed unless an ancestor's
    /// removal already detaches them.
    pub(crate) fn unmount(
        &mut self,
        rendered: Rendered,
        ancestor: Option<&Rc<ComponentCell>>,
        skip_remove: bool,
    ) -> Result<(), RenderError> {
        let options = self.options;
        Options::notify(&options.unmount, &rendered.vnode);
        if let Some(node_ref) = rendered.vnode.node_ref() {
            self.apply_ref(node_ref, None, ancestor)?;
        }
        self.unmount_kind(rendered.kind, ancestor, skip_remove)
    }

    fn unmount_kind(
        &mut self,
        kind: RenderedKind,
        ancestor: Option<&Rc<ComponentCell>>,
        skip_remove: bool,
    ) -> Result<(), RenderError> {
        match kind {
            RenderedKind::Element { slot } => {
                for child in slot.take_children() {
                    self.unmount(child, ancestor, true)?;
                }
                if !skip_remove {
                    self.applier.remove(slot.node)?;
                }
            }
            RenderedKind::Text { node } => {
                if !skip_remove {
                    self.applier.remove(node)?;
                }
            }
            RenderedKind::Fragment { children } => {
                for child in children {
                    self.unmount(child, ancestor, skip_remove)?;
                }
            }
            RenderedKind::Component { instance } => {
                instance.teardown();
                let subtree = instance.subtree.borrow_mut().take();
                if let Some(subtree) = subtree {
                    self.unmount(subtree, Some(&instance), skip_remove)?;
                }
            }
        }
        Ok(())
    }

    /// Unmounts what a failing diff had already taken over. `vnode` is the
    /// node the subtree was last committed for; without one, no ref is
    /// cleared. The failure being propagated wins, so teardown errors are
    /// only logged.
    pub(crate) fn discard(
        &mut self,
        vnode: Option<VNode>,
        kind: RenderedKind,
        ancestor: Option<&Rc<ComponentCell>>,
    ) {
        let result = match vnode {
            Some(vnode) => self.unmount(Rendered { vnode, kind }, ancestor, false),
            None => self.unmount_kind(kind, ancestor, false),
        };
        if let Err(err) = result {
            log::warn!("teardown after a failed diff: {err}");
        }
    }
}

/// Finds the old child a new child reuses: the one at the same index when
/// type and key match, otherwise the first unmatched one that does.
fn take_match(old: &mut [Option<Rendered>], index: usize, new: &VNode) -> Option<Rendered> {
    let same_slot = old
        .get(index)
        .and_then(Option::as_ref)
        .is_some_and(|candidate| candidate.vnode.same_type_and_key(new));
    if same_slot {
        return old[index].take();
    }
    old.iter_mut()
        .find(|candidate| {
            candidate
                .as_ref()
                .is_some_and(|candidate| candidate.vnode.same_type_and_key(new))
        })
        .and_then(Option::take)
}

/// Marks the entries of `sources` that form a longest strictly increasing
/// subsequence; `None` entries never take part.
fn stable_positions(sources: &[Option<usize>]) -> Vec<bool> {
    let rank = |index: usize| sources[index].unwrap_or(usize::MAX);
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sources.len()];
    for (index, source) in sources.iter().enumerate() {
        let Some(value) = *source else { continue };
        let at = tails.partition_point(|&tail| rank(tail) < value);
        if at > 0 {
            previous[index] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(index);
        } else {
            tails[at] = index;
        }
    }
    let mut stable = vec![false; sources.len()];
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        stable[index] = true;
        cursor = previous[index];
    }
    stable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::MemoryApplier;
    use crate::runtime::Runtime;

    fn positions(sources: &[Option<usize>]) -> Vec<usize> {
        stable_positions(sources)
            .iter()
            .enumerate()
            .filter_map(|(i, &stable)| stable.then_some(i))
            .collect()
    }

    #[test]
    fn rotation_keeps_the_longest_run() {
        // actual 1,2,3 -> desired 3,1,2
        assert_eq!(positions(&[Some(2), Some(0), Some(1)]), vec![1, 2]);
    }

    #[test]
    fn new_nodes_are_never_stable() {
        assert_eq!(positions(&[Some(0), None, None]), vec![0]);
        assert_eq!(positions(&[None, None]), Vec::<usize>::new());
    }

    #[test]
    fn reversal_keeps_one() {
        assert_eq!(positions(&[Some(3), Some(2), Some(1), Some(0)]).len(), 1);
    }

    fn text_rendered(applier: &mut MemoryApplier, content: &str) -> Rendered {
        let node = applier.create_text(content);
        Rendered {
            vnode: VNode::text(content),
            kind: RenderedKind::Text { node },
        }
    }

    #[test]
    fn place_moves_only_out_of_order_nodes() {
        let mut applier = MemoryApplier::new();
        let root = applier.create_root();
        let slot = HostSlot::new(root);
        let a = text_rendered(&mut applier, "a");
        let b = text_rendered(&mut applier, "b");
        let c = text_rendered(&mut applier, "c");
        slot.replace_children(vec![a, b, c]);

        let runtime = Runtime::default();
        let options = Options::default();
        let mut reconciler = Reconciler::new(&mut applier, runtime.handle(), &options);
        reconciler.place(&slot).expect("initial placement");
        let mut children = slot.take_children();
        children.rotate_right(1);
        slot.replace_children(children);
        reconciler.place(&slot).expect("reorder");
        drop(reconciler);
        assert_eq!(applier.text_content(root).expect("text"), "cab");
    }

    #[test]
    fn keyed_match_prefers_same_index() {
        let mut applier = MemoryApplier::new();
        let a = text_rendered(&mut applier, "a");
        let b = text_rendered(&mut applier, "b");
        let mut old = vec![Some(a), Some(b)];
        let found = take_match(&mut old, 1, &VNode::text("z")).expect("text matches text");
        assert!(matches!(found.vnode.kind(), NodeKind::Text(t) if &**t == "b"));
        assert!(old[0].is_some());
        assert!(take_match(&mut old, 0, &VNode::element("p")).is_none());
    }
}
