//! Observation points around reconciliation.

use std::fmt;
use std::rc::Rc;

use crate::vnode::VNode;
use crate::NodeId;

type VNodeHook = Rc<dyn Fn(&VNode)>;
type CommitHook = Rc<dyn Fn(NodeId)>;

/// Optional callbacks invoked as a renderer works. None of them can change
/// what gets rendered; leaving all of them unset changes nothing.
#[derive(Clone, Default)]
pub struct Options {
    /// Before a node is diffed.
    pub diff: Option<VNodeHook>,
    /// Before a component's render call.
    pub render: Option<VNodeHook>,
    /// After a node has been diffed.
    pub diffed: Option<VNodeHook>,
    /// Before a node is unmounted.
    pub unmount: Option<VNodeHook>,
    /// After a pass has been committed, with the output parent it rendered into.
    pub commit: Option<CommitHook>,
}

impl Options {
    pub fn on_diff(mut self, hook: impl Fn(&VNode) + 'static) -> Self {
        self.diff = Some(Rc::new(hook));
        self
    }

    pub fn on_render(mut self, hook: impl Fn(&VNode) + 'static) -> Self {
        self.render = Some(Rc::new(hook));
        self
    }

    pub fn on_diffed(mut self, hook: impl Fn(&VNode) + 'static) -> Self {
        self.diffed = Some(Rc::new(hook));
        self
    }

    pub fn on_unmount(mut self, hook: impl Fn(&VNode) + 'static) -> Self {
        self.unmount = Some(Rc::new(hook));
        self
    }

    pub fn on_commit(mut self, hook: impl Fn(NodeId) + 'static) -> Self {
        self.commit = Some(Rc::new(hook));
        self
    }

    pub(crate) fn notify(hook: &Option<VNodeHook>, vnode: &VNode) {
        if let Some(hook) = hook {
            hook(vnode);
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("diff", &self.diff.is_some())
            .field("render", &self.render.is_some())
            .field("diffed", &self.diffed.is_some())
            .field("unmount", &self.unmount.is_some())
            .field("commit", &self.commit.is_some())
            .finish()
    }
}
