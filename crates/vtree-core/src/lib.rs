#![doc = r"Core runtime for a virtual-tree UI engine: keyed reconciliation, component lifecycle, hooks and batched render scheduling."]

pub mod applier;
pub mod collections;
pub mod component;
pub mod context;
mod diff;
pub mod hash;
pub mod hooks;
mod lifecycle;
pub mod options;
pub mod platform;
pub mod renderer;
pub mod runtime;
pub mod vnode;

pub use applier::{Applier, HostKind, MemoryApplier, MemoryNode, Namespace};
pub use component::{
    Class, ComponentHandle, ComponentType, Lifecycle, Recovery, StateMap, StatePatch, Updater,
    View,
};
pub use context::{create_context, ContextChannel, ContextId, ContextMap, ProvidedValue};
pub use hooks::{Deps, Dispatch, EffectResult, EffectScope, RenderContext, Setter};
pub use options::Options;
pub use platform::RuntimeScheduler;
pub use renderer::{EffectTiming, Renderer, RendererConfig};
pub use runtime::{DefaultScheduler, Runtime, RuntimeHandle};
pub use vnode::{Attributes, Callback, IntoChildren, Key, NodeKind, NodeRef, Props, RefTarget, VNode, Value};

/// Identifier of a node in the output tree, allocated by the [`Applier`].
pub type NodeId = usize;

/// What a component render call produces.
pub type RenderResult = Result<VNode, RenderError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    Missing { id: NodeId },
    TypeMismatch { id: NodeId, expected: &'static str },
    NotAChild { parent: NodeId, child: NodeId },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Missing { id } => write!(f, "node {id} missing"),
            NodeError::TypeMismatch { id, expected } => {
                write!(f, "node {id} type mismatch; expected {expected}")
            }
            NodeError::NotAChild { parent, child } => {
                write!(f, "node {child} is not a child of node {parent}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

/// Failure raised while rendering a tree.
///
/// `Thrown` carries errors raised by user code (render functions, ref
/// callbacks); those are offered to error-recovering ancestors before they
/// reach the caller. `Node` wraps a failure reported by the [`Applier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    Thrown { message: String },
    Node(NodeError),
}

impl RenderError {
    pub fn thrown(message: impl Into<String>) -> Self {
        RenderError::Thrown {
            message: message.into(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            RenderError::Thrown { message } => message.clone(),
            RenderError::Node(err) => err.to_string(),
        }
    }
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Thrown { message } => write!(f, "render failed: {message}"),
            RenderError::Node(err) => write!(f, "output tree error: {err}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Thrown { .. } => None,
            RenderError::Node(err) => Some(err),
        }
    }
}

impl From<NodeError> for RenderError {
    fn from(err: NodeError) -> Self {
        RenderError::Node(err)
    }
}
