//! Virtual nodes: immutable descriptions of what a render pass should produce.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::component::{ComponentHandle, ComponentType};
use crate::hash::hash_one;
use crate::{NodeId, RenderError};

/// Identity hint that lets the reconciler match siblings across reorders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key(u64);

impl Key {
    pub fn new<K: Hash + ?Sized>(key: &K) -> Self {
        Self(hash_one(key))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Event listener stored as an attribute value. Compared by pointer.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&Value)>);

impl Callback {
    pub fn new(f: impl Fn(&Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn emit(&self, payload: &Value) {
        (self.0)(payload)
    }

    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.0))
    }
}

/// Dynamic value used for attributes and class component state.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[Value]>),
    Callback(Callback),
    Any(Rc<dyn Any>),
}

impl Value {
    pub fn any<T: 'static>(value: T) -> Self {
        Value::Any(Rc::new(value))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Value::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            Value::Any(any) => Rc::clone(any).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Textual form written into an output attribute, `None` when the value
    /// means "no attribute" (null, `false`) or is not representable as text.
    pub fn to_attribute_string(&self) -> Option<String> {
        match self {
            Value::Null | Value::Bool(false) => None,
            Value::Bool(true) => Some(String::new()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Str(s) => Some(s.to_string()),
            Value::List(items) => Some(
                items
                    .iter()
                    .filter_map(Value::to_attribute_string)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Value::Callback(_) | Value::Any(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Callback(a), Value::Callback(b)) => a.ptr_eq(b),
            (Value::Any(a), Value::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Callback(cb) => cb.fmt(f),
            Value::Any(any) => write!(f, "Any({:p})", Rc::as_ptr(any)),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Callback> for Value {
    fn from(v: Callback) -> Self {
        Value::Callback(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(Rc::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Ordered attribute map of an element.
pub type Attributes = IndexMap<Rc<str>, Value>;

/// Attributes plus the normalised children of a node.
#[derive(Clone, Default)]
pub struct Props {
    attrs: Attributes,
    children: Vec<VNode>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_children(mut self, children: impl IntoChildren) -> Self {
        children.push_into(&mut self.children);
        self
    }

    pub fn set(&mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn children(&self) -> &[VNode] {
        &self.children
    }

    pub fn set_children(&mut self, children: impl IntoChildren) {
        self.children.clear();
        children.push_into(&mut self.children);
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("attrs", &self.attrs)
            .field("children", &self.children.len())
            .finish()
    }
}

/// What a node ref resolves to.
#[derive(Clone)]
pub enum RefTarget {
    Node(NodeId),
    Component(ComponentHandle),
}

impl RefTarget {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            RefTarget::Node(id) => Some(*id),
            RefTarget::Component(_) => None,
        }
    }

    pub fn component(&self) -> Option<&ComponentHandle> {
        match self {
            RefTarget::Component(handle) => Some(handle),
            RefTarget::Node(_) => None,
        }
    }
}

impl fmt::Debug for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefTarget::Node(id) => write!(f, "Node({id})"),
            RefTarget::Component(handle) => write!(f, "Component({})", handle.name()),
        }
    }
}

type RefCallback = dyn Fn(Option<RefTarget>) -> Result<(), RenderError>;

/// Receives the realised output node or component instance of a VNode, and
/// `None` when it unmounts.
#[derive(Clone)]
pub enum NodeRef {
    Callback(Rc<RefCallback>),
    Cell(Rc<RefCell<Option<RefTarget>>>),
}

impl NodeRef {
    /// Creates a mutable ref box.
    pub fn create() -> Self {
        NodeRef::Cell(Rc::new(RefCell::new(None)))
    }

    pub fn callback(f: impl Fn(Option<RefTarget>) -> Result<(), RenderError> + 'static) -> Self {
        NodeRef::Callback(Rc::new(f))
    }

    /// Current target of a ref box; callback refs always report `None`.
    pub fn current(&self) -> Option<RefTarget> {
        match self {
            NodeRef::Cell(cell) => cell.borrow().clone(),
            NodeRef::Callback(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        match (self, other) {
            (NodeRef::Callback(a), NodeRef::Callback(b)) => Rc::ptr_eq(a, b),
            (NodeRef::Cell(a), NodeRef::Cell(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn apply(&self, target: Option<RefTarget>) -> Result<(), RenderError> {
        match self {
            NodeRef::Callback(f) => f(target),
            NodeRef::Cell(cell) => {
                *cell.borrow_mut() = target;
                Ok(())
            }
        }
    }
}

/// The closed set of node kinds.
#[derive(Clone)]
pub enum NodeKind {
    Element(Rc<str>),
    Text(Rc<str>),
    Component(ComponentType),
    Fragment,
}

impl NodeKind {
    pub(crate) fn same_type(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (NodeKind::Element(a), NodeKind::Element(b)) => a == b,
            (NodeKind::Text(_), NodeKind::Text(_)) => true,
            (NodeKind::Component(a), NodeKind::Component(b)) => a.same_type(b),
            (NodeKind::Fragment, NodeKind::Fragment) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Element(tag) => write!(f, "<{tag}>"),
            NodeKind::Text(text) => write!(f, "#text({text:?})"),
            NodeKind::Component(ty) => write!(f, "<{}/>", ty.name()),
            NodeKind::Fragment => write!(f, "<>"),
        }
    }
}

#[derive(Clone)]
struct VNodeData {
    kind: NodeKind,
    key: Option<Key>,
    props: Props,
    node_ref: Option<NodeRef>,
}

/// Immutable, cheaply clonable virtual node.
///
/// Builder methods take `self` and only copy the payload when it is shared,
/// so chaining on a freshly created node never allocates twice.
#[derive(Clone)]
pub struct VNode(Rc<VNodeData>);

impl VNode {
    fn new(kind: NodeKind, props: Props) -> Self {
        Self(Rc::new(VNodeData {
            kind,
            key: None,
            props,
            node_ref: None,
        }))
    }

    pub fn element(tag: impl Into<Rc<str>>) -> Self {
        Self::new(NodeKind::Element(tag.into()), Props::new())
    }

    pub fn text(content: impl Into<Rc<str>>) -> Self {
        Self::new(NodeKind::Text(content.into()), Props::new())
    }

    pub fn fragment(children: impl IntoChildren) -> Self {
        Self::new(NodeKind::Fragment, Props::new().with_children(children))
    }

    /// A node that renders nothing.
    pub fn empty() -> Self {
        Self::new(NodeKind::Fragment, Props::new())
    }

    pub fn component(ty: &ComponentType, props: Props) -> Self {
        Self::new(NodeKind::Component(ty.clone()), props)
    }

    /// Normalises arbitrary children into a single node: one child is returned
    /// as is, anything else is wrapped in a fragment.
    pub fn from_children(children: impl IntoChildren) -> Self {
        let mut out = Vec::new();
        children.push_into(&mut out);
        if out.len() == 1 {
            if let Some(only) = out.pop() {
                return only;
            }
        }
        Self::new(NodeKind::Fragment, Props { attrs: Attributes::new(), children: out })
    }

    fn data_mut(&mut self) -> &mut VNodeData {
        Rc::make_mut(&mut self.0)
    }

    pub fn attr(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.data_mut().props.set(name, value);
        self
    }

    pub fn child(mut self, child: impl IntoChildren) -> Self {
        child.push_into(&mut self.data_mut().props.children);
        self
    }

    pub fn children(mut self, children: impl IntoChildren) -> Self {
        self.data_mut().props.set_children(children);
        self
    }

    pub fn keyed<K: Hash + ?Sized>(mut self, key: &K) -> Self {
        self.data_mut().key = Some(Key::new(key));
        self
    }

    pub fn with_ref(mut self, node_ref: NodeRef) -> Self {
        self.data_mut().node_ref = Some(node_ref);
        self
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    pub fn key(&self) -> Option<Key> {
        self.0.key
    }

    pub fn props(&self) -> &Props {
        &self.0.props
    }

    pub fn child_nodes(&self) -> &[VNode] {
        &self.0.props.children
    }

    pub fn node_ref(&self) -> Option<&NodeRef> {
        self.0.node_ref.as_ref()
    }

    pub fn ptr_eq(a: &VNode, b: &VNode) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Whether the reconciler may reuse `self`'s realised output for `other`.
    pub fn same_type_and_key(&self, other: &VNode) -> bool {
        self.0.key == other.0.key && self.0.kind.same_type(&other.0.kind)
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("VNode");
        dbg.field("kind", &self.0.kind);
        if let Some(key) = self.0.key {
            dbg.field("key", &key);
        }
        dbg.field("attrs", &self.0.props.attrs)
            .field("children", &self.0.props.children)
            .finish()
    }
}

/// Anything that can appear in a child list.
///
/// Absent values and booleans render nothing, sequences flatten, strings and
/// numbers become text nodes.
pub trait IntoChildren {
    fn push_into(self, out: &mut Vec<VNode>);
}

impl IntoChildren for VNode {
    fn push_into(self, out: &mut Vec<VNode>) {
        out.push(self);
    }
}

impl IntoChildren for &VNode {
    fn push_into(self, out: &mut Vec<VNode>) {
        out.push(self.clone());
    }
}

impl IntoChildren for &str {
    fn push_into(self, out: &mut Vec<VNode>) {
        out.push(VNode::text(self));
    }
}

impl IntoChildren for String {
    fn push_into(self, out: &mut Vec<VNode>) {
        out.push(VNode::text(self));
    }
}

impl IntoChildren for Rc<str> {
    fn push_into(self, out: &mut Vec<VNode>) {
        out.push(VNode::text(self));
    }
}

macro_rules! numeric_children {
    ($($ty:ty),*) => {
        $(
            impl IntoChildren for $ty {
                fn push_into(self, out: &mut Vec<VNode>) {
                    out.push(VNode::text(self.to_string()));
                }
            }
        )*
    };
}

numeric_children!(i32, i64, u32, u64, usize, f32, f64);

impl IntoChildren for bool {
    fn push_into(self, _out: &mut Vec<VNode>) {}
}

impl IntoChildren for () {
    fn push_into(self, _out: &mut Vec<VNode>) {}
}

impl<T: IntoChildren> IntoChildren for Option<T> {
    fn push_into(self, out: &mut Vec<VNode>) {
        if let Some(inner) = self {
            inner.push_into(out);
        }
    }
}

impl<T: IntoChildren> IntoChildren for Vec<T> {
    fn push_into(self, out: &mut Vec<VNode>) {
        for item in self {
            item.push_into(out);
        }
    }
}

impl<T: IntoChildren, const N: usize> IntoChildren for [T; N] {
    fn push_into(self, out: &mut Vec<VNode>) {
        for item in self {
            item.push_into(out);
        }
    }
}

macro_rules! tuple_children {
    ($($name:ident),+) => {
        impl<$($name: IntoChildren),+> IntoChildren for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_into(self, out: &mut Vec<VNode>) {
                let ($($name,)+) = self;
                $($name.push_into(out);)+
            }
        }
    };
}

tuple_children!(A);
tuple_children!(A, B);
tuple_children!(A, B, C);
tuple_children!(A, B, C, D);
tuple_children!(A, B, C, D, E);
tuple_children!(A, B, C, D, E, F);
tuple_children!(A, B, C, D, E, F, G);
tuple_children!(A, B, C, D, E, F, G, H);
tuple_children!(A, B, C, D, E, F, G, H, I);
tuple_children!(A, B, C, D, E, F, G, H, I, J);
