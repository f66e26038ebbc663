//! Component types, class capability records and live component instances.

use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::applier::Namespace;
use crate::context::{ContextId, ContextMap, ProvidedValue, ProviderCell, ProviderDef};
use crate::diff::{HostSlot, Rendered};
use crate::hooks::{EffectScope, HookList, RenderContext};
use crate::runtime::RuntimeHandle;
use crate::vnode::{Props, VNode, Value};
use crate::{RenderError, RenderResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct TypeKey {
    type_id: TypeId,
    channel: usize,
}

impl TypeKey {
    fn of<T: ?Sized + 'static>(channel: usize) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            channel,
        }
    }
}

type RenderFn = dyn Fn(&mut RenderContext<'_>, &Props) -> RenderResult;

#[derive(Clone)]
pub(crate) enum RenderUnit {
    Function(Rc<RenderFn>),
    Class(Rc<dyn ClassFactory>),
    Provider(Rc<ProviderDef>),
}

/// Identity and render behaviour of a component.
///
/// Two component types are the same when they were built from the same Rust
/// type: the same function item or closure expression, the same [`Class`]
/// implementor, or the provider of the same context channel.
#[derive(Clone)]
pub struct ComponentType {
    key: TypeKey,
    name: &'static str,
    unit: RenderUnit,
}

impl ComponentType {
    pub fn function<F>(render: F) -> Self
    where
        F: Fn(&mut RenderContext<'_>, &Props) -> RenderResult + 'static,
    {
        Self {
            key: TypeKey::of::<F>(0),
            name: type_name::<F>(),
            unit: RenderUnit::Function(Rc::new(render)),
        }
    }

    pub fn class<C: Class>() -> Self {
        Self {
            key: TypeKey::of::<C>(0),
            name: type_name::<C>(),
            unit: RenderUnit::Class(Rc::new(ClassFactoryOf::<C> {
                lifecycle: Rc::new(C::lifecycle()),
            })),
        }
    }

    pub(crate) fn provider(def: ProviderDef) -> Self {
        Self {
            key: TypeKey::of::<ProviderDef>(def.channel.raw()),
            name: "Provider",
            unit: RenderUnit::Provider(Rc::new(def)),
        }
    }

    /// Overrides the name used in logs and debug output.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn same_type(&self, other: &ComponentType) -> bool {
        self.key == other.key
    }

    pub fn is_class(&self) -> bool {
        matches!(self.unit, RenderUnit::Class(_))
    }

    pub(crate) fn unit(&self) -> &RenderUnit {
        &self.unit
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentType").field(&self.name).finish()
    }
}

/// Ordered state map of a class component.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct StateMap(IndexMap<Rc<str>, Value>);

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(Rc::from(name), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Shallow merge: every entry of `patch` overwrites the same name here.
    pub fn merge(&mut self, patch: StateMap) {
        for (name, value) in patch.0 {
            self.0.insert(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (&**name, value))
    }
}

type PatchFn = dyn FnOnce(&StateMap, &Props) -> StateMap;

/// Queued state change: a partial map, or a pure function of the staged
/// state and next props producing one.
pub enum StatePatch {
    Values(StateMap),
    Update(Box<PatchFn>),
}

impl StatePatch {
    pub fn update(f: impl FnOnce(&StateMap, &Props) -> StateMap + 'static) -> Self {
        StatePatch::Update(Box::new(f))
    }

    pub(crate) fn apply(self, mut state: StateMap, props: &Props) -> StateMap {
        let patch = match self {
            StatePatch::Values(values) => values,
            StatePatch::Update(f) => f(&state, props),
        };
        state.merge(patch);
        state
    }
}

impl From<StateMap> for StatePatch {
    fn from(values: StateMap) -> Self {
        StatePatch::Values(values)
    }
}

/// Props, state and context as seen by one lifecycle call.
#[derive(Clone, Copy)]
pub struct View<'a> {
    pub props: &'a Props,
    pub state: &'a StateMap,
    pub context: &'a ContextMap,
}

/// Outcome of offering a render error to a component.
#[derive(Clone, Debug, PartialEq)]
pub enum Recovery {
    /// Merge this state and re-render.
    Patch(StateMap),
    /// The component dealt with the error itself; re-render as is.
    Handled,
    /// Pass the error to the next ancestor.
    Rethrow,
}

/// Optional lifecycle capabilities of a class component.
///
/// Slots left `None` are skipped. Build one with struct update syntax:
/// `Lifecycle { did_mount: Some(f), ..Lifecycle::default() }`.
pub struct Lifecycle<C> {
    pub will_mount: Option<fn(&mut C, &Updater)>,
    pub did_mount: Option<fn(&mut C, &Updater)>,
    pub will_unmount: Option<fn(&mut C)>,
    /// `(instance, current view, next props, next context, updater)`.
    pub will_receive_props: Option<fn(&mut C, &View<'_>, &Props, &ContextMap, &Updater)>,
    /// `(instance, current view, next view)`; `false` keeps the current output.
    pub should_update: Option<fn(&C, &View<'_>, &View<'_>) -> bool>,
    pub will_update: Option<fn(&mut C, &View<'_>, &View<'_>)>,
    /// `(instance, previous props, previous state)`, taken after render.
    pub snapshot_before_update: Option<fn(&C, &Props, &StateMap) -> Option<Value>>,
    /// `(instance, previous props, previous state, snapshot, updater)`.
    pub did_update: Option<fn(&mut C, &Props, &StateMap, Option<&Value>, &Updater)>,
    pub child_context: Option<fn(&C, &View<'_>) -> Vec<ProvidedValue>>,
    pub derive_state_from_props: Option<fn(&Props, &StateMap) -> Option<StateMap>>,
    pub derive_state_from_error: Option<fn(&RenderError) -> StateMap>,
    pub did_catch: Option<fn(&mut C, &RenderError, &Updater) -> Recovery>,
    /// Channel the component subscribes to; its value is read from the view's
    /// context.
    pub context_type: Option<ContextId>,
}

impl<C> Default for Lifecycle<C> {
    fn default() -> Self {
        Self {
            will_mount: None,
            did_mount: None,
            will_unmount: None,
            will_receive_props: None,
            should_update: None,
            will_update: None,
            snapshot_before_update: None,
            did_update: None,
            child_context: None,
            derive_state_from_props: None,
            derive_state_from_error: None,
            did_catch: None,
            context_type: None,
        }
    }
}

/// A stateful component with an instance that lives as long as its tree
/// position.
pub trait Class: Sized + 'static {
    fn create(props: &Props, context: &ContextMap) -> Self;

    fn initial_state(&self, _props: &Props) -> StateMap {
        StateMap::new()
    }

    fn render(&mut self, cx: &mut RenderContext<'_>, view: &View<'_>) -> RenderResult;

    fn lifecycle() -> Lifecycle<Self> {
        Lifecycle::default()
    }
}

pub(crate) trait ClassFactory {
    fn construct(&self, props: &Props, context: &ContextMap) -> (Box<dyn ErasedClass>, StateMap);
}

struct ClassFactoryOf<C> {
    lifecycle: Rc<Lifecycle<C>>,
}

impl<C: Class> ClassFactory for ClassFactoryOf<C> {
    fn construct(&self, props: &Props, context: &ContextMap) -> (Box<dyn ErasedClass>, StateMap) {
        let component = C::create(props, context);
        let state = component.initial_state(props);
        let instance = ClassInstance {
            component,
            lifecycle: Rc::clone(&self.lifecycle),
        };
        (Box::new(instance), state)
    }
}

/// Object-safe view of a class instance and its capability record.
pub(crate) trait ErasedClass {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn render(&mut self, cx: &mut RenderContext<'_>, view: &View<'_>) -> RenderResult;
    fn derives_state(&self) -> bool;
    fn context_type(&self) -> Option<ContextId>;
    fn will_mount(&mut self, updater: &Updater);
    fn did_mount(&mut self, updater: &Updater);
    fn will_unmount(&mut self);
    fn will_receive_props(
        &mut self,
        current: &View<'_>,
        next_props: &Props,
        next_context: &ContextMap,
        updater: &Updater,
    );
    fn should_update(&self, current: &View<'_>, next: &View<'_>) -> bool;
    fn will_update(&mut self, current: &View<'_>, next: &View<'_>);
    fn snapshot_before_update(&self, prev_props: &Props, prev_state: &StateMap) -> Option<Value>;
    fn did_update(
        &mut self,
        prev_props: &Props,
        prev_state: &StateMap,
        snapshot: Option<&Value>,
        updater: &Updater,
    );
    fn child_context(&self, view: &View<'_>) -> Vec<ProvidedValue>;
    fn derive_state_from_props(&self, props: &Props, state: &StateMap) -> Option<StateMap>;
    fn recover(&mut self, error: &RenderError, updater: &Updater) -> Option<Recovery>;
}

struct ClassInstance<C> {
    component: C,
    lifecycle: Rc<Lifecycle<C>>,
}

impl<C: Class> ErasedClass for ClassInstance<C> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.component
    }

    fn render(&mut self, cx: &mut RenderContext<'_>, view: &View<'_>) -> RenderResult {
        self.component.render(cx, view)
    }

    fn derives_state(&self) -> bool {
        self.lifecycle.derive_state_from_props.is_some()
    }

    fn context_type(&self) -> Option<ContextId> {
        self.lifecycle.context_type
    }

    fn will_mount(&mut self, updater: &Updater) {
        if let Some(f) = self.lifecycle.will_mount {
            f(&mut self.component, updater);
        }
    }

    fn did_mount(&mut self, updater: &Updater) {
        if let Some(f) = self.lifecycle.did_mount {
            f(&mut self.component, updater);
        }
    }

    fn will_unmount(&mut self) {
        if let Some(f) = self.lifecycle.will_unmount {
            f(&mut self.component);
        }
    }

    fn will_receive_props(
        &mut self,
        current: &View<'_>,
        next_props: &Props,
        next_context: &ContextMap,
        updater: &Updater,
    ) {
        if let Some(f) = self.lifecycle.will_receive_props {
            f(&mut self.component, current, next_props, next_context, updater);
        }
    }

    fn should_update(&self, current: &View<'_>, next: &View<'_>) -> bool {
        self.lifecycle
            .should_update
            .map_or(true, |f| f(&self.component, current, next))
    }

    fn will_update(&mut self, current: &View<'_>, next: &View<'_>) {
        if let Some(f) = self.lifecycle.will_update {
            f(&mut self.component, current, next);
        }
    }

    fn snapshot_before_update(&self, prev_props: &Props, prev_state: &StateMap) -> Option<Value> {
        self.lifecycle
            .snapshot_before_update
            .and_then(|f| f(&self.component, prev_props, prev_state))
    }

    fn did_update(
        &mut self,
        prev_props: &Props,
        prev_state: &StateMap,
        snapshot: Option<&Value>,
        updater: &Updater,
    ) {
        if let Some(f) = self.lifecycle.did_update {
            f(&mut self.component, prev_props, prev_state, snapshot, updater);
        }
    }

    fn child_context(&self, view: &View<'_>) -> Vec<ProvidedValue> {
        self.lifecycle
            .child_context
            .map_or_else(Vec::new, |f| f(&self.component, view))
    }

    fn derive_state_from_props(&self, props: &Props, state: &StateMap) -> Option<StateMap> {
        self.lifecycle
            .derive_state_from_props
            .and_then(|f| f(props, state))
    }

    fn recover(&mut self, error: &RenderError, updater: &Updater) -> Option<Recovery> {
        if let Some(derive) = self.lifecycle.derive_state_from_error {
            return Some(Recovery::Patch(derive(error)));
        }
        self.lifecycle
            .did_catch
            .map(|f| f(&mut self.component, error, updater))
    }
}

/// Live instance backing one component tree position.
pub(crate) struct ComponentCell {
    pub(crate) id: usize,
    pub(crate) name: &'static str,
    pub(crate) runtime: RuntimeHandle,
    pub(crate) vnode: RefCell<VNode>,
    pub(crate) props: RefCell<Props>,
    pub(crate) state: RefCell<StateMap>,
    pub(crate) staged_state: RefCell<Option<StateMap>>,
    pub(crate) context: RefCell<ContextMap>,
    pub(crate) dirty: Cell<bool>,
    pub(crate) mounted: Cell<bool>,
    pub(crate) rendered: Cell<bool>,
    pub(crate) force: Cell<bool>,
    pub(crate) processing_error: Cell<bool>,
    pub(crate) after_paint_queued: Cell<bool>,
    depth: usize,
    pub(crate) namespace: Cell<Namespace>,
    pub(crate) ancestor: Weak<ComponentCell>,
    pub(crate) host: RefCell<Weak<HostSlot>>,
    pub(crate) hooks: RefCell<HookList>,
    pub(crate) pending_patches: RefCell<Vec<StatePatch>>,
    pub(crate) render_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
    class: RefCell<Option<Box<dyn ErasedClass>>>,
    pub(crate) provider: RefCell<Option<Rc<ProviderCell>>>,
    pub(crate) subtree: RefCell<Option<Rendered>>,
}

impl ComponentCell {
    pub(crate) fn create(
        ty: &ComponentType,
        vnode: &VNode,
        context: &ContextMap,
        ancestor: Option<&Rc<ComponentCell>>,
        runtime: &RuntimeHandle,
    ) -> Rc<Self> {
        let props = vnode.props();
        let (class, state) = match ty.unit() {
            RenderUnit::Class(factory) => {
                let (class, state) = factory.construct(props, context);
                (Some(class), state)
            }
            RenderUnit::Function(_) | RenderUnit::Provider(_) => (None, StateMap::new()),
        };
        let cell = Rc::new(Self {
            id: runtime.next_component_id(),
            name: ty.name(),
            runtime: runtime.clone(),
            vnode: RefCell::new(vnode.clone()),
            props: RefCell::new(props.clone()),
            state: RefCell::new(state),
            staged_state: RefCell::new(None),
            context: RefCell::new(context.clone()),
            // about to render; updates requested before that are folded in
            dirty: Cell::new(true),
            mounted: Cell::new(true),
            rendered: Cell::new(false),
            force: Cell::new(false),
            processing_error: Cell::new(false),
            after_paint_queued: Cell::new(false),
            depth: ancestor.map_or(0, |a| a.depth + 1),
            namespace: Cell::new(Namespace::Html),
            ancestor: ancestor.map_or_else(Weak::new, Rc::downgrade),
            host: RefCell::new(Weak::new()),
            hooks: RefCell::new(HookList::default()),
            pending_patches: RefCell::new(Vec::new()),
            render_callbacks: RefCell::new(Vec::new()),
            class: RefCell::new(class),
            provider: RefCell::new(None),
            subtree: RefCell::new(None),
        });
        log::trace!("created component {} #{}", cell.name, cell.id);
        cell
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Records where the instance currently renders.
    pub(crate) fn attach(&self, host: &Rc<HostSlot>, namespace: Namespace, vnode: &VNode) {
        *self.host.borrow_mut() = Rc::downgrade(host);
        self.namespace.set(namespace);
        *self.vnode.borrow_mut() = vnode.clone();
    }

    pub(crate) fn updater(self: &Rc<Self>) -> Updater {
        Updater {
            component: Rc::downgrade(self),
        }
    }

    pub(crate) fn with_class<R>(
        &self,
        f: impl FnOnce(&mut (dyn ErasedClass + 'static)) -> R,
    ) -> Option<R> {
        // busy while the instance's own render or lifecycle method runs
        let mut class = self.class.try_borrow_mut().ok()?;
        class.as_deref_mut().map(f)
    }

    /// Adds the instance to the render queue unless it is already pending or
    /// no longer mounted.
    pub(crate) fn enqueue(self: &Rc<Self>) {
        if self.mark_dirty() {
            log::trace!("enqueue {} #{}", self.name, self.id);
            self.runtime.enqueue_render(Rc::downgrade(self));
        }
    }

    /// Flags a mounted instance dirty without queueing it. Returns `false`
    /// when it already was dirty (and so queued) or is unmounted.
    pub(crate) fn mark_dirty(&self) -> bool {
        self.mounted.get() && !self.dirty.replace(true)
    }

    /// Queues an instance flagged by [`mark_dirty`](Self::mark_dirty) that
    /// has not rendered since.
    pub(crate) fn enqueue_marked(self: &Rc<Self>) {
        if self.mounted.get() && self.dirty.get() {
            log::trace!("enqueue {} #{}", self.name, self.id);
            self.runtime.enqueue_render(Rc::downgrade(self));
        }
    }

    /// Runs queued effects of one kind: every stale cleanup first, then every
    /// new effect body.
    pub(crate) fn run_effects(&self, layout: bool) {
        let pending = self.hooks.borrow_mut().take_pending(layout);
        if pending.is_empty() {
            return;
        }
        let cleanups: Vec<_> = {
            let mut hooks = self.hooks.borrow_mut();
            pending
                .iter()
                .filter_map(|&index| hooks.take_cleanup(index))
                .collect()
        };
        for cleanup in cleanups {
            cleanup();
        }
        for index in pending {
            let effect = self.hooks.borrow_mut().take_effect(index);
            if let Some(effect) = effect {
                if let Some(cleanup) = effect(EffectScope::new()).into_cleanup() {
                    self.hooks.borrow_mut().store_cleanup(index, cleanup);
                }
            }
        }
    }

    pub(crate) fn has_pending_effects(&self, layout: bool) -> bool {
        self.hooks.borrow().has_pending(layout)
    }

    /// Marks the instance unmounted and runs its unmount lifecycle and every
    /// effect cleanup in registration order.
    pub(crate) fn teardown(&self) {
        self.mounted.set(false);
        self.with_class(|class| class.will_unmount());
        let cleanups = self.hooks.borrow_mut().drain_cleanups();
        for cleanup in cleanups {
            cleanup();
        }
        self.pending_patches.borrow_mut().clear();
        self.render_callbacks.borrow_mut().clear();
        log::debug!("unmounted component {} #{}", self.name, self.id);
    }
}

/// Public handle to a live component instance.
#[derive(Clone)]
pub struct ComponentHandle(pub(crate) Rc<ComponentCell>);

impl ComponentHandle {
    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn updater(&self) -> Updater {
        self.0.updater()
    }

    pub fn props(&self) -> Props {
        self.0.props.borrow().clone()
    }

    pub fn state(&self) -> StateMap {
        self.0.state.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// Runs `f` against the class instance when it is of type `C`.
    ///
    /// Returns `None` when called from inside that instance's own render or
    /// lifecycle methods.
    pub fn with_instance<C: Class, R>(&self, f: impl FnOnce(&mut C) -> R) -> Option<R> {
        self.0
            .with_class(|class| class.as_any_mut().downcast_mut::<C>().map(f))
            .flatten()
    }

    pub fn ptr_eq(a: &ComponentHandle, b: &ComponentHandle) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("name", &self.0.name)
            .field("id", &self.0.id)
            .field("mounted", &self.0.mounted.get())
            .finish()
    }
}

/// Requests state changes and re-renders of one component from outside its
/// render call (event handlers, lifecycle methods, effects).
#[derive(Clone)]
pub struct Updater {
    component: Weak<ComponentCell>,
}

impl Updater {
    pub fn set_state(&self, patch: impl Into<StatePatch>) {
        if let Some(component) = self.component.upgrade() {
            component.pending_patches.borrow_mut().push(patch.into());
            component.enqueue();
        }
    }

    /// Like [`set_state`](Self::set_state); `callback` runs once the
    /// resulting render has been committed.
    pub fn set_state_then(&self, patch: impl Into<StatePatch>, callback: impl FnOnce() + 'static) {
        if let Some(component) = self.component.upgrade() {
            component.render_callbacks.borrow_mut().push(Box::new(callback));
            component.pending_patches.borrow_mut().push(patch.into());
            component.enqueue();
        }
    }

    pub fn update_state(&self, f: impl FnOnce(&StateMap, &Props) -> StateMap + 'static) {
        self.set_state(StatePatch::update(f));
    }

    /// Queues a re-render without changing state.
    pub fn request_render(&self) {
        if let Some(component) = self.component.upgrade() {
            component.enqueue();
        }
    }

    /// Queues a re-render that skips `should_update`.
    pub fn request_force_render(&self) {
        if let Some(component) = self.component.upgrade() {
            component.force.set(true);
            component.enqueue();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.component
            .upgrade()
            .is_some_and(|component| component.mounted.get())
    }

    pub fn handle(&self) -> Option<ComponentHandle> {
        self.component.upgrade().map(ComponentHandle)
    }
}
