//! Positional hook slots read and written during a render call.

use std::any::Any;
use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::component::{ComponentCell, ComponentHandle, Updater};
use crate::context::{ContextChannel, ContextMap, ProviderCell};
use crate::hash::hash_one;

/// Dependency list of an effect or memo, compared by hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deps(Option<u64>);

impl Deps {
    /// Re-run after every render.
    pub fn always() -> Self {
        Deps(None)
    }

    /// Run once after mount.
    pub fn once() -> Self {
        Deps(Some(hash_one(&())))
    }

    /// Re-run whenever `values` (usually a tuple) hashes differently.
    pub fn of<T: Hash + ?Sized>(values: &T) -> Self {
        Deps(Some(hash_one(values)))
    }

    fn changed(previous: Option<Deps>, next: Deps) -> bool {
        match (previous, next) {
            (None, _) | (_, Deps(None)) => true,
            (Some(Deps(previous)), Deps(next)) => previous != next,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EffectScope;

impl EffectScope {
    pub(crate) fn new() -> Self {
        EffectScope
    }

    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) -> EffectResult {
        EffectResult::new(cleanup)
    }
}

#[derive(Default)]
pub struct EffectResult {
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl EffectResult {
    pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub(crate) fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        self.cleanup
    }
}

type EffectFn = dyn FnOnce(EffectScope) -> EffectResult;

struct EffectSlot {
    layout: bool,
    deps: Option<Deps>,
    pending: Option<Box<EffectFn>>,
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl EffectSlot {
    fn new(layout: bool) -> Self {
        Self {
            layout,
            deps: None,
            pending: None,
            cleanup: None,
        }
    }
}

impl Drop for EffectSlot {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

struct MemoSlot<T> {
    deps: Deps,
    value: T,
}

#[derive(Default)]
struct ContextSlot {
    provider: Weak<ProviderCell>,
}

/// Hook storage of one component instance.
#[derive(Default)]
pub(crate) struct HookList {
    slots: Vec<Box<dyn Any>>,
    pending: Vec<usize>,
}

impl HookList {
    fn slot<T: 'static>(&mut self, index: usize, init: impl FnOnce() -> T) -> &mut T {
        let index = if index >= self.slots.len() {
            self.slots.push(Box::new(init()));
            self.slots.len() - 1
        } else {
            if !self.slots[index].is::<T>() {
                log::warn!(
                    "hook slot {index} changed type; replacing it with {}",
                    std::any::type_name::<T>()
                );
                self.slots[index] = Box::new(init());
            }
            index
        };
        match self.slots[index].downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("hook slot {index} holds a value of the requested type"),
        }
    }

    fn effect_mut(&mut self, index: usize) -> Option<&mut EffectSlot> {
        self.slots.get_mut(index)?.downcast_mut::<EffectSlot>()
    }

    fn queue(&mut self, index: usize) {
        if !self.pending.contains(&index) {
            self.pending.push(index);
        }
    }

    pub(crate) fn take_pending(&mut self, layout: bool) -> Vec<usize> {
        let (taken, kept): (Vec<usize>, Vec<usize>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|&index| {
                self.slots
                    .get(index)
                    .and_then(|slot| slot.downcast_ref::<EffectSlot>())
                    .is_some_and(|slot| slot.layout == layout)
            });
        self.pending = kept;
        taken
    }

    pub(crate) fn has_pending(&self, layout: bool) -> bool {
        self.pending.iter().any(|&index| {
            self.slots
                .get(index)
                .and_then(|slot| slot.downcast_ref::<EffectSlot>())
                .is_some_and(|slot| slot.layout == layout)
        })
    }

    pub(crate) fn take_cleanup(&mut self, index: usize) -> Option<Box<dyn FnOnce()>> {
        self.effect_mut(index)?.cleanup.take()
    }

    pub(crate) fn take_effect(&mut self, index: usize) -> Option<Box<EffectFn>> {
        self.effect_mut(index)?.pending.take()
    }

    pub(crate) fn store_cleanup(&mut self, index: usize, cleanup: Box<dyn FnOnce()>) {
        if let Some(slot) = self.effect_mut(index) {
            slot.cleanup = Some(cleanup);
        }
    }

    /// Every registered cleanup in slot order; queued effects are dropped.
    pub(crate) fn drain_cleanups(&mut self) -> Vec<Box<dyn FnOnce()>> {
        self.pending.clear();
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.downcast_mut::<EffectSlot>())
            .filter_map(|slot| {
                slot.pending = None;
                slot.cleanup.take()
            })
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

struct ReducerCell<S, A> {
    value: RefCell<S>,
    reducer: RefCell<Rc<dyn Fn(&S, A) -> S>>,
    owner: Weak<ComponentCell>,
}

impl<S: PartialEq, A> ReducerCell<S, A> {
    fn dispatch(&self, action: A) {
        let reducer = Rc::clone(&self.reducer.borrow());
        let next = reducer(&*self.value.borrow(), action);
        if *self.value.borrow() == next {
            return;
        }
        *self.value.borrow_mut() = next;
        if let Some(owner) = self.owner.upgrade() {
            owner.enqueue();
        }
    }
}

/// Stable handle that feeds actions to a reducer hook.
pub struct Dispatch<A>(Rc<dyn Fn(A)>);

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Dispatch(Rc::clone(&self.0))
    }
}

impl<A> Dispatch<A> {
    pub fn dispatch(&self, action: A) {
        (self.0)(action)
    }

    pub fn ptr_eq(a: &Dispatch<A>, b: &Dispatch<A>) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

struct ReducerSlot<S, A> {
    cell: Rc<ReducerCell<S, A>>,
    dispatch: Dispatch<A>,
}

/// Action of the reducer behind [`RenderContext::use_state`].
pub enum StateAction<T> {
    Set(T),
    Update(Box<dyn FnOnce(&T) -> T>),
}

fn apply_state_action<T: Clone>(current: &T, action: StateAction<T>) -> T {
    match action {
        StateAction::Set(value) => value,
        StateAction::Update(f) => f(current),
    }
}

/// Stable setter returned by [`RenderContext::use_state`].
pub struct Setter<T>(Dispatch<StateAction<T>>);

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Setter(self.0.clone())
    }
}

impl<T: 'static> Setter<T> {
    pub fn set(&self, value: T) {
        self.0.dispatch(StateAction::Set(value));
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T + 'static) {
        self.0.dispatch(StateAction::Update(Box::new(f)));
    }

    pub fn ptr_eq(a: &Setter<T>, b: &Setter<T>) -> bool {
        Dispatch::ptr_eq(&a.0, &b.0)
    }
}

/// Per-call render state handed to component render functions.
///
/// Hooks are identified by call order: the n-th hook call of every render
/// reads the n-th slot, so hooks must not be called conditionally.
pub struct RenderContext<'a> {
    hooks: &'a mut HookList,
    index: usize,
    component: &'a Rc<ComponentCell>,
    context: &'a ContextMap,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        hooks: &'a mut HookList,
        component: &'a Rc<ComponentCell>,
        context: &'a ContextMap,
    ) -> Self {
        Self {
            hooks,
            index: 0,
            component,
            context,
        }
    }

    fn next_index(&mut self) -> usize {
        let index = self.index;
        self.index += 1;
        index
    }

    pub fn component(&self) -> ComponentHandle {
        ComponentHandle(Rc::clone(self.component))
    }

    pub fn context(&self) -> &ContextMap {
        self.context
    }

    pub fn use_updater(&self) -> Updater {
        self.component.updater()
    }

    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> (S, Dispatch<A>)
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let index = self.next_index();
        let owner = Rc::downgrade(self.component);
        let reducer: Rc<dyn Fn(&S, A) -> S> = Rc::new(reducer);
        let slot = self.hooks.slot(index, || {
            let cell = Rc::new(ReducerCell {
                value: RefCell::new(init()),
                reducer: RefCell::new(Rc::clone(&reducer)),
                owner,
            });
            let weak = Rc::downgrade(&cell);
            let dispatch = Dispatch(Rc::new(move |action: A| {
                if let Some(cell) = weak.upgrade() {
                    cell.dispatch(action);
                }
            }));
            ReducerSlot { cell, dispatch }
        });
        *slot.cell.reducer.borrow_mut() = reducer;
        let value = slot.cell.value.borrow().clone();
        (value, slot.dispatch.clone())
    }

    pub fn use_state<T>(&mut self, init: impl FnOnce() -> T) -> (T, Setter<T>)
    where
        T: Clone + PartialEq + 'static,
    {
        let (value, dispatch) = self.use_reducer(apply_state_action::<T>, init);
        (value, Setter(dispatch))
    }

    fn register_effect(
        &mut self,
        layout: bool,
        deps: Deps,
        effect: impl FnOnce(EffectScope) -> EffectResult + 'static,
    ) {
        let index = self.next_index();
        let slot = self.hooks.slot(index, || EffectSlot::new(layout));
        if !Deps::changed(slot.deps, deps) {
            return;
        }
        slot.layout = layout;
        slot.deps = Some(deps);
        slot.pending = Some(Box::new(effect));
        self.hooks.queue(index);
    }

    /// Effect run after the output has been painted.
    pub fn use_effect(
        &mut self,
        deps: Deps,
        effect: impl FnOnce(EffectScope) -> EffectResult + 'static,
    ) {
        self.register_effect(false, deps, effect);
    }

    /// Effect run synchronously once the pass's output mutations are applied.
    pub fn use_layout_effect(
        &mut self,
        deps: Deps,
        effect: impl FnOnce(EffectScope) -> EffectResult + 'static,
    ) {
        self.register_effect(true, deps, effect);
    }

    pub fn use_memo<T: Clone + 'static>(&mut self, deps: Deps, compute: impl FnOnce() -> T) -> T {
        let index = self.next_index();
        let slot = self.hooks.slot(index, || None::<MemoSlot<T>>);
        if let Some(memo) = slot.as_ref().filter(|memo| !Deps::changed(Some(memo.deps), deps)) {
            return memo.value.clone();
        }
        let value = compute();
        *slot = Some(MemoSlot {
            deps,
            value: value.clone(),
        });
        value
    }

    pub fn use_callback<F: Clone + 'static>(&mut self, deps: Deps, callback: F) -> F {
        self.use_memo(deps, move || callback)
    }

    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        let index = self.next_index();
        let slot = self.hooks.slot(index, || Rc::new(RefCell::new(init())));
        Rc::clone(slot)
    }

    /// Reads `channel` and subscribes to the nearest provider so a change of
    /// its value re-renders this component.
    pub fn use_context<T: Clone + 'static>(&mut self, channel: &ContextChannel<T>) -> T {
        let index = self.next_index();
        let provider = self.context.provider(channel.id());
        let slot = self.hooks.slot(index, ContextSlot::default);
        if let Some(provider) = provider {
            let weak = Rc::downgrade(&provider);
            if !slot.provider.ptr_eq(&weak) {
                provider.subscribe(self.component);
                slot.provider = weak;
            }
        }
        self.context.get(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentType;
    use crate::runtime::Runtime;
    use crate::vnode::{Props, VNode};
    use std::cell::Cell;

    fn instance(runtime: &Runtime) -> Rc<ComponentCell> {
        let ty = ComponentType::function(|_cx, _props| Ok(VNode::empty()));
        let vnode = VNode::component(&ty, Props::new());
        let cell = ComponentCell::create(&ty, &vnode, &ContextMap::new(), None, &runtime.handle());
        cell.dirty.set(false);
        cell
    }

    fn with_cx<R>(
        cell: &Rc<ComponentCell>,
        hooks: &mut HookList,
        f: impl FnOnce(&mut RenderContext<'_>) -> R,
    ) -> R {
        let context = ContextMap::new();
        let mut cx = RenderContext::new(hooks, cell, &context);
        f(&mut cx)
    }

    #[test]
    fn deps_gate_reruns() {
        assert!(Deps::changed(None, Deps::once()));
        assert!(!Deps::changed(Some(Deps::once()), Deps::once()));
        assert!(Deps::changed(Some(Deps::always()), Deps::always()));
        assert!(Deps::changed(Some(Deps::of(&(1, 2))), Deps::of(&(1, 3))));
        assert!(!Deps::changed(Some(Deps::of(&(1, 2))), Deps::of(&(1, 2))));
    }

    #[test]
    fn state_slots_keep_values_and_setters() {
        let runtime = Runtime::default();
        let cell = instance(&runtime);
        let mut hooks = HookList::default();

        let (first, setter) = with_cx(&cell, &mut hooks, |cx| cx.use_state(|| 1));
        assert_eq!(first, 1);
        setter.set(5);
        assert!(cell.dirty.get());
        assert!(runtime.has_pending_renders());

        let (second, again) = with_cx(&cell, &mut hooks, |cx| cx.use_state(|| 100));
        assert_eq!(second, 5);
        assert!(Setter::ptr_eq(&setter, &again));
    }

    #[test]
    fn equal_dispatch_is_a_no_op() {
        let runtime = Runtime::default();
        let cell = instance(&runtime);
        let mut hooks = HookList::default();
        let (_, setter) = with_cx(&cell, &mut hooks, |cx| cx.use_state(|| 3));
        setter.update(|n| *n);
        assert!(!cell.dirty.get());
        assert!(!runtime.has_pending_renders());
    }

    #[test]
    fn memo_recomputes_on_dependency_change_only() {
        let runtime = Runtime::default();
        let cell = instance(&runtime);
        let mut hooks = HookList::default();
        let computed = Cell::new(0);
        let mut read = |dep: i32| {
            with_cx(&cell, &mut hooks, |cx| {
                cx.use_memo(Deps::of(&dep), || {
                    computed.set(computed.get() + 1);
                    dep * 2
                })
            })
        };
        assert_eq!(read(1), 2);
        assert_eq!(read(1), 2);
        assert_eq!(read(2), 4);
        assert_eq!(computed.get(), 2);
    }

    #[test]
    fn refs_are_stable() {
        let runtime = Runtime::default();
        let cell = instance(&runtime);
        let mut hooks = HookList::default();
        let a = with_cx(&cell, &mut hooks, |cx| cx.use_ref(|| 0));
        *a.borrow_mut() = 9;
        let b = with_cx(&cell, &mut hooks, |cx| cx.use_ref(|| 0));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(*b.borrow(), 9);
    }

    #[test]
    fn mismatched_slot_is_replaced() {
        let runtime = Runtime::default();
        let cell = instance(&runtime);
        let mut hooks = HookList::default();
        with_cx(&cell, &mut hooks, |cx| cx.use_ref(|| 1u8));
        let value = with_cx(&cell, &mut hooks, |cx| cx.use_memo(Deps::once(), || "fresh"));
        assert_eq!(value, "fresh");
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn effects_queue_by_kind_and_drain_cleanups_in_order() {
        let runtime = Runtime::default();
        let cell = instance(&runtime);
        let mut hooks = HookList::default();
        with_cx(&cell, &mut hooks, |cx| {
            cx.use_effect(Deps::once(), |scope| scope.on_cleanup(|| {}));
            cx.use_layout_effect(Deps::once(), |_| EffectResult::default());
        });
        assert!(hooks.has_pending(true));
        assert!(hooks.has_pending(false));
        assert_eq!(hooks.take_pending(true), vec![1]);
        assert_eq!(hooks.take_pending(false), vec![0]);

        let effect = hooks.take_effect(0).expect("deferred effect queued");
        let cleanup = effect(EffectScope::new()).into_cleanup().expect("cleanup returned");
        hooks.store_cleanup(0, cleanup);
        assert_eq!(hooks.drain_cleanups().len(), 1);
        assert!(hooks.drain_cleanups().is_empty());
    }
}
