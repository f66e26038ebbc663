//! Context channels: values provided by an ancestor and read by descendants.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collections::map::HashMap;
use crate::component::{ComponentCell, ComponentType};
use crate::vnode::{IntoChildren, Props, VNode, Value};

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Attribute name a provider stores its value under.
pub(crate) const PROVIDER_VALUE: &str = "value";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Static description of a provider component for one channel.
pub(crate) struct ProviderDef {
    pub(crate) channel: ContextId,
    pub(crate) same: fn(&dyn Any, &dyn Any) -> bool,
}

/// Live value of one mounted provider plus the components reading it.
pub(crate) struct ProviderCell {
    value: RefCell<Rc<dyn Any>>,
    subscribers: RefCell<Vec<Weak<ComponentCell>>>,
}

impl ProviderCell {
    pub(crate) fn new(value: Rc<dyn Any>) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            subscribers: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn value(&self) -> Rc<dyn Any> {
        Rc::clone(&self.value.borrow())
    }

    pub(crate) fn subscribe(&self, component: &Rc<ComponentCell>) {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.retain(|weak| weak.strong_count() > 0);
        let weak = Rc::downgrade(component);
        if !subscribers.iter().any(|existing| existing.ptr_eq(&weak)) {
            subscribers.push(weak);
        }
    }

    /// Stores `next`; returns the live subscribers when the value changed.
    pub(crate) fn update(
        &self,
        next: Rc<dyn Any>,
        same: fn(&dyn Any, &dyn Any) -> bool,
    ) -> Vec<Rc<ComponentCell>> {
        let unchanged = same(&**self.value.borrow(), &*next);
        *self.value.borrow_mut() = next;
        if unchanged {
            return Vec::new();
        }
        self.subscribers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[derive(Clone)]
enum ContextEntry {
    Provider(Rc<ProviderCell>),
    Value(Rc<dyn Any>),
}

impl ContextEntry {
    fn value(&self) -> Rc<dyn Any> {
        match self {
            ContextEntry::Provider(cell) => cell.value(),
            ContextEntry::Value(value) => Rc::clone(value),
        }
    }
}

/// Context inherited by a subtree. Cloning is cheap; extending copies.
#[derive(Clone, Default)]
pub struct ContextMap {
    entries: Rc<HashMap<ContextId, ContextEntry>>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `channel` as provided by the nearest ancestor, or the
    /// channel's default.
    pub fn get<T: Clone + 'static>(&self, channel: &ContextChannel<T>) -> T {
        self.entries
            .get(&channel.id)
            .and_then(|entry| entry.value().downcast::<T>().ok())
            .map_or_else(|| channel.default_value(), |value| (*value).clone())
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn provider(&self, id: ContextId) -> Option<Rc<ProviderCell>> {
        match self.entries.get(&id) {
            Some(ContextEntry::Provider(cell)) => Some(Rc::clone(cell)),
            _ => None,
        }
    }

    pub(crate) fn with_provider(&self, id: ContextId, cell: Rc<ProviderCell>) -> ContextMap {
        let mut entries = (*self.entries).clone();
        entries.insert(id, ContextEntry::Provider(cell));
        ContextMap {
            entries: Rc::new(entries),
        }
    }

    pub(crate) fn merged(&self, values: Vec<ProvidedValue>) -> ContextMap {
        if values.is_empty() {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        for provided in values {
            entries.insert(provided.id, ContextEntry::Value(provided.value));
        }
        ContextMap {
            entries: Rc::new(entries),
        }
    }
}

impl fmt::Debug for ContextMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// A value a class component exposes to its descendants.
pub struct ProvidedValue {
    id: ContextId,
    value: Rc<dyn Any>,
}

/// Typed handle to one context channel.
pub struct ContextChannel<T> {
    id: ContextId,
    default: Rc<T>,
    provider: ComponentType,
}

impl<T> Clone for ContextChannel<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
            provider: self.provider.clone(),
        }
    }
}

fn same_value<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Creates a new channel whose readers see `default` when no provider is
/// mounted above them.
pub fn create_context<T: Clone + PartialEq + 'static>(default: T) -> ContextChannel<T> {
    let id = ContextId::next();
    ContextChannel {
        id,
        default: Rc::new(default),
        provider: ComponentType::provider(ProviderDef {
            channel: id,
            same: same_value::<T>,
        }),
    }
}

impl<T: Clone + 'static> ContextChannel<T> {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn default_value(&self) -> T {
        (*self.default).clone()
    }

    /// Provider node exposing `value` to everything rendered in `children`.
    pub fn provide(&self, value: T, children: impl IntoChildren) -> VNode {
        VNode::component(
            &self.provider,
            Props::new()
                .with(PROVIDER_VALUE, Value::any(value))
                .with_children(children),
        )
    }

    /// Entry for a class component's `child_context` list.
    pub fn value(&self, value: T) -> ProvidedValue {
        ProvidedValue {
            id: self.id,
            value: Rc::new(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_fall_back_to_default() {
        let theme = create_context("light".to_string());
        let map = ContextMap::new();
        assert_eq!(map.get(&theme), "light");
        assert!(!map.contains(theme.id()));
    }

    #[test]
    fn merged_values_shadow_without_touching_parent() {
        let theme = create_context(0u8);
        let parent = ContextMap::new().merged(vec![theme.value(1)]);
        let child = parent.merged(vec![theme.value(2)]);
        assert_eq!(parent.get(&theme), 1);
        assert_eq!(child.get(&theme), 2);
    }

    #[test]
    fn provider_update_reports_changes_only() {
        let cell = ProviderCell::new(Rc::new(1u32));
        assert!(cell.update(Rc::new(1u32), same_value::<u32>).is_empty());
        assert_eq!(cell.subscriber_count(), 0);
        let map = ContextMap::new().with_provider(ContextId(usize::MAX), Rc::clone(&cell));
        assert!(map.provider(ContextId(usize::MAX)).is_some());
    }

    #[test]
    fn channels_get_distinct_ids() {
        let a = create_context(());
        let b = create_context(());
        assert_ne!(a.id(), b.id());
    }
}
