//! Component rendering inside a reconciliation pass, error recovery and the
//! commit phase that follows it.

use std::any::Any;
use std::rc::Rc;

use crate::component::{
    ComponentCell, ComponentHandle, ComponentType, Recovery, RenderUnit, StateMap, StatePatch,
    View,
};
use crate::context::{ProviderCell, PROVIDER_VALUE};
use crate::diff::{Excess, Frame, Reconciler, Rendered, RenderedKind};
use crate::hooks::RenderContext;
use crate::options::Options;
use crate::runtime::RuntimeHandle;
use crate::vnode::{NodeKind, Props, RefTarget, VNode, Value};
use crate::RenderError;

/// Post-diff work for one component, run once the whole pass succeeded.
pub(crate) struct CommitTask {
    component: Rc<ComponentCell>,
    kind: CommitKind,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

enum CommitKind {
    Mounted,
    Updated {
        prev_props: Props,
        prev_state: StateMap,
        snapshot: Option<Value>,
    },
    /// `should_update` declined the render; only callbacks run.
    Skipped,
}

/// Runs layout effects, `did_mount`/`did_update` and state callbacks in the
/// order components finished diffing (children before parents), then queues
/// deferred effects for after paint.
pub(crate) fn run_commits(tasks: Vec<CommitTask>, runtime: &RuntimeHandle) {
    for task in tasks {
        let CommitTask {
            component,
            kind,
            callbacks,
        } = task;
        if !component.mounted.get() {
            continue;
        }
        let updater = component.updater();
        match &kind {
            CommitKind::Mounted => {
                component.run_effects(true);
                component.with_class(|class| class.did_mount(&updater));
            }
            CommitKind::Updated {
                prev_props,
                prev_state,
                snapshot,
            } => {
                component.run_effects(true);
                component.with_class(|class| {
                    class.did_update(prev_props, prev_state, snapshot.as_ref(), &updater)
                });
            }
            CommitKind::Skipped => {}
        }
        for callback in callbacks {
            callback();
        }
        if component.has_pending_effects(false) && !component.after_paint_queued.replace(true) {
            runtime.request_after_paint(Rc::downgrade(&component));
        }
    }
}

impl Reconciler<'_> {
    /// Diffs a component node; an unrecovered failure unmounts the instance
    /// along with whatever it had rendered.
    pub(crate) fn diff_component(
        &mut self,
        frame: Frame<'_>,
        new: &VNode,
        ty: &ComponentType,
        old: Option<Rendered>,
        excess: &mut Excess,
    ) -> Result<Rendered, RenderError> {
        let (instance, old_vnode) = match old {
            Some(Rendered {
                vnode,
                kind: RenderedKind::Component { instance },
            }) => (instance, Some(vnode)),
            _ => (
                ComponentCell::create(ty, new, frame.context, frame.ancestor, &self.runtime),
                None,
            ),
        };
        if let Err(error) = self.render_component(frame, &instance, new, excess) {
            self.discard(old_vnode, RenderedKind::Component { instance }, frame.ancestor);
            return Err(error);
        }
        Ok(Rendered {
            vnode: new.clone(),
            kind: RenderedKind::Component { instance },
        })
    }

    /// Renders one component against `vnode` and diffs its output. A render
    /// failure is offered to the enclosing error-recovering components and
    /// leaves the previous output in place.
    pub(crate) fn render_component(
        &mut self,
        frame: Frame<'_>,
        instance: &Rc<ComponentCell>,
        vnode: &VNode,
        excess: &mut Excess,
    ) -> Result<(), RenderError> {
        let NodeKind::Component(ty) = vnode.kind() else {
            return Ok(());
        };
        let is_new = !instance.rendered.get();
        let force = instance.force.replace(false);
        let was_processing = instance.processing_error.get();
        let was_dirty = instance.dirty.get();
        // a parent handing back the very same node has nothing new for us
        let same_vnode = VNode::ptr_eq(&instance.vnode.borrow(), vnode);
        instance.attach(frame.host, frame.namespace, vnode);
        let updater = instance.updater();
        let next_props = vnode.props().clone();

        if let Some(channel) = instance.with_class(|class| class.context_type()).flatten() {
            if let Some(provider) = frame.context.provider(channel) {
                provider.subscribe(instance);
            }
        }

        let current_props = instance.props.borrow().clone();
        let current_state = instance.state.borrow().clone();
        let current_context = instance.context.borrow().clone();
        let derives = instance
            .with_class(|class| class.derives_state())
            .unwrap_or(false);
        if !derives {
            if is_new {
                instance.with_class(|class| class.will_mount(&updater));
            } else if !force && !same_vnode {
                let current = View {
                    props: &current_props,
                    state: &current_state,
                    context: &current_context,
                };
                instance.with_class(|class| {
                    class.will_receive_props(&current, &next_props, frame.context, &updater)
                });
            }
        }

        let mut next_state = instance
            .staged_state
            .take()
            .unwrap_or_else(|| current_state.clone());
        let patches = std::mem::take(&mut *instance.pending_patches.borrow_mut());
        for patch in patches {
            next_state = patch.apply(next_state, &next_props);
        }
        if let Some(derived) = instance
            .with_class(|class| class.derive_state_from_props(&next_props, &next_state))
            .flatten()
        {
            next_state.merge(derived);
        }

        if !is_new && !force {
            let current = View {
                props: &current_props,
                state: &current_state,
                context: &current_context,
            };
            let next = View {
                props: &next_props,
                state: &next_state,
                context: frame.context,
            };
            let proceed = !(same_vnode && !was_dirty)
                && instance
                    .with_class(|class| class.should_update(&current, &next))
                    .unwrap_or(true);
            if !proceed {
                log::trace!("{} #{} declined update", instance.name, instance.id);
                *instance.props.borrow_mut() = next_props;
                *instance.state.borrow_mut() = next_state;
                *instance.context.borrow_mut() = frame.context.clone();
                instance.dirty.set(false);
                // a declined recovery render still ends the recovery
                if was_processing {
                    instance.processing_error.set(false);
                }
                self.push_commit(instance, CommitKind::Skipped);
                return Ok(());
            }
            instance.with_class(|class| class.will_update(&current, &next));
        }

        instance.dirty.set(false);
        // effects left over from the previous render run before the next one
        instance.run_effects(false);
        let options = self.options;
        Options::notify(&options.render, vnode);

        let mut hooks = instance.hooks.take();
        let result = {
            let mut cx = RenderContext::new(&mut hooks, instance, frame.context);
            match ty.unit() {
                RenderUnit::Function(render) => render(&mut cx, &next_props),
                RenderUnit::Class(_) => {
                    let view = View {
                        props: &next_props,
                        state: &next_state,
                        context: frame.context,
                    };
                    instance
                        .with_class(|class| class.render(&mut cx, &view))
                        .unwrap_or_else(|| Ok(VNode::empty()))
                }
                RenderUnit::Provider(_) => Ok(VNode::fragment(next_props.children().to_vec())),
            }
        };
        *instance.hooks.borrow_mut() = hooks;

        let output = match result {
            Ok(output) => output,
            Err(error) => {
                log::debug!("{} #{} failed to render: {error}", instance.name, instance.id);
                *instance.staged_state.borrow_mut() = Some(next_state);
                return self.catch_error(error, frame.ancestor);
            }
        };

        let prev_props = instance.props.replace(next_props.clone());
        let prev_state = instance.state.replace(next_state.clone());
        *instance.context.borrow_mut() = frame.context.clone();
        instance.rendered.set(true);
        let snapshot = if is_new {
            None
        } else {
            instance
                .with_class(|class| class.snapshot_before_update(&prev_props, &prev_state))
                .flatten()
        };

        // readers of a changed provider value; the subtree diff renders the
        // ones it reaches and the rest are queued afterwards
        let mut stale_readers = Vec::new();
        let child_context = match ty.unit() {
            RenderUnit::Provider(def) => {
                let value: Rc<dyn Any> = match next_props.get(PROVIDER_VALUE) {
                    Some(Value::Any(value)) => Rc::clone(value),
                    _ => Rc::new(()),
                };
                let existing = instance.provider.borrow().clone();
                let cell = match existing {
                    Some(cell) => {
                        stale_readers = cell
                            .update(value, def.same)
                            .into_iter()
                            .filter(|reader| reader.mark_dirty())
                            .collect();
                        cell
                    }
                    None => {
                        let cell = ProviderCell::new(value);
                        *instance.provider.borrow_mut() = Some(Rc::clone(&cell));
                        cell
                    }
                };
                frame.context.with_provider(def.channel, cell)
            }
            RenderUnit::Class(_) => {
                let view = View {
                    props: &next_props,
                    state: &next_state,
                    context: frame.context,
                };
                let provided = instance
                    .with_class(|class| class.child_context(&view))
                    .unwrap_or_default();
                frame.context.merged(provided)
            }
            RenderUnit::Function(_) => frame.context.clone(),
        };

        let old_subtree = instance.subtree.borrow_mut().take();
        let child_frame = Frame {
            context: &child_context,
            ancestor: Some(instance),
            ..frame
        };
        let subtree = self.diff(child_frame, &output, old_subtree, excess);
        for reader in stale_readers {
            reader.enqueue_marked();
        }
        *instance.subtree.borrow_mut() = Some(subtree?);

        if let Some(node_ref) = vnode.node_ref() {
            let target = RefTarget::Component(ComponentHandle(Rc::clone(instance)));
            self.apply_ref(node_ref, Some(target), frame.ancestor)?;
        }
        if was_processing {
            instance.processing_error.set(false);
        }

        let kind = if is_new {
            CommitKind::Mounted
        } else {
            CommitKind::Updated {
                prev_props,
                prev_state,
                snapshot,
            }
        };
        self.push_commit(instance, kind);
        Ok(())
    }

    fn push_commit(&mut self, instance: &Rc<ComponentCell>, kind: CommitKind) {
        let callbacks = std::mem::take(&mut *instance.render_callbacks.borrow_mut());
        self.commits.push(CommitTask {
            component: Rc::clone(instance),
            kind,
            callbacks,
        });
    }

    /// Offers a thrown error to each enclosing component in turn, nearest
    /// first. Components already recovering from an error, and output tree
    /// failures, are passed over.
    pub(crate) fn catch_error(
        &mut self,
        error: RenderError,
        ancestor: Option<&Rc<ComponentCell>>,
    ) -> Result<(), RenderError> {
        if let RenderError::Node(_) = error {
            return Err(error);
        }
        let mut cursor = ancestor.cloned();
        while let Some(component) = cursor {
            if component.mounted.get() && !component.processing_error.get() {
                let updater = component.updater();
                let recovery = component
                    .with_class(|class| class.recover(&error, &updater))
                    .flatten();
                match recovery {
                    Some(Recovery::Patch(state)) => {
                        component
                            .pending_patches
                            .borrow_mut()
                            .push(StatePatch::Values(state));
                        recovering(&component, &error);
                        return Ok(());
                    }
                    Some(Recovery::Handled) => {
                        recovering(&component, &error);
                        return Ok(());
                    }
                    Some(Recovery::Rethrow) | None => {}
                }
            }
            cursor = component.ancestor.upgrade();
        }
        Err(error)
    }
}

fn recovering(component: &Rc<ComponentCell>, error: &RenderError) {
    log::debug!(
        "{} #{} recovering from: {error}",
        component.name,
        component.id
    );
    component.processing_error.set(true);
    component.enqueue();
}
