use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vtree_core::{
    create_context, ComponentType, Deps, EffectResult, MemoryApplier, NodeId, Props,
    RenderContext, RenderError, Renderer, Runtime, RuntimeScheduler, Setter, VNode,
};
use vtree_testing::TestRenderer;

type Log = Rc<RefCell<Vec<String>>>;
type SetterSlot = Rc<RefCell<Option<Setter<i64>>>>;

#[derive(Default)]
struct CountingScheduler {
    flushes: AtomicUsize,
}

impl CountingScheduler {
    fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl RuntimeScheduler for CountingScheduler {
    fn schedule_flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule_after_paint(&self) {}
}

fn counting_renderer() -> (Renderer<MemoryApplier>, NodeId, Arc<CountingScheduler>) {
    let scheduler = Arc::new(CountingScheduler::default());
    let mut applier = MemoryApplier::new();
    let root = applier.create_root();
    let renderer = Renderer::with_runtime(applier, Runtime::new(scheduler.clone()));
    (renderer, root, scheduler)
}

fn html(renderer: &Renderer<MemoryApplier>, root: NodeId) -> String {
    renderer.applier().inner_html(root).expect("root exists")
}

fn set(slot: &SetterSlot, value: i64) {
    slot.borrow().as_ref().expect("setter captured").set(value);
}

/// Logs `"{name} {count}"` per render, followed by its children.
fn counter(name: &'static str, log: &Log, slot: &SetterSlot) -> ComponentType {
    let log = Rc::clone(log);
    let slot = Rc::clone(slot);
    ComponentType::function(move |cx: &mut RenderContext<'_>, props: &Props| {
        let (count, set_count) = cx.use_state(|| 0i64);
        slot.replace(Some(set_count));
        log.borrow_mut().push(format!("{name} {count}"));
        let effect_log = Rc::clone(&log);
        cx.use_effect(Deps::of(&count), move |_| {
            effect_log.borrow_mut().push(format!("{name} effect {count}"));
            EffectResult::default()
        });
        Ok(VNode::fragment((
            VNode::text(format!("{name}:{count};")),
            VNode::fragment(props.children().to_vec()),
        )))
    })
}

#[test]
fn a_dirty_parent_renders_before_its_dirty_child_and_the_child_once() {
    let log: Log = Rc::default();
    let (parent_set, child_set): (SetterSlot, SetterSlot) = Default::default();
    let parent = counter("parent", &log, &parent_set);
    let child = counter("child", &log, &child_set);
    let (mut renderer, root, _) = counting_renderer();
    renderer
        .render(
            VNode::component(
                &parent,
                Props::new().with_children(VNode::component(&child, Props::new())),
            ),
            root,
        )
        .expect("mount");
    renderer.flush_effects();
    log.take();

    set(&child_set, 1);
    set(&parent_set, 1);
    assert_eq!(renderer.flush(), Ok(1));
    assert_eq!(log.take(), ["parent 1", "child 1"]);
    assert_eq!(html(&renderer, root), "parent:1;child:1;");
}

#[test]
fn a_component_unmounted_while_queued_is_dropped() {
    let log: Log = Rc::default();
    let (parent_set, child_set): (SetterSlot, SetterSlot) = Default::default();
    let parent = counter("parent", &log, &parent_set);
    let child = counter("child", &log, &child_set);
    let tree = |show: bool| {
        let children = if show {
            VNode::component(&child, Props::new())
        } else {
            VNode::empty()
        };
        VNode::component(&parent, Props::new().with_children(children))
    };

    let mut t = TestRenderer::new();
    t.render(tree(true)).expect("mount");
    assert_eq!(
        log.take(),
        ["parent 0", "child 0", "child effect 0", "parent effect 0"]
    );

    set(&child_set, 1);
    let scratch = t.scratch();
    t.renderer().render(tree(false), scratch).expect("hide");
    t.rerender().expect("settle");
    assert_eq!(log.take(), ["parent 0"]);
    assert_eq!(t.html(), "parent:0;");
    assert!(!t.renderer().needs_flush());
}

#[test]
fn renders_queued_during_a_flush_run_in_that_flush() {
    let log: Log = Rc::default();
    let (source_set, target_set): (SetterSlot, SetterSlot) = Default::default();
    let target = counter("target", &log, &target_set);
    let source = ComponentType::function({
        let log = Rc::clone(&log);
        let source_set = Rc::clone(&source_set);
        let target_set = Rc::clone(&target_set);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            let (count, set_count) = cx.use_state(|| 0i64);
            source_set.replace(Some(set_count));
            log.borrow_mut().push(format!("source {count}"));
            if count > 0 {
                set(&target_set, count);
            }
            Ok(VNode::text(format!("source:{count};")))
        }
    });
    let (mut renderer, root, scheduler) = counting_renderer();
    renderer
        .render(
            VNode::fragment((
                VNode::component(&source, Props::new()),
                VNode::component(&target, Props::new()),
            )),
            root,
        )
        .expect("mount");
    renderer.flush_effects();
    log.take();

    set(&source_set, 1);
    assert_eq!(scheduler.flushes(), 1);
    assert_eq!(renderer.flush(), Ok(2));
    assert_eq!(log.take(), ["source 1", "target 1"]);
    assert_eq!(html(&renderer, root), "source:1;target:1;");
    assert!(!renderer.needs_flush());
    assert_eq!(scheduler.flushes(), 1);
}

#[test]
fn a_failed_flush_requests_another_for_the_work_left_behind() {
    let log: Log = Rc::default();
    let (fragile_set, b_set, c_set): (SetterSlot, SetterSlot, SetterSlot) = Default::default();
    let fragile = ComponentType::function({
        let fragile_set = Rc::clone(&fragile_set);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            let (count, set_count) = cx.use_state(|| 0i64);
            fragile_set.replace(Some(set_count));
            if count > 0 {
                return Err(RenderError::thrown("fragile"));
            }
            Ok(VNode::text("fragile;"))
        }
    });
    let b = counter("b", &log, &b_set);
    let c = counter("c", &log, &c_set);
    let (mut renderer, root, scheduler) = counting_renderer();
    renderer
        .render(
            VNode::fragment((
                VNode::component(&fragile, Props::new()),
                VNode::component(&b, Props::new()),
                VNode::component(&c, Props::new()),
            )),
            root,
        )
        .expect("mount");
    renderer.flush_effects();
    log.take();

    set(&fragile_set, 1);
    set(&b_set, 1);
    assert_eq!(scheduler.flushes(), 1);
    assert_eq!(renderer.flush(), Err(RenderError::thrown("fragile")));
    assert!(renderer.needs_flush());
    assert_eq!(scheduler.flushes(), 2);

    set(&c_set, 1);
    assert_eq!(renderer.flush(), Ok(2));
    assert_eq!(log.take(), ["b 1", "c 1"]);
    assert_eq!(html(&renderer, root), "fragile;b:1;c:1;");
    assert!(!renderer.needs_flush());
}

#[test]
fn readers_rendered_by_their_provider_need_no_flush() {
    let log: Log = Rc::default();
    let theme = create_context("light".to_string());
    let reader = ComponentType::function({
        let log = Rc::clone(&log);
        let theme = theme.clone();
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            let value = cx.use_context(&theme);
            log.borrow_mut().push(format!("reader {value}"));
            Ok(VNode::text(value))
        }
    });
    let tree = |value: &str| theme.provide(value.to_string(), VNode::component(&reader, Props::new()));
    let (mut renderer, root, scheduler) = counting_renderer();

    renderer.render(tree("red"), root).expect("mount");
    renderer.render(tree("blue"), root).expect("update");
    assert_eq!(log.take(), ["reader red", "reader blue"]);
    assert_eq!(html(&renderer, root), "blue");
    assert!(!renderer.needs_flush());
    assert_eq!(scheduler.flushes(), 0);
}
