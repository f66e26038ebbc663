use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vtree_core::{
    ComponentHandle, ComponentType, Deps, Dispatch, EffectResult, EffectTiming, MemoryApplier,
    Props, RenderContext, Renderer, RendererConfig, Setter, VNode, Value,
};
use vtree_testing::{run_test_render, TestRenderer};

type Log = Rc<RefCell<Vec<String>>>;

fn take(log: &Log) -> Vec<String> {
    log.take()
}

#[test]
fn instances_and_setters_stay_stable_across_renders() {
    let seen: Rc<RefCell<Vec<(ComponentHandle, Setter<i32>)>>> = Rc::default();
    let probe = ComponentType::function({
        let seen = Rc::clone(&seen);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            let (_, set) = cx.use_state(|| 0);
            seen.borrow_mut().push((cx.component(), set));
            Ok(VNode::empty())
        }
    });
    run_test_render(|t| {
        for label in ["a", "b", "c"] {
            t.render(VNode::element("div").child(VNode::component(
                &probe,
                Props::new().with("label", label),
            )))
            .expect("render");
        }
    });
    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    for (handle, setter) in seen.iter().skip(1) {
        assert!(ComponentHandle::ptr_eq(handle, &seen[0].0));
        assert!(Setter::ptr_eq(setter, &seen[0].1));
    }
}

#[test]
fn keyed_components_remount_on_key_change() {
    let handles: Rc<RefCell<Vec<ComponentHandle>>> = Rc::default();
    let probe = ComponentType::function({
        let handles = Rc::clone(&handles);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            handles.borrow_mut().push(cx.component());
            Ok(VNode::empty())
        }
    });
    run_test_render(|t| {
        t.render(VNode::component(&probe, Props::new()).keyed("a"))
            .expect("first");
        t.render(VNode::component(&probe, Props::new()).keyed("b"))
            .expect("second");
    });
    let handles = handles.borrow();
    assert!(!ComponentHandle::ptr_eq(&handles[0], &handles[1]));
    assert!(!handles[0].is_mounted());
    assert!(handles[1].is_mounted());
}

#[test]
fn synchronous_updates_batch_into_one_render() {
    let renders = Rc::new(Cell::new(0));
    let setter: Rc<RefCell<Option<Setter<i32>>>> = Rc::default();
    let counter = ComponentType::function({
        let renders = Rc::clone(&renders);
        let setter = Rc::clone(&setter);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            renders.set(renders.get() + 1);
            let (count, set_count) = cx.use_state(|| 0);
            setter.replace(Some(set_count));
            Ok(VNode::text(count.to_string()))
        }
    });

    let mut t = TestRenderer::new();
    t.render(VNode::component(&counter, Props::new()))
        .expect("render");
    assert_eq!(renders.get(), 1);

    let set = setter.borrow().clone().expect("setter captured");
    for _ in 0..3 {
        set.update(|n| n + 1);
    }
    assert_eq!(renders.get(), 1, "updates must not render synchronously");
    assert!(t.renderer().needs_flush());

    t.rerender().expect("flush");
    assert_eq!(renders.get(), 2);
    assert_eq!(t.html(), "3");
    assert!(!t.renderer().needs_flush());
}

#[test]
fn setting_an_equal_value_does_not_render() {
    let renders = Rc::new(Cell::new(0));
    let setter: Rc<RefCell<Option<Setter<&'static str>>>> = Rc::default();
    let comp = ComponentType::function({
        let renders = Rc::clone(&renders);
        let setter = Rc::clone(&setter);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            renders.set(renders.get() + 1);
            let (value, set) = cx.use_state(|| "same");
            setter.replace(Some(set));
            Ok(VNode::text(value))
        }
    });
    run_test_render(|t| {
        t.render(VNode::component(&comp, Props::new())).expect("render");
        setter.borrow().clone().expect("setter").set("same");
        t.rerender().expect("flush");
        assert_eq!(renders.get(), 1);
    });
}

fn effect_probe(log: &Log) -> ComponentType {
    let log = Rc::clone(log);
    ComponentType::function(move |cx: &mut RenderContext<'_>, props: &Props| {
        let value = props.get("value").and_then(Value::as_int).unwrap_or_default();
        let log = Rc::clone(&log);
        cx.use_effect(Deps::of(&value), move |scope| {
            log.borrow_mut().push(format!("effect {value}"));
            scope.on_cleanup(move || log.borrow_mut().push(format!("cleanup {value}")))
        });
        Ok(VNode::text(value.to_string()))
    })
}

#[test]
fn effects_rerun_only_when_dependencies_change() {
    let log: Log = Rc::default();
    let probe = effect_probe(&log);
    let mut t = TestRenderer::new();
    let render = |t: &mut TestRenderer, value: i64| {
        t.render(VNode::component(&probe, Props::new().with("value", value)))
            .expect("render");
    };

    render(&mut t, 1);
    assert_eq!(take(&log), ["effect 1"]);
    render(&mut t, 1);
    assert!(take(&log).is_empty());
    render(&mut t, 2);
    assert_eq!(take(&log), ["cleanup 1", "effect 2"]);

    t.render(VNode::empty()).expect("unmount");
    assert_eq!(take(&log), ["cleanup 2"]);
}

#[test]
fn layout_effects_run_at_commit_and_effects_after_paint() {
    let log: Log = Rc::default();
    let nested = |name: &'static str, log: &Log| {
        let log = Rc::clone(log);
        ComponentType::function(move |cx: &mut RenderContext<'_>, props: &Props| {
            let layout_log = Rc::clone(&log);
            cx.use_layout_effect(Deps::once(), move |_| {
                layout_log.borrow_mut().push(format!("{name} layout"));
                EffectResult::default()
            });
            let effect_log = Rc::clone(&log);
            cx.use_effect(Deps::once(), move |_| {
                effect_log.borrow_mut().push(format!("{name} effect"));
                EffectResult::default()
            });
            Ok(VNode::fragment(props.children().to_vec()))
        })
    };
    let child = nested("child", &log);
    let parent = nested("parent", &log).named("Parent");

    let mut applier = MemoryApplier::new();
    let root = applier.create_root();
    let mut renderer = Renderer::new(applier);
    renderer
        .render(
            VNode::component(
                &parent,
                Props::new().with_children(VNode::component(&child, Props::new())),
            ),
            root,
        )
        .expect("render");
    assert_eq!(take(&log), ["child layout", "parent layout"]);
    assert!(renderer.has_pending_effects());

    assert_eq!(renderer.flush_effects(), 2);
    assert_eq!(take(&log), ["child effect", "parent effect"]);
    assert!(!renderer.has_pending_effects());
}

#[test]
fn immediate_timing_runs_effects_inside_render() {
    let log: Log = Rc::default();
    let probe = effect_probe(&log);
    let mut applier = MemoryApplier::new();
    let root = applier.create_root();
    let mut renderer = Renderer::new(applier).with_config(RendererConfig {
        effect_timing: EffectTiming::Immediate,
    });
    renderer
        .render(VNode::component(&probe, Props::new().with("value", 5)), root)
        .expect("render");
    assert_eq!(take(&log), ["effect 5"]);
    assert!(!renderer.has_pending_effects());
}

#[test]
fn unmount_runs_every_cleanup_once() {
    let cleanups = Rc::new(Cell::new(0));
    let leaf = ComponentType::function({
        let cleanups = Rc::clone(&cleanups);
        move |cx: &mut RenderContext<'_>, _props: &Props| {
            for _ in 0..2 {
                let cleanups = Rc::clone(&cleanups);
                cx.use_effect(Deps::once(), move |scope| {
                    scope.on_cleanup(move || cleanups.set(cleanups.get() + 1))
                });
            }
            let cleanups = Rc::clone(&cleanups);
            cx.use_layout_effect(Deps::once(), move |scope| {
                scope.on_cleanup(move || cleanups.set(cleanups.get() + 1))
            });
            Ok(VNode::element("i"))
        }
    });

    run_test_render(|t| {
        t.render(VNode::element("div").child((
            VNode::component(&leaf, Props::new()),
            VNode::component(&leaf, Props::new()),
        )))
        .expect("render");
        assert_eq!(cleanups.get(), 0);

        let scratch = t.scratch();
        assert_eq!(t.renderer().unmount(scratch), Ok(true));
        assert_eq!(cleanups.get(), 6);
        t.rerender().expect("idle");
        assert_eq!(cleanups.get(), 6);
        assert_eq!(t.html(), "");
    });
}

#[test]
fn reducers_use_the_latest_reducer() {
    let dispatch: Rc<RefCell<Option<Dispatch<i32>>>> = Rc::default();
    let comp = ComponentType::function({
        let dispatch = Rc::clone(&dispatch);
        move |cx: &mut RenderContext<'_>, props: &Props| {
            let factor = props.get("factor").and_then(Value::as_int).unwrap_or(1);
            let (total, send) = cx.use_reducer(move |total: &i64, n: i32| total + factor * n as i64, || 0);
            dispatch.replace(Some(send));
            Ok(VNode::text(total.to_string()))
        }
    });
    run_test_render(|t| {
        t.render(VNode::component(&comp, Props::new().with("factor", 1)))
            .expect("render");
        let send = dispatch.borrow().clone().expect("dispatch");
        send.dispatch(2);
        t.rerender().expect("flush");
        assert_eq!(t.html(), "2");

        t.render(VNode::component(&comp, Props::new().with("factor", 10)))
            .expect("rerender");
        send.dispatch(1);
        t.rerender().expect("flush");
        assert_eq!(t.html(), "12");
    });
}

#[test]
fn memo_and_ref_survive_parent_renders() {
    let computed = Rc::new(Cell::new(0));
    let comp = ComponentType::function({
        let computed = Rc::clone(&computed);
        move |cx: &mut RenderContext<'_>, props: &Props| {
            let n = props.get("n").and_then(Value::as_int).unwrap_or_default();
            let doubled = cx.use_memo(Deps::of(&n), || {
                computed.set(computed.get() + 1);
                n * 2
            });
            let renders = cx.use_ref(|| 0);
            *renders.borrow_mut() += 1;
            Ok(VNode::text(format!("{doubled}/{}", renders.borrow())))
        }
    });
    run_test_render(|t| {
        for n in [1, 1, 2] {
            t.render(VNode::component(&comp, Props::new().with("n", n)))
                .expect("render");
        }
        assert_eq!(t.html(), "4/3");
        assert_eq!(computed.get(), 2);
    });
}

#[test]
fn state_set_during_an_effect_renders_again() {
    let comp = ComponentType::function(|cx: &mut RenderContext<'_>, _props: &Props| {
        let (ready, set_ready) = cx.use_state(|| false);
        cx.use_effect(Deps::once(), move |_| {
            set_ready.set(true);
            EffectResult::default()
        });
        Ok(VNode::text(if ready { "ready" } else { "loading" }))
    });
    let mut t = TestRenderer::new();
    let scratch = t.scratch();
    t.renderer()
        .render(VNode::component(&comp, Props::new()), scratch)
        .expect("render");
    assert_eq!(t.html(), "loading");
    t.rerender().expect("settle");
    assert_eq!(t.html(), "ready");
}
