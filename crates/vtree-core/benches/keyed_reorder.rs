use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vtree_core::{
    ComponentType, MemoryApplier, NodeId, Props, RenderContext, Renderer, VNode, Value,
};

const ROW_SAMPLES: &[usize] = &[16, 64, 256, 1024];

fn row() -> ComponentType {
    ComponentType::function(|_cx: &mut RenderContext<'_>, props: &Props| {
        let id = props.get("id").and_then(Value::as_int).unwrap_or_default();
        Ok(VNode::element("li")
            .attr("data-id", id)
            .child(format!("Row {id}")))
    })
}

fn list(row: &ComponentType, order: &[usize]) -> VNode {
    VNode::element("ul").children(
        order
            .iter()
            .map(|&id| VNode::component(row, Props::new().with("id", id)).keyed(&id))
            .collect::<Vec<_>>(),
    )
}

struct ListFixture {
    renderer: Renderer<MemoryApplier>,
    root: NodeId,
    row: ComponentType,
    forward: Vec<usize>,
    rotated: Vec<usize>,
}

impl ListFixture {
    fn new(rows: usize) -> Self {
        let mut applier = MemoryApplier::new();
        let root = applier.create_root();
        let forward: Vec<usize> = (0..rows).collect();
        let mut rotated = forward.clone();
        rotated.rotate_left(1);
        Self {
            renderer: Renderer::new(applier),
            root,
            row: row(),
            forward,
            rotated,
        }
    }

    fn render(&mut self, order: &[usize]) {
        let vnode = list(&self.row, order);
        self.renderer.render(vnode, self.root).expect("render");
    }
}

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_mount");
    for &rows in ROW_SAMPLES {
        group.bench_with_input(BenchmarkId::new("rows", rows), &rows, |b, &rows| {
            b.iter(|| {
                let mut fixture = ListFixture::new(rows);
                let order = fixture.forward.clone();
                fixture.render(&order);
                black_box(fixture.renderer.applier().len());
            });
        });
    }
    group.finish();
}

fn bench_rotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_rotate");
    for &rows in ROW_SAMPLES {
        group.bench_with_input(BenchmarkId::new("rows", rows), &rows, |b, &rows| {
            let mut fixture = ListFixture::new(rows);
            let forward = fixture.forward.clone();
            let rotated = fixture.rotated.clone();
            fixture.render(&forward);

            b.iter(|| {
                fixture.render(&rotated);
                fixture.render(&forward);
            });
        });
    }
    group.finish();
}

fn bench_reverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_reverse");
    for &rows in ROW_SAMPLES {
        group.bench_with_input(BenchmarkId::new("rows", rows), &rows, |b, &rows| {
            let mut fixture = ListFixture::new(rows);
            let forward = fixture.forward.clone();
            let reversed: Vec<usize> = forward.iter().rev().copied().collect();
            fixture.render(&forward);

            b.iter(|| {
                fixture.render(&reversed);
                fixture.render(&forward);
            });
        });
    }
    group.finish();
}

criterion_group!(keyed_reorder, bench_mount, bench_rotate, bench_reverse);
criterion_main!(keyed_reorder);
