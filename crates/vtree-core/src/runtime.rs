use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::component::ComponentCell;
use crate::platform::RuntimeScheduler;

/// Render queue entry. The heap yields the shallowest component first and
/// components of equal depth in the order they were queued.
struct QueuedRender {
    depth: usize,
    seq: u64,
    component: Weak<ComponentCell>,
}

impl QueuedRender {
    fn rank(&self) -> (usize, u64) {
        (self.depth, self.seq)
    }
}

impl PartialEq for QueuedRender {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for QueuedRender {}

impl PartialOrd for QueuedRender {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRender {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    needs_flush: Cell<bool>,
    flushing: Cell<bool>,
    render_queue: RefCell<BinaryHeap<QueuedRender>>,
    next_seq: Cell<u64>,
    after_paint: RefCell<Vec<Weak<ComponentCell>>>,
    next_component_id: Cell<usize>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            scheduler,
            needs_flush: Cell::new(false),
            flushing: Cell::new(false),
            render_queue: RefCell::new(BinaryHeap::new()),
            next_seq: Cell::new(0),
            after_paint: RefCell::new(Vec::new()),
            next_component_id: Cell::new(1),
        }
    }

    fn enqueue_render(&self, component: Weak<ComponentCell>) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let entry = QueuedRender {
            depth: depth_of(&component),
            seq,
            component,
        };
        let was_empty = {
            let mut queue = self.render_queue.borrow_mut();
            queue.push(entry);
            queue.len() == 1
        };
        // a running flush drains re-entrant enqueues itself
        if was_empty && !self.flushing.get() {
            self.needs_flush.set(true);
            self.scheduler.schedule_flush();
        }
    }

    fn pop_render(&self) -> Option<Rc<ComponentCell>> {
        let mut queue = self.render_queue.borrow_mut();
        loop {
            if let Some(component) = queue.pop()?.component.upgrade() {
                return Some(component);
            }
        }
    }

    fn end_flush(&self) {
        self.flushing.set(false);
        let pending = !self.render_queue.borrow().is_empty();
        self.needs_flush.set(pending);
        if pending {
            // left behind by a failed flush; later enqueues will not ask again
            self.scheduler.schedule_flush();
        }
    }

    fn request_after_paint(&self, component: Weak<ComponentCell>) {
        let was_empty = {
            let mut queue = self.after_paint.borrow_mut();
            queue.push(component);
            queue.len() == 1
        };
        if was_empty {
            self.scheduler.schedule_after_paint();
        }
    }
}

fn depth_of(component: &Weak<ComponentCell>) -> usize {
    component.upgrade().map_or(0, |c| c.depth())
}

/// Owns the render queue and after-paint queue shared by every component of
/// a renderer.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    /// Whether a flush has been requested and not yet run.
    pub fn needs_flush(&self) -> bool {
        self.inner.needs_flush.get()
    }

    pub fn has_pending_renders(&self) -> bool {
        !self.inner.render_queue.borrow().is_empty()
    }

    pub fn has_pending_effects(&self) -> bool {
        !self.inner.after_paint.borrow().is_empty()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Arc::new(DefaultScheduler))
    }
}

/// Scheduler that leaves flushing entirely to explicit host calls.
#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_flush(&self) {}

    fn schedule_after_paint(&self) {}
}

/// Weak handle components keep to reach their runtime.
#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    pub(crate) fn enqueue_render(&self, component: Weak<ComponentCell>) {
        if let Some(inner) = self.0.upgrade() {
            inner.enqueue_render(component);
        }
    }

    pub(crate) fn pop_render(&self) -> Option<Rc<ComponentCell>> {
        self.0.upgrade().and_then(|inner| inner.pop_render())
    }

    pub(crate) fn begin_flush(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.flushing.set(true);
        }
    }

    pub(crate) fn end_flush(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.end_flush();
        }
    }

    pub(crate) fn request_after_paint(&self, component: Weak<ComponentCell>) {
        if let Some(inner) = self.0.upgrade() {
            inner.request_after_paint(component);
        }
    }

    pub(crate) fn take_after_paint(&self) -> Vec<Weak<ComponentCell>> {
        self.0
            .upgrade()
            .map(|inner| std::mem::take(&mut *inner.after_paint.borrow_mut()))
            .unwrap_or_default()
    }

    pub(crate) fn next_component_id(&self) -> usize {
        self.0.upgrade().map_or(0, |inner| {
            let id = inner.next_component_id.get();
            inner.next_component_id.set(id + 1);
            id
        })
    }

    pub fn needs_flush(&self) -> bool {
        self.0.upgrade().is_some_and(|inner| inner.needs_flush.get())
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingScheduler {
        flushes: AtomicUsize,
        paints: AtomicUsize,
    }

    impl RuntimeScheduler for CountingScheduler {
        fn schedule_flush(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }

        fn schedule_after_paint(&self) {
            self.paints.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn only_the_first_enqueue_requests_a_flush() {
        let scheduler = Arc::new(CountingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let handle = runtime.handle();

        handle.enqueue_render(Weak::new());
        handle.enqueue_render(Weak::new());
        assert_eq!(scheduler.flushes.load(Ordering::SeqCst), 1);
        assert!(runtime.needs_flush());

        // dead entries are dropped while popping
        assert!(handle.pop_render().is_none());
        handle.end_flush();
        assert!(!runtime.needs_flush());
        assert!(!runtime.has_pending_renders());
    }

    #[test]
    fn enqueues_during_a_flush_do_not_reschedule() {
        let scheduler = Arc::new(CountingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let handle = runtime.handle();

        handle.begin_flush();
        handle.enqueue_render(Weak::new());
        assert_eq!(scheduler.flushes.load(Ordering::SeqCst), 0);
        handle.end_flush();
        assert!(runtime.needs_flush());
        // work left over when the flush ends is requested again
        assert_eq!(scheduler.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_yields_shallowest_first_then_in_queue_order() {
        let mut queue = BinaryHeap::new();
        for (seq, depth) in [2, 0, 1, 0].into_iter().enumerate() {
            queue.push(QueuedRender {
                depth,
                seq: seq as u64,
                component: Weak::new(),
            });
        }
        let order: Vec<(usize, u64)> =
            std::iter::from_fn(|| queue.pop().map(|entry| entry.rank())).collect();
        assert_eq!(order, [(0, 1), (0, 3), (1, 2), (2, 0)]);
    }

    #[test]
    fn after_paint_requests_are_batched() {
        let scheduler = Arc::new(CountingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let handle = runtime.handle();

        handle.request_after_paint(Weak::new());
        handle.request_after_paint(Weak::new());
        assert_eq!(scheduler.paints.load(Ordering::SeqCst), 1);
        assert!(runtime.has_pending_effects());
        assert_eq!(handle.take_after_paint().len(), 2);
        assert!(!runtime.has_pending_effects());
    }

    #[test]
    fn handle_outlived_by_nothing_is_inert() {
        let handle = Runtime::default().handle();
        assert!(!handle.is_alive());
        handle.enqueue_render(Weak::new());
        assert!(!handle.needs_flush());
        assert_eq!(handle.next_component_id(), 0);
    }
}
