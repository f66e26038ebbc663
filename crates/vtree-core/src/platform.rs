//! Platform abstraction for render scheduling.
//!
//! The engine never decides *when* a batched flush or the after-paint effect
//! pass happens; it only tells the host that one is wanted. Hosts answer by
//! calling [`Renderer::flush`](crate::Renderer::flush) and
//! [`Renderer::flush_effects`](crate::Renderer::flush_effects) at their
//! microtask and paint boundaries respectively.

/// Scheduling policy injected into the runtime.
///
/// Implementations must be safe to use from multiple threads so a host event
/// loop can observe requests made on the render thread.
pub trait RuntimeScheduler: Send + Sync {
    /// Request a flush of the pending render queue.
    fn schedule_flush(&self);

    /// Request a pass over deferred effects once the output has been painted.
    fn schedule_after_paint(&self);
}
