//! Host-supplied allocator callbacks.
//!
//! The host learns about every slot (re)allocation through `on_create` —
//! typically to build views or bind groups over the new resource — and
//! about every release through `on_destroy`. `on_create` may fail, which is
//! fatal to that tick's connection; `on_destroy` cannot fail.

/// Callback pair invoked around slot resource lifetime events.
pub struct SlotHooks<R> {
    on_create: Box<dyn FnMut(usize, &R) -> bool + Send>,
    on_destroy: Box<dyn FnMut(usize) + Send>,
}

impl<R> SlotHooks<R> {
    pub fn new(
        on_create: impl FnMut(usize, &R) -> bool + Send + 'static,
        on_destroy: impl FnMut(usize) + Send + 'static,
    ) -> Self {
        Self {
            on_create: Box::new(on_create),
            on_destroy: Box::new(on_destroy),
        }
    }

    /// Hooks that accept every slot and do nothing.
    pub fn noop() -> Self {
        Self::new(|_, _| true, |_| {})
    }

    pub(crate) fn create(&mut self, index: usize, resource: &R) -> bool {
        (self.on_create)(index, resource)
    }

    pub(crate) fn destroy(&mut self, index: usize) {
        (self.on_destroy)(index)
    }
}

impl<R> Default for SlotHooks<R> {
    fn default() -> Self {
        Self::noop()
    }
}
