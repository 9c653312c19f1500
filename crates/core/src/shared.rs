use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use vtest_renderer::{FenceSink, Renderer};

use crate::context::Context;

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Upper bound on `length_dw * 4` for any command.
    pub max_length: u32,
    /// Whether the server is running in multi-client mode (rejects
    /// protocol versions `< 3`).
    pub multi_client: bool,
    /// Whether shared memory is available on this host (forces a
    /// downgrade to protocol 0 when false).
    pub shm_available: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            max_length: u32::MAX,
            multi_client: false,
            shm_available: true,
        }
    }
}

/// The process-wide state every connection's handlers and every renderer
/// callback reach through the same coarse mutex, held across both handler
/// execution and callback bodies.
pub struct SharedState {
    pub(crate) contexts: HashMap<u32, Context>,
    pub(crate) ctx_ids: vtest_registry::IdAllocator,
    pub(crate) resource_ids: vtest_registry::IdAllocator,
    pub(crate) sync_ids: vtest_sync::IdAllocator,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) implicit: vtest_renderer::ImplicitFenceCounter,
    pub(crate) config: CoreConfig,
}

/// A cloneable handle to the shared dispatcher state, passed to every
/// connection thread and registered with the renderer as its fence sink.
#[derive(Clone)]
pub struct Core(Arc<Mutex<SharedState>>);

impl Core {
    /// Builds a fresh core around `renderer` with the given configuration.
    /// Does not register itself as the renderer's fence sink; callers do
    /// that once at startup via [`Renderer::set_fence_sink`].
    pub fn new(renderer: Arc<dyn Renderer>, config: CoreConfig) -> Self {
        Core(Arc::new(Mutex::new(SharedState {
            contexts: HashMap::new(),
            ctx_ids: vtest_registry::IdAllocator::default(),
            resource_ids: vtest_registry::IdAllocator::default(),
            sync_ids: vtest_sync::IdAllocator::default(),
            renderer,
            implicit: vtest_renderer::ImplicitFenceCounter::new(),
            config,
        })))
    }

    /// Allocates a fresh context id and inserts its (uninitialized) state.
    pub fn accept_context(&self) -> u32 {
        let mut state = self.0.lock().unwrap();
        let ctx_id = state.ctx_ids.alloc();
        state.contexts.insert(ctx_id, Context::new(ctx_id));
        ctx_id
    }

    /// Tears down a context on connection close: drains its sync queues and
    /// waits, tells the renderer to destroy its side, and returns the id to
    /// the allocator.
    pub fn teardown_context(&self, ctx_id: u32) {
        let mut state = self.0.lock().unwrap();
        if let Some(mut ctx) = state.contexts.remove(&ctx_id) {
            ctx.teardown();
            if ctx.renderer_initialized {
                state.renderer.ctx_destroy(ctx_id);
            }
        }
        state.ctx_ids.free(ctx_id);
    }

    /// Runs `f` with exclusive access to the shared state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        let mut state = self.0.lock().unwrap();
        f(&mut state)
    }
}

impl FenceSink for Core {
    fn on_implicit_fence(&self, fence_id: u32) {
        self.with_state(|state| state.implicit.mark_completed(fence_id));
    }

    fn on_context_fence(&self, ctx_id: u32, sync_queue_index: u32, cookie: u64) {
        self.with_state(|state| {
            let Some(ctx) = state.contexts.get_mut(&ctx_id) else {
                return;
            };
            let Some(queue) = ctx.sync_queues.get_mut(sync_queue_index as usize) else {
                return;
            };
            let submits = queue.complete_up_to(cookie);
            if submits.is_empty() {
                return;
            }
            let now = Instant::now();
            for submit in &submits {
                for (sync, value) in submit.bumps() {
                    vtest_sync::signal_sync(
                        sync,
                        *value,
                        state.contexts.values_mut().map(|c| &mut c.sync_waits),
                        now,
                    );
                }
            }
        });
    }

    fn on_open_render_node(&self, path: &str) {
        tracing::info!(%path, "renderer opened render node");
    }
}
