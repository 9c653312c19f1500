use vtest_registry::Registry;
use vtest_sync::{SyncQueueBank, SyncWaitList, TimelineStore};

/// Per-connection state.
///
/// One [`Context`] exists per accepted connection; `CREATE_CONTEXT` names it
/// and `CONTEXT_INIT`/the first context-requiring command lazily creates its
/// renderer-side counterpart.
pub struct Context {
    /// This connection's process-wide context id.
    pub ctx_id: u32,
    /// Debug name set by `CREATE_CONTEXT`.
    pub debug_name: String,
    /// Negotiated protocol version. Defaults to 0.
    pub protocol_version: u32,
    /// Capset selected by `CONTEXT_INIT`, if any.
    pub capset_id: Option<u32>,
    /// Whether the renderer-side context has been created yet.
    pub renderer_initialized: bool,
    /// This context's resources, keyed by client handle.
    pub resources: Registry,
    /// This context's timelines, keyed by id.
    pub syncs: TimelineStore,
    /// The 64 sync queues carried per context.
    pub sync_queues: SyncQueueBank,
    /// Pending waits registered against this context's timelines.
    pub sync_waits: SyncWaitList,
}

impl Context {
    /// Creates a fresh, uninitialized context for `ctx_id`.
    pub fn new(ctx_id: u32) -> Self {
        Context {
            ctx_id,
            debug_name: String::new(),
            protocol_version: 0,
            capset_id: None,
            renderer_initialized: false,
            resources: Registry::new(),
            syncs: TimelineStore::new(),
            sync_queues: SyncQueueBank::new(),
            sync_waits: SyncWaitList::new(),
        }
    }

    /// Drains every sync queue and closes every pending wait without
    /// signaling. Resources and timelines are dropped along with the
    /// `Context` itself, cascading their own `unref`/`Drop` behavior.
    pub fn teardown(&mut self) {
        self.sync_queues.drain_all();
        self.sync_waits.close_all();
    }
}
