use std::os::fd::{OwnedFd, RawFd};
use std::sync::Arc;

use crate::Result;

/// The 10-word `RESOURCE_CREATE` argument block, carried verbatim from the
/// wire; the renderer is the only party that interprets the individual
/// fields (target, format, bind, dimensions, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceCreateArgs {
    /// Raw argument words, in wire order.
    pub words: [u32; 10],
}

/// Arguments for `RESOURCE_CREATE_BLOB`: blob type/flags plus a 64-bit size
/// and a 64-bit client-chosen id, each split into lo/hi words on the wire
/// and reassembled here.
#[derive(Debug, Clone, Copy)]
pub struct BlobArgs {
    /// Blob type (host/guest/guest-vram), renderer-defined encoding.
    pub blob_type: u32,
    /// Blob flags, renderer-defined encoding.
    pub blob_flags: u32,
    /// Size in bytes.
    pub size: u64,
    /// Client-chosen blob id, echoed back opaquely by the renderer.
    pub blob_id: u64,
}

/// Callbacks the renderer invokes asynchronously: in `THREAD_SYNC` mode
/// these fire from the renderer's own thread, so an implementation backed
/// by a real library must funnel them onto the main loop or hold the
/// coarse sync-subsystem mutex across both handler execution and callback
/// bodies.
pub trait FenceSink: Send + Sync {
    /// The legacy global implicit-fence counter reached `fence_id`.
    fn on_implicit_fence(&self, fence_id: u32);

    /// A context-scoped fence tagged with `cookie` (the opaque value passed
    /// to [`Renderer::context_create_fence`]) completed. `sync_queue_index`
    /// is the index of the context's own sync queue the fence was created
    /// for, not the wire's opaque `queue_id` scheduling hint — it is what
    /// the sink needs to route the completion to the right queue.
    fn on_context_fence(&self, ctx_id: u32, sync_queue_index: u32, cookie: u64);

    /// The renderer opened its render node device at `path`, for logging.
    fn on_open_render_node(&self, path: &str);
}

/// The opaque GPU rendering library this core dispatches into. Every
/// method here exists only to describe the shape of that boundary; the
/// actual dispatch logic lives in `vtest-sync`/`vtest-registry` and is
/// driven by the dispatcher in `vtest-core`.
pub trait Renderer: Send + Sync {
    /// Registers the sink that will receive fence-completion callbacks.
    /// Implementations should call this exactly once, at startup.
    fn set_fence_sink(&self, sink: Arc<dyn FenceSink>);

    /// Allocates a renderer-side resource, returning its server-assigned id.
    fn resource_create(&self, args: ResourceCreateArgs) -> Result<u32>;

    /// Releases a previously created resource.
    fn resource_unref(&self, server_id: u32);

    /// Attaches (or detaches, via an empty slice) a shared-memory mapping
    /// to a resource for iov-based transfers.
    fn resource_attach_iov(&self, server_id: u32, iov: &mut [u8]) -> Result<()>;

    /// Creates a blob resource, returning its handle and an exportable fd
    /// (dmabuf or shm-backed, renderer's choice).
    fn resource_create_blob(&self, ctx_id: u32, args: BlobArgs) -> Result<(u32, OwnedFd)>;

    /// Re-exports an existing blob resource's backing fd.
    fn resource_export_blob(&self, server_id: u32) -> Result<OwnedFd>;

    /// Lazily creates the renderer-side context for `ctx_id`.
    fn ctx_create(&self, ctx_id: u32, debug_name: &str) -> Result<()>;

    /// As [`Renderer::ctx_create`], but with a capset selected up front.
    fn ctx_create_with_flags(&self, ctx_id: u32, capset_id: u32, debug_name: &str) -> Result<()>;

    /// Tears down a renderer-side context.
    fn ctx_destroy(&self, ctx_id: u32);

    /// Grants a context access to a resource.
    fn ctx_attach_resource(&self, ctx_id: u32, server_id: u32) -> Result<()>;

    /// Submits a command stream for execution within a context.
    fn submit_cmd(&self, ctx_id: u32, words: &[u32]) -> Result<()>;

    /// Reads from a resource's backing store into `buf` starting at
    /// `offset`, returning the number of bytes actually read.
    fn transfer_read_iov(&self, server_id: u32, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf` into a resource's backing store starting at `offset`,
    /// returning the number of bytes actually written.
    fn transfer_write_iov(&self, server_id: u32, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Creates the legacy process-wide implicit fence tagged `fence_id`.
    fn create_fence(&self, fence_id: u32) -> Result<()>;

    /// Creates a context-scoped fence tagged with an opaque `cookie` that
    /// [`FenceSink::on_context_fence`] will echo back alongside
    /// `sync_queue_index`. `queue_id` is opaque renderer-facing scheduling
    /// metadata, independent of `sync_queue_index` and not used to locate
    /// the completing queue — implementations that care about scheduling
    /// hints may still use it for that, but must capture `sync_queue_index`
    /// (keyed by `cookie`) to hand back correctly on completion.
    fn context_create_fence(
        &self,
        ctx_id: u32,
        flags: u32,
        queue_id: u64,
        sync_queue_index: u32,
        cookie: u64,
    ) -> Result<()>;

    /// Pumps renderer-internal fence processing; may invoke queued
    /// callbacks synchronously.
    fn poll(&self);

    /// A pollable fd that becomes readable when [`Renderer::poll`] has work
    /// to do, used by the legacy busy-wait path.
    fn get_poll_fd(&self) -> Option<RawFd>;

    /// Reports whether capset `id`/`version` is supported and its maximum
    /// serialized size.
    fn get_cap_set(&self, id: u32, version: u32) -> Option<u32>;

    /// Serializes capset `id`/`version` into `out`, which is exactly the
    /// size previously reported by [`Renderer::get_cap_set`].
    fn fill_caps(&self, id: u32, version: u32, out: &mut [u8]);
}
