use std::collections::{HashMap, HashSet};
use std::os::fd::{OwnedFd, RawFd};
use std::sync::{Arc, Mutex};

use vtest_registry::{MemfdShmProvider, ShmProvider};

use crate::error::RendererError;
use crate::traits::{BlobArgs, FenceSink, Renderer, ResourceCreateArgs};
use crate::Result;

#[derive(Debug, Default)]
struct ResourceState {
    data: Vec<u8>,
    has_iov: bool,
}

#[derive(Default)]
struct State {
    resources: HashMap<u32, ResourceState>,
    contexts: HashSet<u32>,
    next_resource_id: u32,
    submitted: Vec<(u32, Vec<u32>)>,
    /// `cookie -> (ctx_id, sync_queue_index)`, captured at
    /// `context_create_fence` time so `complete_context_fence` can hand the
    /// right queue index back to the fence sink, mirroring how a real
    /// renderer backend would track its own outstanding fences.
    context_fences: HashMap<u64, (u32, u32)>,
}

/// A deterministic, in-process stand-in for the real rendering library,
/// for exercising the dispatcher and sync subsystem without a GPU.
///
/// Fence completion is driven entirely by the test: nothing here fires a
/// callback on its own. Call [`MockRenderer::complete_context_fence`] or
/// [`MockRenderer::complete_implicit_fence`] to simulate the renderer's
/// `THREAD_SYNC` callback arriving.
#[derive(Default)]
pub struct MockRenderer {
    state: Mutex<State>,
    sink: Mutex<Option<Arc<dyn FenceSink>>>,
}

impl MockRenderer {
    /// Creates a renderer with no resources or contexts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the renderer's context-fence callback firing for the fence
    /// previously created with this `cookie`. A no-op if `cookie` is
    /// unknown (never created, or already completed).
    pub fn complete_context_fence(&self, cookie: u64) {
        let entry = self.state.lock().unwrap().context_fences.remove(&cookie);
        let Some((ctx_id, sync_queue_index)) = entry else {
            return;
        };
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.on_context_fence(ctx_id, sync_queue_index, cookie);
        }
    }

    /// Simulates the renderer's implicit-fence callback firing.
    pub fn complete_implicit_fence(&self, fence_id: u32) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.on_implicit_fence(fence_id);
        }
    }

    /// Cookies of context fences created but not yet completed, for tests
    /// that want to drive completion out of submission order without
    /// threading cookies back through the wire protocol.
    pub fn pending_context_fence_cookies(&self) -> Vec<u64> {
        self.state.lock().unwrap().context_fences.keys().copied().collect()
    }

    /// The command words most recently passed to [`Renderer::submit_cmd`]
    /// for a given context, for test assertions.
    pub fn last_submission(&self, ctx_id: u32) -> Option<Vec<u32>> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .iter()
            .rev()
            .find(|(id, _)| *id == ctx_id)
            .map(|(_, words)| words.clone())
    }
}

impl Renderer for MockRenderer {
    fn set_fence_sink(&self, sink: Arc<dyn FenceSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn resource_create(&self, _args: ResourceCreateArgs) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        state.next_resource_id += 1;
        let id = state.next_resource_id;
        state.resources.insert(id, ResourceState::default());
        Ok(id)
    }

    fn resource_unref(&self, server_id: u32) {
        self.state.lock().unwrap().resources.remove(&server_id);
    }

    fn resource_attach_iov(&self, server_id: u32, iov: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let res = state
            .resources
            .get_mut(&server_id)
            .ok_or(RendererError::Invalid)?;
        res.has_iov = !iov.is_empty();
        Ok(())
    }

    fn resource_create_blob(&self, _ctx_id: u32, args: BlobArgs) -> Result<(u32, OwnedFd)> {
        let mut state = self.state.lock().unwrap();
        state.next_resource_id += 1;
        let id = state.next_resource_id;
        state
            .resources
            .insert(id, ResourceState { data: vec![0; args.size as usize], has_iov: false });
        drop(state);
        let fd = MemfdShmProvider.create_fd("vtest-blob", args.size as usize)?;
        Ok((id, fd))
    }

    fn resource_export_blob(&self, server_id: u32) -> Result<OwnedFd> {
        let state = self.state.lock().unwrap();
        let res = state.resources.get(&server_id).ok_or(RendererError::Invalid)?;
        MemfdShmProvider
            .create_fd("vtest-blob-export", res.data.len())
            .map_err(Into::into)
    }

    fn ctx_create(&self, ctx_id: u32, _debug_name: &str) -> Result<()> {
        self.state.lock().unwrap().contexts.insert(ctx_id);
        Ok(())
    }

    fn ctx_create_with_flags(&self, ctx_id: u32, _capset_id: u32, _debug_name: &str) -> Result<()> {
        self.state.lock().unwrap().contexts.insert(ctx_id);
        Ok(())
    }

    fn ctx_destroy(&self, ctx_id: u32) {
        self.state.lock().unwrap().contexts.remove(&ctx_id);
    }

    fn ctx_attach_resource(&self, ctx_id: u32, server_id: u32) -> Result<()> {
        let state = self.state.lock().unwrap();
        if !state.contexts.contains(&ctx_id) || !state.resources.contains_key(&server_id) {
            return Err(RendererError::Invalid);
        }
        Ok(())
    }

    fn submit_cmd(&self, ctx_id: u32, words: &[u32]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.contexts.contains(&ctx_id) {
            return Err(RendererError::Invalid);
        }
        state.submitted.push((ctx_id, words.to_vec()));
        Ok(())
    }

    fn transfer_read_iov(&self, server_id: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.lock().unwrap();
        let res = state.resources.get(&server_id).ok_or(RendererError::Invalid)?;
        let offset = offset as usize;
        let available = res.data.len().saturating_sub(offset);
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&res.data[offset..offset + n]);
        Ok(n)
    }

    fn transfer_write_iov(&self, server_id: u32, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let res = state
            .resources
            .get_mut(&server_id)
            .ok_or(RendererError::Invalid)?;
        let offset = offset as usize;
        if res.data.len() < offset + buf.len() {
            res.data.resize(offset + buf.len(), 0);
        }
        res.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn create_fence(&self, _fence_id: u32) -> Result<()> {
        Ok(())
    }

    fn context_create_fence(
        &self,
        ctx_id: u32,
        _flags: u32,
        _queue_id: u64,
        sync_queue_index: u32,
        cookie: u64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.contexts.contains(&ctx_id) {
            return Err(RendererError::Invalid);
        }
        state.context_fences.insert(cookie, (ctx_id, sync_queue_index));
        Ok(())
    }

    fn poll(&self) {}

    fn get_poll_fd(&self) -> Option<RawFd> {
        None
    }

    fn get_cap_set(&self, _id: u32, _version: u32) -> Option<u32> {
        Some(4)
    }

    fn fill_caps(&self, _id: u32, _version: u32, out: &mut [u8]) {
        out.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingSink {
        last_cookie: AtomicU32,
        last_sync_queue_index: AtomicU32,
    }

    impl FenceSink for RecordingSink {
        fn on_implicit_fence(&self, _fence_id: u32) {}
        fn on_context_fence(&self, _ctx_id: u32, sync_queue_index: u32, cookie: u64) {
            self.last_cookie.store(cookie as u32, Ordering::SeqCst);
            self.last_sync_queue_index.store(sync_queue_index, Ordering::SeqCst);
        }
        fn on_open_render_node(&self, _path: &str) {}
    }

    #[test]
    fn context_fence_completion_reaches_the_registered_sink() {
        let renderer = MockRenderer::new();
        let sink = Arc::new(RecordingSink {
            last_cookie: AtomicU32::new(0),
            last_sync_queue_index: AtomicU32::new(0),
        });
        renderer.set_fence_sink(sink.clone());
        renderer.ctx_create(1, "test").unwrap();
        // queue_id (the opaque scheduling hint) deliberately differs from
        // sync_queue_index here, the normal case the dispatcher must
        // tolerate.
        renderer.context_create_fence(1, 0, 999, 3, 42).unwrap();
        renderer.complete_context_fence(42);
        assert_eq!(sink.last_cookie.load(Ordering::SeqCst), 42);
        assert_eq!(sink.last_sync_queue_index.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn completing_an_unknown_cookie_is_a_no_op() {
        let renderer = MockRenderer::new();
        let sink = Arc::new(RecordingSink {
            last_cookie: AtomicU32::new(0),
            last_sync_queue_index: AtomicU32::new(0),
        });
        renderer.set_fence_sink(sink.clone());
        renderer.complete_context_fence(42);
        assert_eq!(sink.last_cookie.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn submit_cmd_requires_an_existing_context() {
        let renderer = MockRenderer::new();
        assert!(renderer.submit_cmd(1, &[1, 2, 3]).is_err());
        renderer.ctx_create(1, "test").unwrap();
        assert!(renderer.submit_cmd(1, &[1, 2, 3]).is_ok());
        assert_eq!(renderer.last_submission(1), Some(vec![1, 2, 3]));
    }

    #[test]
    fn transfer_write_then_read_roundtrips() {
        let renderer = MockRenderer::new();
        let id = renderer.resource_create(ResourceCreateArgs::default()).unwrap();
        renderer.transfer_write_iov(id, 4, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        let n = renderer.transfer_read_iov(id, 4, &mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn blob_resources_have_independent_backing_fds() {
        let renderer = MockRenderer::new();
        let (id, fd) = renderer
            .resource_create_blob(1, BlobArgs { blob_type: 0, blob_flags: 0, size: 4096, blob_id: 0 })
            .unwrap();
        let (id2, fd2) = renderer
            .resource_create_blob(1, BlobArgs { blob_type: 0, blob_flags: 0, size: 4096, blob_id: 1 })
            .unwrap();
        assert_ne!(id, id2);
        use std::os::fd::AsRawFd;
        assert_ne!(fd.as_raw_fd(), fd2.as_raw_fd());
    }
}
