use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::time::Instant;

use rustix::event::{poll, PollFd, PollFlags};

use vtest_proto::{send_fd, FrameReader, FrameWriter};
use vtest_registry::ShmProvider;
use vtest_renderer::{BlobArgs, ResourceCreateArgs};

use crate::error::VtestError;
use crate::opcode::Opcode;
use crate::shared::Core;
use crate::transfer::{self, TransferHeader};
use crate::Result;

/// `CREATE_CONTEXT`'s length field is a raw byte count rather than a dword
/// count; 1 MiB bounds it either way.
const MAX_CONTEXT_NAME_BYTES: u32 = 1024 * 1024;

/// Batch-entry flag bit selecting the queued (fence-gated) signal path
/// instead of immediate signaling.
const BATCH_SYNC_QUEUE: u32 = 1 << 0;

/// `RESOURCE_BUSY_WAIT`'s flags word, bit 0: block until no longer busy
/// instead of reporting the current state and returning immediately.
const VCMD_BUSY_WAIT_FLAG_WAIT: u32 = 1 << 0;

fn words_to_bytes(words: &[u32], byte_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(byte_len);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out.truncate(byte_len);
    out
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(buf)
        })
        .collect()
}

/// Blocks until `fd` becomes readable, with no timeout.
///
/// # Safety note
/// `fd` is borrowed for the duration of this call only; the renderer
/// retains ownership.
fn wait_for_fd_readable(fd: RawFd) -> Result<()> {
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(&fd, PollFlags::IN)];
    poll(&mut fds, -1).map_err(|err| VtestError::Io(err.into()))?;
    Ok(())
}

fn slice_range(payload: &[u32], offset: u32, count: u32) -> Result<std::ops::Range<usize>> {
    let start = offset as usize;
    let end = start
        .checked_add(count as usize)
        .ok_or(VtestError::Invalid)?;
    if end > payload.len() {
        return Err(VtestError::Invalid);
    }
    Ok(start..end)
}

#[derive(Debug, Clone, Copy)]
struct BatchEntry {
    flags: u32,
    cmd_offset_dw: u32,
    cmd_size_dw: u32,
    sync_offset_dw: u32,
    sync_count: u32,
    sync_queue_index: u32,
    queue_id: u64,
}

impl BatchEntry {
    fn parse(words: &[u32]) -> Self {
        BatchEntry {
            flags: words[0],
            cmd_offset_dw: words[1],
            cmd_size_dw: words[2],
            sync_offset_dw: words[3],
            sync_count: words[4],
            sync_queue_index: words[5],
            queue_id: (words[6] as u64) | ((words[7] as u64) << 32),
        }
    }
}

/// Drives one connection's command loop.
pub struct Dispatcher<S> {
    core: Core,
    ctx_id: u32,
    reader: FrameReader<S>,
    writer: FrameWriter<S>,
}

impl<S: Read + Write + AsFd> Dispatcher<S> {
    /// Accepts a new connection, allocating its context id. `reader_stream`
    /// and `writer_stream` are typically two `try_clone`s of the same
    /// socket.
    pub fn new(core: Core, reader_stream: S, writer_stream: S) -> Self {
        let ctx_id = core.accept_context();
        Dispatcher {
            core,
            ctx_id,
            reader: FrameReader::new(reader_stream),
            writer: FrameWriter::new(writer_stream),
        }
    }

    /// Runs the command loop until disconnect or a fatal error, then tears
    /// the context down unconditionally.
    pub fn run(&mut self) -> Result<()> {
        let result = self.run_inner();
        self.core.teardown_context(self.ctx_id);
        match result {
            Err(VtestError::ShortRead) => Ok(()),
            other => other,
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        loop {
            let header = self.reader.read_header()?;
            self.dispatch(header.cmd_id, header.length_dw)?;
        }
    }

    fn dispatch(&mut self, cmd_id: u32, length_dw: u32) -> Result<()> {
        let opcode = Opcode::try_from(cmd_id)?;
        if opcode == Opcode::CreateContext {
            if length_dw > MAX_CONTEXT_NAME_BYTES {
                return Err(VtestError::Invalid);
            }
        } else {
            let max_length = self.core.with_state(|s| s.config.max_length);
            if (length_dw as u64) * 4 > max_length as u64 {
                return Err(VtestError::Invalid);
            }
        }
        match opcode {
            Opcode::CreateContext => self.handle_create_context(length_dw),
            Opcode::PingProtocolVersion => self.handle_ping_protocol_version(length_dw),
            Opcode::ProtocolVersion => self.handle_protocol_version(length_dw),
            Opcode::GetParam => self.handle_get_param(length_dw),
            Opcode::GetCapset => self.handle_get_capset(length_dw),
            Opcode::ContextInit => self.handle_context_init(length_dw),
            Opcode::GetCaps => self.handle_get_caps(length_dw, Opcode::GetCaps as u32),
            Opcode::GetCaps2 => self.handle_get_caps(length_dw, Opcode::GetCaps2 as u32),
            Opcode::ResourceCreate => self.handle_resource_create(length_dw),
            Opcode::ResourceCreate2 => self.handle_resource_create2(length_dw),
            Opcode::ResourceCreateBlob => self.handle_resource_create_blob(length_dw),
            Opcode::ResourceUnref => self.handle_resource_unref(length_dw),
            Opcode::SubmitCmd => self.handle_submit_cmd(length_dw),
            Opcode::TransferGet => self.handle_transfer_get(length_dw, false),
            Opcode::TransferGetNop => self.handle_transfer_get(length_dw, true),
            Opcode::TransferPut => self.handle_transfer_put(length_dw, false),
            Opcode::TransferPutNop => self.handle_transfer_put(length_dw, true),
            Opcode::TransferGet2 => self.handle_transfer_get2(length_dw, false),
            Opcode::TransferGet2Nop => self.handle_transfer_get2(length_dw, true),
            Opcode::TransferPut2 => self.handle_transfer_put2(length_dw, false),
            Opcode::TransferPut2Nop => self.handle_transfer_put2(length_dw, true),
            Opcode::ResourceBusyWait => self.handle_resource_busy_wait(length_dw),
            Opcode::SyncCreate => self.handle_sync_create(length_dw),
            Opcode::SyncUnref => self.handle_sync_unref(length_dw),
            Opcode::SyncRead => self.handle_sync_read(length_dw),
            Opcode::SyncWrite => self.handle_sync_write(length_dw),
            Opcode::SyncWait => self.handle_sync_wait(length_dw),
            Opcode::SubmitCmd2 => self.handle_submit_cmd2(length_dw),
        }
    }

    fn respond_empty(&mut self, cmd_id: u32) -> Result<()> {
        self.writer.write_empty(cmd_id).map_err(Into::into)
    }

    fn respond(&mut self, cmd_id: u32, words: &[u32]) -> Result<()> {
        self.writer.write_frame(cmd_id, words).map_err(Into::into)
    }

    fn send_fd_after_response(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        send_fd(self.writer.get_mut(), fd).map_err(Into::into)
    }

    fn ensure_renderer_context(&self) -> Result<()> {
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| {
            let ctx = state.contexts.get(&ctx_id).ok_or(VtestError::Invalid)?;
            if ctx.renderer_initialized {
                return Ok(());
            }
            let capset_id = ctx.capset_id;
            let debug_name = ctx.debug_name.clone();
            match capset_id {
                Some(capset_id) => {
                    state.renderer.ctx_create_with_flags(ctx_id, capset_id, &debug_name)?
                }
                None => state.renderer.ctx_create(ctx_id, &debug_name)?,
            }
            if let Some(ctx) = state.contexts.get_mut(&ctx_id) {
                ctx.renderer_initialized = true;
            }
            Ok(())
        })
    }

    // -- Protocol negotiation & context lifecycle ------------------------

    fn handle_create_context(&mut self, length_dw: u32) -> Result<()> {
        let mut name_bytes = vec![0u8; length_dw as usize];
        self.reader.read_exact(&mut name_bytes)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| {
            if let Some(ctx) = state.contexts.get_mut(&ctx_id) {
                ctx.debug_name = name;
            }
        });
        self.respond_empty(Opcode::CreateContext as u32)
    }

    fn handle_ping_protocol_version(&mut self, _length_dw: u32) -> Result<()> {
        self.respond_empty(Opcode::PingProtocolVersion as u32)
    }

    fn handle_protocol_version(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let requested = *payload.first().ok_or(VtestError::Invalid)?;
        let ctx_id = self.ctx_id;
        let negotiated = self.core.with_state(|state| {
            let shm_available = state.config.shm_available;
            let multi_client = state.config.multi_client;
            let mut version = requested.min(3);
            if version == 1 {
                // Version 1 is deprecated.
                version = 0;
            }
            if !shm_available {
                version = 0;
            }
            if multi_client && version < 3 {
                return Err(VtestError::Invalid);
            }
            if let Some(ctx) = state.contexts.get_mut(&ctx_id) {
                ctx.protocol_version = version;
            }
            Ok(version)
        })?;
        self.respond(Opcode::ProtocolVersion as u32, &[negotiated])
    }

    fn handle_get_param(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let param = *payload.first().ok_or(VtestError::Invalid)?;
        // Only MAX_SYNC_QUEUE_COUNT (param id 1) is modeled; everything
        // else reports unsupported rather than killing the connection.
        let (supported, value) = if param == 1 {
            let disabled = std::env::var_os("VIRGL_DISABLE_MT").is_some();
            (1, if disabled { 0 } else { u32::try_from(vtest_sync::QUEUES_PER_CONTEXT).unwrap() })
        } else {
            (0, 0)
        };
        self.respond(Opcode::GetParam as u32, &[supported, value])
    }

    fn handle_get_capset(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() < 2 {
            return Err(VtestError::Invalid);
        }
        let (id, version) = (payload[0], payload[1]);
        self.ensure_renderer_context()?;
        let max_size = self
            .core
            .with_state(|state| state.renderer.get_cap_set(id, version));
        match max_size {
            None => self.respond(Opcode::GetCapset as u32, &[0]),
            Some(max_size) => {
                let mut caps = vec![0u8; max_size as usize];
                self.core
                    .with_state(|state| state.renderer.fill_caps(id, version, &mut caps));
                let mut words = vec![1u32];
                words.extend(bytes_to_words(&caps));
                self.respond(Opcode::GetCapset as u32, &words)
            }
        }
    }

    fn handle_context_init(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let capset_id = *payload.first().ok_or(VtestError::Invalid)?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| {
            let ctx = state
                .contexts
                .get_mut(&ctx_id)
                .ok_or(VtestError::Invalid)?;
            match ctx.capset_id {
                None => {
                    ctx.capset_id = Some(capset_id);
                    Ok(())
                }
                Some(existing) if existing == capset_id => Ok(()),
                Some(_) => Err(VtestError::Invalid),
            }
        })?;
        self.ensure_renderer_context()?;
        self.respond_empty(Opcode::ContextInit as u32)
    }

    fn handle_get_caps(&mut self, _length_dw: u32, response_cmd_id: u32) -> Result<()> {
        self.ensure_renderer_context()?;
        let max_size = self
            .core
            .with_state(|state| state.renderer.get_cap_set(0, 0))
            .unwrap_or(0);
        let mut caps = vec![0u8; max_size as usize];
        self.core
            .with_state(|state| state.renderer.fill_caps(0, 0, &mut caps));
        self.respond(response_cmd_id, &bytes_to_words(&caps))
    }

    // -- Resource registry ------------------------------------------------

    fn handle_resource_create(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 10 {
            return Err(VtestError::Invalid);
        }
        let mut args = ResourceCreateArgs::default();
        args.words.copy_from_slice(&payload);
        let client_handle_hint = payload[0];
        self.ensure_renderer_context()?;
        let ctx_id = self.ctx_id;
        let (handle, protocol_version) = self.core.with_state(|state| -> Result<(u32, u32)> {
            let protocol_version = state
                .contexts
                .get(&ctx_id)
                .map(|c| c.protocol_version)
                .unwrap_or(0);
            if protocol_version >= 3 && client_handle_hint != 0 {
                return Err(VtestError::Invalid);
            }
            let server_id = state.renderer.resource_create(args)?;
            let ctx = state
                .contexts
                .get_mut(&ctx_id)
                .ok_or(VtestError::Invalid)?;
            let client_supplied = if protocol_version >= 3 { None } else { Some(client_handle_hint) };
            let handle = ctx.resources.create(&mut state.resource_ids, client_supplied)?;
            state.renderer.ctx_attach_resource(ctx_id, server_id)?;
            Ok((handle, protocol_version))
        })?;
        if protocol_version >= 3 {
            self.respond(Opcode::ResourceCreate as u32, &[handle])
        } else {
            self.respond_empty(Opcode::ResourceCreate as u32)
        }
    }

    fn handle_resource_create2(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 11 {
            return Err(VtestError::Invalid);
        }
        let mut args = ResourceCreateArgs::default();
        args.words.copy_from_slice(&payload[..10]);
        let shm_size = payload[10] as usize;
        let ctx_id = self.ctx_id;
        let (handle, fd) = self.core.with_state(|state| -> Result<_> {
            let server_id = state.renderer.resource_create(args)?;
            let ctx = state
                .contexts
                .get_mut(&ctx_id)
                .ok_or(VtestError::Invalid)?;
            let handle = ctx.resources.create(&mut state.resource_ids, None)?;
            let fd = ctx
                .resources
                .attach_shm(handle, shm_size, &vtest_registry::MemfdShmProvider)?;
            state.renderer.ctx_attach_resource(ctx_id, server_id)?;
            Ok((handle, fd))
        })?;
        self.respond(Opcode::ResourceCreate2 as u32, &[handle])?;
        self.send_fd_after_response(fd.as_fd())
    }

    fn handle_resource_create_blob(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 6 {
            return Err(VtestError::Invalid);
        }
        let args = BlobArgs {
            blob_type: payload[0],
            blob_flags: payload[1],
            size: (payload[2] as u64) | ((payload[3] as u64) << 32),
            blob_id: (payload[4] as u64) | ((payload[5] as u64) << 32),
        };
        self.ensure_renderer_context()?;
        let ctx_id = self.ctx_id;
        let (handle, fd) = self.core.with_state(|state| -> Result<_> {
            let (server_id, fd) = state.renderer.resource_create_blob(ctx_id, args)?;
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            let handle = ctx.resources.create(&mut state.resource_ids, None)?;
            Ok((handle, fd))
        })?;
        self.respond(Opcode::ResourceCreateBlob as u32, &[handle])?;
        self.send_fd_after_response(fd.as_fd())
    }

    fn handle_resource_unref(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let handle = *payload.first().ok_or(VtestError::Invalid)?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            let ctx = state
                .contexts
                .get_mut(&ctx_id)
                .ok_or(VtestError::Invalid)?;
            let resource = ctx.resources.unref(handle)?;
            state.renderer.resource_unref(resource.server_id());
            state.resource_ids.free(resource.server_id());
            Ok(())
        })?;
        self.respond_empty(Opcode::ResourceUnref as u32)
    }

    // -- Command submission & legacy busy-wait (components D, H) -------

    fn handle_submit_cmd(&mut self, length_dw: u32) -> Result<()> {
        let words = self.reader.read_payload(length_dw)?;
        self.ensure_renderer_context()?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            state.renderer.submit_cmd(ctx_id, &words)?;
            let fence_id = state.implicit.next_submitted();
            state.renderer.create_fence(fence_id)?;
            Ok(())
        })?;
        self.respond_empty(Opcode::SubmitCmd as u32)
    }

    fn handle_resource_busy_wait(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() < 2 {
            return Err(VtestError::Invalid);
        }
        let (handle, flags) = (payload[0], payload[1]);
        let ctx_id = self.ctx_id;
        let busy = loop {
            let busy = self.core.with_state(|state| -> Result<bool> {
                let ctx = state.contexts.get(&ctx_id).ok_or(VtestError::Invalid)?;
                if handle != 0 && !ctx.renderer_initialized {
                    return Err(VtestError::Invalid);
                }
                state.renderer.poll();
                Ok(state.implicit.is_busy())
            })?;
            if !busy || flags & VCMD_BUSY_WAIT_FLAG_WAIT == 0 {
                break busy;
            }
            if let Some(poll_fd) = self.core.with_state(|state| state.renderer.get_poll_fd()) {
                wait_for_fd_readable(poll_fd)?;
            }
        };
        self.respond(Opcode::ResourceBusyWait as u32, &[busy as u32])
    }

    // -- Timeline store & sync-wait engine (components C, E) ------------

    fn handle_sync_create(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 2 {
            return Err(VtestError::Invalid);
        }
        let initial_value = (payload[0] as u64) | ((payload[1] as u64) << 32);
        let ctx_id = self.ctx_id;
        let sync_id = self.core.with_state(|state| -> Result<u32> {
            let sync_ids = state.sync_ids.clone();
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            let handle = ctx.syncs.create(&sync_ids, initial_value);
            Ok(handle.id())
        })?;
        self.respond(Opcode::SyncCreate as u32, &[sync_id])
    }

    fn handle_sync_unref(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let sync_id = *payload.first().ok_or(VtestError::Invalid)?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            ctx.syncs.unref(sync_id)?;
            Ok(())
        })?;
        self.respond_empty(Opcode::SyncUnref as u32)
    }

    fn handle_sync_read(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let sync_id = *payload.first().ok_or(VtestError::Invalid)?;
        let ctx_id = self.ctx_id;
        let value = self.core.with_state(|state| -> Result<u64> {
            let ctx = state.contexts.get(&ctx_id).ok_or(VtestError::Invalid)?;
            Ok(ctx.syncs.read(sync_id)?)
        })?;
        self.respond(Opcode::SyncRead as u32, &[value as u32, (value >> 32) as u32])
    }

    fn handle_sync_write(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 3 {
            return Err(VtestError::Invalid);
        }
        let sync_id = payload[0];
        let value = (payload[1] as u64) | ((payload[2] as u64) << 32);
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            let sync = ctx.syncs.lookup(sync_id).ok_or(VtestError::Invalid)?;
            let now = Instant::now();
            vtest_sync::signal_sync(
                &sync,
                value,
                state.contexts.values_mut().map(|c| &mut c.sync_waits),
                now,
            );
            Ok(())
        })?;
        self.respond_empty(Opcode::SyncWrite as u32)
    }

    fn handle_sync_wait(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() < 2 {
            return Err(VtestError::Invalid);
        }
        let flags = vtest_sync::SyncWaitFlags::from_bits(payload[0]);
        let timeout_ms = payload[1] as u64;
        let entries = &payload[2..];
        if entries.len() % 3 != 0 {
            return Err(VtestError::Invalid);
        }
        let thresholds: Vec<(u32, u64)> = entries
            .chunks_exact(3)
            .map(|c| (c[0], (c[1] as u64) | ((c[2] as u64) << 32)))
            .collect();
        let ctx_id = self.ctx_id;
        let client_fd = self.core.with_state(|state| -> Result<_> {
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            let now = Instant::now();
            let outcome =
                vtest_sync::register_wait(&ctx.syncs, flags, timeout_ms, &thresholds, now)?;
            if let Some(wait) = outcome.pending {
                ctx.sync_waits.push(wait);
            }
            Ok(outcome.client_fd)
        })?;
        self.respond_empty(Opcode::SyncWait as u32)?;
        self.send_fd_after_response(client_fd.as_fd())
    }

    // -- Batched submission with sync-queue routing ------------------------

    fn handle_submit_cmd2(&mut self, length_dw: u32) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        let batch_count = *payload.first().ok_or(VtestError::Invalid)?;
        let batches_range = slice_range(&payload, 1, batch_count.checked_mul(8).ok_or(VtestError::Invalid)?)?;
        let batches: Vec<BatchEntry> = payload[batches_range]
            .chunks_exact(8)
            .map(BatchEntry::parse)
            .collect();
        self.ensure_renderer_context()?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            for batch in &batches {
                let cmd_range = slice_range(&payload, batch.cmd_offset_dw, batch.cmd_size_dw)?;
                state.renderer.submit_cmd(ctx_id, &payload[cmd_range])?;
                if batch.sync_count == 0 {
                    continue;
                }
                let sync_range = slice_range(
                    &payload,
                    batch.sync_offset_dw,
                    batch.sync_count.checked_mul(3).ok_or(VtestError::Invalid)?,
                )?;
                let sync_entries: Vec<(u32, u64)> = payload[sync_range]
                    .chunks_exact(3)
                    .map(|c| (c[0], (c[1] as u64) | ((c[2] as u64) << 32)))
                    .collect();

                let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
                let mut resolved = Vec::with_capacity(sync_entries.len());
                for (sync_id, value) in &sync_entries {
                    let handle = ctx.syncs.lookup(*sync_id).ok_or(VtestError::Exists)?;
                    resolved.push((handle, *value));
                }

                if batch.flags & BATCH_SYNC_QUEUE == 0 {
                    let now = Instant::now();
                    for (handle, value) in &resolved {
                        vtest_sync::signal_sync(
                            handle,
                            *value,
                            state.contexts.values_mut().map(|c| &mut c.sync_waits),
                            now,
                        );
                    }
                } else {
                    let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
                    let queue = ctx
                        .sync_queues
                        .get_mut(batch.sync_queue_index as usize)
                        .ok_or(VtestError::Invalid)?;
                    let cookie = queue.push(vtest_sync::SyncQueueSubmit::new(resolved));
                    state.renderer.context_create_fence(
                        ctx_id,
                        batch.flags,
                        batch.queue_id,
                        batch.sync_queue_index,
                        cookie,
                    )?;
                }
            }
            Ok(())
        })?;
        self.respond_empty(Opcode::SubmitCmd2 as u32)
    }

    // -- Transfer engine ----------------------------------------------------

    fn handle_transfer_get(&mut self, length_dw: u32, nop: bool) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 10 {
            return Err(VtestError::Invalid);
        }
        let header = TransferHeader::parse_v1(&payload)?;
        let ctx_id = self.ctx_id;
        let data = self.core.with_state(|state| -> Result<Vec<u8>> {
            let ctx = state.contexts.get(&ctx_id).ok_or(VtestError::Invalid)?;
            let resource = ctx.resources.lookup(header.handle).ok_or(VtestError::Invalid)?;
            transfer::transfer_get(state.renderer.as_ref(), resource.server_id(), &header, nop)
        })?;
        self.respond(Opcode::TransferGet as u32, &bytes_to_words(&data))
    }

    fn handle_transfer_put(&mut self, length_dw: u32, nop: bool) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() < 10 {
            return Err(VtestError::Invalid);
        }
        let header = TransferHeader::parse_v1(&payload[..10])?;
        let data = words_to_bytes(&payload[10..], header.data_size as usize);
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            let ctx = state.contexts.get(&ctx_id).ok_or(VtestError::Invalid)?;
            let resource = ctx.resources.lookup(header.handle).ok_or(VtestError::Invalid)?;
            transfer::transfer_put(state.renderer.as_ref(), resource.server_id(), &header, &data, nop)
        })?;
        self.respond_empty(Opcode::TransferPut as u32)
    }

    fn handle_transfer_get2(&mut self, length_dw: u32, nop: bool) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 9 {
            return Err(VtestError::Invalid);
        }
        let header = TransferHeader::parse_v2(&payload)?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            let resource = ctx.resources.lookup_mut(header.handle).ok_or(VtestError::Invalid)?;
            let server_id = resource.server_id();
            transfer::transfer_get2(state.renderer.as_ref(), server_id, resource, header.offset, nop)
        })?;
        self.respond_empty(Opcode::TransferGet2 as u32)
    }

    fn handle_transfer_put2(&mut self, length_dw: u32, nop: bool) -> Result<()> {
        let payload = self.reader.read_payload(length_dw)?;
        if payload.len() != 9 {
            return Err(VtestError::Invalid);
        }
        let header = TransferHeader::parse_v2(&payload)?;
        let ctx_id = self.ctx_id;
        self.core.with_state(|state| -> Result<()> {
            let ctx = state.contexts.get_mut(&ctx_id).ok_or(VtestError::Invalid)?;
            let resource = ctx.resources.lookup_mut(header.handle).ok_or(VtestError::Invalid)?;
            let server_id = resource.server_id();
            transfer::transfer_put2(state.renderer.as_ref(), server_id, resource, header.offset, nop)
        })?;
        self.respond_empty(Opcode::TransferPut2 as u32)
    }
}
