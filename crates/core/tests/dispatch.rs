//! End-to-end wire-level scenarios driving a [`Dispatcher`] over a real
//! socket pair, exercising the six scenarios this repository's properties
//! are built around: protocol negotiation, timeline create/read/write,
//! ANY-mode waits, queued-submit fence ordering, pre-signaled waits, and
//! blob resource fd transfer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use vtest_core::{Core, CoreConfig, Dispatcher, Opcode};
use vtest_proto::{recv_fd, FrameReader, FrameWriter};
use vtest_renderer::{MockRenderer, Renderer};

fn new_core() -> (Core, Arc<MockRenderer>) {
    let renderer = Arc::new(MockRenderer::new());
    let core = Core::new(renderer.clone(), CoreConfig::default());
    renderer.set_fence_sink(Arc::new(core.clone()));
    (core, renderer)
}

fn spawn_server(core: Core) -> (UnixStream, JoinHandle<()>) {
    let (server_side, client_side) = UnixStream::pair().expect("socketpair");
    let writer_side = server_side.try_clone().expect("clone");
    let handle = thread::spawn(move || {
        let mut dispatcher = Dispatcher::new(core, server_side, writer_side);
        let _ = dispatcher.run();
    });
    (client_side, handle)
}

struct Client {
    writer: FrameWriter<UnixStream>,
    reader: FrameReader<UnixStream>,
}

impl Client {
    fn new(stream: UnixStream) -> Self {
        Client {
            writer: FrameWriter::new(stream.try_clone().expect("clone")),
            reader: FrameReader::new(stream),
        }
    }

    fn call(&mut self, opcode: Opcode, words: &[u32]) -> Vec<u32> {
        self.writer.write_frame(opcode as u32, words).expect("write request");
        let header = self.reader.read_header().expect("read response header");
        self.reader.read_payload(header.length_dw).expect("read response payload")
    }

    fn recv_fd(&self) -> File {
        recv_fd(self.reader.get_ref())
            .expect("recv_fd")
            .expect("an fd was sent")
            .into()
    }
}

#[test]
fn protocol_negotiate_and_fail_downgrade() {
    let (client_stream, _server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    // Version 1 is deprecated; the server downgrades to 0.
    assert_eq!(client.call(Opcode::ProtocolVersion, &[1]), vec![0]);

    // A single-client server accepts version 3 unchanged.
    assert_eq!(client.call(Opcode::ProtocolVersion, &[3]), vec![3]);
}

#[test]
fn create_and_read_sync() {
    let (client_stream, _server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    let created = client.call(Opcode::SyncCreate, &[5, 0]);
    let sync_id = created[0];
    assert_eq!(sync_id, 1, "first allocated sync id is 1");

    assert_eq!(client.call(Opcode::SyncRead, &[sync_id]), vec![5, 0]);
    assert!(client.call(Opcode::SyncWrite, &[sync_id, 10, 0]).is_empty());
    assert_eq!(client.call(Opcode::SyncRead, &[sync_id]), vec![10, 0]);
}

#[test]
fn any_mode_wait_wakes_on_the_flagged_sync() {
    let (client_stream, _server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    let s1 = client.call(Opcode::SyncCreate, &[0, 0])[0];
    let s2 = client.call(Opcode::SyncCreate, &[0, 0])[0];

    let flags = vtest_sync::SyncWaitFlags::ANY;
    let timeout_ms = 60_000;
    let reply = client.call(
        Opcode::SyncWait,
        &[flags, timeout_ms, s1, 1, 0, s2, 1, 0],
    );
    assert!(reply.is_empty());
    let mut fence = client.recv_fd();

    client.call(Opcode::SyncWrite, &[s2, 1, 0]);

    let mut buf = [0u8; 8];
    fence.read_exact(&mut buf).expect("wait fd became readable");
    assert_eq!(u64::from_ne_bytes(buf), 1);
}

#[test]
fn pre_signaled_wait_resolves_immediately() {
    let (client_stream, _server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    let s = client.call(Opcode::SyncCreate, &[7, 0])[0];
    let reply = client.call(Opcode::SyncWait, &[0, 0, s, 5, 0]);
    assert!(reply.is_empty());

    let mut fence = client.recv_fd();
    let mut buf = [0u8; 8];
    fence.read_exact(&mut buf).expect("pre-signaled wait fd is already readable");
    assert_eq!(u64::from_ne_bytes(buf), 1);
}

#[test]
fn blob_resource_fds_do_not_share_backing_storage() {
    let (client_stream, _server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    let create_blob = |client: &mut Client| -> (u32, File) {
        let reply = client.call(Opcode::ResourceCreateBlob, &[0, 0, 4096, 0, 1, 0]);
        let handle = reply[0];
        (handle, client.recv_fd())
    };

    let (handle_a, mut fd_a) = create_blob(&mut client);
    let (handle_b, mut fd_b) = create_blob(&mut client);
    assert_ne!(handle_a, handle_b);

    fd_a.write_all(b"hello").expect("write to first blob");

    fd_b.seek(SeekFrom::Start(0)).expect("seek second blob");
    let mut buf = [0u8; 5];
    fd_b.read_exact(&mut buf).expect("read second blob");
    assert_eq!(&buf, &[0, 0, 0, 0, 0], "second blob's backing memory is independent of the first's");
}

#[test]
fn resource_busy_wait_blocks_until_the_submitted_fence_completes() {
    let (core, renderer) = new_core();
    let (client_stream, _server) = spawn_server(core);
    let mut client = Client::new(client_stream);

    client.call(Opcode::SubmitCmd, &[1, 2, 3]);

    let renderer = renderer.clone();
    thread::spawn(move || {
        thread::sleep(std::time::Duration::from_millis(50));
        renderer.complete_implicit_fence(1);
    });

    // flags=1 is VCMD_BUSY_WAIT_FLAG_WAIT. MockRenderer's poll fd is always
    // `None`, so this spins on repeated non-blocking polls rather than
    // sleeping on a real fd — same fallback the original takes when its
    // renderer reports no poll fd.
    let reply = client.call(Opcode::ResourceBusyWait, &[0, 1]);
    assert_eq!(reply, vec![0], "busy-wait resolves once the submitted fence completes");
}

#[test]
fn resource_create_duplicate_client_handle_is_rejected_under_legacy_protocol() {
    let (client_stream, server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    let words_with_handle = |handle: u32| {
        let mut w = vec![0u32; 10];
        w[0] = handle;
        w
    };

    // Default negotiated protocol is 0 (legacy): RESOURCE_CREATE's handle
    // word is the client's own chosen id, so reusing it in the same
    // context is a collision.
    client.call(Opcode::ResourceCreate, &words_with_handle(42));
    client
        .writer
        .write_frame(Opcode::ResourceCreate as u32, &words_with_handle(42))
        .expect("write second RESOURCE_CREATE");

    server.join().expect("server thread does not panic on a rejected handle");
    assert!(
        client.reader.read_header().is_err(),
        "connection is closed after a duplicate client-supplied handle"
    );
}

#[test]
fn resource_create_rejects_nonzero_client_handle_under_protocol_3() {
    let (client_stream, server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    assert_eq!(client.call(Opcode::ProtocolVersion, &[3]), vec![3]);

    let mut words = vec![0u32; 10];
    words[0] = 7;
    client
        .writer
        .write_frame(Opcode::ResourceCreate as u32, &words)
        .expect("write RESOURCE_CREATE with a nonzero handle hint");

    server.join().expect("server thread does not panic on a rejected handle");
    assert!(
        client.reader.read_header().is_err(),
        "connection is closed after a nonzero client handle under protocol 3"
    );
}

#[test]
fn resource_create_returns_server_assigned_handle_under_protocol_3() {
    let (client_stream, _server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    assert_eq!(client.call(Opcode::ProtocolVersion, &[3]), vec![3]);

    let reply = client.call(Opcode::ResourceCreate, &vec![0u32; 10]);
    assert_eq!(reply.len(), 1, "protocol>=3 returns the server-assigned handle");
    assert_ne!(reply[0], 0);
}

#[test]
fn submit_cmd2_immediate_signal_path_bumps_the_timeline_synchronously() {
    let (core, _renderer) = new_core();
    let (client_stream, _server) = spawn_server(core);
    let mut client = Client::new(client_stream);

    let s = client.call(Opcode::SyncCreate, &[0, 0])[0];

    // batch_count=1, one 8-word BatchEntry (flags=0 selects immediate
    // signaling), no command words, one sync entry bumping `s` to 3.
    let words = vec![1, 0, 9, 0, 9, 1, 0, 0, 0, s, 3, 0];
    client.call(Opcode::SubmitCmd2, &words);

    assert_eq!(client.call(Opcode::SyncRead, &[s]), vec![3, 0]);
}

/// Builds a `SUBMIT_CMD2` payload with a single queued (`SYNC_QUEUE`-flagged)
/// batch entry bumping `sync_id` to `value`, with no command words.
/// `queue_id` (the opaque wire scheduling hint) is kept deliberately
/// different from `sync_queue_index` (the queue the completion must route
/// to) to exercise that they are independent fields.
fn queued_submit_words(sync_queue_index: u32, queue_id: u64, sync_id: u32, value: u32) -> Vec<u32> {
    vec![
        1, // batch_count
        1, // flags: BATCH_SYNC_QUEUE
        9, // cmd_offset_dw
        0, // cmd_size_dw
        9, // sync_offset_dw
        1, // sync_count
        sync_queue_index,
        queue_id as u32,
        (queue_id >> 32) as u32,
        sync_id,
        value,
        0,
    ]
}

#[test]
fn submit_cmd2_queued_path_releases_in_fifo_order_regardless_of_completion_order() {
    let (core, renderer) = new_core();
    let (client_stream, _server) = spawn_server(core);
    let mut client = Client::new(client_stream);

    let s = client.call(Opcode::SyncCreate, &[0, 0])[0];

    // sync_queue_index=2 vs queue_id=7: if a completion were (mis)routed by
    // queue_id instead of sync_queue_index, it would land on a different,
    // untouched queue and `s` would never move.
    client.call(Opcode::SubmitCmd2, &queued_submit_words(2, 7, s, 1));
    client.call(Opcode::SubmitCmd2, &queued_submit_words(2, 7, s, 2));

    let mut cookies = renderer.pending_context_fence_cookies();
    cookies.sort_unstable();
    assert_eq!(cookies.len(), 2, "both submits registered a fence");

    // Complete the later submit's fence first; FIFO draining means both
    // bumps still apply in submission order.
    renderer.complete_context_fence(cookies[1]);
    assert_eq!(client.call(Opcode::SyncRead, &[s]), vec![2, 0]);

    // The earlier cookie was already absorbed; completing it is a no-op.
    renderer.complete_context_fence(cookies[0]);
    assert_eq!(client.call(Opcode::SyncRead, &[s]), vec![2, 0]);
}

#[test]
fn oversized_frame_is_rejected_and_terminates_the_connection() {
    let renderer = Arc::new(MockRenderer::new());
    let core = Core::new(
        renderer.clone(),
        CoreConfig { max_length: 16, ..CoreConfig::default() },
    );
    renderer.set_fence_sink(Arc::new(core.clone()));
    let (client_stream, server) = spawn_server(core);
    let mut client = Client::new(client_stream);

    // length_dw(5) * 4 = 20 bytes exceeds max_length(16); rejected before
    // any payload bytes are consumed, and fatal for the connection.
    client
        .writer
        .write_frame(Opcode::SyncCreate as u32, &[0u32; 5])
        .expect("write oversized frame");

    server.join().expect("server thread does not panic on a rejected frame");
    assert!(
        client.reader.read_header().is_err(),
        "connection is closed after a frame-bounds violation"
    );
}

#[test]
fn unknown_opcode_is_fatal_for_the_connection() {
    let (client_stream, server) = spawn_server(new_core().0);
    let mut client = Client::new(client_stream);

    client
        .writer
        .write_frame(9999, &[])
        .expect("write unknown opcode");

    server.join().expect("server thread does not panic on an unknown opcode");
    assert!(
        client.reader.read_header().is_err(),
        "connection is closed after an unknown opcode"
    );
}
