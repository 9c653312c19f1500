use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::thread;

use vtest_core::{Core, Dispatcher};

/// Binds a fresh listening socket at `path`, removing a stale socket file
/// left behind by a previous run (a bind against an existing socket path
/// otherwise fails with `AddrInUse`).
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    UnixListener::bind(path)
}

/// Accepts connections from `listener` until it returns a fatal error,
/// spawning one thread per connection (the dispatcher's own command
/// processing is single-threaded cooperative per connection; concurrency
/// across connections is left to the OS thread scheduler).
pub fn accept_loop(listener: UnixListener, core: Core) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, "failed to accept connection");
                continue;
            }
        };
        let core = core.clone();
        thread::spawn(move || serve_connection(stream, core));
    }
}

fn serve_connection(stream: UnixStream, core: Core) {
    let writer_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            tracing::warn!(%err, "failed to clone connection stream");
            return;
        }
    };
    let mut dispatcher = Dispatcher::new(core, stream, writer_stream);
    if let Err(err) = dispatcher.run() {
        tracing::warn!(%err, "connection terminated with an error");
    }
}
