#![deny(missing_docs)]

//! CLI entry point and connection-accept loop tying `vtest-core` to a
//! listening unix-domain socket.
//!
//! Process startup, socket accept, and fd multiplexing sit outside the
//! command dispatcher's own declared scope; this crate supplies the
//! thinnest glue that makes `bin/vtest-server` a runnable program. None of
//! it is load-bearing for the dispatcher's own invariants, which this
//! crate's tests do not re-exercise (see `crates/core`'s own suite for
//! those).

mod config;
mod connection;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use vtest_core::Core;
use vtest_renderer::{MockRenderer, Renderer};

pub use config::DaemonConfig;

/// Parses `args`, binds the configured listen socket, and serves
/// connections until the process is killed or the socket fails. Returns a
/// process status code instead of exiting directly so tests can observe it.
pub fn run<I, T>(args: I, stderr: &mut impl Write) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let config = match DaemonConfig::try_parse_from(args) {
        Ok(config) => config,
        Err(err) => {
            let _ = write!(stderr, "{err}");
            return err.exit_code();
        }
    };

    let _ = vtest_logging::init();
    config.apply_save_override();

    let listener = match connection::bind(&config.listen) {
        Ok(listener) => listener,
        Err(err) => {
            let _ = writeln!(stderr, "failed to bind {}: {err}", config.listen.display());
            return 1;
        }
    };

    // No real rendering library is wired in; this binary exists to make the
    // dispatcher's accept loop runnable, not to perform GPU work.
    let renderer = Arc::new(MockRenderer::new());
    let core = Core::new(renderer.clone(), config.core_config());
    renderer.set_fence_sink(Arc::new(core.clone()));

    tracing::info!(listen = %config.listen.display(), "vtest-server listening");
    connection::accept_loop(listener, core);
    0
}

/// Converts a [`run`] status code into a process [`ExitCode`].
pub fn exit_code_from(status: i32) -> ExitCode {
    ExitCode::from(status.clamp(0, 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_arguments_return_a_nonzero_status_without_panicking() {
        let mut stderr = Vec::new();
        let status = run(["vtest-server", "--not-a-real-flag"], &mut stderr);
        assert_ne!(status, 0);
        assert!(!stderr.is_empty());
    }

    #[test]
    fn help_flag_exits_cleanly() {
        let mut stderr = Vec::new();
        let status = run(["vtest-server", "--help"], &mut stderr);
        assert_eq!(status, 0);
    }
}
