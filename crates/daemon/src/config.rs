use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for the `vtest-server` binary.
///
/// A small, handler-oriented argument surface: a listen target plus the
/// handful of knobs the dispatcher itself actually consults.
#[derive(Debug, Parser)]
#[command(name = "vtest-server", version, about = "vtest command-dispatch test server")]
pub struct DaemonConfig {
    /// Unix-domain socket path to listen on.
    #[arg(long, default_value = "/tmp/vtest.sock")]
    pub listen: PathBuf,

    /// Upper bound on `length_dw * 4` for any non-`CREATE_CONTEXT` command.
    #[arg(long, default_value_t = u32::MAX)]
    pub max_length: u32,

    /// Reject protocol negotiations below version 3.
    #[arg(long)]
    pub multi_client: bool,

    /// Pretend shared memory is unavailable on this host, forcing every
    /// connection's negotiated protocol version down to 0.
    #[arg(long)]
    pub no_shm: bool,

    /// Mirror every inbound byte stream to this file, equivalent to setting
    /// `VTEST_SAVE` before startup.
    #[arg(long)]
    pub save: Option<PathBuf>,
}

impl DaemonConfig {
    /// Builds the dispatcher-facing configuration from the parsed flags.
    pub fn core_config(&self) -> vtest_core::CoreConfig {
        vtest_core::CoreConfig {
            max_length: self.max_length,
            multi_client: self.multi_client,
            shm_available: !self.no_shm,
        }
    }

    /// Applies `--save` by setting `VTEST_SAVE` for the process, if given.
    /// Must run before the first connection is accepted, since
    /// `vtest-proto` reads the variable once per stream at construction.
    #[allow(unsafe_code)]
    pub fn apply_save_override(&self) {
        if let Some(path) = &self.save {
            unsafe {
                std::env::set_var(vtest_proto::VTEST_SAVE_ENV, path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_single_client_and_full_length() {
        let config = DaemonConfig::parse_from(["vtest-server"]);
        assert_eq!(config.max_length, u32::MAX);
        assert!(!config.multi_client);
        assert!(!config.no_shm);
        let core = config.core_config();
        assert_eq!(core.max_length, u32::MAX);
        assert!(!core.multi_client);
        assert!(core.shm_available);
    }

    #[test]
    fn no_shm_flag_disables_shared_memory() {
        let config = DaemonConfig::parse_from(["vtest-server", "--no-shm"]);
        assert!(!config.core_config().shm_available);
    }
}
