//! Daemon configuration.
//!
//! Every flag can also be supplied through the environment variable named
//! in its `env` attribute, so the plugin can be configured from a systemd
//! unit or a managed plugin's `config.json` without a wrapper script.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use libvolume::{RbdConfig, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Docker volume plugin exposing Ceph RBD images.
#[derive(Debug, Parser)]
#[command(name = "rkvol", version)]
pub struct Cli {
    /// Unix socket the plugin API is served on.
    #[arg(long, env = "RKVOL_SOCKET", default_value = "/run/docker/plugins/rbd.sock")]
    pub socket: PathBuf,

    /// Directory holding one state file per volume.
    #[arg(long, env = "RKVOL_STATE_DIR", default_value = "/var/lib/rkvol")]
    pub state_dir: PathBuf,

    /// Volumes are mounted at `<mount-root>/<name>`.
    #[arg(long, env = "RKVOL_MOUNT_ROOT", default_value = "/mnt/volumes")]
    pub mount_root: PathBuf,

    /// Ceph client id.
    #[arg(long, env = "RKVOL_CEPH_ID", default_value = "admin")]
    pub ceph_id: String,

    #[arg(long, env = "RKVOL_CEPH_CONF", default_value = "/etc/ceph/ceph.conf")]
    pub ceph_conf: PathBuf,

    /// Path or name of the rbd binary.
    #[arg(long, env = "RKVOL_RBD_BINARY", default_value = "rbd")]
    pub rbd_binary: String,

    /// Attempts at removing a busy image before giving up.
    #[arg(long, env = "RKVOL_REMOVE_ATTEMPTS", default_value_t = 5)]
    pub remove_attempts: u32,

    /// Pause between two removal attempts, in milliseconds.
    #[arg(long, env = "RKVOL_REMOVE_BACKOFF_MS", default_value_t = 1000)]
    pub remove_backoff_ms: u64,

    #[arg(long, env = "RKVOL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn rbd_config(&self) -> RbdConfig {
        RbdConfig {
            binary: self.rbd_binary.clone(),
            id: self.ceph_id.clone(),
            conf: self.ceph_conf.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.remove_attempts,
            Duration::from_millis(self.remove_backoff_ms),
        )
    }
}
