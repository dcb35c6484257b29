//! Cluster sessions over the `rbd` command-line tool.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ClusterConnector, ClusterSession, ImageSpec};
use crate::cmd;
use crate::error::{CommandFailure, VolumeError};

/// How to invoke `rbd`.
#[derive(Debug, Clone)]
pub struct RbdConfig {
    /// Path or name of the `rbd` binary.
    pub binary: String,
    /// Ceph client id (`--id`).
    pub id: String,
    /// Ceph configuration file (`--conf`).
    pub conf: PathBuf,
}

impl Default for RbdConfig {
    fn default() -> Self {
        Self {
            binary: "rbd".to_owned(),
            id: "admin".to_owned(),
            conf: PathBuf::from("/etc/ceph/ceph.conf"),
        }
    }
}

impl RbdConfig {
    pub(crate) fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full = vec![
            "--id".to_owned(),
            self.id.clone(),
            "--conf".to_owned(),
            self.conf.display().to_string(),
        ];
        full.extend(args.iter().map(|a| (*a).to_owned()));
        full
    }

    pub(crate) async fn exec(&self, args: &[&str]) -> Result<String, CommandFailure> {
        cmd::run(&self.binary, &self.args(args)).await
    }
}

/// [`ClusterConnector`] that shells out to `rbd`.
#[derive(Debug, Clone, Default)]
pub struct RbdConnector {
    config: RbdConfig,
}

impl RbdConnector {
    pub fn new(config: RbdConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterConnector for RbdConnector {
    async fn connect(&self, pool: &str) -> Result<Box<dyn ClusterSession>, VolumeError> {
        // Listing the pool proves both monitor connectivity and pool access.
        self.config
            .exec(&["ls", "--pool", pool])
            .await
            .map_err(|e| VolumeError::Connection {
                pool: pool.to_owned(),
                reason: e.to_string(),
            })?;
        debug!(%pool, "connected to ceph pool");
        Ok(Box::new(RbdSession {
            config: self.config.clone(),
            pool: pool.to_owned(),
        }))
    }
}

/// A [`ClusterSession`] bound to one pool; every call is a separate `rbd`
/// invocation, so there is no connection to release on shutdown.
#[derive(Debug)]
pub struct RbdSession {
    config: RbdConfig,
    pool: String,
}

#[async_trait]
impl ClusterSession for RbdSession {
    fn pool(&self) -> &str {
        &self.pool
    }

    async fn image_exists(&self, name: &str) -> Result<bool, CommandFailure> {
        match self.config.exec(&["info", "--pool", &self.pool, name]).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_image(&self, spec: &ImageSpec) -> Result<(), CommandFailure> {
        let size = spec.size_mb.to_string();
        let order = spec.order.to_string();
        self.config
            .exec(&[
                "create", "--pool", &self.pool, "--size", &size, "--order", &order, &spec.name,
            ])
            .await?;
        // The filesystem is made on first attach; remember which one was asked for.
        self.config
            .exec(&[
                "image-meta",
                "set",
                "--pool",
                &self.pool,
                &spec.name,
                "fstype",
                &spec.fstype,
            ])
            .await?;
        info!(pool = %self.pool, name = %spec.name, size_mb = spec.size_mb, "rbd image created");
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<(), CommandFailure> {
        self.config
            .exec(&["rm", "--no-progress", "--pool", &self.pool, name])
            .await
            .map(|_| ())
    }

    async fn shutdown(&self) {
        debug!(pool = %self.pool, "ceph session closed");
    }
}
