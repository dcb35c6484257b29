//! Device binding: exposing an image as a mounted filesystem on this host.
//!
//! [`KernelBinder`] sequences the steps of attach and detach over a
//! [`HostOps`] implementation.  Each attach step that changes host state
//! records its inverse in a [`Rollback`]; when a later step fails the
//! recorded compensations run in reverse order before the error is returned.

mod host;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::VolumeError;
use crate::types::Attachment;

pub use host::{HostOps, SystemHost};

/// Local attach/detach of a volume's backing image.
#[async_trait]
pub trait DeviceBinder: Send + Sync {
    /// Map, format if blank, and mount `pool/name`.
    async fn attach(&self, pool: &str, name: &str, fstype: &str)
    -> Result<Attachment, VolumeError>;

    /// Unmount `mountpoint` (or the generated path when empty) and unmap the
    /// device.  Succeeds when there is nothing left to tear down.
    async fn detach(&self, pool: &str, name: &str, mountpoint: &str) -> Result<(), VolumeError>;
}

/// Inverse of a completed attach step.
///
/// Mounting is the last step of an attach, so only a fresh kernel mapping
/// ever needs undoing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Release a device mapped by this attach.
    Unmap(String),
}

/// Ordered list of compensations for the steps completed so far.
#[derive(Debug, Default)]
pub struct Rollback {
    steps: Vec<Compensation>,
}

impl Rollback {
    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Compensation] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run all compensations, most recent first.  Failures are logged and do
    /// not stop the remaining steps.
    pub async fn unwind<H: HostOps + ?Sized>(self, host: &H, name: &str) {
        for step in self.steps.into_iter().rev() {
            let result = match &step {
                Compensation::Unmap(device) => host.unmap(device).await,
            };
            match result {
                Ok(()) => debug!(%name, ?step, "compensation applied"),
                Err(e) => warn!(%name, ?step, error = %e, "compensation failed"),
            }
        }
    }
}

/// [`DeviceBinder`] that mounts under `<mount_root>/<name>`.
#[derive(Debug)]
pub struct KernelBinder<H> {
    host: H,
    mount_root: PathBuf,
}

impl<H: HostOps> KernelBinder<H> {
    pub fn new(host: H, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            mount_root: mount_root.into(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn mount_path(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }

    async fn attach_steps(
        &self,
        pool: &str,
        name: &str,
        fstype: &str,
        mountpoint: &Path,
        rollback: &mut Rollback,
    ) -> Result<String, VolumeError> {
        self.host
            .ensure_dir(mountpoint)
            .await
            .map_err(|e| VolumeError::device("create mount directory", name, e))?;

        let existing = self
            .host
            .mapped_device(pool, name)
            .await
            .map_err(|e| VolumeError::device("query mapping", name, e))?;
        let device = match existing {
            Some(device) => {
                debug!(%name, %device, "image already mapped, reusing device");
                device
            }
            None => {
                let device = self
                    .host
                    .map(pool, name)
                    .await
                    .map_err(|e| VolumeError::device("map", name, e))?;
                rollback.push(Compensation::Unmap(device.clone()));
                device
            }
        };

        let found = self
            .host
            .probe_filesystem(&device)
            .await
            .map_err(|e| VolumeError::device("probe filesystem", name, e))?;
        let mount_fstype = match found {
            Some(found) => {
                if found != fstype {
                    warn!(%name, %device, requested = %fstype, %found, "device carries a different filesystem, keeping it");
                }
                found
            }
            None => {
                info!(%name, %device, %fstype, "creating filesystem");
                self.host
                    .make_filesystem(&device, fstype)
                    .await
                    .map_err(|e| VolumeError::device("mkfs", name, e))?;
                fstype.to_owned()
            }
        };

        if self.host.is_mounted(mountpoint).await {
            debug!(%name, mountpoint = %mountpoint.display(), "already mounted");
        } else {
            self.host
                .mount(&device, mountpoint, &mount_fstype)
                .await
                .map_err(|e| VolumeError::device("mount", name, e))?;
        }

        Ok(device)
    }
}

#[async_trait]
impl<H: HostOps> DeviceBinder for KernelBinder<H> {
    #[instrument(skip(self))]
    async fn attach(
        &self,
        pool: &str,
        name: &str,
        fstype: &str,
    ) -> Result<Attachment, VolumeError> {
        let mountpoint = self.mount_path(name);
        let mut rollback = Rollback::default();

        match self
            .attach_steps(pool, name, fstype, &mountpoint, &mut rollback)
            .await
        {
            Ok(device) => {
                info!(%device, mountpoint = %mountpoint.display(), "volume attached");
                Ok(Attachment {
                    device,
                    mountpoint: mountpoint.display().to_string(),
                })
            }
            Err(e) => {
                if !rollback.is_empty() {
                    warn!(error = %e, steps = rollback.steps().len(), "attach failed, rolling back");
                }
                rollback.unwind(&self.host, name).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    async fn detach(&self, pool: &str, name: &str, mountpoint: &str) -> Result<(), VolumeError> {
        let path = if mountpoint.is_empty() {
            self.mount_path(name)
        } else {
            PathBuf::from(mountpoint)
        };

        if self.host.is_mounted(&path).await {
            self.host
                .unmount(&path)
                .await
                .map_err(|e| VolumeError::device("unmount", name, e))?;
        } else {
            debug!(path = %path.display(), "not mounted");
        }

        let device = self
            .host
            .mapped_device(pool, name)
            .await
            .map_err(|e| VolumeError::device("query mapping", name, e))?;
        match device {
            Some(device) => {
                self.host
                    .unmap(&device)
                    .await
                    .map_err(|e| VolumeError::device("unmap", name, e))?;
                info!(%device, "volume detached");
            }
            None => debug!("image not mapped"),
        }
        Ok(())
    }
}
