//! The volume lifecycle orchestrator.
//!
//! [`VolumeDriver`] owns the [`StateStore`] behind a single read/write lock.
//! Mutating operations (`create`, `remove`, `mount`, `unmount`) hold the
//! write half for their whole duration, including every cluster and host
//! call, so lifecycle transitions form a total order across all volumes.
//! `get`, `list` and `path` share the read half.
//!
//! Cluster sessions opened by `create` and `remove` are shut down exactly
//! once before the operation returns, whichever step failed.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::binder::DeviceBinder;
use crate::cluster::{ClusterConnector, ClusterSession, ImageSpec, remove_image_with_retries};
use crate::error::{CommandFailure, VolumeError};
use crate::retry::RetryPolicy;
use crate::store::StateStore;
use crate::types::{
    Attachment, Capabilities, Scope, Volume, VolumeOptions, VolumeSummary, validate_name,
};

/// Serializes the volume lifecycle over a cluster connector `C` and a
/// device binder `B`, persisting every transition in a [`StateStore`].
pub struct VolumeDriver<C, B> {
    state: RwLock<StateStore>,
    connector: C,
    binder: B,
    retry: RetryPolicy,
}

impl<C, B> VolumeDriver<C, B>
where
    C: ClusterConnector,
    B: DeviceBinder,
{
    pub fn new(store: StateStore, connector: C, binder: B, retry: RetryPolicy) -> Self {
        Self {
            state: RwLock::new(store),
            connector,
            binder,
            retry,
        }
    }

    pub fn binder(&self) -> &B {
        &self.binder
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Ensure the backing image exists and record the volume.
    ///
    /// Options are validated before anything else happens.  The record is
    /// written last, so a failure on the cluster side leaves no record.  An
    /// existing record is kept as is (its mount state stays authoritative)
    /// and the image it points at is the one reconciled, whatever pool the
    /// new options name.
    #[instrument(skip(self, options))]
    pub async fn create(
        &self,
        name: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), VolumeError> {
        info!(request = "Create");
        let result: Result<(), VolumeError> = async {
            validate_name(name)?;
            let volume = VolumeOptions::parse(name, options)?.into_volume(name);

            let store = self.state.write().await;
            let existing = match store.get(name).await {
                Ok(v) => Some(v),
                Err(VolumeError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };

            let target = match &existing {
                Some(existing) => {
                    if existing.pool != volume.pool {
                        warn!(
                            recorded = %existing.pool,
                            requested = %volume.pool,
                            "ignoring requested pool for an existing volume",
                        );
                    }
                    existing
                }
                None => &volume,
            };

            let session = self.connector.connect(&target.pool).await?;
            let provisioned = self.provision(session.as_ref(), target).await;
            session.shutdown().await;
            provisioned?;

            match existing {
                Some(existing) => {
                    warn!(pool = %existing.pool, "volume state already exists, keeping it");
                    Ok(())
                }
                None => store.set(&volume).await,
            }
        }
        .await;
        result.inspect_err(|e| error!(error = %e, "Create failed"))
    }

    async fn provision(
        &self,
        session: &dyn ClusterSession,
        volume: &Volume,
    ) -> Result<(), VolumeError> {
        let exists = session
            .image_exists(&volume.name)
            .await
            .map_err(|e| cluster_error("check image", volume, e))?;
        if exists {
            warn!(pool = %volume.pool, "skipping image create: ceph rbd image exists");
            return Ok(());
        }
        session
            .create_image(&ImageSpec::from(volume))
            .await
            .map_err(|e| cluster_error("create image", volume, e))
    }

    /// The persisted record of `name`.
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<Volume, VolumeError> {
        info!(request = "Get");
        let store = self.state.read().await;
        store
            .get(name)
            .await
            .inspect_err(|e| error!(error = %e, "Get failed"))
    }

    /// Name and mountpoint of every known volume.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<VolumeSummary>, VolumeError> {
        info!(request = "List");
        let store = self.state.read().await;
        let volumes = store
            .list()
            .await
            .inspect_err(|e| error!(error = %e, "List failed"))?;
        Ok(volumes.iter().map(Volume::summary).collect())
    }

    /// Current mountpoint of `name`; empty when unmounted.
    #[instrument(skip(self))]
    pub async fn path(&self, name: &str) -> Result<String, VolumeError> {
        info!(request = "Path");
        let store = self.state.read().await;
        store
            .get(name)
            .await
            .map(|v| v.mountpoint)
            .inspect_err(|e| error!(error = %e, "Path failed"))
    }

    /// Attach and mount `name`, then record the device and mountpoint.
    ///
    /// A volume that already has a mountpoint is attached again rather than
    /// short-circuited; the binder reuses an existing mapping and mount.
    /// If the record cannot be written, a fresh attachment is torn down again
    /// so the host matches the record that is still on disk.
    #[instrument(skip(self))]
    pub async fn mount(&self, name: &str) -> Result<Attachment, VolumeError> {
        info!(request = "Mount");
        let result: Result<Attachment, VolumeError> = async {
            let store = self.state.write().await;
            let mut volume = store.get(name).await?;
            let was_mounted = volume.is_mounted();
            if was_mounted {
                warn!(
                    mountpoint = %volume.mountpoint,
                    "volume has a previously registered mountpoint",
                );
            }

            let attachment = self
                .binder
                .attach(&volume.pool, &volume.name, &volume.fstype)
                .await?;
            volume.attach(&attachment);
            if let Err(e) = store.set(&volume).await {
                if !was_mounted {
                    if let Err(undo) = self
                        .binder
                        .detach(&volume.pool, &volume.name, &attachment.mountpoint)
                        .await
                    {
                        error!(error = %undo, "unable to detach after failed state write");
                    }
                }
                return Err(e);
            }
            Ok(attachment)
        }
        .await;
        result.inspect_err(|e| error!(error = %e, "Mount failed"))
    }

    /// Unmount and unmap `name`, then clear its device and mountpoint.
    ///
    /// If the cleared record cannot be written, a volume that was mounted is
    /// attached again so the host matches the record that is still on disk.
    #[instrument(skip(self))]
    pub async fn unmount(&self, name: &str) -> Result<(), VolumeError> {
        info!(request = "Unmount");
        let result: Result<(), VolumeError> = async {
            let store = self.state.write().await;
            let mut volume = store.get(name).await?;
            let recorded = volume.clone();
            self.binder
                .detach(&volume.pool, &volume.name, &volume.mountpoint)
                .await?;
            volume.detach();
            if let Err(e) = store.set(&volume).await {
                if recorded.is_mounted() {
                    if let Err(undo) = self
                        .binder
                        .attach(&recorded.pool, &recorded.name, &recorded.fstype)
                        .await
                    {
                        error!(error = %undo, "unable to reattach after failed state write");
                    }
                }
                return Err(e);
            }
            Ok(())
        }
        .await;
        result.inspect_err(|e| error!(error = %e, "Unmount failed"))
    }

    /// Tear down, delete the backing image and forget `name`.
    ///
    /// Order: detach, remove the image (retrying while it is busy), delete
    /// the record.  The record survives any failure before the last step.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        info!(request = "Remove");
        let result: Result<(), VolumeError> = async {
            let store = self.state.write().await;
            let volume = store.get(name).await?;

            let session = self.connector.connect(&volume.pool).await?;
            let decommissioned = self.decommission(session.as_ref(), &volume).await;
            session.shutdown().await;
            decommissioned?;

            store.delete(name).await
        }
        .await;
        result.inspect_err(|e| error!(error = %e, "Remove failed"))
    }

    async fn decommission(
        &self,
        session: &dyn ClusterSession,
        volume: &Volume,
    ) -> Result<(), VolumeError> {
        let exists = session
            .image_exists(&volume.name)
            .await
            .map_err(|e| cluster_error("check image", volume, e))?;
        if !exists {
            warn!(pool = %volume.pool, "skipping image remove: ceph rbd image does not exist");
            return Ok(());
        }

        self.binder
            .detach(&volume.pool, &volume.name, &volume.mountpoint)
            .await?;
        remove_image_with_retries(session, &volume.name, &self.retry)
            .await
            .map_err(|e| cluster_error("remove image", volume, e))
    }

    /// Static plugin capabilities.  Volumes live in a shared cluster and are
    /// visible from every host.
    pub fn capabilities(&self) -> Capabilities {
        info!(request = "Capabilities");
        Capabilities {
            scope: Scope::Global,
        }
    }
}

fn cluster_error(op: &'static str, volume: &Volume, source: CommandFailure) -> VolumeError {
    VolumeError::Cluster {
        op,
        pool: volume.pool.clone(),
        name: volume.name.clone(),
        source,
    }
}
