//! Cluster sessions.
//!
//! A [`ClusterSession`] is a connection scoped to one pool.  Callers obtain it
//! from a [`ClusterConnector`] and must call [`ClusterSession::shutdown`]
//! exactly once when done, on success and error paths alike.

pub mod rbd;

use async_trait::async_trait;
use tracing::info;

use crate::error::{CommandFailure, VolumeError};
use crate::retry::RetryPolicy;
use crate::types::Volume;

pub use rbd::{RbdConfig, RbdConnector, RbdSession};

/// Parameters of a backing image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: String,
    pub size_mb: u64,
    pub order: u8,
    pub fstype: String,
}

impl From<&Volume> for ImageSpec {
    fn from(v: &Volume) -> Self {
        Self {
            name: v.name.clone(),
            size_mb: v.size_mb,
            order: v.order,
            fstype: v.fstype.clone(),
        }
    }
}

/// Opens sessions against a pool.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect to `pool`; fails with [`VolumeError::Connection`].
    async fn connect(&self, pool: &str) -> Result<Box<dyn ClusterSession>, VolumeError>;
}

/// Image operations within one pool.
#[async_trait]
pub trait ClusterSession: Send + Sync {
    fn pool(&self) -> &str;

    /// `Ok(false)` means the image does not exist; `Err` means existence
    /// could not be determined.
    async fn image_exists(&self, name: &str) -> Result<bool, CommandFailure>;

    async fn create_image(&self, spec: &ImageSpec) -> Result<(), CommandFailure>;

    /// Single removal attempt.  See [`remove_image_with_retries`].
    async fn remove_image(&self, name: &str) -> Result<(), CommandFailure>;

    /// Release the session.
    async fn shutdown(&self);
}

/// Remove `name`, repeating on `Busy` according to `policy`.
///
/// An image that is already gone counts as removed.
pub async fn remove_image_with_retries(
    session: &dyn ClusterSession,
    name: &str,
    policy: &RetryPolicy,
) -> Result<(), CommandFailure> {
    let result = policy
        .run(|attempt| async move {
            info!(pool = session.pool(), %name, attempt, "removing rbd image");
            session.remove_image(name).await
        })
        .await;
    match result {
        Err(e) if e.is_not_found() => {
            info!(pool = session.pool(), %name, "rbd image already removed");
            Ok(())
        }
        other => other,
    }
}
