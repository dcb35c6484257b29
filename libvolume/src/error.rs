//! Error types.
//!
//! Every lifecycle operation fails with a [`VolumeError`].  Failures of the
//! external tools (`rbd`, `blkid`, `mkfs`, mount syscalls) are first captured
//! as a [`CommandFailure`], whose [`FailureKind`] drives the retry policy, and
//! are then wrapped with the volume and operation they belong to.

use thiserror::Error;

/// Coarse classification of an external command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The object the command operated on does not exist.
    NotFound,
    /// The object exists but is temporarily in use (e.g. an image with
    /// watchers that the kernel has not released yet).
    Busy,
    /// Anything else.
    Other,
}

/// A failed invocation of an external tool or syscall.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandFailure {
    /// Classification used by retry and idempotency decisions.
    pub kind: FailureKind,
    /// Command line or syscall context followed by the tool's own error text.
    pub message: String,
}

impl CommandFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Busy, message)
    }

    /// Only `Busy` failures are worth repeating.
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Busy
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FailureKind::NotFound
    }

    /// Map a raw errno from a syscall into a failure.
    pub fn from_errno(context: impl std::fmt::Display, errno: nix::errno::Errno) -> Self {
        let kind = match errno {
            nix::errno::Errno::ENOENT => FailureKind::NotFound,
            nix::errno::Errno::EBUSY => FailureKind::Busy,
            _ => FailureKind::Other,
        };
        Self::new(kind, format!("{context}: {errno}"))
    }
}

/// Discriminant of [`VolumeError`], stable for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Connection,
    Cluster,
    Device,
    StateStore,
}

/// Unified error type for volume lifecycle operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// Bad, missing or unknown option, or an unusable volume name.
    #[error("invalid configuration for volume {name}: {reason}")]
    Configuration { name: String, reason: String },

    /// No record exists for the volume.
    #[error("volume {0} not found")]
    NotFound(String),

    /// The storage cluster could not be reached.
    #[error("unable to connect to ceph pool {pool}: {reason}")]
    Connection { pool: String, reason: String },

    /// An image-level operation in the cluster failed.
    #[error("{op} failed for rbd image {pool}/{name}: {source}")]
    Cluster {
        op: &'static str,
        pool: String,
        name: String,
        #[source]
        source: CommandFailure,
    },

    /// A host-side step (map, mkfs, mount, unmount, unmap) failed.
    #[error("{op} failed for volume {name}: {source}")]
    Device {
        op: &'static str,
        name: String,
        #[source]
        source: CommandFailure,
    },

    /// Reading or writing the persisted record failed.
    #[error("unable to {op} state of volume {name}: {reason}")]
    StateStore {
        op: &'static str,
        name: String,
        reason: String,
    },
}

impl VolumeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Cluster { .. } => ErrorKind::Cluster,
            Self::Device { .. } => ErrorKind::Device,
            Self::StateStore { .. } => ErrorKind::StateStore,
        }
    }

    pub(crate) fn config(name: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn device(op: &'static str, name: &str, source: CommandFailure) -> Self {
        Self::Device {
            op,
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn state<E: std::fmt::Display>(op: &'static str, name: &str, e: E) -> Self {
        Self::StateStore {
            op,
            name: name.to_owned(),
            reason: e.to_string(),
        }
    }
}
