//! # libvolume: RBD-backed volumes for container runtimes
//!
//! `libvolume` maps externally named volumes onto block images in a Ceph
//! storage pool.  Images are created on demand, mapped to a kernel block
//! device, formatted on first use and mounted under a per-volume path.  The
//! durable record of every volume lives in a small file-backed state store.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: [`Volume`], option parsing, capabilities. |
//! | [`error`] | [`VolumeError`] taxonomy and [`CommandFailure`] classification. |
//! | [`store`] | [`StateStore`]: one JSON document per volume. |
//! | [`cluster`] | [`ClusterConnector`] / [`ClusterSession`] and the `rbd` CLI backend. |
//! | [`retry`] | [`RetryPolicy`] for transient cluster failures. |
//! | [`binder`] | [`DeviceBinder`]: map, format, mount and the inverse. |
//! | [`driver`] | [`VolumeDriver`]: the serialized lifecycle orchestrator. |

pub mod binder;
pub mod cluster;
mod cmd;
pub mod driver;
pub mod error;
pub mod retry;
pub mod store;
pub mod types;

pub use binder::{DeviceBinder, HostOps, KernelBinder, SystemHost};
pub use cluster::{ClusterConnector, ClusterSession, RbdConfig, RbdConnector};
pub use driver::VolumeDriver;
pub use error::{CommandFailure, ErrorKind, FailureKind, VolumeError};
pub use retry::RetryPolicy;
pub use store::StateStore;
pub use types::*;
