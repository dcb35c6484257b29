//! Core data model: volumes, creation options and plugin capabilities.
//!
//! [`Volume`] is the persisted record.  It is [`Serialize`]/[`Deserialize`] so
//! the state store can keep it as JSON across process restarts.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::VolumeError;

pub const DEFAULT_FSTYPE: &str = "ext4";
/// Default image size in MB.
pub const DEFAULT_SIZE_MB: u64 = 512;
/// Default object size exponent (4 MiB objects).
pub const DEFAULT_ORDER: u8 = 22;
/// Object orders accepted by the cluster.
pub const ORDER_RANGE: RangeInclusive<u8> = 12..=25;

// ---------------------------------------------------------------------------
// Volume record
// ---------------------------------------------------------------------------

/// A named volume backed by one RBD image.
///
/// `name`, `fstype`, `pool`, `size_mb` and `order` are fixed at creation.
/// `mountpoint` and `device` are either both empty or both set, and only
/// mount/unmount change them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub fstype: String,
    pub pool: String,
    pub size_mb: u64,
    pub order: u8,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub device: String,
}

impl Volume {
    pub fn is_mounted(&self) -> bool {
        !self.mountpoint.is_empty()
    }

    pub fn summary(&self) -> VolumeSummary {
        VolumeSummary {
            name: self.name.clone(),
            mountpoint: self.mountpoint.clone(),
        }
    }

    pub(crate) fn attach(&mut self, attachment: &Attachment) {
        self.device = attachment.device.clone();
        self.mountpoint = attachment.mountpoint.clone();
    }

    pub(crate) fn detach(&mut self) {
        self.device.clear();
        self.mountpoint.clear();
    }
}

/// Name and mountpoint, as reported by `Get` and `List`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: String,
}

/// Result of a successful attach: the mapped device and where it is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub device: String,
    pub mountpoint: String,
}

// ---------------------------------------------------------------------------
// Creation options
// ---------------------------------------------------------------------------

/// Validated option set for `Create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    pub pool: String,
    pub size_mb: u64,
    pub order: u8,
    pub fstype: String,
}

impl VolumeOptions {
    /// Parse the caller-supplied options.
    ///
    /// Recognised keys are `pool` (required), `size`, `order` and `fstype`.
    /// Keys are checked in sorted order so the reported error is stable.
    pub fn parse(name: &str, options: &HashMap<String, String>) -> Result<Self, VolumeError> {
        let mut pool = None;
        let mut size_mb = DEFAULT_SIZE_MB;
        let mut order = DEFAULT_ORDER;
        let mut fstype = DEFAULT_FSTYPE.to_owned();

        let mut keys: Vec<&String> = options.keys().collect();
        keys.sort();
        for key in keys {
            let value = options[key].as_str();
            match key.as_str() {
                "pool" => pool = Some(value.to_owned()),
                "size" => {
                    size_mb = value.parse::<u64>().map_err(|e| {
                        VolumeError::config(name, format!("unable to parse size {value:?}: {e}"))
                    })?;
                    if size_mb == 0 {
                        return Err(VolumeError::config(name, "size must be greater than 0"));
                    }
                }
                "order" => {
                    let parsed = value.parse::<i64>().map_err(|e| {
                        VolumeError::config(name, format!("unable to parse order {value:?}: {e}"))
                    })?;
                    order = u8::try_from(parsed)
                        .ok()
                        .filter(|o| ORDER_RANGE.contains(o))
                        .ok_or_else(|| {
                            VolumeError::config(
                                name,
                                format!(
                                    "order {parsed} out of range {}..={}",
                                    ORDER_RANGE.start(),
                                    ORDER_RANGE.end()
                                ),
                            )
                        })?;
                }
                "fstype" => {
                    if value.is_empty() {
                        return Err(VolumeError::config(name, "fstype must not be empty"));
                    }
                    fstype = value.to_owned();
                }
                other => {
                    return Err(VolumeError::config(name, format!("unknown option {other:?}")));
                }
            }
        }

        let pool = pool
            .filter(|p| !p.is_empty())
            .ok_or_else(|| VolumeError::config(name, "pool option required"))?;

        Ok(Self {
            pool,
            size_mb,
            order,
            fstype,
        })
    }

    /// Build the unmounted record for a new volume.
    pub fn into_volume(self, name: &str) -> Volume {
        Volume {
            name: name.to_owned(),
            fstype: self.fstype,
            pool: self.pool,
            size_mb: self.size_mb,
            order: self.order,
            mountpoint: String::new(),
            device: String::new(),
        }
    }
}

/// Reject names that cannot be used as an image name and a file name.
pub fn validate_name(name: &str) -> Result<(), VolumeError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(VolumeError::config(name, "volume name is not usable"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(VolumeError::config(
            name,
            "volume name must not contain '/' or NUL",
        ));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(VolumeError::config(
            name,
            "volume name must not contain whitespace",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Visibility of volumes across hosts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Volumes are only usable on the host that created them.
    Local,
    /// Volumes live in shared storage and can be attached from any host.
    Global,
}

/// Static descriptor returned by `Capabilities`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub scope: Scope,
}
