//! Host-side primitives used by [`super::KernelBinder`].
//!
//! [`HostOps`] is the seam between the attach/detach sequencing and the
//! actual kernel: [`SystemHost`] talks to `rbd`, `blkid`, `mkfs` and the
//! mount syscalls.

use std::path::Path;

use async_trait::async_trait;
use nix::mount::MsFlags;
use serde_json::Value;

use crate::cluster::RbdConfig;
use crate::cmd;
use crate::error::CommandFailure;

#[async_trait]
pub trait HostOps: Send + Sync {
    /// Map `pool/image` to a kernel block device and return its path.
    async fn map(&self, pool: &str, image: &str) -> Result<String, CommandFailure>;

    /// Device currently mapped for `pool/image`, if any.
    async fn mapped_device(&self, pool: &str, image: &str)
    -> Result<Option<String>, CommandFailure>;

    async fn unmap(&self, device: &str) -> Result<(), CommandFailure>;

    /// Filesystem type found on `device`, `None` when it is unformatted.
    async fn probe_filesystem(&self, device: &str) -> Result<Option<String>, CommandFailure>;

    async fn make_filesystem(&self, device: &str, fstype: &str) -> Result<(), CommandFailure>;

    async fn ensure_dir(&self, path: &Path) -> Result<(), CommandFailure>;

    async fn is_mounted(&self, path: &Path) -> bool;

    async fn mount(&self, device: &str, path: &Path, fstype: &str) -> Result<(), CommandFailure>;

    async fn unmount(&self, path: &Path) -> Result<(), CommandFailure>;
}

/// [`HostOps`] against the running kernel.  Requires root.
#[derive(Debug, Clone, Default)]
pub struct SystemHost {
    rbd: RbdConfig,
}

impl SystemHost {
    pub fn new(rbd: RbdConfig) -> Self {
        Self { rbd }
    }
}

#[async_trait]
impl HostOps for SystemHost {
    async fn map(&self, pool: &str, image: &str) -> Result<String, CommandFailure> {
        let device = self.rbd.exec(&["map", "--pool", pool, image]).await?;
        if device.is_empty() {
            return Err(CommandFailure::other(format!(
                "rbd map {pool}/{image} printed no device"
            )));
        }
        Ok(device)
    }

    async fn mapped_device(
        &self,
        pool: &str,
        image: &str,
    ) -> Result<Option<String>, CommandFailure> {
        let out = self.rbd.exec(&["showmapped", "--format", "json"]).await?;
        find_mapping(&out, pool, image)
    }

    async fn unmap(&self, device: &str) -> Result<(), CommandFailure> {
        match self.rbd.exec(&["unmap", device]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn probe_filesystem(&self, device: &str) -> Result<Option<String>, CommandFailure> {
        // blkid exits with 2 when it finds nothing to report.
        match cmd::run(
            "blkid",
            &["-o".into(), "value".into(), "-s".into(), "TYPE".into(), device.into()],
        )
        .await
        {
            Ok(fstype) if fstype.is_empty() => Ok(None),
            Ok(fstype) => Ok(Some(fstype)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn make_filesystem(&self, device: &str, fstype: &str) -> Result<(), CommandFailure> {
        cmd::run("mkfs", &["-t".into(), fstype.into(), device.into()])
            .await
            .map(|_| ())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<(), CommandFailure> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| CommandFailure::other(format!("create dir {}: {e}", path.display())))
    }

    async fn is_mounted(&self, path: &Path) -> bool {
        is_mountpoint(path).await
    }

    async fn mount(&self, device: &str, path: &Path, fstype: &str) -> Result<(), CommandFailure> {
        nix::mount::mount(
            Some(device),
            path,
            Some(fstype),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| CommandFailure::from_errno(format!("mount {device} at {}", path.display()), e))
    }

    async fn unmount(&self, path: &Path) -> Result<(), CommandFailure> {
        nix::mount::umount(path)
            .map_err(|e| CommandFailure::from_errno(format!("umount {}", path.display()), e))
    }
}

/// Return `true` if `path` is listed as a mount point in `/proc/self/mounts`.
async fn is_mountpoint(path: &Path) -> bool {
    let contents = match tokio::fs::read_to_string("/proc/self/mounts").await {
        Ok(c) => c,
        Err(_) => return false,
    };
    let Some(path) = path.to_str() else {
        return false;
    };
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|field| unescape_mount_field(field) == path)
}

/// Undo the `\ooo` octal escapes the kernel applies to space, tab, newline
/// and backslash in `/proc/self/mounts` fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let code = bytes
                .get(i + 1..i + 4)
                .and_then(|d| std::str::from_utf8(d).ok())
                .and_then(|d| u8::from_str_radix(d, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Find the device of `pool/image` in `rbd showmapped --format json` output.
///
/// Newer releases print an array of mappings, older ones an object keyed by
/// mapping id; both are accepted.
fn find_mapping(json: &str, pool: &str, image: &str) -> Result<Option<String>, CommandFailure> {
    if json.is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(json)
        .map_err(|e| CommandFailure::other(format!("parse rbd showmapped output: {e}")))?;
    let entries: Vec<&Value> = match &parsed {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    };
    Ok(entries
        .into_iter()
        .find(|m| m["pool"] == pool && m["name"] == image)
        .and_then(|m| m["device"].as_str())
        .map(str::to_owned))
}
