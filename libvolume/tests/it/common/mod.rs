//! In-memory stand-ins for the storage cluster and the host kernel.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libvolume::cluster::ImageSpec;
use libvolume::{
    ClusterConnector, ClusterSession, CommandFailure, HostOps, KernelBinder, RetryPolicy,
    StateStore, VolumeDriver, VolumeError,
};

#[derive(Default)]
pub struct ClusterState {
    pub images: HashMap<(String, String), ImageSpec>,
    pub unreachable: bool,
    /// Number of upcoming `rm` calls that report the image as busy.
    pub busy_removals: u32,
    pub fail_exists: bool,
    pub connects: usize,
    pub shutdowns: usize,
    pub creates: usize,
    pub remove_attempts: usize,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    pub state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn with_image(&self, pool: &str, name: &str) {
        self.state.lock().unwrap().images.insert(
            (pool.into(), name.into()),
            ImageSpec {
                name: name.into(),
                size_mb: 2048,
                order: 22,
                fstype: "ext4".into(),
            },
        );
    }

    pub fn has_image(&self, pool: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .images
            .contains_key(&(pool.into(), name.into()))
    }

    pub fn image(&self, pool: &str, name: &str) -> Option<ImageSpec> {
        self.state
            .lock()
            .unwrap()
            .images
            .get(&(pool.into(), name.into()))
            .cloned()
    }
}

#[async_trait]
impl ClusterConnector for FakeCluster {
    async fn connect(&self, pool: &str) -> Result<Box<dyn ClusterSession>, VolumeError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(VolumeError::Connection {
                pool: pool.into(),
                reason: "connection timed out".into(),
            });
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            pool: pool.into(),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeSession {
    pool: String,
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl ClusterSession for FakeSession {
    fn pool(&self) -> &str {
        &self.pool
    }

    async fn image_exists(&self, name: &str) -> Result<bool, CommandFailure> {
        let state = self.state.lock().unwrap();
        if state.fail_exists {
            return Err(CommandFailure::other("rbd: timed out"));
        }
        Ok(state
            .images
            .contains_key(&(self.pool.clone(), name.to_owned())))
    }

    async fn create_image(&self, spec: &ImageSpec) -> Result<(), CommandFailure> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state
            .images
            .insert((self.pool.clone(), spec.name.clone()), spec.clone());
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<(), CommandFailure> {
        let mut state = self.state.lock().unwrap();
        state.remove_attempts += 1;
        if state.busy_removals > 0 {
            state.busy_removals -= 1;
            return Err(CommandFailure::busy("rbd: error: image still has watchers"));
        }
        match state.images.remove(&(self.pool.clone(), name.to_owned())) {
            Some(_) => Ok(()),
            None => Err(CommandFailure::not_found("No such file or directory")),
        }
    }

    async fn shutdown(&self) {
        self.state.lock().unwrap().shutdowns += 1;
    }
}

#[derive(Default)]
pub struct HostState {
    pub mapped: HashMap<String, String>,
    pub formatted: HashMap<String, String>,
    pub mounted: HashSet<PathBuf>,
    pub next_device: usize,
    pub fail_mount: bool,
    pub fail_unmount: bool,
}

/// Host whose map and unmount calls take a little time and track how many
/// run at once.
#[derive(Clone, Default)]
pub struct FakeHost {
    pub state: Arc<Mutex<HostState>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl FakeHost {
    async fn slow_step(&self) {
        if self.delay.is_zero() {
            return;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_mapped(&self, pool: &str, image: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .mapped
            .contains_key(&format!("{pool}/{image}"))
    }

    pub fn is_mounted_at(&self, path: &str) -> bool {
        self.state.lock().unwrap().mounted.contains(Path::new(path))
    }
}

#[async_trait]
impl HostOps for FakeHost {
    async fn map(&self, pool: &str, image: &str) -> Result<String, CommandFailure> {
        self.slow_step().await;
        let mut state = self.state.lock().unwrap();
        let device = format!("/dev/rbd{}", state.next_device);
        state.next_device += 1;
        state.mapped.insert(format!("{pool}/{image}"), device.clone());
        Ok(device)
    }

    async fn mapped_device(
        &self,
        pool: &str,
        image: &str,
    ) -> Result<Option<String>, CommandFailure> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mapped
            .get(&format!("{pool}/{image}"))
            .cloned())
    }

    async fn unmap(&self, device: &str) -> Result<(), CommandFailure> {
        self.state
            .lock()
            .unwrap()
            .mapped
            .retain(|_, d| d.as_str() != device);
        Ok(())
    }

    async fn probe_filesystem(&self, device: &str) -> Result<Option<String>, CommandFailure> {
        Ok(self.state.lock().unwrap().formatted.get(device).cloned())
    }

    async fn make_filesystem(&self, device: &str, fstype: &str) -> Result<(), CommandFailure> {
        self.state
            .lock()
            .unwrap()
            .formatted
            .insert(device.into(), fstype.into());
        Ok(())
    }

    async fn ensure_dir(&self, _path: &Path) -> Result<(), CommandFailure> {
        Ok(())
    }

    async fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().unwrap().mounted.contains(path)
    }

    async fn mount(&self, device: &str, path: &Path, _fstype: &str) -> Result<(), CommandFailure> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mount {
            return Err(CommandFailure::other(format!(
                "mount {device} at {}: wrong fs type",
                path.display()
            )));
        }
        state.mounted.insert(path.to_owned());
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<(), CommandFailure> {
        self.slow_step().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_unmount {
            return Err(CommandFailure::busy(format!(
                "umount {}: Device or resource busy",
                path.display()
            )));
        }
        state.mounted.remove(path);
        Ok(())
    }
}

pub type TestDriver = VolumeDriver<FakeCluster, KernelBinder<FakeHost>>;

pub struct Harness {
    pub driver: Arc<TestDriver>,
    pub cluster: FakeCluster,
    pub host: FakeHost,
    pub _state_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_host(FakeHost::default()).await
    }

    pub async fn with_host(host: FakeHost) -> Self {
        let state_dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(state_dir.path()).await.unwrap();
        let cluster = FakeCluster::default();
        let driver = VolumeDriver::new(
            store,
            cluster.clone(),
            KernelBinder::new(host.clone(), "/mnt/volumes"),
            RetryPolicy::new(3, Duration::ZERO),
        );
        Self {
            driver: Arc::new(driver),
            cluster,
            host,
            _state_dir: state_dir,
        }
    }

    pub fn cluster_state(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.cluster.state.lock().unwrap()
    }
}

pub fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
