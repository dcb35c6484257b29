use libvolume::ErrorKind;

use crate::common::{Harness, opts};

#[tokio::test]
async fn remove_tears_down_mounted_volume_first() {
    let h = Harness::new().await;
    let d = &h.driver;
    d.create("v", &opts(&[("pool", "rbd")])).await.unwrap();
    d.mount("v").await.unwrap();

    d.remove("v").await.unwrap();
    assert!(!h.host.is_mounted_at("/mnt/volumes/v"));
    assert!(!h.host.is_mapped("rbd", "v"));
    assert!(!h.cluster.has_image("rbd", "v"));
    assert_eq!(d.get("v").await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn remove_without_backing_image_deletes_record() {
    let h = Harness::new().await;
    let d = &h.driver;
    d.create("v", &opts(&[("pool", "rbd")])).await.unwrap();
    h.cluster_state().images.clear();

    d.remove("v").await.unwrap();
    assert_eq!(h.cluster_state().remove_attempts, 0);
    assert_eq!(d.get("v").await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn remove_retries_busy_image() {
    let h = Harness::new().await;
    let d = &h.driver;
    d.create("v", &opts(&[("pool", "rbd")])).await.unwrap();
    h.cluster_state().busy_removals = 2;

    d.remove("v").await.unwrap();
    assert_eq!(h.cluster_state().remove_attempts, 3);
    assert!(!h.cluster.has_image("rbd", "v"));
}

#[tokio::test]
async fn remove_gives_up_after_bound_and_keeps_record() {
    let h = Harness::new().await;
    let d = &h.driver;
    d.create("v", &opts(&[("pool", "rbd")])).await.unwrap();
    h.cluster_state().busy_removals = 10;

    let err = d.remove("v").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cluster);
    assert!(err.to_string().contains("still has watchers"));
    assert_eq!(h.cluster_state().remove_attempts, 3);
    assert!(h.cluster.has_image("rbd", "v"));
    assert!(d.get("v").await.is_ok());
}

#[tokio::test]
async fn remove_teardown_failure_keeps_image_and_record() {
    let h = Harness::new().await;
    let d = &h.driver;
    d.create("v", &opts(&[("pool", "rbd")])).await.unwrap();
    d.mount("v").await.unwrap();
    h.host.state.lock().unwrap().fail_unmount = true;

    let err = d.remove("v").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(h.cluster.has_image("rbd", "v"));
    assert_eq!(h.cluster_state().remove_attempts, 0);
    assert!(d.get("v").await.is_ok());
}

#[tokio::test]
async fn every_session_is_closed_once() {
    let h = Harness::new().await;
    let d = &h.driver;
    d.create("a", &opts(&[("pool", "rbd")])).await.unwrap();
    d.create("b", &opts(&[("pool", "rbd")])).await.unwrap();
    h.cluster_state().busy_removals = 10;
    d.remove("a").await.unwrap_err();
    h.cluster_state().busy_removals = 0;
    d.remove("b").await.unwrap();

    let state = h.cluster_state();
    assert_eq!(state.connects, 4);
    assert_eq!(state.shutdowns, 4);
}
