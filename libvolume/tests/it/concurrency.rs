use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::common::{FakeHost, Harness, opts};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutating_operations_never_overlap() {
    let host = FakeHost {
        delay: Duration::from_millis(5),
        ..FakeHost::default()
    };
    let h = Harness::with_host(host).await;
    for i in 0..4 {
        h.driver
            .create(&format!("v{i}"), &opts(&[("pool", "rbd")]))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for round in 0..3 {
        for i in 0..4 {
            let driver = h.driver.clone();
            let name = format!("v{i}");
            tasks.push(tokio::spawn(async move {
                if round % 2 == 0 {
                    driver.mount(&name).await.map(|_| ())
                } else {
                    driver.unmount(&name).await
                }
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.host.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn records_stay_consistent_under_contention() {
    let h = Harness::new().await;
    h.driver.create("v", &opts(&[("pool", "rbd")])).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let driver = h.driver.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                driver.mount("v").await.map(|_| ())
            } else {
                driver.unmount("v").await
            }
        }));
        let reader = h.driver.clone();
        tasks.push(tokio::spawn(async move {
            let vol = reader.get("v").await?;
            assert_eq!(vol.mountpoint.is_empty(), vol.device.is_empty());
            Ok::<(), libvolume::VolumeError>(())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let vol = h.driver.get("v").await.unwrap();
    assert_eq!(vol.mountpoint.is_empty(), vol.device.is_empty());
    assert_eq!(vol.is_mounted(), h.host.is_mapped("rbd", "v"));
}
