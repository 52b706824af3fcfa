//! Tests for the coordinator service loop.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    alice, bob, init_tracing, offer, small_file, test_config, MockGateway, RecordingSink,
};
use serde_json::json;

use xhare_core::config::HistoryConfig;
use xhare_core::coordinator::MSG_TRANSFER_TIMED_OUT;
use xhare_core::gateway::names;
use xhare_core::{
    BackendEvent, Config, Coordinator, CoordinatorHandle, CoordinatorService, DeviceRegistry,
    Error, HistoryStore, IncomingStatus, NotificationLevel, OutgoingStatus, TransferId,
};

struct Harness {
    handle: CoordinatorHandle,
    task: tokio::task::JoinHandle<Coordinator>,
    gateway: Arc<MockGateway>,
    sink: Arc<RecordingSink>,
    registry: Arc<DeviceRegistry>,
}

fn start(config: Config) -> Harness {
    init_tracing();
    let gateway = MockGateway::new();
    let sink = RecordingSink::new();
    let registry = Arc::new(DeviceRegistry::new());
    let coordinator = Coordinator::new(gateway.clone(), sink.clone(), config)
        .with_history(HistoryStore::in_memory(HistoryConfig::default()));
    let (handle, task) = CoordinatorService::spawn(coordinator, Arc::clone(&registry));
    Harness {
        handle,
        task,
        gateway,
        sink,
        registry,
    }
}

#[tokio::test(start_paused = true)]
async fn test_registry_follows_discovery() {
    let h = start(test_config());
    h.gateway.set_devices(vec![bob(), alice()]);

    let mut devices = h.handle.watch_devices();
    devices.wait_for(|d| d.len() == 2).await.unwrap();

    h.gateway.set_devices(vec![alice()]);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.handle.devices(), vec![alice()]);
    assert!(h.registry.find("10.0.0.2").is_none());

    h.handle.shutdown();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_discovery_failure_keeps_previous_devices() {
    let h = start(test_config());
    h.registry.replace(vec![bob()]);
    h.gateway.fail_discovery.store(true, Ordering::SeqCst);

    let result = h.handle.refresh_devices().await;

    assert!(matches!(result, Err(Error::Discovery(_))));
    assert_eq!(h.handle.devices(), vec![bob()]);
    assert!(h.sink.count(NotificationLevel::Warning) >= 1);
    assert!(h.registry.failure_streak() >= 1);

    h.gateway.fail_discovery.store(false, Ordering::SeqCst);
    h.gateway.set_devices(vec![alice()]);
    assert_eq!(h.handle.refresh_devices().await.unwrap(), vec![alice()]);
    assert_eq!(h.registry.failure_streak(), 0);

    h.handle.shutdown();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hung_discovery_does_not_block_sessions() {
    let h = start(test_config());
    h.registry.replace(vec![bob()]);
    h.gateway.hang_discovery.store(true, Ordering::SeqCst);
    let mut snapshots = h.handle.watch_snapshot();

    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(1), h.handle.select_device(bob()))
        .await
        .expect("select_device queued behind discovery")
        .unwrap();

    h.gateway.emit(offer("t1"));
    tokio::time::timeout(
        Duration::from_secs(1),
        snapshots.wait_for(|s| s.incoming_request.is_some()),
    )
    .await
    .expect("offer queued behind discovery")
    .unwrap();

    let result = h.handle.refresh_devices().await;
    assert!(matches!(result, Err(Error::Discovery(_))));
    assert_eq!(h.handle.devices(), vec![bob()]);
    assert!(h.sink.count(NotificationLevel::Warning) >= 1);

    h.handle.shutdown();
    tokio::time::timeout(Duration::from_secs(1), h.task)
        .await
        .expect("service did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_full_exchange_through_the_service() {
    let h = start(test_config());
    let mut snapshots = h.handle.watch_snapshot();

    h.handle.select_device(bob()).await.unwrap();
    h.handle.select_file(Some(small_file())).await.unwrap();
    h.handle.send().await.unwrap();
    assert!(h.handle.snapshot().is_sending);

    h.gateway.emit_wire(
        names::OUTGOING_TRANSFER_PROGRESS,
        json!({ "transferId": "out-1", "percent": 62.5 }),
    );
    h.gateway.emit(offer("t1"));

    let snapshot = snapshots
        .wait_for(|s| s.incoming_request.is_some() && s.outgoing.as_ref().is_some_and(|o| o.progress == 62))
        .await
        .unwrap()
        .clone();
    assert_eq!(
        snapshot.outgoing.unwrap().status,
        OutgoingStatus::Sending
    );

    h.handle.accept().await.unwrap();
    h.gateway.emit(BackendEvent::IncomingProgress {
        transfer_id: TransferId::from("t1"),
        percent: 100,
    });
    h.gateway.emit_wire(names::TRANSFER_COMPLETE, json!("t1"));

    snapshots
        .wait_for(|s| {
            s.incoming
                .as_ref()
                .is_some_and(|t| t.status == IncomingStatus::Completed)
        })
        .await
        .unwrap();
    assert_eq!(
        h.handle.open_destination().await.unwrap(),
        common::test_destination()
    );

    h.handle.shutdown();
    let coordinator = h.task.await.unwrap();
    assert_eq!(coordinator.history().unwrap().len(), 1);
    assert!(coordinator.model().outgoing().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_send_times_out() {
    let mut config = test_config();
    config.transfer.stall_timeout = Some(Duration::from_secs(10));
    let h = start(config);

    h.handle.select_device(bob()).await.unwrap();
    h.handle.select_file(Some(small_file())).await.unwrap();
    h.handle.send().await.unwrap();

    tokio::time::sleep(Duration::from_secs(15)).await;

    let outgoing = h.handle.snapshot().outgoing.unwrap();
    assert_eq!(outgoing.status, OutgoingStatus::Failed);
    assert_eq!(h.sink.last().unwrap().message, MSG_TRANSFER_TIMED_OUT);

    h.handle.shutdown();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_contract_violations_come_back_to_the_caller() {
    let h = start(test_config());

    assert!(matches!(h.handle.send().await, Err(Error::NoDeviceSelected)));
    assert!(matches!(h.handle.accept().await, Err(Error::NoPendingRequest)));
    assert!(matches!(
        h.handle.open_destination().await,
        Err(Error::NothingToOpen)
    ));
    assert!(matches!(
        h.handle.select_device_by_ip("10.9.9.9").await,
        Err(Error::NoDeviceSelected)
    ));
    assert!(h.gateway.commands().is_empty());

    h.handle.shutdown();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_dropping_every_handle_stops_the_service() {
    let h = start(test_config());
    let Harness { handle, task, .. } = h;

    drop(handle);

    let coordinator = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("service did not stop")
        .unwrap();
    assert!(coordinator.model().outgoing().is_none());
}
