//! 集成测试 - Provider 生命周期与连接状态机
//!
//! 通过 `MockRadio` 驱动完整的 provider：事件经事件桥异步到达，
//! 命令通过状态机句柄发出。

use blelink_core::test_utils::{MockPermissionService, MockRadio, RadioCall, RadioOp, wait_until};
use blelink_core::{
    BleProvider, ConnectStage, ConnectionError, Permission, PermissionGate, Phase, PlatformInfo,
    ProviderSettings, RadioEvent, ScanOutcome, TARGET_NAME,
};
use std::sync::Arc;
use std::time::Duration;

async fn mount(radio: &MockRadio) -> BleProvider {
    let gate = PermissionGate::new(MockPermissionService::granting_all(), PlatformInfo::android(31));
    BleProvider::mount(Arc::new(radio.clone()), &gate, &ProviderSettings::default()).await
}

/// 让事件桥处理完已发出的事件
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// 非目标外设永远不会进入注册表
#[tokio::test]
async fn test_non_target_never_registered() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();
    machine.start_scan().await.unwrap();

    radio.discover("B", Some("Other"), Some(-40));
    radio.discover("C", None, Some(-45));
    radio.discover("D", Some("sample_ble"), Some(-45));
    // 哨兵：目标外设到达说明之前的事件都已处理
    radio.discover("A", Some(TARGET_NAME), None);

    wait_until(&machine, |s| s.registry().get("A").is_some()).await;
    let snapshot = machine.snapshot();
    assert_eq!(snapshot.peripherals.len(), 1);
    assert!(snapshot.peripherals.iter().all(|p| p.is_target()));

    provider.unmount().await;
}

/// 同一外设重复发现只保留一条，信号强度被更新
#[tokio::test]
async fn test_rediscovery_is_idempotent() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();
    machine.start_scan().await.unwrap();
    assert!(machine.snapshot().peripherals.is_empty());

    radio.discover("A", Some(TARGET_NAME), None);
    wait_until(&machine, |s| s.registry().len() == 1).await;

    radio.discover("A", Some(TARGET_NAME), Some(-50));
    wait_until(&machine, |s| {
        s.registry().get("A").and_then(|p| p.signal_strength) == Some(-50)
    })
    .await;

    for rssi in [-55, -60, -52] {
        radio.discover("A", Some(TARGET_NAME), Some(rssi));
    }
    wait_until(&machine, |s| {
        s.registry().get("A").and_then(|p| p.signal_strength) == Some(-52)
    })
    .await;
    assert_eq!(machine.snapshot().peripherals.len(), 1);
}

/// 连续两次 start_scan 只调用一次适配器
#[tokio::test]
async fn test_double_start_scan() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine();

    assert_eq!(machine.start_scan().await.unwrap(), ScanOutcome::Started);
    assert_eq!(
        machine.start_scan().await.unwrap(),
        ScanOutcome::AlreadyScanning
    );
    assert_eq!(radio.count(RadioOp::StartScan), 1);
}

/// 扫描超时后可以开始新的扫描周期
#[tokio::test]
async fn test_scan_cycle_restarts_after_stop() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    machine.start_scan().await.unwrap();
    radio.emit(RadioEvent::ScanStopped);
    wait_until(&machine, |s| s.phase() == Phase::Idle).await;

    assert_eq!(machine.start_scan().await.unwrap(), ScanOutcome::Started);
    assert_eq!(radio.count(RadioOp::StartScan), 2);

    // 主动停止：驱动发出 ScanStopped，由事件桥切回 Idle
    machine.stop_scan().await.unwrap();
    wait_until(&machine, |s| s.phase() == Phase::Idle).await;
}

/// 扫描结束后到达的发现事件仍然生效
#[tokio::test]
async fn test_late_discovery_is_applied() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    machine.start_scan().await.unwrap();
    radio.emit(RadioEvent::ScanStopped);
    radio.discover("A", Some(TARGET_NAME), Some(-70));

    wait_until(&machine, |s| s.phase() == Phase::Idle && s.registry().len() == 1).await;
}

/// 成功连接后相位为 Connected，回调收到同一外设
#[tokio::test]
async fn test_connect_success() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    machine.start_scan().await.unwrap();
    radio.discover("A", Some(TARGET_NAME), Some(-48));
    wait_until(&machine, |s| s.registry().len() == 1).await;

    let descriptor = machine.snapshot().peripherals[0].clone();
    let (tx, rx) = tokio::sync::oneshot::channel();
    machine
        .connect_to_then(&descriptor, move |d| {
            let _ = tx.send(d.id.clone());
        })
        .await
        .unwrap();

    assert_eq!(rx.await.unwrap(), "A");
    let snapshot = machine.snapshot();
    assert!(snapshot.is_connected);
    assert!(!snapshot.is_scanning);
    assert_eq!(snapshot.connected_peripheral.map(|p| p.id), Some("A".to_string()));
}

/// 订阅通知失败：相位保持 Scanning，不记录已连接外设
#[tokio::test]
async fn test_notification_failure_while_scanning() {
    let radio = MockRadio::new();
    radio.fail(RadioOp::StartNotification);
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    machine.start_scan().await.unwrap();
    radio.discover("A", Some(TARGET_NAME), Some(-48));
    wait_until(&machine, |s| s.registry().len() == 1).await;

    let descriptor = machine.snapshot().peripherals[0].clone();
    let err = machine.connect_to(&descriptor).await.unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::ConnectFailed {
            stage: ConnectStage::StartNotification,
            ..
        }
    ));
    assert_eq!(machine.phase(), Phase::Scanning);
    assert!(machine.snapshot().connected_peripheral.is_none());
    assert_eq!(radio.count(RadioOp::Connect), 1);
    assert_eq!(radio.count(RadioOp::RetrieveServices), 1);

    // 后续尝试不受影响
    radio.succeed(RadioOp::StartNotification);
    machine.connect_to(&descriptor).await.unwrap();
    assert_eq!(machine.phase(), Phase::Connected);
}

/// 未经请求的断开事件把状态切回 Idle
#[tokio::test]
async fn test_unprompted_disconnect_event() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    radio.discover("A", Some(TARGET_NAME), Some(-48));
    wait_until(&machine, |s| s.registry().len() == 1).await;
    let descriptor = machine.snapshot().peripherals[0].clone();
    machine.connect_to(&descriptor).await.unwrap();

    radio.emit(RadioEvent::PeripheralDisconnected {
        peripheral_id: "A".to_string(),
    });
    wait_until(&machine, |s| s.phase() == Phase::Idle).await;
    assert!(machine.snapshot().connected_peripheral.is_none());
    // 注册表不受断开影响
    assert_eq!(machine.snapshot().peripherals.len(), 1);
}

/// 显式断开后迟到的断开事件不产生副作用
#[tokio::test]
async fn test_disconnect_then_event() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    radio.discover("A", Some(TARGET_NAME), None);
    wait_until(&machine, |s| s.registry().len() == 1).await;
    let descriptor = machine.snapshot().peripherals[0].clone();
    machine.connect_to(&descriptor).await.unwrap();

    machine.disconnect("A").await.unwrap();
    assert_eq!(machine.phase(), Phase::Idle);

    radio.emit(RadioEvent::PeripheralDisconnected {
        peripheral_id: "A".to_string(),
    });
    settle().await;
    assert_eq!(machine.phase(), Phase::Idle);
    assert!(machine.snapshot().connected_peripheral.is_none());
}

/// 读写走固定的服务与特征
#[tokio::test]
async fn test_read_write_roundtrip() {
    let radio = MockRadio::new();
    radio.set_read_value(b"pong".to_vec());
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();

    radio.discover("A", Some(TARGET_NAME), None);
    wait_until(&machine, |s| s.registry().len() == 1).await;
    let descriptor = machine.snapshot().peripherals[0].clone();
    machine.connect_to(&descriptor).await.unwrap();

    machine.write_characteristic("A", b"ping").await.unwrap();
    assert_eq!(machine.read_characteristic("A").await.unwrap(), b"pong");

    let calls = radio.calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        RadioCall::Write { data, characteristic_id, .. }
            if data == b"ping" && *characteristic_id == blelink_core::WRITE_CHAR_UUID
    )));
    assert!(calls.iter().any(|c| matches!(
        c,
        RadioCall::Read { characteristic_id, .. }
            if *characteristic_id == blelink_core::READ_CHAR_UUID
    )));
}

/// 特征值通知经由状态机广播给消费者
#[tokio::test]
async fn test_notifications_reach_consumers() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let mut notifications = provider.machine().notifications();

    radio.emit(RadioEvent::CharacteristicValueUpdated(
        blelink_core::CharacteristicNotification {
            peripheral_id: "A".to_string(),
            characteristic_id: blelink_core::READ_CHAR_UUID,
            value: vec![1, 2, 3],
        },
    ));

    let received = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.value, vec![1, 2, 3]);
}

/// 权限被拒绝时命令被硬性阻止
#[tokio::test]
async fn test_permission_denial_blocks_commands() {
    let radio = MockRadio::new();
    let service =
        MockPermissionService::granting_all().with_status(Permission::BluetoothScan, "denied");
    let gate = PermissionGate::new(service, PlatformInfo::android(33));
    let provider =
        BleProvider::mount(Arc::new(radio.clone()), &gate, &ProviderSettings::default()).await;

    assert!(!provider.permissions_granted());
    assert!(matches!(
        provider.machine().start_scan().await,
        Err(ConnectionError::PermissionDenied)
    ));
    assert!(radio.calls().is_empty());
}

/// 每个 provider 只订阅一次，卸载后不再接收事件
#[tokio::test]
async fn test_single_subscription_per_provider() {
    let radio = MockRadio::new();
    let provider = mount(&radio).await;
    let machine = provider.machine().clone();
    assert_eq!(radio.subscriber_count(), 1);

    provider.unmount().await;
    assert_eq!(radio.subscriber_count(), 0);

    radio.discover("A", Some(TARGET_NAME), None);
    settle().await;
    assert!(machine.snapshot().peripherals.is_empty());
}
