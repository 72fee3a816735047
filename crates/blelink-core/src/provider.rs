//! BLE Provider
//!
//! 把权限门、无线电驱动、事件桥和状态机组装在一起，对应一次完整的生命周期：
//!
//! 1. 订阅无线电事件（每个 provider 只订阅一次）
//! 2. 请求运行时权限
//! 3. 权限通过后激活无线电；被拒绝时不激活，扫描和连接命令返回
//!    [`ConnectionError::PermissionDenied`](crate::connection::ConnectionError)
//!
//! [`BleProvider::unmount`] 或 `Drop` 时拆除事件订阅。

use log::{info, warn};

use crate::ble::RadioDriver;
use crate::config::ProviderSettings;
use crate::connection::{ConnectionStateMachine, EventBridge};
use crate::permission::{PermissionGate, PermissionService};
use std::sync::Arc;

pub struct BleProvider {
    machine: ConnectionStateMachine,
    bridge: Option<EventBridge>,
    permissions_granted: bool,
}

impl BleProvider {
    pub async fn mount<S: PermissionService>(
        radio: Arc<dyn RadioDriver>,
        gate: &PermissionGate<S>,
        settings: &ProviderSettings,
    ) -> Self {
        let machine = ConnectionStateMachine::new(radio.clone(), settings.scan_duration());
        let bridge = EventBridge::attach(radio.subscribe(), machine.clone());

        let permissions_granted = gate.request_permissions().await;
        machine.set_permitted(permissions_granted);

        if permissions_granted {
            if let Err(e) = radio.enable_radio().await {
                warn!("Failed to enable Bluetooth radio: {}", e);
            }
        } else {
            warn!("BLE permissions denied, radio stays disabled");
        }

        info!("BLE provider mounted");
        Self {
            machine,
            bridge: Some(bridge),
            permissions_granted,
        }
    }

    /// 状态机句柄，可克隆后在其他任务中使用
    pub fn machine(&self) -> &ConnectionStateMachine {
        &self.machine
    }

    pub fn permissions_granted(&self) -> bool {
        self.permissions_granted
    }

    pub fn is_mounted(&self) -> bool {
        self.bridge.as_ref().is_some_and(EventBridge::is_attached)
    }

    /// 拆除事件订阅
    pub async fn unmount(mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.detach().await;
        }
        info!("BLE provider unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PlatformInfo;
    use crate::test_utils::{MockPermissionService, MockRadio, RadioOp};

    #[tokio::test]
    async fn test_mount_enables_radio() {
        let radio = MockRadio::new();
        let gate = PermissionGate::new(
            MockPermissionService::granting_all(),
            PlatformInfo::android(31),
        );
        let provider =
            BleProvider::mount(Arc::new(radio.clone()), &gate, &ProviderSettings::default()).await;

        assert!(provider.permissions_granted());
        assert!(provider.is_mounted());
        assert_eq!(radio.count(RadioOp::EnableRadio), 1);
        assert_eq!(radio.subscriber_count(), 1);

        provider.unmount().await;
        assert_eq!(radio.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_permissions_skip_radio() {
        let radio = MockRadio::new();
        let gate = PermissionGate::new(MockPermissionService::failing(), PlatformInfo::android(31));
        let provider =
            BleProvider::mount(Arc::new(radio.clone()), &gate, &ProviderSettings::default()).await;

        assert!(!provider.permissions_granted());
        assert_eq!(radio.count(RadioOp::EnableRadio), 0);
        assert!(provider.machine().start_scan().await.is_err());
        assert_eq!(radio.count(RadioOp::StartScan), 0);
    }

    #[tokio::test]
    async fn test_enable_failure_is_not_fatal() {
        let radio = MockRadio::new();
        radio.fail(RadioOp::EnableRadio);
        let gate = PermissionGate::new(MockPermissionService::granting_all(), PlatformInfo::host());
        let provider =
            BleProvider::mount(Arc::new(radio.clone()), &gate, &ProviderSettings::default()).await;

        assert!(provider.permissions_granted());
        assert!(provider.is_mounted());
    }
}
