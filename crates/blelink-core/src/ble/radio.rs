//! Radio Driver - BLE 无线电抽象
//!
//! 状态机只通过 [`RadioDriver`] 访问底层蓝牙栈。所有命令都是异步的并可能
//! 独立失败；事件通过广播通道异步送达，与命令完成之间没有顺序保证。

use crate::ble::PeripheralDescriptor;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// 无线电驱动错误
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Peripheral not found: {0}")]
    PeripheralNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] btleplug::Error),

    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Link to {0} was lost")]
    LinkLost(String),
}

/// 特征值更新通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicNotification {
    pub peripheral_id: String,
    pub characteristic_id: Uuid,
    pub value: Vec<u8>,
}

/// 无线电异步事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    PeripheralDiscovered(PeripheralDescriptor),
    ScanStopped,
    PeripheralDisconnected { peripheral_id: String },
    CharacteristicValueUpdated(CharacteristicNotification),
}

#[async_trait::async_trait]
pub trait RadioDriver: Send + Sync {
    /// 激活无线电，已激活时为空操作
    async fn enable_radio(&self) -> Result<(), RadioError>;

    /// 开始扫描，持续 `duration` 后自动停止并发出 [`RadioEvent::ScanStopped`]
    async fn start_scan(&self, duration: Duration) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, peripheral_id: &str) -> Result<(), RadioError>;

    /// 解析服务与特征，必须在订阅通知之前完成
    async fn retrieve_services(&self, peripheral_id: &str) -> Result<(), RadioError>;

    async fn start_notification(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<(), RadioError>;

    async fn read(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<Vec<u8>, RadioError>;

    async fn write_without_response(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
        data: &[u8],
    ) -> Result<(), RadioError>;

    async fn disconnect(&self, peripheral_id: &str) -> Result<(), RadioError>;

    /// 订阅无线电事件流
    fn subscribe(&self) -> broadcast::Receiver<RadioEvent>;
}
