//! BLE Link Core Library
//!
//! 面向单一目标外设（广播名 `SAMPlE_BLE`）的 BLE 连接管理核心库
//!
//! # 模块
//!
//! - **ble**: 外设描述、注册表、无线电驱动抽象及 btleplug 实现
//! - **connection**: 连接状态机与无线电事件桥
//! - **permission**: 运行时权限门
//! - **provider**: 把上述组件组装为一个可挂载的 provider
//! - **config** / **logging**: 设置持久化与统一日志级别
//!
//! # 使用示例
//!
//! ```ignore
//! use blelink_core::{BleProvider, BtleplugRadio, HostPermissionService, PermissionGate,
//!     PlatformInfo, ProviderSettings};
//!
//! let settings = ProviderSettings::load();
//! let radio = Arc::new(BtleplugRadio::new(settings.adapter_index).await?);
//! let gate = PermissionGate::new(HostPermissionService, PlatformInfo::host());
//!
//! // 1. 挂载：订阅事件、请求权限、激活无线电
//! let provider = BleProvider::mount(radio, &gate, &settings).await;
//! let machine = provider.machine().clone();
//!
//! // 2. 扫描并连接信号最强的目标外设
//! machine.start_scan().await?;
//! let target = machine.snapshot().peripherals.first().cloned();
//!
//! // 3. 读写特征
//! machine.connect_to(&target).await?;
//! machine.write_characteristic(&target.id, b"ping").await?;
//! ```

pub mod ble;
pub mod config;
pub mod connection;
pub mod logging;
pub mod permission;
pub mod provider;
pub mod test_utils;

// BLE re-exports
pub use ble::{
    BtleplugRadio, CharacteristicNotification, PeripheralDescriptor, PeripheralRegistry,
    RadioDriver, RadioError, RadioEvent, READ_CHAR_UUID, SERVICE_UUID, TARGET_NAME,
    WRITE_CHAR_UUID,
};

// Connection re-exports
pub use connection::{
    ConnectStage, ConnectionError, ConnectionSnapshot, ConnectionState, ConnectionStateMachine,
    EventBridge, Phase, ScanOutcome,
};

// Permission re-exports
pub use permission::{
    HostPermissionService, Permission, PermissionGate, PermissionService, PermissionStatus,
    PlatformInfo,
};

pub use config::ProviderSettings;
pub use logging::{LogEntry, LogLevel};
pub use provider::BleProvider;
