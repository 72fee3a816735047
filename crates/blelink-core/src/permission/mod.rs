//! 运行时权限
//!
//! 在激活无线电之前请求 BLE 所需的系统权限。只有 Android 6.0 (API 23)
//! 及以上版本需要运行时授权，其他平台直接视为已授权。

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 引入运行时权限弹窗的 Android API 版本
pub const RUNTIME_PERMISSION_API_LEVEL: u32 = 23;

/// BLE 相关权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    FineLocation,
    BluetoothConnect,
    BluetoothScan,
    BluetoothAdvertise,
}

impl Permission {
    /// 批量请求的权限
    pub const REQUESTED: [Permission; 4] = [
        Permission::FineLocation,
        Permission::BluetoothConnect,
        Permission::BluetoothScan,
        Permission::BluetoothAdvertise,
    ];

    /// 判定成功所必需的权限（广播权限不是必需的）
    pub const REQUIRED: [Permission; 3] = [
        Permission::BluetoothConnect,
        Permission::BluetoothScan,
        Permission::FineLocation,
    ];

    /// 平台权限标识
    pub fn identifier(&self) -> &'static str {
        match self {
            Permission::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
            Permission::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Permission::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Permission::BluetoothAdvertise => "android.permission.BLUETOOTH_ADVERTISE",
        }
    }
}

/// 授权结果。平台返回 `"granted"` 以外的任何字符串都视为未授权
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Other(String),
}

impl PermissionStatus {
    pub fn from_platform(status: &str) -> Self {
        if status == "granted" {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Other(status.to_string())
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Permission request failed: {0}")]
    RequestFailed(String),
}

/// 平台权限服务
#[async_trait::async_trait]
pub trait PermissionService: Send + Sync {
    /// 一次性批量请求多个权限
    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>, PermissionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Android,
    Linux,
    MacOs,
    Windows,
    Other,
}

/// 运行平台信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: Os,
    /// Android API level，其他平台为 0
    pub api_level: u32,
}

impl PlatformInfo {
    pub fn host() -> Self {
        let os = if cfg!(target_os = "android") {
            Os::Android
        } else if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            Os::Other
        };
        Self { os, api_level: 0 }
    }

    pub fn android(api_level: u32) -> Self {
        Self {
            os: Os::Android,
            api_level,
        }
    }

    /// 是否需要运行时授权
    pub fn requires_runtime_permissions(&self) -> bool {
        self.os == Os::Android && self.api_level >= RUNTIME_PERMISSION_API_LEVEL
    }
}

/// 桌面平台使用的权限服务，所有权限均已授予
pub struct HostPermissionService;

#[async_trait::async_trait]
impl PermissionService for HostPermissionService {
    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>, PermissionError> {
        Ok(permissions
            .iter()
            .map(|p| (*p, PermissionStatus::Granted))
            .collect())
    }
}

/// 权限门
pub struct PermissionGate<S> {
    service: S,
    platform: PlatformInfo,
}

impl<S: PermissionService> PermissionGate<S> {
    pub fn new(service: S, platform: PlatformInfo) -> Self {
        Self { service, platform }
    }

    /// 请求 BLE 权限，从不返回错误
    ///
    /// 平台请求失败时记录日志并返回 `false`。
    pub async fn request_permissions(&self) -> bool {
        if !self.platform.requires_runtime_permissions() {
            debug!("Runtime permissions not gated on {:?}", self.platform);
            return true;
        }

        let status = match self.service.request_multiple(&Permission::REQUESTED).await {
            Ok(status) => status,
            Err(e) => {
                error!("Location Permissions Denied: {}", e);
                return false;
            }
        };

        let mut granted = true;
        for permission in Permission::REQUIRED {
            let ok = status
                .get(&permission)
                .map(PermissionStatus::is_granted)
                .unwrap_or(false);
            if !ok {
                warn!("Permission not granted: {}", permission.identifier());
                granted = false;
            }
        }
        granted
    }
}
