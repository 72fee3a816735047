//! BLE Link Daemon
//!
//! 后台守护进程，负责：
//! - 持有 BLE provider（权限门、无线电驱动、连接状态机）
//! - 记录目标外设推送的特征值通知
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use blelink_core::{
    BleProvider, BtleplugRadio, HostPermissionService, PermissionGate, PlatformInfo,
    ProviderSettings,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ProviderSettings::load();

    // 桥接 log crate（blelink-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.filter_directive())),
        )
        .try_init();

    tracing::info!("BLE Link Daemon starting...");

    let radio = Arc::new(BtleplugRadio::new(settings.adapter_index).await?);
    let gate = PermissionGate::new(HostPermissionService, PlatformInfo::host());
    let provider = BleProvider::mount(radio, &gate, &settings).await;

    let machine = provider.machine().clone();
    let service = Arc::new(service::BleService::new(machine.clone()));

    let notification_handle = tokio::spawn(service::log_notifications(machine));
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(service));

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        }
    }

    notification_handle.abort();
    provider.unmount().await;
    let _ = std::fs::remove_file(ipc::socket_path());

    Ok(())
}
