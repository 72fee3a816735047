//! 连接状态机
//!
//! 独占 [`ConnectionState`]，对外只提供只读快照和固定的命令集合。
//! 状态保存在 `watch` 通道中，每次转换通过 `send_if_modified` 原子完成，
//! 观察者不会看到转换的中间状态。
//!
//! 命令之间不排队：重复的扫描或连接请求被相位守卫直接拒绝。

use log::{debug, error, info, trace, warn};

use crate::ble::{
    CharacteristicNotification, PeripheralDescriptor, RadioDriver, RadioError, RadioEvent,
    READ_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID,
};
use crate::connection::error::{ConnectStage, ConnectionError};
use crate::connection::state::{ConnectionSnapshot, ConnectionState, Phase, Transition};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// `start_scan` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Started,
    /// 已在扫描（或扫描请求尚未完成），本次调用为空操作
    AlreadyScanning,
}

struct Inner {
    radio: Arc<dyn RadioDriver>,
    state: watch::Sender<ConnectionState>,
    notifications: broadcast::Sender<CharacteristicNotification>,
    permitted: AtomicBool,
    scan_duration: Duration,
}

/// 连接状态机句柄，克隆后共享同一份状态
#[derive(Clone)]
pub struct ConnectionStateMachine {
    inner: Arc<Inner>,
}

impl ConnectionStateMachine {
    pub fn new(radio: Arc<dyn RadioDriver>, scan_duration: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::new());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                radio,
                state,
                notifications,
                permitted: AtomicBool::new(true),
                scan_duration,
            }),
        }
    }

    pub(crate) fn set_permitted(&self, permitted: bool) {
        self.inner.permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn is_permitted(&self) -> bool {
        self.inner.permitted.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.state.borrow().snapshot()
    }

    /// 订阅状态变化
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// 订阅特征值通知
    pub fn notifications(&self) -> broadcast::Receiver<CharacteristicNotification> {
        self.inner.notifications.subscribe()
    }

    fn apply(&self, transition: Transition) -> bool {
        trace!("Applying {:?}", transition);
        self.inner.state.send_if_modified(|s| s.apply(transition))
    }

    fn ensure_permitted(&self) -> Result<(), ConnectionError> {
        if self.is_permitted() {
            Ok(())
        } else {
            warn!("Command blocked: BLE permissions were denied");
            Err(ConnectionError::PermissionDenied)
        }
    }

    /// 开始扫描
    ///
    /// 已在扫描时为空操作。否则清空注册表并调用适配器扫描，适配器接受后
    /// 进入 `Scanning`；被拒绝时状态不变。
    pub async fn start_scan(&self) -> Result<ScanOutcome, ConnectionError> {
        self.ensure_permitted()?;

        let connected = self
            .inner
            .state
            .borrow()
            .connected_peripheral()
            .map(|p| p.id.clone());
        if let Some(id) = connected {
            return Err(ConnectionError::AlreadyConnected(id));
        }

        if !self.apply(Transition::ScanRequested) {
            debug!("Start scanning skipped: scan already in progress");
            return Ok(ScanOutcome::AlreadyScanning);
        }
        self.apply(Transition::RegistryCleared);

        match self.inner.radio.start_scan(self.inner.scan_duration).await {
            Ok(()) => {
                info!("Scanning...");
                self.apply(Transition::ScanStarted);
                Ok(ScanOutcome::Started)
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.apply(Transition::ScanRequestFailed);
                Err(ConnectionError::ScanRejected(e))
            }
        }
    }

    /// 提前结束扫描，`ScanStopped` 事件负责切回 `Idle`
    pub async fn stop_scan(&self) -> Result<(), ConnectionError> {
        if self.phase() != Phase::Scanning {
            debug!("Stop scan ignored: not scanning");
            return Ok(());
        }
        self.inner.radio.stop_scan().await.map_err(|e| {
            error!("Failed to stop scan: {}", e);
            ConnectionError::StopScanFailed(e)
        })
    }

    pub async fn connect_to(&self, descriptor: &PeripheralDescriptor) -> Result<(), ConnectionError> {
        self.connect_to_then(descriptor, |_| {}).await
    }

    /// 连接到目标外设，成功后调用 `on_connected`
    ///
    /// 依次执行 connect → 服务发现 → 订阅读特征通知，任一步失败即中止，
    /// 相位保持调用前的值。
    pub async fn connect_to_then<F>(
        &self,
        descriptor: &PeripheralDescriptor,
        on_connected: F,
    ) -> Result<(), ConnectionError>
    where
        F: FnOnce(&PeripheralDescriptor) + Send,
    {
        if !descriptor.is_target() {
            warn!(
                "Refusing to connect to non-target peripheral {} ({})",
                descriptor.id,
                descriptor.display_name()
            );
            return Err(ConnectionError::NotTarget(descriptor.id.clone()));
        }
        self.ensure_permitted()?;

        let connected = self
            .inner
            .state
            .borrow()
            .connected_peripheral()
            .map(|p| p.id.clone());
        match connected {
            Some(id) if descriptor.has_id(&id) => {
                debug!("Already connected to {}", id);
                return Ok(());
            }
            Some(id) => return Err(ConnectionError::AlreadyConnected(id)),
            None => {}
        }

        if !self.apply(Transition::ConnectRequested(descriptor.id.clone())) {
            return Err(ConnectionError::Busy("connect"));
        }

        let result = match self.run_connect_sequence(&descriptor.id).await {
            Ok(()) if self.apply(Transition::Connected(descriptor.clone())) => Ok(()),
            // 序列完成前链路已断开，不提交连接
            Ok(()) => Err(ConnectionError::ConnectFailed {
                stage: ConnectStage::StartNotification,
                source: RadioError::LinkLost(descriptor.id.clone()),
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    "Connected to {} ({})",
                    descriptor.display_name(),
                    descriptor.id
                );
                on_connected(descriptor);
                Ok(())
            }
            Err(e) => {
                error!("Failed connecting to the device {}: {}", descriptor.id, e);
                self.apply(Transition::ConnectAborted);
                let link_lost = matches!(
                    e,
                    ConnectionError::ConnectFailed {
                        source: RadioError::LinkLost(_),
                        ..
                    }
                );
                if !link_lost && e.connect_stage() != Some(ConnectStage::Connect) {
                    // 链路已建立但序列失败，尽力断开
                    if let Err(e) = self.inner.radio.disconnect(&descriptor.id).await {
                        warn!("Failed to drop half-open link to {}: {}", descriptor.id, e);
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_connect_sequence(&self, peripheral_id: &str) -> Result<(), ConnectionError> {
        let radio = &self.inner.radio;
        let failed = |stage: ConnectStage| {
            move |source: RadioError| ConnectionError::ConnectFailed { stage, source }
        };

        radio
            .connect(peripheral_id)
            .await
            .map_err(failed(ConnectStage::Connect))?;
        self.ensure_link(peripheral_id, ConnectStage::Connect)?;
        radio
            .retrieve_services(peripheral_id)
            .await
            .map_err(failed(ConnectStage::RetrieveServices))?;
        self.ensure_link(peripheral_id, ConnectStage::RetrieveServices)?;
        radio
            .start_notification(peripheral_id, SERVICE_UUID, READ_CHAR_UUID)
            .await
            .map_err(failed(ConnectStage::StartNotification))?;

        debug!("Started notification for reading data");
        Ok(())
    }

    /// 连接序列中途收到断开事件时提前结束
    fn ensure_link(&self, peripheral_id: &str, stage: ConnectStage) -> Result<(), ConnectionError> {
        if self.inner.state.borrow().is_connect_invalidated() {
            warn!("Link to {} dropped after {}", peripheral_id, stage);
            Err(ConnectionError::ConnectFailed {
                stage,
                source: RadioError::LinkLost(peripheral_id.to_string()),
            })
        } else {
            Ok(())
        }
    }

    fn ensure_connected_to(&self, peripheral_id: &str) -> Result<(), ConnectionError> {
        if self.inner.state.borrow().is_connected_to(peripheral_id) {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected(peripheral_id.to_string()))
        }
    }

    pub async fn read_characteristic(&self, peripheral_id: &str) -> Result<Vec<u8>, ConnectionError> {
        self.ensure_connected_to(peripheral_id)?;

        match self
            .inner
            .radio
            .read(peripheral_id, SERVICE_UUID, READ_CHAR_UUID)
            .await
        {
            Ok(data) => {
                info!(
                    "Read {} bytes from {}: {}",
                    data.len(),
                    peripheral_id,
                    hex::encode(&data)
                );
                Ok(data)
            }
            Err(e) => {
                error!("Error reading data from {}: {}", peripheral_id, e);
                Err(ConnectionError::ReadFailed(e))
            }
        }
    }

    /// 无应答写入写特征
    pub async fn write_characteristic(
        &self,
        peripheral_id: &str,
        data: &[u8],
    ) -> Result<(), ConnectionError> {
        self.ensure_connected_to(peripheral_id)?;

        self.inner
            .radio
            .write_without_response(peripheral_id, SERVICE_UUID, WRITE_CHAR_UUID, data)
            .await
            .map_err(|e| {
                error!("Error writing data to {}: {}", peripheral_id, e);
                ConnectionError::WriteFailed(e)
            })?;

        info!(
            "Wrote {} bytes to {}: {}",
            data.len(),
            peripheral_id,
            hex::encode(data)
        );
        Ok(())
    }

    /// 断开连接
    ///
    /// 失败时状态不变，最终由断开事件完成对账。
    pub async fn disconnect(&self, peripheral_id: &str) -> Result<(), ConnectionError> {
        match self.inner.radio.disconnect(peripheral_id).await {
            Ok(()) => {
                info!("Disconnected from {}", peripheral_id);
                self.apply(Transition::Disconnected {
                    peripheral_id: peripheral_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                error!("Error disconnecting from {}: {}", peripheral_id, e);
                Err(ConnectionError::DisconnectFailed(e))
            }
        }
    }

    /// 处理无线电事件
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::PeripheralDiscovered(descriptor) => {
                if !descriptor.is_target() {
                    trace!(
                        "Dropping non-target peripheral {} ({})",
                        descriptor.id,
                        descriptor.display_name()
                    );
                    return;
                }
                debug!(
                    "Got ble peripheral {} rssi={:?}",
                    descriptor.id, descriptor.signal_strength
                );
                self.apply(Transition::PeripheralDiscovered(descriptor));
            }
            RadioEvent::ScanStopped => {
                info!("Scan is stopped");
                self.apply(Transition::ScanStopped);
            }
            RadioEvent::PeripheralDisconnected { peripheral_id } => {
                info!("Disconnected from {}", peripheral_id);
                if !self.apply(Transition::Disconnected {
                    peripheral_id: peripheral_id.clone(),
                }) {
                    debug!("Disconnect of {} did not affect connection state", peripheral_id);
                }
            }
            RadioEvent::CharacteristicValueUpdated(notification) => {
                info!(
                    "Received data from: {} Characteristic: {} Data: {}",
                    notification.peripheral_id,
                    notification.characteristic_id,
                    hex::encode(&notification.value)
                );
                let _ = self.inner.notifications.send(notification);
            }
        }
    }
}
