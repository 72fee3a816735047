//! btleplug 无线电驱动
//!
//! 把 btleplug 的 `CentralEvent` 流和外设通知流转换为 [`RadioEvent`]，
//! 外设 ID 使用设备地址字符串。
//!
//! 后台任务：
//! - 适配器事件泵：发现/更新/断开事件
//! - 扫描计时器：扫描时长到期后停止扫描并发出 `ScanStopped`
//! - 通知泵：每个已订阅外设一个，断开时取消

use log::{debug, info, trace, warn};

use crate::ble::radio::{CharacteristicNotification, RadioDriver, RadioError, RadioEvent};
use crate::ble::PeripheralDescriptor;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// 加锁，锁中毒时记录警告并继续使用内部数据，保证取消令牌总能被保存和取消
fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned {} lock", name);
        poisoned.into_inner()
    })
}

struct Shared {
    adapter: Adapter,
    events: broadcast::Sender<RadioEvent>,
    scan_timer: Mutex<Option<CancellationToken>>,
    notification_pumps: Mutex<HashMap<String, CancellationToken>>,
}

impl Shared {
    fn emit(&self, event: RadioEvent) {
        // 没有订阅者时丢弃
        let _ = self.events.send(event);
    }

    fn cancel_scan_timer(&self) {
        if let Some(token) = lock_or_recover(&self.scan_timer, "scan timer").take() {
            token.cancel();
        }
    }

    fn cancel_notification_pump(&self, peripheral_id: &str) {
        let removed =
            lock_or_recover(&self.notification_pumps, "notification pump").remove(peripheral_id);
        if let Some(token) = removed {
            debug!("Stopping notification pump for {}", peripheral_id);
            token.cancel();
        }
    }
}

pub struct BtleplugRadio {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl BtleplugRadio {
    /// 使用第 `adapter_index` 个主机适配器创建驱动并启动事件泵
    pub async fn new(adapter_index: usize) -> Result<Self, RadioError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .nth(adapter_index)
            .ok_or(RadioError::NoAdapter)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            adapter,
            events,
            scan_timer: Mutex::new(None),
            notification_pumps: Mutex::new(HashMap::new()),
        });

        let shutdown = CancellationToken::new();
        let central_events = shared.adapter.events().await?;
        tokio::spawn(run_event_pump(
            shared.clone(),
            central_events,
            shutdown.clone(),
        ));

        Ok(Self { shared, shutdown })
    }

    async fn find_peripheral(&self, peripheral_id: &str) -> Result<PlatformPeripheral, RadioError> {
        let peripherals = self.shared.adapter.peripherals().await?;

        for peripheral in peripherals {
            if peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(peripheral_id)
            {
                return Ok(peripheral);
            }
        }

        Err(RadioError::PeripheralNotFound(peripheral_id.to_string()))
    }

    fn find_characteristic(
        &self,
        peripheral: &PlatformPeripheral,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<Characteristic, RadioError> {
        for service in peripheral.services() {
            if service.uuid == service_id {
                for char in service.characteristics {
                    if char.uuid == characteristic_id {
                        return Ok(char);
                    }
                }
            }
        }
        Err(RadioError::CharacteristicNotFound(characteristic_id))
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared.cancel_scan_timer();
        let mut pumps = lock_or_recover(&self.shared.notification_pumps, "notification pump");
        for (_, token) in pumps.drain() {
            token.cancel();
        }
    }
}

#[async_trait::async_trait]
impl RadioDriver for BtleplugRadio {
    async fn enable_radio(&self) -> Result<(), RadioError> {
        // btleplug 无法切换电源，只确认适配器可用
        let info = self
            .shared
            .adapter
            .adapter_info()
            .await
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;
        info!("Using Bluetooth adapter: {}", info);
        Ok(())
    }

    async fn start_scan(&self, duration: Duration) -> Result<(), RadioError> {
        self.shared.cancel_scan_timer();
        self.shared
            .adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| RadioError::Rejected(e.to_string()))?;
        info!("Starting BLE scan for {} seconds", duration.as_secs());

        let token = CancellationToken::new();
        *lock_or_recover(&self.shared.scan_timer, "scan timer") = Some(token.clone());

        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    if let Err(e) = shared.adapter.stop_scan().await {
                        warn!("Failed to stop scan after timeout: {}", e);
                    }
                    debug!("Scan window elapsed");
                    shared.emit(RadioEvent::ScanStopped);
                }
                _ = token.cancelled() => {}
            }
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.shared.cancel_scan_timer();
        self.shared.adapter.stop_scan().await?;
        self.shared.emit(RadioEvent::ScanStopped);
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<(), RadioError> {
        let peripheral = self.find_peripheral(peripheral_id).await?;
        info!("Connecting to {}", peripheral_id);
        peripheral.connect().await?;
        Ok(())
    }

    async fn retrieve_services(&self, peripheral_id: &str) -> Result<(), RadioError> {
        let peripheral = self.find_peripheral(peripheral_id).await?;
        info!("Discovering services on {}...", peripheral_id);
        peripheral.discover_services().await?;
        debug!(
            "{} exposes {} service(s)",
            peripheral_id,
            peripheral.services().len()
        );
        Ok(())
    }

    async fn start_notification(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<(), RadioError> {
        let peripheral = self.find_peripheral(peripheral_id).await?;
        let char = self.find_characteristic(&peripheral, service_id, characteristic_id)?;

        peripheral.subscribe(&char).await?;
        let mut notifications = peripheral.notifications().await?;

        let token = CancellationToken::new();
        let replaced = lock_or_recover(&self.shared.notification_pumps, "notification pump")
            .insert(peripheral_id.to_string(), token.clone());
        if let Some(old) = replaced {
            old.cancel();
        }

        let shared = self.shared.clone();
        let id = peripheral_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = notifications.next() => match next {
                        Some(n) => {
                            trace!("Notification from {} on {}: {} bytes", id, n.uuid, n.value.len());
                            shared.emit(RadioEvent::CharacteristicValueUpdated(
                                CharacteristicNotification {
                                    peripheral_id: id.clone(),
                                    characteristic_id: n.uuid,
                                    value: n.value,
                                },
                            ));
                        }
                        None => break,
                    }
                }
            }
            debug!("Notification pump for {} finished", id);
        });

        info!(
            "Started notification for {} on characteristic {}",
            peripheral_id, characteristic_id
        );
        Ok(())
    }

    async fn read(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<Vec<u8>, RadioError> {
        let peripheral = self.find_peripheral(peripheral_id).await?;
        let char = self.find_characteristic(&peripheral, service_id, characteristic_id)?;
        Ok(peripheral.read(&char).await?)
    }

    async fn write_without_response(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
        data: &[u8],
    ) -> Result<(), RadioError> {
        let peripheral = self.find_peripheral(peripheral_id).await?;
        let char = self.find_characteristic(&peripheral, service_id, characteristic_id)?;
        peripheral
            .write(&char, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self, peripheral_id: &str) -> Result<(), RadioError> {
        self.shared.cancel_notification_pump(peripheral_id);
        let peripheral = self.find_peripheral(peripheral_id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.shared.events.subscribe()
    }
}

async fn run_event_pump(
    shared: Arc<Shared>,
    mut central_events: std::pin::Pin<Box<dyn futures_util::Stream<Item = CentralEvent> + Send>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = central_events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match describe(&shared.adapter, &id).await {
                    Ok(descriptor) => shared.emit(RadioEvent::PeripheralDiscovered(descriptor)),
                    Err(e) => trace!("Skipping peripheral {:?}: {}", id, e),
                }
            }
            CentralEvent::DeviceDisconnected(id) => match shared.adapter.peripheral(&id).await {
                Ok(peripheral) => {
                    let peripheral_id = peripheral.address().to_string();
                    shared.cancel_notification_pump(&peripheral_id);
                    shared.emit(RadioEvent::PeripheralDisconnected { peripheral_id });
                }
                Err(e) => warn!("Disconnect event for unknown peripheral {:?}: {}", id, e),
            },
            _ => {}
        }
    }
    debug!("Adapter event pump stopped");
}

async fn describe(adapter: &Adapter, id: &PeripheralId) -> Result<PeripheralDescriptor, RadioError> {
    let peripheral = adapter.peripheral(id).await?;
    let props = peripheral.properties().await?;
    let (name, rssi) = props
        .map(|p| (p.local_name, p.rssi))
        .unwrap_or((None, None));

    Ok(PeripheralDescriptor::new(
        peripheral.address().to_string(),
        name,
        rssi,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poisoned_lock_still_cancels_tokens() {
        let pumps: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::default();
        let token = CancellationToken::new();
        pumps.lock().unwrap().insert("A".to_string(), token.clone());

        let poisoner = pumps.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(pumps.is_poisoned());

        let removed = lock_or_recover(&pumps, "notification pump").remove("A");
        removed.unwrap().cancel();
        assert!(token.is_cancelled());
        assert!(lock_or_recover(&pumps, "notification pump").is_empty());
    }
}
