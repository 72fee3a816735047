//! 测试工具
//!
//! 提供内存中的 [`MockRadio`] 与 [`MockPermissionService`]，用于在没有蓝牙硬件的
//! 环境下驱动状态机：可按操作注入失败、记录调用、手动发出无线电事件。
//!
//! ```rust,ignore
//! let radio = MockRadio::new();
//! radio.fail(RadioOp::StartNotification);
//! let machine = ConnectionStateMachine::new(Arc::new(radio.clone()), Duration::from_secs(10));
//! assert!(machine.connect_to(&descriptor).await.is_err());
//! ```

use crate::ble::{PeripheralDescriptor, RadioDriver, RadioError, RadioEvent};
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::permission::{Permission, PermissionError, PermissionService, PermissionStatus};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// 无线电操作类型，用于失败注入和计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioOp {
    EnableRadio,
    StartScan,
    StopScan,
    Connect,
    RetrieveServices,
    StartNotification,
    Read,
    Write,
    Disconnect,
}

/// 记录的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    EnableRadio,
    StartScan(Duration),
    StopScan,
    Connect(String),
    RetrieveServices(String),
    StartNotification {
        peripheral_id: String,
        service_id: Uuid,
        characteristic_id: Uuid,
    },
    Read {
        peripheral_id: String,
        service_id: Uuid,
        characteristic_id: Uuid,
    },
    Write {
        peripheral_id: String,
        service_id: Uuid,
        characteristic_id: Uuid,
        data: Vec<u8>,
    },
    Disconnect(String),
}

impl RadioCall {
    pub fn op(&self) -> RadioOp {
        match self {
            RadioCall::EnableRadio => RadioOp::EnableRadio,
            RadioCall::StartScan(_) => RadioOp::StartScan,
            RadioCall::StopScan => RadioOp::StopScan,
            RadioCall::Connect(_) => RadioOp::Connect,
            RadioCall::RetrieveServices(_) => RadioOp::RetrieveServices,
            RadioCall::StartNotification { .. } => RadioOp::StartNotification,
            RadioCall::Read { .. } => RadioOp::Read,
            RadioCall::Write { .. } => RadioOp::Write,
            RadioCall::Disconnect(_) => RadioOp::Disconnect,
        }
    }
}

struct MockState {
    calls: Vec<RadioCall>,
    failures: HashSet<RadioOp>,
    read_value: Vec<u8>,
    latency: Duration,
}

struct MockInner {
    events: broadcast::Sender<RadioEvent>,
    state: Mutex<MockState>,
}

/// 脚本化的内存无线电驱动
#[derive(Clone)]
pub struct MockRadio {
    inner: Arc<MockInner>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MockInner {
                events,
                state: Mutex::new(MockState {
                    calls: Vec::new(),
                    failures: HashSet::new(),
                    read_value: Vec::new(),
                    latency: Duration::ZERO,
                }),
            }),
        }
    }

    /// 每个操作在完成前挂起的时长
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // 测试中 panic 导致的中毒不影响记录数据
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail(&self, op: RadioOp) {
        self.lock().failures.insert(op);
    }

    pub fn succeed(&self, op: RadioOp) {
        self.lock().failures.remove(&op);
    }

    pub fn set_read_value(&self, value: Vec<u8>) {
        self.lock().read_value = value;
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: RadioOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    pub fn emit(&self, event: RadioEvent) {
        let _ = self.inner.events.send(event);
    }

    /// 发出一次发现事件
    pub fn discover(&self, id: &str, name: Option<&str>, rssi: Option<i16>) {
        self.emit(RadioEvent::PeripheralDiscovered(PeripheralDescriptor::new(
            id,
            name.map(str::to_string),
            rssi,
        )));
    }

    async fn record(&self, call: RadioCall) -> Result<(), RadioError> {
        let op = call.op();
        let (latency, fails) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.latency, state.failures.contains(&op))
        };

        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }

        if fails {
            Err(RadioError::Rejected(format!("{:?} failed (injected)", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RadioDriver for MockRadio {
    async fn enable_radio(&self) -> Result<(), RadioError> {
        self.record(RadioCall::EnableRadio).await
    }

    async fn start_scan(&self, duration: Duration) -> Result<(), RadioError> {
        self.record(RadioCall::StartScan(duration)).await
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.record(RadioCall::StopScan).await?;
        self.emit(RadioEvent::ScanStopped);
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<(), RadioError> {
        self.record(RadioCall::Connect(peripheral_id.to_string()))
            .await
    }

    async fn retrieve_services(&self, peripheral_id: &str) -> Result<(), RadioError> {
        self.record(RadioCall::RetrieveServices(peripheral_id.to_string()))
            .await
    }

    async fn start_notification(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<(), RadioError> {
        self.record(RadioCall::StartNotification {
            peripheral_id: peripheral_id.to_string(),
            service_id,
            characteristic_id,
        })
        .await
    }

    async fn read(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<Vec<u8>, RadioError> {
        self.record(RadioCall::Read {
            peripheral_id: peripheral_id.to_string(),
            service_id,
            characteristic_id,
        })
        .await?;
        Ok(self.lock().read_value.clone())
    }

    async fn write_without_response(
        &self,
        peripheral_id: &str,
        service_id: Uuid,
        characteristic_id: Uuid,
        data: &[u8],
    ) -> Result<(), RadioError> {
        self.record(RadioCall::Write {
            peripheral_id: peripheral_id.to_string(),
            service_id,
            characteristic_id,
            data: data.to_vec(),
        })
        .await
    }

    async fn disconnect(&self, peripheral_id: &str) -> Result<(), RadioError> {
        self.record(RadioCall::Disconnect(peripheral_id.to_string()))
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.inner.events.subscribe()
    }
}

struct PermissionState {
    statuses: HashMap<Permission, String>,
    fail: bool,
    requests: Vec<Vec<Permission>>,
}

/// 可配置的权限服务
#[derive(Clone)]
pub struct MockPermissionService {
    state: Arc<Mutex<PermissionState>>,
}

impl MockPermissionService {
    pub fn granting_all() -> Self {
        let statuses = Permission::REQUESTED
            .iter()
            .map(|p| (*p, "granted".to_string()))
            .collect();
        Self {
            state: Arc::new(Mutex::new(PermissionState {
                statuses,
                fail: false,
                requests: Vec::new(),
            })),
        }
    }

    /// 每次请求都返回平台错误
    pub fn failing() -> Self {
        let service = Self::granting_all();
        service.lock().fail = true;
        service
    }

    pub fn with_status(self, permission: Permission, status: &str) -> Self {
        self.lock().statuses.insert(permission, status.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, PermissionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn last_request(&self) -> Vec<Permission> {
        self.lock().requests.last().cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PermissionService for MockPermissionService {
    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>, PermissionError> {
        let mut state = self.lock();
        state.requests.push(permissions.to_vec());
        if state.fail {
            return Err(PermissionError::RequestFailed(
                "platform API error".to_string(),
            ));
        }
        Ok(permissions
            .iter()
            .filter_map(|p| {
                state
                    .statuses
                    .get(p)
                    .map(|s| (*p, PermissionStatus::from_platform(s)))
            })
            .collect())
    }
}

/// 等待状态满足条件，超时 1 秒后 panic
pub async fn wait_until<F>(machine: &ConnectionStateMachine, predicate: F)
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut rx = machine.watch();
    let result = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(predicate)).await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("state channel closed while waiting"),
        Err(_) => panic!("timed out waiting for state: {:?}", machine.snapshot()),
    }
}
