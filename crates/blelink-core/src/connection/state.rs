//! 连接状态与状态转换
//!
//! [`ConnectionState`] 只能通过 [`ConnectionState::apply`] 修改，每个
//! [`Transition`] 对应一个命名的状态转换。

use crate::ble::{PeripheralDescriptor, PeripheralRegistry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Scanning,
    Connected,
}

/// 状态转换
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 预占扫描，防止重叠的扫描周期
    ScanRequested,
    /// 适配器拒绝扫描，释放预占
    ScanRequestFailed,
    ScanStarted,
    ScanStopped,
    RegistryCleared,
    PeripheralDiscovered(PeripheralDescriptor),
    /// 预占连接，连接序列完成前不提交任何状态
    ConnectRequested(String),
    ConnectAborted,
    Connected(PeripheralDescriptor),
    Disconnected { peripheral_id: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    phase: Phase,
    registry: PeripheralRegistry,
    connected_peripheral: Option<PeripheralDescriptor>,
    scan_pending: bool,
    connecting: Option<String>,
    /// 连接序列进行中收到了该外设的断开事件，本次连接不得提交
    connect_invalidated: bool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    pub fn connected_peripheral(&self) -> Option<&PeripheralDescriptor> {
        self.connected_peripheral.as_ref()
    }

    /// 是否已连接到指定外设
    pub fn is_connected_to(&self, peripheral_id: &str) -> bool {
        self.phase == Phase::Connected
            && self
                .connected_peripheral
                .as_ref()
                .is_some_and(|p| p.has_id(peripheral_id))
    }

    /// 连接序列进行中且链路已被断开事件作废
    pub fn is_connect_invalidated(&self) -> bool {
        self.connecting.is_some() && self.connect_invalidated
    }

    fn is_connecting_to(&self, peripheral_id: &str) -> bool {
        self.connecting
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(peripheral_id))
    }

    /// 应用状态转换，返回转换是否生效
    pub fn apply(&mut self, transition: Transition) -> bool {
        match transition {
            Transition::ScanRequested => {
                if self.phase != Phase::Idle || self.scan_pending {
                    return false;
                }
                self.scan_pending = true;
                true
            }
            Transition::ScanRequestFailed => {
                let was_pending = self.scan_pending;
                self.scan_pending = false;
                was_pending
            }
            Transition::ScanStarted => {
                self.scan_pending = false;
                if self.phase != Phase::Idle {
                    return false;
                }
                self.phase = Phase::Scanning;
                true
            }
            Transition::ScanStopped => {
                if self.phase != Phase::Scanning {
                    return false;
                }
                self.phase = Phase::Idle;
                true
            }
            Transition::RegistryCleared => {
                self.registry.clear();
                true
            }
            Transition::PeripheralDiscovered(descriptor) => {
                if !descriptor.is_target() {
                    return false;
                }
                self.registry.upsert(descriptor);
                true
            }
            Transition::ConnectRequested(peripheral_id) => {
                if self.connecting.is_some() || self.phase == Phase::Connected {
                    return false;
                }
                self.connecting = Some(peripheral_id);
                self.connect_invalidated = false;
                true
            }
            Transition::ConnectAborted => {
                self.connect_invalidated = false;
                self.connecting.take().is_some()
            }
            Transition::Connected(descriptor) => {
                let invalidated = self.connect_invalidated;
                self.connecting = None;
                self.connect_invalidated = false;
                if invalidated {
                    return false;
                }
                self.phase = Phase::Connected;
                self.connected_peripheral = Some(descriptor);
                true
            }
            Transition::Disconnected { peripheral_id } => {
                if self.is_connecting_to(&peripheral_id) {
                    self.connect_invalidated = true;
                    return true;
                }
                if !self.is_connected_to(&peripheral_id) {
                    return false;
                }
                self.phase = Phase::Idle;
                self.connected_peripheral = None;
                true
            }
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            is_connected: self.phase == Phase::Connected,
            is_scanning: self.phase == Phase::Scanning,
            peripherals: self.registry.values(),
            connected_peripheral: self.connected_peripheral.clone(),
        }
    }
}

/// 提供给展示层的只读快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub is_connected: bool,
    pub is_scanning: bool,
    pub peripherals: Vec<PeripheralDescriptor>,
    pub connected_peripheral: Option<PeripheralDescriptor>,
}

impl ConnectionSnapshot {
    /// 列表视图：已连接外设在前，随后是注册表中的其余外设
    pub fn device_list(&self) -> Vec<PeripheralDescriptor> {
        let mut list = Vec::with_capacity(self.peripherals.len() + 1);
        if let Some(connected) = &self.connected_peripheral {
            list.push(connected.clone());
        }
        list.extend(
            self.peripherals
                .iter()
                .filter(|p| {
                    !self
                        .connected_peripheral
                        .as_ref()
                        .is_some_and(|c| c.has_id(&p.id))
                })
                .cloned(),
        );
        list
    }
}
