//! Core Service - 把 IPC 请求分派到连接状态机

use blelink_core::{
    ConnectionSnapshot, ConnectionStateMachine, PeripheralDescriptor, ScanOutcome,
};

use crate::ipc::{IpcRequest, IpcResponse};

pub struct BleService {
    machine: ConnectionStateMachine,
}

impl BleService {
    pub fn new(machine: ConnectionStateMachine) -> Self {
        Self { machine }
    }

    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => {
                let snapshot = self.machine.snapshot();
                IpcResponse::Status {
                    is_scanning: snapshot.is_scanning,
                    is_connected: snapshot.is_connected,
                    connected_peripheral: snapshot.connected_peripheral,
                    peripherals: snapshot.peripherals,
                }
            }
            IpcRequest::Scan => match self.machine.start_scan().await {
                Ok(ScanOutcome::Started) => IpcResponse::ok("Scanning started"),
                Ok(ScanOutcome::AlreadyScanning) => IpcResponse::ok("Already scanning"),
                Err(e) => IpcResponse::error(e),
            },
            IpcRequest::StopScan => match self.machine.stop_scan().await {
                Ok(()) => IpcResponse::ok("Scan stopped"),
                Err(e) => IpcResponse::error(e),
            },
            IpcRequest::Connect { peripheral_id } => self.connect(peripheral_id).await,
            IpcRequest::Read { peripheral_id } => {
                match self.machine.read_characteristic(&peripheral_id).await {
                    Ok(data) => IpcResponse::Value {
                        data_hex: hex::encode(data),
                    },
                    Err(e) => IpcResponse::error(e),
                }
            }
            IpcRequest::Write {
                peripheral_id,
                data_hex,
            } => {
                let data = match hex::decode(data_hex.trim()) {
                    Ok(data) => data,
                    Err(e) => return IpcResponse::error(format!("Invalid hex payload: {}", e)),
                };
                match self
                    .machine
                    .write_characteristic(&peripheral_id, &data)
                    .await
                {
                    Ok(()) => IpcResponse::ok(format!("Wrote {} bytes", data.len())),
                    Err(e) => IpcResponse::error(e),
                }
            }
            IpcRequest::Disconnect { peripheral_id } => {
                match self.machine.disconnect(&peripheral_id).await {
                    Ok(()) => IpcResponse::ok(format!("Disconnected from {}", peripheral_id)),
                    Err(e) => IpcResponse::error(e),
                }
            }
        }
    }

    async fn connect(&self, peripheral_id: Option<String>) -> IpcResponse {
        let snapshot = self.machine.snapshot();
        let descriptor = match peripheral_id {
            Some(id) => snapshot.peripherals.iter().find(|p| p.has_id(&id)).cloned(),
            None => strongest_peripheral(&snapshot),
        };
        let Some(descriptor) = descriptor else {
            return IpcResponse::error("No matching peripheral discovered, run a scan first");
        };

        let result = self
            .machine
            .connect_to_then(&descriptor, |d| {
                tracing::info!(
                    "Connected to {} ({}), distance {}",
                    d.display_name(),
                    d.id,
                    d.distance_label()
                );
            })
            .await;
        match result {
            Ok(()) => IpcResponse::ok(format!("Connected to {}", descriptor.id)),
            Err(e) => IpcResponse::error(e),
        }
    }
}

/// 信号最强的目标外设，RSSI 未知的排在最后
fn strongest_peripheral(snapshot: &ConnectionSnapshot) -> Option<PeripheralDescriptor> {
    snapshot
        .peripherals
        .iter()
        .max_by_key(|p| p.signal_strength.unwrap_or(i16::MIN))
        .cloned()
}

/// 记录特征值通知，直到状态机被丢弃
pub async fn log_notifications(machine: ConnectionStateMachine) {
    use tokio::sync::broadcast::error::RecvError;

    let mut rx = machine.notifications();
    drop(machine);
    loop {
        match rx.recv().await {
            Ok(n) => tracing::info!(
                "Notification from {} [{}]: {}",
                n.peripheral_id,
                n.characteristic_id,
                hex::encode(&n.value)
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} notification(s)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blelink_core::test_utils::{MockRadio, RadioCall, RadioOp};
    use blelink_core::{RadioEvent, TARGET_NAME};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (MockRadio, BleService) {
        let radio = MockRadio::new();
        let machine = ConnectionStateMachine::new(Arc::new(radio.clone()), Duration::from_secs(10));
        (radio, BleService::new(machine))
    }

    fn discover(service: &BleService, id: &str, rssi: Option<i16>) {
        service
            .machine
            .handle_event(RadioEvent::PeripheralDiscovered(PeripheralDescriptor::new(
                id,
                Some(TARGET_NAME.to_string()),
                rssi,
            )));
    }

    #[tokio::test]
    async fn test_status_reflects_scan() {
        let (_radio, service) = setup();
        assert!(matches!(service.handle(IpcRequest::Scan).await, IpcResponse::Ok { .. }));

        match service.handle(IpcRequest::Status).await {
            IpcResponse::Status {
                is_scanning,
                is_connected,
                ..
            } => {
                assert!(is_scanning);
                assert!(!is_connected);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_picks_strongest() {
        let (radio, service) = setup();
        discover(&service, "weak", Some(-80));
        discover(&service, "strong", Some(-40));
        discover(&service, "unknown", None);

        let response = service.handle(IpcRequest::Connect { peripheral_id: None }).await;
        assert_eq!(response, IpcResponse::ok("Connected to strong"));
        assert_eq!(radio.calls()[0], RadioCall::Connect("strong".to_string()));
    }

    #[tokio::test]
    async fn test_connect_unknown_peripheral() {
        let (radio, service) = setup();
        let response = service
            .handle(IpcRequest::Connect {
                peripheral_id: Some("missing".to_string()),
            })
            .await;
        assert!(matches!(response, IpcResponse::Error { .. }));
        assert!(radio.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_write_hex() {
        let (radio, service) = setup();
        radio.set_read_value(vec![0xca, 0xfe]);
        discover(&service, "A", Some(-50));
        service
            .handle(IpcRequest::Connect {
                peripheral_id: Some("A".to_string()),
            })
            .await;

        let response = service
            .handle(IpcRequest::Read {
                peripheral_id: "A".to_string(),
            })
            .await;
        assert_eq!(
            response,
            IpcResponse::Value {
                data_hex: "cafe".to_string()
            }
        );

        let response = service
            .handle(IpcRequest::Write {
                peripheral_id: "A".to_string(),
                data_hex: "zz".to_string(),
            })
            .await;
        assert!(matches!(response, IpcResponse::Error { .. }));
        assert_eq!(radio.count(RadioOp::Write), 0);

        let response = service
            .handle(IpcRequest::Write {
                peripheral_id: "A".to_string(),
                data_hex: "0a0b".to_string(),
            })
            .await;
        assert_eq!(response, IpcResponse::ok("Wrote 2 bytes"));
    }

    #[tokio::test]
    async fn test_command_errors_are_reported() {
        let (radio, service) = setup();
        radio.fail(RadioOp::StartScan);

        assert!(matches!(
            service.handle(IpcRequest::Scan).await,
            IpcResponse::Error { .. }
        ));
        assert!(matches!(
            service
                .handle(IpcRequest::Read {
                    peripheral_id: "A".to_string()
                })
                .await,
            IpcResponse::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_peripheral_ids_ignore_case() {
        let (radio, service) = setup();
        radio.set_read_value(vec![0x01]);
        discover(&service, "AA:BB:CC:DD:EE:FF", Some(-50));

        let response = service
            .handle(IpcRequest::Connect {
                peripheral_id: Some("aa:bb:cc:dd:ee:ff".to_string()),
            })
            .await;
        assert_eq!(response, IpcResponse::ok("Connected to AA:BB:CC:DD:EE:FF"));

        let response = service
            .handle(IpcRequest::Read {
                peripheral_id: "aa:bb:cc:dd:ee:ff".to_string(),
            })
            .await;
        assert_eq!(
            response,
            IpcResponse::Value {
                data_hex: "01".to_string()
            }
        );
    }
}
