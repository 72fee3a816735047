//! IPC Server - Unix Domain Socket 通信

use anyhow::Result;
use blelink_core::PeripheralDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::service::BleService;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("blelink.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "stop_scan")]
    StopScan,
    /// 未指定外设时连接信号最强的目标外设
    #[serde(rename = "connect")]
    Connect {
        #[serde(default)]
        peripheral_id: Option<String>,
    },
    #[serde(rename = "read")]
    Read { peripheral_id: String },
    #[serde(rename = "write")]
    Write {
        peripheral_id: String,
        data_hex: String,
    },
    #[serde(rename = "disconnect")]
    Disconnect { peripheral_id: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "status")]
    Status {
        is_scanning: bool,
        is_connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connected_peripheral: Option<PeripheralDescriptor>,
        peripherals: Vec<PeripheralDescriptor>,
    },
    #[serde(rename = "value")]
    Value { data_hex: String },
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        IpcResponse::Ok {
            message: message.into(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        IpcResponse::Error {
            message: message.to_string(),
        }
    }
}

pub async fn run_ipc_server(service: Arc<BleService>) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, service).await {
                        tracing::debug!("IPC client closed with error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, service: Arc<BleService>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                tracing::debug!("IPC request: {:?}", request);
                service.handle(request).await
            }
            Err(e) => IpcResponse::error(format!("Invalid request: {}", e)),
        };

        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
        line.clear();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&IpcRequest::StopScan).unwrap();
        assert_eq!(json, r#"{"type":"stop_scan"}"#);

        let json = serde_json::to_string(&IpcRequest::Write {
            peripheral_id: "AA:BB".to_string(),
            data_hex: "0102".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"write","peripheral_id":"AA:BB","data_hex":"0102"}"#
        );
    }

    #[test]
    fn test_connect_id_is_optional() {
        let request: IpcRequest = serde_json::from_str(r#"{"type":"connect"}"#).unwrap();
        assert_eq!(request, IpcRequest::Connect { peripheral_id: None });

        let request: IpcRequest =
            serde_json::from_str(r#"{"type":"connect","peripheral_id":"A"}"#).unwrap();
        assert_eq!(
            request,
            IpcRequest::Connect {
                peripheral_id: Some("A".to_string())
            }
        );
    }

    #[test]
    fn test_status_response_format() {
        let response = IpcResponse::Status {
            is_scanning: true,
            is_connected: false,
            connected_peripheral: None,
            peripherals: vec![PeripheralDescriptor::new(
                "A",
                Some("SAMPlE_BLE".to_string()),
                Some(-50),
            )],
        };
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], "status");
        assert_eq!(json["is_scanning"], true);
        assert!(json.get("connected_peripheral").is_none());
        assert_eq!(json["peripherals"][0]["advertisedName"], "SAMPlE_BLE");
        assert_eq!(json["peripherals"][0]["signalStrength"], -50);
    }

    #[test]
    fn test_unknown_request_is_rejected() {
        assert!(serde_json::from_str::<IpcRequest>(r#"{"type":"send"}"#).is_err());
        assert!(serde_json::from_str::<IpcRequest>(r#"{"type":"read"}"#).is_err());
    }
}
