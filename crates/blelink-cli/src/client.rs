//! IPC Client - 与守护进程通信

use anyhow::Result;
use blelink_core::PeripheralDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("blelink.sock")
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "stop_scan")]
    StopScan,
    #[serde(rename = "connect")]
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
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

#[derive(Serialize, Deserialize, Debug)]
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
        #[serde(default)]
        connected_peripheral: Option<PeripheralDescriptor>,
        peripherals: Vec<PeripheralDescriptor>,
    },
    #[serde(rename = "value")]
    Value { data_hex: String },
}

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let path = socket_path();

    let stream = match UnixStream::connect(&path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 blelink-daemon 正在运行");
            eprintln!("   运行: cargo xtask dev");
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // 发送请求
    let json = serde_json::to_string(&request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    // 读取响应
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: IpcResponse = serde_json::from_str(&line)?;

    match &response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_id_omits_field() {
        let json = serde_json::to_string(&IpcRequest::Connect { peripheral_id: None }).unwrap();
        assert_eq!(json, r#"{"type":"connect"}"#);
    }

    #[test]
    fn test_parse_status_without_connection() {
        let line = r#"{"type":"status","is_scanning":false,"is_connected":false,"peripherals":[{"id":"A","advertisedName":"SAMPlE_BLE"}]}"#;
        match serde_json::from_str::<IpcResponse>(line).unwrap() {
            IpcResponse::Status {
                connected_peripheral,
                peripherals,
                ..
            } => {
                assert!(connected_peripheral.is_none());
                assert_eq!(peripherals.len(), 1);
                assert_eq!(peripherals[0].signal_strength, None);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_parse_value() {
        let response: IpcResponse =
            serde_json::from_str(r#"{"type":"value","data_hex":"00ff"}"#).unwrap();
        assert!(matches!(response, IpcResponse::Value { data_hex } if data_hex == "00ff"));
    }
}
