use crate::ble::RadioError;
use std::fmt;

/// 连接序列中的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Connect,
    RetrieveServices,
    StartNotification,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectStage::Connect => "connect",
            ConnectStage::RetrieveServices => "service discovery",
            ConnectStage::StartNotification => "notification subscription",
        };
        write!(f, "{}", name)
    }
}

/// 命令错误
///
/// 所有错误都只影响当前命令，下一次命令不受影响。
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Required BLE permissions were not granted")]
    PermissionDenied,

    #[error("Scan rejected: {0}")]
    ScanRejected(#[source] RadioError),

    #[error("Failed to stop scan: {0}")]
    StopScanFailed(#[source] RadioError),

    #[error("Connect failed during {stage}: {source}")]
    ConnectFailed {
        stage: ConnectStage,
        #[source]
        source: RadioError,
    },

    #[error("Read failed: {0}")]
    ReadFailed(#[source] RadioError),

    #[error("Write failed: {0}")]
    WriteFailed(#[source] RadioError),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] RadioError),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Another {0} is already in progress")]
    Busy(&'static str),

    #[error("{0} is not a target peripheral")]
    NotTarget(String),
}

impl ConnectionError {
    /// 连接失败的步骤
    pub fn connect_stage(&self) -> Option<ConnectStage> {
        match self {
            ConnectionError::ConnectFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
