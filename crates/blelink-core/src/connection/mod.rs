//! 连接管理
//!
//! - **state**: 连接状态、命名状态转换与只读快照
//! - **machine**: 状态机命令（扫描、连接、读写、断开）
//! - **bridge**: 把无线电事件分派为状态转换

pub mod bridge;
pub mod error;
pub mod machine;
pub mod state;

pub use bridge::EventBridge;
pub use error::{ConnectStage, ConnectionError};
pub use machine::{ConnectionStateMachine, ScanOutcome};
pub use state::{ConnectionSnapshot, ConnectionState, Phase, Transition};
