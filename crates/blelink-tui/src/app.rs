//! Application state

use blelink_core::{
    CharacteristicNotification, ConnectionSnapshot, ConnectionStateMachine, LogEntry, LogLevel,
    PeripheralDescriptor, ScanOutcome,
};
use tokio::sync::{broadcast, mpsc};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_LOG_ENTRIES: usize = 500;

/// 后台任务发回 UI 循环的事件
#[derive(Debug, Clone)]
pub enum AppEvent {
    Log(LogEntry),
    State(ConnectionSnapshot),
    Connected(PeripheralDescriptor),
    Notification(CharacteristicNotification),
    ReadValue { peripheral_id: String, data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppMode {
    Normal,
    /// 正在输入要写入的文本
    WriteInput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tab {
    Devices,
    Log,
}

pub struct App {
    pub mode: AppMode,
    pub tab: Tab,
    pub snapshot: ConnectionSnapshot,
    pub selected_device: usize,
    pub logs: Vec<LogEntry>,
    pub log_filter: LogLevel,
    pub input_buffer: String,
    /// 弹窗消息，任意键关闭
    pub popup: Option<String>,
    pub last_value: Option<Vec<u8>>,
    pub event_tx: mpsc::Sender<AppEvent>,
    event_rx: mpsc::Receiver<AppEvent>,
    machine: Option<ConnectionStateMachine>,
}

impl App {
    pub fn new(log_filter: LogLevel) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mode: AppMode::Normal,
            tab: Tab::Devices,
            snapshot: ConnectionSnapshot::default(),
            selected_device: 0,
            logs: vec![
                LogEntry::new(LogLevel::Info, "BLE Link TUI 启动"),
                LogEntry::new(LogLevel::Info, "按 's' 扫描设备, 'q' 退出"),
            ],
            log_filter,
            input_buffer: String::new(),
            popup: None,
            last_value: None,
            event_tx,
            event_rx,
            machine: None,
        }
    }

    /// 绑定状态机，并把状态变化与通知转发为 [`AppEvent`]
    pub fn attach(&mut self, machine: ConnectionStateMachine) {
        self.snapshot = machine.snapshot();

        let mut state_rx = machine.watch();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let snapshot = state_rx.borrow_and_update().snapshot();
                if tx.send(AppEvent::State(snapshot)).await.is_err() {
                    break;
                }
            }
        });

        let mut notification_rx = machine.notifications();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match notification_rx.recv().await {
                    Ok(n) => {
                        if tx.send(AppEvent::Notification(n)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.machine = Some(machine);
    }

    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
        self.trim_logs();
    }

    fn trim_logs(&mut self) {
        if self.logs.len() > MAX_LOG_ENTRIES {
            let excess = self.logs.len() - MAX_LOG_ENTRIES;
            self.logs.drain(..excess);
        }
    }

    pub fn visible_logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(|e| e.visible_at(self.log_filter))
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn toggle_log_level(&mut self) {
        self.log_filter = self.log_filter.cycle();
        self.add_log(
            LogLevel::Info,
            format!("日志级别: {}", self.log_filter.name()),
        );
    }

    /// 列表视图：已连接外设在前
    pub fn devices(&self) -> Vec<PeripheralDescriptor> {
        self.snapshot.device_list()
    }

    pub fn selected(&self) -> Option<PeripheralDescriptor> {
        self.devices().get(self.selected_device).cloned()
    }

    fn machine(&mut self) -> Option<ConnectionStateMachine> {
        if self.machine.is_none() {
            self.add_log(LogLevel::Error, "蓝牙适配器不可用");
        }
        self.machine.clone()
    }

    pub fn start_scan(&mut self) {
        let Some(machine) = self.machine() else {
            return;
        };
        tokio::spawn(async move {
            match machine.start_scan().await {
                Ok(ScanOutcome::Started) => {}
                Ok(ScanOutcome::AlreadyScanning) => tracing::debug!("Already scanning"),
                Err(e) => tracing::error!("Scan failed: {}", e),
            }
        });
    }

    pub fn connect_selected(&mut self) {
        let Some(device) = self.selected() else {
            self.add_log(LogLevel::Warn, "无效的设备选择");
            return;
        };
        let Some(machine) = self.machine() else {
            return;
        };
        self.add_log(
            LogLevel::Info,
            format!("连接到: {} ({})", device.display_name(), device.id),
        );
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = machine
                .connect_to_then(&device, |d| {
                    let _ = tx.try_send(AppEvent::Connected(d.clone()));
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Connect failed: {}", e);
            }
        });
    }

    fn connected_id(&mut self) -> Option<String> {
        let id = self.snapshot.connected_peripheral.as_ref().map(|p| p.id.clone());
        if id.is_none() {
            self.add_log(LogLevel::Warn, "未连接设备");
        }
        id
    }

    pub fn read_value(&mut self) {
        let Some(id) = self.connected_id() else {
            return;
        };
        let Some(machine) = self.machine() else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match machine.read_characteristic(&id).await {
                Ok(data) => {
                    let _ = tx
                        .send(AppEvent::ReadValue {
                            peripheral_id: id,
                            data,
                        })
                        .await;
                }
                Err(e) => tracing::error!("Read failed: {}", e),
            }
        });
    }

    pub fn begin_write(&mut self) {
        if self.connected_id().is_some() {
            self.input_buffer.clear();
            self.mode = AppMode::WriteInput;
        }
    }

    pub fn cancel_write(&mut self) {
        self.input_buffer.clear();
        self.mode = AppMode::Normal;
    }

    /// 把输入框的文本按 UTF-8 写入
    pub fn submit_write(&mut self) {
        self.mode = AppMode::Normal;
        let data = std::mem::take(&mut self.input_buffer).into_bytes();
        if data.is_empty() {
            return;
        }
        let Some(id) = self.connected_id() else {
            return;
        };
        let Some(machine) = self.machine() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = machine.write_characteristic(&id, &data).await {
                tracing::error!("Write failed: {}", e);
            }
        });
    }

    pub fn disconnect(&mut self) {
        let Some(id) = self.connected_id() else {
            return;
        };
        let Some(machine) = self.machine() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = machine.disconnect(&id).await {
                tracing::error!("Disconnect failed: {}", e);
            }
        });
    }

    pub fn dismiss_popup(&mut self) {
        self.popup = None;
    }

    pub fn next_device(&mut self) {
        let len = self.devices().len();
        if len > 0 {
            self.selected_device = (self.selected_device + 1) % len;
        }
    }

    pub fn previous_device(&mut self) {
        let len = self.devices().len();
        if len > 0 {
            self.selected_device = self.selected_device.checked_sub(1).unwrap_or(len - 1);
        }
    }

    pub fn next_tab(&mut self) {
        self.tab = match self.tab {
            Tab::Devices => Tab::Log,
            Tab::Log => Tab::Devices,
        };
    }

    /// 处理后台事件（非阻塞）
    pub fn tick(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Log(entry) => {
                self.logs.push(entry);
                self.trim_logs();
            }
            AppEvent::State(snapshot) => {
                self.snapshot = snapshot;
                let len = self.snapshot.device_list().len();
                if self.selected_device >= len {
                    self.selected_device = len.saturating_sub(1);
                }
            }
            AppEvent::Connected(device) => {
                self.popup = Some(format!(
                    "已连接到 {}\n{}\n距离: {}",
                    device.display_name(),
                    device.id,
                    device.distance_label()
                ));
                self.selected_device = 0;
            }
            AppEvent::Notification(n) => {
                self.add_log(
                    LogLevel::Info,
                    format!("通知 {}: {}", n.peripheral_id, hex::encode(&n.value)),
                );
                self.last_value = Some(n.value);
            }
            AppEvent::ReadValue {
                peripheral_id,
                data,
            } => {
                self.add_log(
                    LogLevel::Info,
                    format!("读取 {}: {}", peripheral_id, hex::encode(&data)),
                );
                self.last_value = Some(data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blelink_core::test_utils::{MockRadio, RadioOp};
    use blelink_core::{RadioEvent, TARGET_NAME};
    use std::sync::Arc;
    use std::time::Duration;

    fn attached_app() -> (MockRadio, ConnectionStateMachine, App) {
        let radio = MockRadio::new();
        let machine = ConnectionStateMachine::new(Arc::new(radio.clone()), Duration::from_secs(10));
        let mut app = App::new(LogLevel::Info);
        app.attach(machine.clone());
        (radio, machine, app)
    }

    /// 等待后台任务把事件送回并处理
    async fn pump(app: &mut App) {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            app.tick();
        }
    }

    fn discover(machine: &ConnectionStateMachine, id: &str, rssi: i16) {
        machine.handle_event(RadioEvent::PeripheralDiscovered(PeripheralDescriptor::new(
            id,
            Some(TARGET_NAME.to_string()),
            Some(rssi),
        )));
    }

    #[tokio::test]
    async fn test_state_changes_reach_app() {
        let (_radio, machine, mut app) = attached_app();
        discover(&machine, "A", -50);
        discover(&machine, "B", -60);
        pump(&mut app).await;

        assert_eq!(app.devices().len(), 2);
        app.next_device();
        assert_eq!(app.selected().map(|d| d.id), Some("B".to_string()));
        app.next_device();
        assert_eq!(app.selected_device, 0);
        app.previous_device();
        assert_eq!(app.selected_device, 1);
    }

    #[tokio::test]
    async fn test_connect_shows_popup() {
        let (radio, machine, mut app) = attached_app();
        discover(&machine, "A", -69);
        pump(&mut app).await;

        app.connect_selected();
        pump(&mut app).await;

        assert_eq!(radio.count(RadioOp::Connect), 1);
        assert!(app.snapshot.is_connected);
        let popup = app.popup.clone().unwrap();
        assert!(popup.contains("A"));
        assert!(popup.contains("1.00 m"));

        app.dismiss_popup();
        assert!(app.popup.is_none());
    }

    #[tokio::test]
    async fn test_write_input_flow() {
        let (radio, machine, mut app) = attached_app();
        discover(&machine, "A", -50);
        pump(&mut app).await;
        app.connect_selected();
        pump(&mut app).await;

        app.begin_write();
        assert_eq!(app.mode, AppMode::WriteInput);
        app.input_buffer.push_str("hi");
        app.submit_write();
        pump(&mut app).await;

        assert_eq!(app.mode, AppMode::Normal);
        assert_eq!(radio.count(RadioOp::Write), 1);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let (_radio, _machine, mut app) = attached_app();
        app.begin_write();
        assert_eq!(app.mode, AppMode::Normal);
    }

    #[tokio::test]
    async fn test_log_filter() {
        let mut app = App::new(LogLevel::Info);
        app.clear_logs();
        app.handle_event(AppEvent::Log(LogEntry::new(LogLevel::Debug, "hidden")));
        app.handle_event(AppEvent::Log(LogEntry::new(LogLevel::Warn, "shown")));

        let visible: Vec<_> = app.visible_logs().map(|e| e.message.as_str()).collect();
        assert_eq!(visible, vec!["shown"]);

        app.toggle_log_level();
        assert_eq!(app.log_filter, LogLevel::Debug);
        assert!(app.visible_logs().any(|e| e.message == "hidden"));
    }

    #[tokio::test]
    async fn test_commands_without_adapter() {
        let mut app = App::new(LogLevel::Info);
        app.start_scan();
        assert!(app.logs.iter().any(|e| e.level == LogLevel::Error));
    }
}
