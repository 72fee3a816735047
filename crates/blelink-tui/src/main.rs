//! BLE Link TUI - 交互式终端界面
//!
//! 使用 ratatui 提供目标外设扫描、连接与读写界面，进程内直接持有 BLE provider。
//!
//! # 日志
//!
//! 日志默认显示在 TUI 的"日志"标签页中。
//! 如需输出到文件进行调试，设置 RUST_LOG 环境变量：
//!
//! ```bash
//! RUST_LOG=debug cargo run -p blelink-tui 2>> /tmp/blelink.log
//! ```

mod app;
mod tui_log;
mod ui;

use anyhow::Result;
use blelink_core::{
    BleProvider, BtleplugRadio, HostPermissionService, LogLevel, PermissionGate, PlatformInfo,
    ProviderSettings,
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use app::{App, AppMode, Tab};
use tui_log::TuiLogLayer;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ProviderSettings::load();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // 创建 App（获取日志发送器）
    let mut app = App::new(settings.log_level);

    // 初始化日志系统，发送到 TUI 日志面板
    init_logging(app.event_tx.clone(), settings.log_level);

    let provider = mount_provider(&settings).await;
    if let Some(provider) = &provider {
        app.attach(provider.machine().clone());
        if provider.permissions_granted() {
            // 启动即开始扫描
            app.start_scan();
        } else {
            app.add_log(LogLevel::Error, "蓝牙权限被拒绝，扫描与连接不可用");
        }
    }

    // Run app
    let res = run_app(&mut terminal, app).await;

    if let Some(provider) = provider {
        provider.unmount().await;
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

/// 挂载 provider，没有可用适配器时返回 `None`，界面仍可查看日志
async fn mount_provider(settings: &ProviderSettings) -> Option<BleProvider> {
    let radio = match BtleplugRadio::new(settings.adapter_index).await {
        Ok(radio) => Arc::new(radio),
        Err(e) => {
            tracing::error!("Failed to open Bluetooth adapter: {}", e);
            return None;
        }
    };
    let gate = PermissionGate::new(HostPermissionService, PlatformInfo::host());
    Some(BleProvider::mount(radio, &gate, settings).await)
}

/// 初始化日志系统
///
/// - 总是将日志发送到 TUI 日志面板
/// - 如果设置了 RUST_LOG，同时输出到 stderr（用于调试）
fn init_logging(log_tx: tokio::sync::mpsc::Sender<app::AppEvent>, level: LogLevel) {
    // 桥接 log crate（blelink-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // TUI 日志层 - 总是启用
    let tui_layer = TuiLogLayer::new(log_tx);

    // 面板按 App 的日志级别二次过滤，这里至少放行 debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.max(LogLevel::Debug).filter_directive()));

    // 如果设置了 RUST_LOG，同时输出到 stderr
    if std::env::var("RUST_LOG").is_ok() {
        use tracing_subscriber::fmt;

        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tui_layer)
            .with(stderr_layer)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tui_layer)
            .try_init();
    }
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, &app))?;

        // 使用 poll 避免无限阻塞
        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            // 弹窗显示时，任意键关闭
            if app.popup.is_some() {
                app.dismiss_popup();
                continue;
            }

            match app.mode {
                AppMode::WriteInput => match key.code {
                    KeyCode::Esc => app.cancel_write(),
                    KeyCode::Enter => app.submit_write(),
                    KeyCode::Char(c) => app.input_buffer.push(c),
                    KeyCode::Backspace => {
                        app.input_buffer.pop();
                    }
                    _ => {}
                },
                AppMode::Normal => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        return Ok(());
                    }
                    KeyCode::Char('s') => app.start_scan(),
                    KeyCode::Up | KeyCode::Char('k') => app.previous_device(),
                    KeyCode::Down | KeyCode::Char('j') => app.next_device(),
                    KeyCode::Enter => app.connect_selected(),
                    KeyCode::Char('r') => app.read_value(),
                    KeyCode::Char('w') => app.begin_write(),
                    KeyCode::Char('x') => app.disconnect(),
                    KeyCode::Tab => app.next_tab(),
                    KeyCode::Char('1') => app.tab = Tab::Devices,
                    KeyCode::Char('2') => app.tab = Tab::Log,
                    KeyCode::Char('d') => app.toggle_log_level(),
                    KeyCode::Char('c') => app.clear_logs(),
                    _ => {}
                },
            }
        }

        // Update app state (handle async events)
        app.tick();
    }
}
