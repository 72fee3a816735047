//! UI rendering module

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Tabs, Wrap},
};

use crate::app::{App, AppMode, Tab};
use blelink_core::LogLevel;

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Status bar
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);
    draw_main(frame, app, chunks[1]);
    draw_status_bar(frame, app, chunks[2]);

    if app.mode == AppMode::WriteInput {
        draw_input(frame, app);
    }
    if let Some(message) = &app.popup {
        draw_popup(frame, message);
    }
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let titles = vec!["设备 [1]", "日志 [2]"];
    let selected = match app.tab {
        Tab::Devices => 0,
        Tab::Log => 1,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(" BLE Link TUI "))
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow).bold());

    frame.render_widget(tabs, area);
}

fn draw_main(frame: &mut Frame, app: &App, area: Rect) {
    match app.tab {
        Tab::Devices => draw_devices_tab(frame, app, area),
        Tab::Log => draw_log_tab(frame, app, area),
    }
}

fn draw_devices_tab(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let connected_id = app.snapshot.connected_peripheral.as_ref().map(|p| &p.id);

    // Device list
    let items: Vec<ListItem> = app
        .devices()
        .iter()
        .enumerate()
        .map(|(i, dev)| {
            let marker = if Some(&dev.id) == connected_id { "🔗" } else { "  " };
            let content = format!(
                "{} {} {} {} ({})",
                marker,
                dev.display_name(),
                rssi_to_bar(dev.signal_strength),
                dev.distance_label(),
                dev.id
            );
            let style = if i == app.selected_device {
                Style::default().bg(Color::DarkGray).fg(Color::White)
            } else {
                Style::default()
            };
            ListItem::new(content).style(style)
        })
        .collect();

    let title = if app.snapshot.is_scanning {
        " 🔍 扫描中... "
    } else {
        " 📡 目标外设 "
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD));

    frame.render_widget(list, chunks[0]);

    // Details / help
    let mut text = if app.snapshot.is_connected {
        "r 读取\nw 写入\nx 断开\nTab 切换标签".to_string()
    } else if app.devices().is_empty() {
        "按 's' 开始扫描\n按 'q' 退出".to_string()
    } else {
        "↑/↓ 选择设备\nEnter 连接\nTab 切换标签\n\n按 's' 重新扫描".to_string()
    };
    if let Some(value) = &app.last_value {
        text.push_str(&format!("\n\n最近数据:\n{}", hex::encode(value)));
        if let Ok(s) = std::str::from_utf8(value) {
            text.push_str(&format!("\n\"{}\"", s));
        }
    }

    let help = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(" 帮助 "))
        .wrap(Wrap { trim: true });

    frame.render_widget(help, chunks[1]);
}

fn draw_log_tab(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let entries: Vec<_> = app.visible_logs().collect();
    let items: Vec<ListItem> = entries
        .iter()
        .rev()
        .take(height)
        .map(|entry| {
            ListItem::new(format!("{} {}", entry.level.icon(), entry.message))
                .style(level_style(entry.level))
        })
        .collect();

    let title = format!(" 📋 日志 ({}) ", app.log_filter.name());
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));

    frame.render_widget(list, area);
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let mode_text = if app.snapshot.is_connected {
        " 🔗 已连接 "
    } else if app.snapshot.is_scanning {
        " 🔍 扫描中 "
    } else {
        " ⏸️  空闲 "
    };

    let status = Paragraph::new(format!(
        "{}│ 设备: {} │ [s]扫描 [Enter]连接 [r]读 [w]写 [x]断开 [d]日志级别 [c]清空 [q]退出",
        mode_text,
        app.snapshot.peripherals.len()
    ))
    .block(Block::default().borders(Borders::ALL));

    frame.render_widget(status, area);
}

fn draw_input(frame: &mut Frame, app: &App) {
    let area = centered_rect(60, 3, frame.area());
    let input = Paragraph::new(format!("{}▏", app.input_buffer)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" ✏️  写入数据 (Enter 发送, Esc 取消) "),
    );
    frame.render_widget(Clear, area);
    frame.render_widget(input, area);
}

fn draw_popup(frame: &mut Frame, message: &str) {
    let height = message.lines().count() as u16 + 4;
    let area = centered_rect(50, height, frame.area());
    let popup = Paragraph::new(format!("{}\n\n按任意键继续", message))
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Green))
        .block(Block::default().borders(Borders::ALL).title(" ✅ 连接成功 "))
        .wrap(Wrap { trim: true });
    frame.render_widget(Clear, area);
    frame.render_widget(popup, area);
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * percent_x / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn level_style(level: LogLevel) -> Style {
    match level {
        LogLevel::Error => Style::default().fg(Color::Red),
        LogLevel::Warn => Style::default().fg(Color::Yellow),
        LogLevel::Info => Style::default(),
        LogLevel::Debug | LogLevel::Trace => Style::default().fg(Color::DarkGray),
    }
}

fn rssi_to_bar(rssi: Option<i16>) -> &'static str {
    match rssi {
        Some(r) if r > -50 => "████",
        Some(r) if r > -60 => "███░",
        Some(r) if r > -70 => "██░░",
        Some(r) if r > -80 => "█░░░",
        _ => "░░░░",
    }
}
