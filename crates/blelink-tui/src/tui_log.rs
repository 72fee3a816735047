//! TUI 日志层
//!
//! 自定义 tracing Layer，把事件转换为 [`LogEntry`] 发送到日志面板。
//! 通道已满时直接丢弃，渲染循环不会被日志阻塞。

use crate::app::AppEvent;
use blelink_core::{LogEntry, LogLevel};
use std::fmt;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

pub struct TuiLogLayer {
    tx: mpsc::Sender<AppEvent>,
}

impl TuiLogLayer {
    pub fn new(tx: mpsc::Sender<AppEvent>) -> Self {
        Self { tx }
    }
}

fn to_log_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

impl<S> Layer<S> for TuiLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.finish(metadata.target());

        let entry = LogEntry::new(to_log_level(metadata.level()), message);
        let _ = self.tx.try_send(AppEvent::Log(entry));
    }
}

/// 提取 `message` 字段，其余字段以 `key=value` 附在后面
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self, target: &str) -> String {
        let mut out = self.message;
        for field in self.fields {
            // tracing-log 注入的来源字段对面板没有意义
            if field.starts_with("log.") {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&field);
        }
        if out.is_empty() {
            target.to_string()
        } else {
            out
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}
