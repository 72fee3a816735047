//! Event Bridge - 无线电事件 → 状态转换
//!
//! 在创建时订阅无线电事件，后台任务把事件逐个分派给状态机。
//! [`EventBridge::detach`] 或 `Drop` 时取消订阅，保证每个订阅只被拆除一次。

use log::{debug, warn};

use crate::ble::RadioEvent;
use crate::connection::machine::ConnectionStateMachine;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct EventBridge {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventBridge {
    /// 订阅事件并开始分派
    ///
    /// `events` 必须在任何命令发出之前获取，否则可能丢失早到的事件。
    pub fn attach(events: broadcast::Receiver<RadioEvent>, machine: ConnectionStateMachine) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_bridge(events, machine, cancel.clone()));
        debug!("Event bridge attached");

        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// 取消订阅并等待分派任务退出
    pub async fn detach(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Event bridge task ended abnormally: {}", e);
            }
        }
        debug!("Event bridge detached");
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_bridge(
    mut events: broadcast::Receiver<RadioEvent>,
    machine: ConnectionStateMachine,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => machine.handle_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event bridge lagged, {} radio event(s) dropped", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Radio event stream closed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{PeripheralDescriptor, RadioDriver, TARGET_NAME};
    use crate::connection::state::Phase;
    use crate::test_utils::{MockRadio, wait_until};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (MockRadio, ConnectionStateMachine) {
        let radio = MockRadio::new();
        let machine = ConnectionStateMachine::new(Arc::new(radio.clone()), Duration::from_secs(10));
        (radio, machine)
    }

    #[tokio::test]
    async fn test_bridge_dispatches_events() {
        let (radio, machine) = setup();
        let bridge = EventBridge::attach(radio.subscribe(), machine.clone());
        assert!(bridge.is_attached());

        radio.emit(RadioEvent::PeripheralDiscovered(PeripheralDescriptor::new(
            "A",
            Some(TARGET_NAME.to_string()),
            Some(-50),
        )));

        wait_until(&machine, |s| s.registry().len() == 1).await;
        bridge.detach().await;
    }

    #[tokio::test]
    async fn test_detach_stops_delivery() {
        let (radio, machine) = setup();
        machine.start_scan().await.unwrap();

        let bridge = EventBridge::attach(radio.subscribe(), machine.clone());
        assert_eq!(radio.subscriber_count(), 1);
        bridge.detach().await;
        assert_eq!(radio.subscriber_count(), 0);

        radio.emit(RadioEvent::ScanStopped);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(machine.phase(), Phase::Scanning);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (radio, machine) = setup();
        {
            let _bridge = EventBridge::attach(radio.subscribe(), machine.clone());
            assert_eq!(radio.subscriber_count(), 1);
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while radio.subscriber_count() != 0 {
            assert!(tokio::time::Instant::now() < deadline, "bridge never unsubscribed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
