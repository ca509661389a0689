use crate::monitor::candle::Candle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the monitoring core reports to the outside world.
///
/// Implementations are called from poller and consumer tasks, never from the
/// UI thread, so a UI-backed implementation must marshal the call instead of
/// touching widget state (see [`UiDispatcher`]).
pub trait MonitorSink: Send + Sync {
    fn on_candle(&self, slot: usize, symbol: &str, candle: &Candle);

    /// A slot was bound to a new symbol: drop old candles and retitle it.
    fn on_chart_reset(&self, slot: usize, symbol: &str);

    fn on_chart_clear(&self, slot: usize);

    fn on_alert(&self, line: &str);

    fn on_system_message(&self, line: &str);

    /// Audible cue plus, when `show_notice` is set, a modal notice.
    fn on_notify(&self, line: &str, show_notice: bool);

    /// Result of an on-demand price lookup. `None` means error or cleared slot.
    fn on_initial_price(&self, slot: usize, symbol: &str, price: Option<f64>);

    fn on_monitoring_changed(&self, interval: Option<Duration>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Candle {
        slot: usize,
        symbol: String,
        candle: Candle,
    },
    ChartReset {
        slot: usize,
        symbol: String,
    },
    ChartClear {
        slot: usize,
    },
    Alert(String),
    System(String),
    Notify {
        line: String,
        show_notice: bool,
    },
    InitialPrice {
        slot: usize,
        symbol: String,
        price: Option<f64>,
    },
    Monitoring(Option<Duration>),
}

/// Sink that posts every call onto the UI thread's event queue.
#[derive(Clone)]
pub struct UiDispatcher {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn post(&self, event: UiEvent) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("UI is gone, dropping event: {:?}", e.0);
        }
    }
}

impl MonitorSink for UiDispatcher {
    fn on_candle(&self, slot: usize, symbol: &str, candle: &Candle) {
        self.post(UiEvent::Candle {
            slot,
            symbol: symbol.to_string(),
            candle: candle.clone(),
        });
    }

    fn on_chart_reset(&self, slot: usize, symbol: &str) {
        self.post(UiEvent::ChartReset {
            slot,
            symbol: symbol.to_string(),
        });
    }

    fn on_chart_clear(&self, slot: usize) {
        self.post(UiEvent::ChartClear { slot });
    }

    fn on_alert(&self, line: &str) {
        self.post(UiEvent::Alert(line.to_string()));
    }

    fn on_system_message(&self, line: &str) {
        self.post(UiEvent::System(line.to_string()));
    }

    fn on_notify(&self, line: &str, show_notice: bool) {
        self.post(UiEvent::Notify {
            line: line.to_string(),
            show_notice,
        });
    }

    fn on_initial_price(&self, slot: usize, symbol: &str, price: Option<f64>) {
        self.post(UiEvent::InitialPrice {
            slot,
            symbol: symbol.to_string(),
            price,
        });
    }

    fn on_monitoring_changed(&self, interval: Option<Duration>) {
        self.post(UiEvent::Monitoring(interval));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every call in order.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<UiEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<UiEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn alerts(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    UiEvent::Alert(line) => Some(line),
                    _ => None,
                })
                .collect()
        }

        pub fn notifications(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    UiEvent::Notify { line, .. } => Some(line),
                    _ => None,
                })
                .collect()
        }

        pub fn system_messages(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    UiEvent::System(line) => Some(line),
                    _ => None,
                })
                .collect()
        }

        pub fn candles(&self, wanted: &str) -> Vec<Candle> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    UiEvent::Candle { symbol, candle, .. } if symbol == wanted => Some(candle),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, event: UiEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl MonitorSink for RecordingSink {
        fn on_candle(&self, slot: usize, symbol: &str, candle: &Candle) {
            self.push(UiEvent::Candle {
                slot,
                symbol: symbol.to_string(),
                candle: candle.clone(),
            });
        }

        fn on_chart_reset(&self, slot: usize, symbol: &str) {
            self.push(UiEvent::ChartReset {
                slot,
                symbol: symbol.to_string(),
            });
        }

        fn on_chart_clear(&self, slot: usize) {
            self.push(UiEvent::ChartClear { slot });
        }

        fn on_alert(&self, line: &str) {
            self.push(UiEvent::Alert(line.to_string()));
        }

        fn on_system_message(&self, line: &str) {
            self.push(UiEvent::System(line.to_string()));
        }

        fn on_notify(&self, line: &str, show_notice: bool) {
            self.push(UiEvent::Notify {
                line: line.to_string(),
                show_notice,
            });
        }

        fn on_initial_price(&self, slot: usize, symbol: &str, price: Option<f64>) {
            self.push(UiEvent::InitialPrice {
                slot,
                symbol: symbol.to_string(),
                price,
            });
        }

        fn on_monitoring_changed(&self, interval: Option<Duration>) {
            self.push(UiEvent::Monitoring(interval));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    #[test]
    fn dispatcher_marshals_calls_in_order() {
        let (dispatcher, mut rx) = UiDispatcher::channel();
        let candle = Candle::synthesize(None, 10.0, Local::now());

        dispatcher.on_chart_reset(0, "AAPL");
        dispatcher.on_candle(0, "AAPL", &candle);
        dispatcher.on_alert("[10:00:00] ALERT (AAPL): up");

        assert_eq!(
            rx.try_recv().unwrap(),
            UiEvent::ChartReset {
                slot: 0,
                symbol: "AAPL".to_string()
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), UiEvent::Candle { slot: 0, .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            UiEvent::Alert("[10:00:00] ALERT (AAPL): up".to_string())
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatcher_survives_a_closed_ui() {
        let (dispatcher, rx) = UiDispatcher::channel();
        drop(rx);
        dispatcher.on_system_message("nobody listening");
    }
}
