use crate::ui::core::sink::MonitorSink;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const CONSUMER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Triggered,
    System,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub timestamp: DateTime<Local>,
    pub symbol: Option<String>,
    pub detail: String,
    pub kind: AlertKind,
}

impl AlertEvent {
    pub fn triggered(symbol: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            symbol: Some(symbol.to_string()),
            detail: detail.into(),
            kind: AlertKind::Triggered,
        }
    }

    pub fn system(detail: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            symbol: None,
            detail: detail.into(),
            kind: AlertKind::System,
        }
    }

    pub fn render(&self) -> String {
        let ts = self.timestamp.format("%H:%M:%S");
        match (&self.kind, &self.symbol) {
            (AlertKind::Triggered, Some(symbol)) => {
                format!("[{}] ALERT ({}): {}", ts, symbol, self.detail)
            }
            _ => format!("[{}] SYSTEM: {}", ts, self.detail),
        }
    }

    /// Cooldown key: the symbol verbatim plus the detail with every number
    /// collapsed to `#`. Two crossings of the same target by the same symbol
    /// share a key regardless of the prices involved; digits inside the
    /// symbol itself are kept.
    pub fn cooldown_key(&self) -> String {
        let symbol = self.symbol.as_deref().unwrap_or_default();
        let detail = if symbol.is_empty() {
            collapse_numbers(&self.detail)
        } else {
            self.detail
                .split(symbol)
                .map(collapse_numbers)
                .collect::<Vec<_>>()
                .join(symbol)
        };
        format!("ALERT ({}): {}", symbol, detail)
    }
}

fn collapse_numbers(text: &str) -> String {
    let mut key = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || next == '.' || next == ',' {
                    chars.next();
                } else {
                    break;
                }
            }
            key.push('#');
        } else {
            key.push(c);
        }
    }
    key
}

/// Last notification instant per alert key, shared by every producer.
#[derive(Clone)]
pub struct CooldownTable {
    last_notified: Arc<Mutex<HashMap<String, Instant>>>,
    window: Duration,
}

impl CooldownTable {
    pub fn new(window: Duration) -> Self {
        Self {
            last_notified: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    pub fn should_notify(&self, key: &str) -> bool {
        self.should_notify_at(key, Instant::now())
    }

    /// Suppressed attempts do not extend the window.
    pub fn should_notify_at(&self, key: &str, now: Instant) -> bool {
        let mut last_notified = self.last_notified.lock().unwrap();
        match last_notified.get(key) {
            Some(&previous) if now.saturating_duration_since(previous) < self.window => false,
            _ => {
                last_notified.insert(key.to_string(), now);
                true
            }
        }
    }
}

impl Default for CooldownTable {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// Producer handle handed to pollers.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<AlertEvent>,
    sink: Arc<dyn MonitorSink>,
}

impl AlertSender {
    pub fn queue_alert(&self, symbol: &str, detail: impl Into<String>) {
        self.queue_event(AlertEvent::triggered(symbol, detail));
    }

    pub fn queue_event(&self, event: AlertEvent) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("Alert queue closed, dropping: {}", e.0.render());
        }
    }

    /// Lifecycle lines skip the queue and never trigger a notification.
    pub fn log_system_message(&self, detail: impl Into<String>) {
        let line = AlertEvent::system(detail).render();
        log::info!("{}", line);
        self.sink.on_system_message(&line);
    }
}

struct Consumer {
    drain: CancellationToken,
    abort: CancellationToken,
    handle: JoinHandle<()>,
}

/// Single-consumer alert queue.
///
/// Any number of producers enqueue through [`AlertSender`]; exactly one task
/// dequeues and hands each line to the sink, ringing the bell and raising the
/// notice only when the cooldown for that alert's key has elapsed.
pub struct AlertPipeline {
    tx: mpsc::UnboundedSender<AlertEvent>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<AlertEvent>>>,
    sink: Arc<dyn MonitorSink>,
    cooldown: CooldownTable,
    show_notice: bool,
    state: Arc<Mutex<ConsumerState>>,
    consumer: Mutex<Option<Consumer>>,
}

impl AlertPipeline {
    pub fn new(sink: Arc<dyn MonitorSink>, cooldown: CooldownTable, show_notice: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            sink,
            cooldown,
            show_notice,
            state: Arc::new(Mutex::new(ConsumerState::NotStarted)),
            consumer: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> AlertSender {
        AlertSender {
            tx: self.tx.clone(),
            sink: self.sink.clone(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock().unwrap()
    }

    /// Spawns the consumer. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut consumer = self.consumer.lock().unwrap();
        if let Some(running) = consumer.as_ref() {
            if !running.handle.is_finished() {
                log::debug!("Alert consumer already running");
                return;
            }
        }

        *self.state.lock().unwrap() = ConsumerState::Running;
        let drain = CancellationToken::new();
        let abort = CancellationToken::new();
        let handle = tokio::spawn(consume(
            self.rx.clone(),
            self.sink.clone(),
            self.cooldown.clone(),
            self.show_notice,
            self.state.clone(),
            drain.clone(),
            abort.clone(),
        ));
        *consumer = Some(Consumer {
            drain,
            abort,
            handle,
        });
        log::info!("Alert consumer started");
    }

    /// Graceful stop: queued alerts are delivered before the consumer exits.
    pub async fn stop(&self) {
        let consumer = self.consumer.lock().unwrap().take();
        if let Some(consumer) = consumer {
            consumer.drain.cancel();
            Self::join(consumer).await;
        }
    }

    /// Hard stop: whatever is still queued stays undelivered.
    pub async fn cancel(&self) {
        let consumer = self.consumer.lock().unwrap().take();
        if let Some(consumer) = consumer {
            consumer.abort.cancel();
            Self::join(consumer).await;
        }
    }

    async fn join(consumer: Consumer) {
        let mut handle = consumer.handle;
        match tokio::time::timeout(CONSUMER_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => log::info!("Alert consumer stopped"),
            Ok(Err(e)) => log::error!("Alert consumer ended abnormally: {}", e),
            Err(_) => {
                log::error!(
                    "Alert consumer did not stop within {:?}, aborting it",
                    CONSUMER_STOP_TIMEOUT
                );
                handle.abort();
            }
        }
    }
}

async fn consume(
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<AlertEvent>>>,
    sink: Arc<dyn MonitorSink>,
    cooldown: CooldownTable,
    show_notice: bool,
    state: Arc<Mutex<ConsumerState>>,
    drain: CancellationToken,
    abort: CancellationToken,
) {
    let mut rx = rx.lock().await;
    loop {
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                log::info!("Alert consumer cancelled");
                break;
            }
            _ = drain.cancelled() => {
                *state.lock().unwrap() = ConsumerState::Draining;
                let mut drained = 0usize;
                while let Ok(event) = rx.try_recv() {
                    dispatch(&*sink, &cooldown, show_notice, &event, false);
                    drained += 1;
                }
                log::info!("Alert consumer drained {} queued alert(s)", drained);
                break;
            }
            next = tokio::time::timeout(QUEUE_POLL_TIMEOUT, rx.recv()) => match next {
                Ok(Some(event)) => dispatch(&*sink, &cooldown, show_notice, &event, true),
                Ok(None) => break,
                Err(_) => {}
            }
        }
    }
    *state.lock().unwrap() = ConsumerState::Stopped;
}

/// No notifications while draining: monitoring is already over.
fn dispatch(
    sink: &dyn MonitorSink,
    cooldown: &CooldownTable,
    show_notice: bool,
    event: &AlertEvent,
    audible: bool,
) {
    let line = event.render();
    match event.kind {
        AlertKind::System => sink.on_system_message(&line),
        AlertKind::Triggered => {
            sink.on_alert(&line);
            if audible && cooldown.should_notify(&event.cooldown_key()) {
                sink.on_notify(&line, show_notice);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::core::sink::testing::RecordingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Condvar;

    fn pipeline(sink: Arc<RecordingSink>) -> AlertPipeline {
        AlertPipeline::new(sink, CooldownTable::default(), true)
    }

    #[test]
    fn renders_alert_and_system_lines() {
        let alert = AlertEvent::triggered("AAPL", "AAPL price (101.5000) > target (100.0000)");
        let line = alert.render();
        assert!(line.starts_with('['));
        assert_eq!(&line[9..], "] ALERT (AAPL): AAPL price (101.5000) > target (100.0000)");

        let system = AlertEvent::system("monitoring stopped").render();
        assert!(system.ends_with("] SYSTEM: monitoring stopped"));
    }

    #[test]
    fn key_ignores_prices() {
        let a = AlertEvent::triggered("AAPL", "AAPL price (101.5000) > target (100.0000)").cooldown_key();
        let b = AlertEvent::triggered("AAPL", "AAPL price (103.2500) > target (100.0000)").cooldown_key();
        let c = AlertEvent::triggered("MSFT", "MSFT price (103.2500) > target (100.0000)").cooldown_key();
        let d = AlertEvent::triggered("AAPL", "AAPL price (99.0000) < target (100.0000)").cooldown_key();
        assert_eq!(a, b);
        assert_eq!(a, "ALERT (AAPL): AAPL price (#) > target (#)");
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn key_keeps_digits_inside_symbols() {
        let toyota =
            AlertEvent::triggered("7203.T", "7203.T price (2500.0000) > target (2400.0000)");
        let sony = AlertEvent::triggered("6758.T", "6758.T price (2500.0000) > target (2400.0000)");
        assert_eq!(
            toyota.cooldown_key(),
            "ALERT (7203.T): 7203.T price (#) > target (#)"
        );
        assert_ne!(toyota.cooldown_key(), sony.cooldown_key());

        let later = AlertEvent::triggered("7203.T", "7203.T price (2612.5000) > target (2400.0000)");
        assert_eq!(toyota.cooldown_key(), later.cooldown_key());
    }

    #[test]
    fn numeric_tickers_get_separate_notifications() {
        let sink = RecordingSink::default();
        let cooldown = CooldownTable::default();
        for symbol in ["7203.T", "6758.T"] {
            let event = AlertEvent::triggered(
                symbol,
                format!("{} price (2500.0000) > target (2400.0000)", symbol),
            );
            dispatch(&sink, &cooldown, true, &event, true);
        }
        assert_eq!(sink.notifications().len(), 2);
    }

    #[test]
    fn cooldown_suppresses_within_window_only() {
        let table = CooldownTable::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(table.should_notify_at("K", t0));
        assert!(!table.should_notify_at("K", t0 + Duration::from_secs(10)));
        assert!(table.should_notify_at("K", t0 + Duration::from_secs(31)));
        assert!(table.should_notify_at("other", t0 + Duration::from_secs(31)));
    }

    #[test]
    fn cooldown_is_shared_between_clones() {
        let table = CooldownTable::new(Duration::from_secs(30));
        let clone = table.clone();
        let now = Instant::now();
        assert!(table.should_notify_at("K", now));
        assert!(!clone.should_notify_at("K", now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn log_lines_are_never_suppressed() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(sink.clone());
        pipeline.start();
        let sender = pipeline.sender();

        for price in ["101.0", "102.0", "103.0"] {
            sender.queue_alert("AAPL", format!("AAPL price ({}) > target (100.0000)", price));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.stop().await;

        assert_eq!(sink.alerts().len(), 3);
        assert_eq!(sink.notifications().len(), 1);
    }

    #[tokio::test]
    async fn stop_drains_queue_and_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(sink.clone());
        assert_eq!(pipeline.state(), ConsumerState::NotStarted);

        let sender = pipeline.sender();
        for i in 0..5 {
            sender.queue_alert("MSFT", format!("event {}", i));
        }
        pipeline.start();
        pipeline.start();
        assert_eq!(pipeline.state(), ConsumerState::Running);

        pipeline.stop().await;
        pipeline.stop().await;
        assert_eq!(pipeline.state(), ConsumerState::Stopped);

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 5);
        assert!(alerts[0].ends_with("event 0"));
        assert!(alerts[4].ends_with("event 4"));
    }

    /// Holds the consumer inside its first `on_alert` until released.
    #[derive(Default)]
    struct GatedSink {
        delivered: AtomicUsize,
        released: Mutex<bool>,
        gate: Condvar,
    }

    impl GatedSink {
        fn delivered(&self) -> usize {
            self.delivered.load(Ordering::SeqCst)
        }

        fn release(&self) {
            *self.released.lock().unwrap() = true;
            self.gate.notify_all();
        }
    }

    impl MonitorSink for GatedSink {
        fn on_candle(&self, _: usize, _: &str, _: &crate::monitor::candle::Candle) {}
        fn on_chart_reset(&self, _: usize, _: &str) {}
        fn on_chart_clear(&self, _: usize) {}
        fn on_alert(&self, _: &str) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            let mut released = self.released.lock().unwrap();
            while !*released {
                released = self.gate.wait(released).unwrap();
            }
        }
        fn on_system_message(&self, _: &str) {}
        fn on_notify(&self, _: &str, _: bool) {}
        fn on_initial_price(&self, _: usize, _: &str, _: Option<f64>) {}
        fn on_monitoring_changed(&self, _: Option<Duration>) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_stops_a_running_consumer_without_draining() {
        let sink = Arc::new(GatedSink::default());
        let pipeline = AlertPipeline::new(sink.clone(), CooldownTable::default(), true);
        let sender = pipeline.sender();
        for i in 0..5 {
            sender.queue_alert("TSLA", format!("event {}", i));
        }
        pipeline.start();

        while sink.delivered() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The first poll raises the abort token and parks on the join.
        let cancelling = pipeline.cancel();
        tokio::pin!(cancelling);
        assert!(futures::poll!(cancelling.as_mut()).is_pending());
        sink.release();
        cancelling.await;

        assert_eq!(pipeline.state(), ConsumerState::Stopped);
        assert_eq!(sink.delivered(), 1);
    }

    #[tokio::test]
    async fn pipeline_can_restart_after_stop() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(sink.clone());
        pipeline.start();
        pipeline.stop().await;

        pipeline.sender().queue_alert("NVDA", "after restart");
        pipeline.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.stop().await;
        assert_eq!(sink.alerts().len(), 1);
    }

    #[test]
    fn system_messages_bypass_queue_and_notifications() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(sink.clone());
        pipeline.sender().log_system_message("monitoring started for AAPL");
        assert_eq!(sink.system_messages().len(), 1);
        assert!(sink.notifications().is_empty());
    }
}
