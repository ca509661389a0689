use crate::api::finnhub::QuoteSource;
use crate::monitor::candle::Candle;
use crate::monitor::charts::{ChartBinding, ChartRegistry};
use crate::monitor::threshold::{self, SymbolConfig};
use crate::ui::core::alerts::AlertSender;
use crate::ui::core::sink::MonitorSink;
use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every poller of a supervisor.
#[derive(Clone)]
pub struct PollerContext {
    pub source: Arc<dyn QuoteSource>,
    pub sink: Arc<dyn MonitorSink>,
    pub alerts: AlertSender,
    pub charts: ChartRegistry,
}

/// Fixed-interval price loop for one symbol.
pub struct Poller {
    config: SymbolConfig,
    interval: Duration,
    binding: Option<ChartBinding>,
    ctx: PollerContext,
    cancel: CancellationToken,
    previous_close: Option<f64>,
}

impl Poller {
    pub fn new(
        config: SymbolConfig,
        interval: Duration,
        binding: Option<ChartBinding>,
        ctx: PollerContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            interval,
            binding,
            ctx,
            cancel,
            previous_close: None,
        }
    }

    /// Runs until the token is cancelled. Fetches and sleeps both race the
    /// token, so cancellation is observed within one await.
    pub async fn run(mut self) {
        let symbol = self.config.symbol.clone();
        self.ctx
            .alerts
            .log_system_message(format!("monitoring started for {}", symbol));

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.ctx.source.fetch_price(&symbol) => result,
            };

            let pause = match fetched {
                Ok(price) => {
                    self.on_price(price);
                    self.interval
                }
                Err(e) => {
                    warn!("{}: {}", symbol, e);
                    self.ctx
                        .alerts
                        .queue_alert(&symbol, format!("price fetch failed: {}", e));
                    self.interval * 2
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Poller for {} cancelled", symbol);
        if let Some(binding) = self.binding {
            if self.ctx.charts.is_current(&symbol, binding) {
                self.ctx.sink.on_chart_clear(binding.slot);
            }
        }
        self.ctx
            .alerts
            .log_system_message(format!("monitoring stopped for {}", symbol));
    }

    fn on_price(&mut self, price: f64) {
        let symbol = self.config.symbol.as_str();
        let candle = Candle::synthesize(self.previous_close, price, Local::now());
        debug!(
            "{}: O {:.4} H {:.4} L {:.4} C {:.4}",
            symbol, candle.open, candle.high, candle.low, candle.close
        );

        if let Some(binding) = self.binding {
            if self.ctx.charts.is_current(symbol, binding) {
                self.ctx.sink.on_candle(binding.slot, symbol, &candle);
            }
        }

        if let Some(event) = threshold::evaluate(&self.config, self.previous_close, price) {
            self.ctx.alerts.queue_event(event);
        }
        self.previous_close = Some(price);
    }
}
