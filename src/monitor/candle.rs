use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// Candles kept per chart before the oldest is evicted.
pub const CANDLE_WINDOW_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Local>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Builds a bar from one polled price and the previous close.
    ///
    /// The quote endpoint only returns a scalar, so the intrabar high/low is
    /// unobservable: high and low are the bounds of open and close. The first
    /// tick of a symbol yields a flat bar.
    pub fn synthesize(previous_close: Option<f64>, price: f64, timestamp: DateTime<Local>) -> Self {
        let open = previous_close.unwrap_or(price);
        Self {
            timestamp,
            open,
            high: open.max(price),
            low: open.min(price),
            close: price,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// Fixed-capacity rolling window of candles, oldest first.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// (min low, max high) across the window.
    pub fn price_bounds(&self) -> Option<(f64, f64)> {
        if self.candles.is_empty() {
            return None;
        }
        let min = self.candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let max = self
            .candles
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }
}

impl Default for CandleWindow {
    fn default() -> Self {
        Self::new(CANDLE_WINDOW_CAPACITY)
    }
}
