use crate::monitor::poller::{Poller, PollerContext};
use crate::monitor::threshold::SymbolConfig;
use futures::future::join_all;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Symbols that get a chart; any beyond this are polled without one.
pub const MAX_CHART_SLOTS: usize = 4;
/// Requests per minute allowed by the quote provider's free tier, with margin.
pub const DEFAULT_RATE_BUDGET: u32 = 58;
const STOP_GRACE: Duration = Duration::from_secs(2);
const LOOKUP_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const LOOKUP_PERMITS: usize = 4;

/// Poll interval shared by a batch of `symbols` pollers.
///
/// Small batches poll fast (2, 3, 4, 5 s for one to four symbols, 5 s
/// beyond). Whatever the batch size, the interval is stretched so the batch
/// as a whole stays within `budget` requests per minute.
pub fn polling_interval(symbols: usize, budget: u32) -> Duration {
    let floor = match symbols {
        0 | 1 => 2,
        2 => 3,
        3 => 4,
        _ => 5,
    };
    let budget = budget.max(1) as u64;
    let needed = (symbols.max(1) as u64 * 60 + budget - 1) / budget;
    Duration::from_secs(needed.max(floor))
}

/// Worker threads for the runtime hosting pollers and lookups.
pub fn worker_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 2).max(2)
}

struct Batch {
    cancel: CancellationToken,
    interval: Duration,
    pollers: Vec<(String, JoinHandle<()>)>,
}

/// Owns the set of running pollers. At most one poller per symbol exists at
/// any time: every start replaces the whole previous batch.
pub struct WatcherSupervisor {
    ctx: PollerContext,
    rate_budget: u32,
    batch: Mutex<Option<Batch>>,
    lookup_permits: Arc<Semaphore>,
    lookups: Mutex<Vec<JoinHandle<()>>>,
}

impl WatcherSupervisor {
    pub fn new(ctx: PollerContext, rate_budget: u32) -> Self {
        Self {
            ctx,
            rate_budget,
            batch: Mutex::new(None),
            lookup_permits: Arc::new(Semaphore::new(LOOKUP_PERMITS)),
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the running batch with one poller per distinct symbol and
    /// returns the interval they poll at.
    pub async fn start(&self, configs: Vec<SymbolConfig>) -> Duration {
        self.stop_pollers().await;

        let mut seen = HashSet::new();
        let configs: Vec<SymbolConfig> = configs
            .into_iter()
            .filter(|c| !c.symbol.is_empty())
            .filter(|c| {
                let fresh = seen.insert(c.symbol.clone());
                if !fresh {
                    warn!("{} is listed more than once, keeping the first entry", c.symbol);
                }
                fresh
            })
            .collect();

        let interval = polling_interval(configs.len(), self.rate_budget);
        if configs.is_empty() {
            warn!("No symbols to monitor");
            self.ctx.sink.on_monitoring_changed(None);
            return interval;
        }

        let cancel = CancellationToken::new();
        let mut pollers = Vec::with_capacity(configs.len());
        for (index, config) in configs.into_iter().enumerate() {
            let binding = if index < MAX_CHART_SLOTS {
                let binding = self.ctx.charts.bind(&config.symbol, index);
                self.ctx.sink.on_chart_reset(index, &config.symbol);
                Some(binding)
            } else {
                info!("{} has no free chart slot and is polled without one", config.symbol);
                None
            };

            let symbol = config.symbol.clone();
            let poller = Poller::new(
                config,
                interval,
                binding,
                self.ctx.clone(),
                cancel.child_token(),
            );
            pollers.push((symbol, tokio::spawn(poller.run())));
        }

        info!(
            "Monitoring {} symbol(s) every {}s",
            pollers.len(),
            interval.as_secs()
        );
        *self.batch.lock().unwrap() = Some(Batch {
            cancel,
            interval,
            pollers,
        });
        self.ctx.sink.on_monitoring_changed(Some(interval));
        interval
    }

    /// Stops every poller. Charts keep their last candles.
    pub async fn stop(&self) {
        if self.stop_pollers().await {
            self.ctx.sink.on_monitoring_changed(None);
        }
    }

    /// `stop`, then waits for outstanding price lookups.
    pub async fn shutdown(&self) {
        self.stop().await;

        let mut lookups: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lookups.lock().unwrap());
        if lookups.is_empty() {
            return;
        }
        if tokio::time::timeout(LOOKUP_STOP_TIMEOUT, join_all(lookups.iter_mut()))
            .await
            .is_err()
        {
            error!(
                "Price lookups did not finish within {:?}, aborting them",
                LOOKUP_STOP_TIMEOUT
            );
            for handle in &lookups {
                handle.abort();
            }
        }
    }

    /// Returns whether a batch was running.
    async fn stop_pollers(&self) -> bool {
        // Detach first: a poller exiting from here on must not clear its chart.
        self.ctx.charts.detach_all();

        let batch = self.batch.lock().unwrap().take();
        let Some(mut batch) = batch else {
            return false;
        };

        batch.cancel.cancel();
        let bound = batch.interval + STOP_GRACE;
        let joined = tokio::time::timeout(
            bound,
            join_all(batch.pollers.iter_mut().map(|(_, handle)| handle)),
        )
        .await;

        if joined.is_err() {
            for (symbol, handle) in &batch.pollers {
                if !handle.is_finished() {
                    warn!("Poller for {} did not stop within {:?}, aborting it", symbol, bound);
                    handle.abort();
                }
            }
        }
        info!("Stopped {} poller(s)", batch.pollers.len());
        true
    }

    /// Fetches one price for `slot` outside the polling loop and reports it
    /// through the sink. An empty symbol clears the slot without a request.
    pub fn lookup_initial_price(&self, slot: usize, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            self.ctx.sink.on_initial_price(slot, "", None);
            return;
        }

        let source = self.ctx.source.clone();
        let sink = self.ctx.sink.clone();
        let permits = self.lookup_permits.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match source.fetch_price(&symbol).await {
                Ok(price) => sink.on_initial_price(slot, &symbol, Some(price)),
                Err(e) => {
                    warn!("Initial price lookup for {} failed: {}", symbol, e);
                    sink.on_initial_price(slot, &symbol, None);
                }
            }
        });

        let mut lookups = self.lookups.lock().unwrap();
        lookups.retain(|h| !h.is_finished());
        lookups.push(handle);
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.batch
            .lock()
            .unwrap()
            .as_ref()
            .map(|b| b.pollers.iter().map(|(symbol, _)| symbol.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.batch.lock().unwrap().is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.batch.lock().unwrap().as_ref().map(|b| b.interval)
    }
}
