use crate::api::finnhub::QuoteSource;
use crate::config::{AppConfig, SlotEntry, Watchlist};
use crate::monitor::charts::ChartRegistry;
use crate::monitor::poller::PollerContext;
use crate::monitor::supervisor::WatcherSupervisor;
use crate::ui::core::alerts::{AlertPipeline, CooldownTable};
use crate::ui::core::sink::MonitorSink;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Requests from the dashboard to the monitoring core.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    /// Persist the slots and (re)start monitoring every configured symbol.
    Start(Vec<SlotEntry>),
    Stop,
    LookupPrice { slot: usize, symbol: String },
    /// Persist the slots, stop everything and end the controller.
    Quit(Vec<SlotEntry>),
}

/// Owns the supervisor and the alert pipeline and applies UI commands to
/// them, one at a time.
pub struct Controller {
    supervisor: WatcherSupervisor,
    pipeline: AlertPipeline,
    state_path: PathBuf,
}

impl Controller {
    pub fn new(config: &AppConfig, source: Arc<dyn QuoteSource>, sink: Arc<dyn MonitorSink>) -> Self {
        let pipeline = AlertPipeline::new(
            sink.clone(),
            CooldownTable::new(config.cooldown),
            config.notice_popup,
        );
        let ctx = PollerContext {
            source,
            sink,
            alerts: pipeline.sender(),
            charts: ChartRegistry::new(),
        };
        Self {
            supervisor: WatcherSupervisor::new(ctx, config.rate_budget),
            pipeline,
            state_path: config.state_path.clone(),
        }
    }

    pub fn supervisor(&self) -> &WatcherSupervisor {
        &self.supervisor
    }

    /// Processes commands until `Quit` arrives or the UI goes away.
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<UiCommand>) {
        self.pipeline.start();
        while let Some(command) = commands.recv().await {
            if !self.handle(command).await {
                return;
            }
        }
        info!("Command channel closed, shutting down");
        self.shutdown().await;
    }

    /// Returns false once the controller is done.
    pub async fn handle(&self, command: UiCommand) -> bool {
        match command {
            UiCommand::Start(slots) => {
                let watchlist = self.save(slots);
                let configs = watchlist.symbol_configs();
                if configs.is_empty() {
                    self.pipeline
                        .sender()
                        .log_system_message("no symbols configured, nothing to monitor");
                }
                self.pipeline.start();
                self.supervisor.start(configs).await;
                true
            }
            UiCommand::Stop => {
                self.supervisor.stop().await;
                true
            }
            UiCommand::LookupPrice { slot, symbol } => {
                self.supervisor.lookup_initial_price(slot, &symbol);
                true
            }
            UiCommand::Quit(slots) => {
                self.save(slots);
                self.shutdown().await;
                false
            }
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down monitoring");
        self.supervisor.shutdown().await;
        self.pipeline.stop().await;
    }

    fn save(&self, slots: Vec<SlotEntry>) -> Watchlist {
        let watchlist = Watchlist::new(slots);
        match watchlist.to_file(&self.state_path) {
            Ok(()) => info!("Saved watchlist to {}", self.state_path.display()),
            Err(e) => error!("{}", e),
        }
        watchlist
    }
}
