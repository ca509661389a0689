use crossterm::{execute, terminal::{disable_raw_mode, LeaveAlternateScreen}};
use log::{error, info};
use std::sync::Arc;
use stockwatch::api::finnhub::FinnhubClient;
use stockwatch::app::Controller;
use stockwatch::config::{AppConfig, Watchlist};
use stockwatch::monitor::supervisor::worker_pool_size;
use stockwatch::ui::core::sink::UiDispatcher;
use stockwatch::ui::dashboard::Dashboard;

fn main() -> stockwatch::Result<()> {
    let config = AppConfig::from_env();
    config.init_logging()?;

    // Log the panic and give the terminal back before the default report.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        error!("Panic: {}", panic);
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen);
        default_hook(panic);
    }));

    info!("Starting Stockwatch...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_pool_size())
        .thread_name("stockwatch-worker")
        .enable_all()
        .build()?;

    let watchlist = Watchlist::load(&config.state_path);
    let source = Arc::new(FinnhubClient::new(&config.base_url, &config.api_key)?);

    // Create channels
    let (dispatcher, ui_events) = UiDispatcher::channel();
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();

    let controller = Controller::new(&config, source, Arc::new(dispatcher));
    let controller_handle = runtime.spawn(controller.run(command_rx));

    // The dashboard owns the main thread until the user quits.
    let mut dashboard = Dashboard::new(&watchlist, command_tx, ui_events);
    let result = dashboard.run();
    if let Err(e) = &result {
        error!("Dashboard error: {}", e);
    }
    drop(dashboard);

    if let Err(e) = runtime.block_on(controller_handle) {
        error!("Controller ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    result
}
