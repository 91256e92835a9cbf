use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use coverscout::bootstrap::build_artwork_services;
use coverscout::catalog::{load_albums, InMemoryCatalog};
use coverscout::config::{config_path, load_or_create, Config};
use coverscout::http::UreqTransport;
use coverscout::protocol::{ArtworkMessage, BusArtworkSink, DiagnosticsMessage, Message};
use coverscout::viewport::VisibilityProbe;
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

const DEFAULT_VISIBLE_ROWS: usize = 10;
const USAGE: &str = "usage: coverscout <albums.json> [visible_rows]";

/// Treats the first `count` rows as the on-screen viewport.
struct HeadlessProbe {
    count: usize,
}

impl VisibilityProbe for HeadlessProbe {
    fn visible_rows(&self) -> Vec<usize> {
        (0..self.count).collect()
    }
}

fn log_level_from_env() -> log::LevelFilter {
    std::env::var("COVERSCOUT_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(log::LevelFilter::Info)
}

fn load_config() -> Config {
    let Some(path) = config_path() else {
        warn!("No config directory on this platform. Using defaults");
        return Config::default();
    };
    match load_or_create(&path) {
        Ok(config) => config,
        Err(error) => {
            warn!(
                "Failed to load config, using defaults. path={} error={}",
                path.display(),
                error
            );
            Config::default()
        }
    }
}

async fn print_bus_messages(mut receiver: broadcast::Receiver<Message>) {
    loop {
        match receiver.recv().await {
            Ok(Message::Artwork(ArtworkMessage::RowResolved { index, url })) => {
                println!("{}\t{}", index, url.as_deref().unwrap_or("-"));
            }
            Ok(Message::Artwork(ArtworkMessage::PrefetchImage { url })) => {
                debug!("Prefetch requested: {}", url);
            }
            Ok(Message::Diagnostics(DiagnosticsMessage::StatsSnapshot(stats))) => {
                match serde_json::to_string_pretty(&stats) {
                    Ok(json) => println!("{json}"),
                    Err(error) => warn!("Failed to serialize provider stats: {}", error),
                }
                return;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Bus printer lagged, skipped {} messages", skipped);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut clog = colog::default_builder();
    clog.filter(None, log_level_from_env());
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let mut args = std::env::args().skip(1);
    let Some(albums_path) = args.next().map(PathBuf::from) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    let visible_rows = match args.next().map(|value| value.parse::<usize>()) {
        None => DEFAULT_VISIBLE_ROWS,
        Some(Ok(count)) => count,
        Some(Err(_)) => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = load_config();
    let albums = match load_albums(&albums_path) {
        Ok(albums) => albums,
        Err(error) => {
            error!("{}", error);
            return ExitCode::FAILURE;
        }
    };
    info!("Loaded {} albums from {}", albums.len(), albums_path.display());

    let (bus_sender, bus_receiver) = broadcast::channel(1024);
    let printer = tokio::spawn(print_bus_messages(bus_receiver));

    let transport = Arc::new(UreqTransport::new(Duration::from_millis(
        config.providers.http_timeout_ms,
    )));
    let services = build_artwork_services(
        &config,
        transport,
        Arc::new(InMemoryCatalog::new(albums.clone())),
        bus_sender.clone(),
    );

    let visible_count = visible_rows.min(albums.len());
    let session = services.scheduler.render(
        albums,
        Arc::new(BusArtworkSink::new(bus_sender.clone())),
        Arc::new(HeadlessProbe {
            count: visible_count,
        }),
    );
    // With zero visible rows nothing is reported and the safety net takes over.
    if visible_count > 0 {
        session.rows_visible(&(0..visible_count).collect::<Vec<_>>());
    }
    session.wait_settled().await;

    let _ = services.bus_sender.send(Message::Diagnostics(DiagnosticsMessage::StatsSnapshot(
        services.orchestrator.stats_snapshot(),
    )));
    if let Err(error) = printer.await {
        warn!("Bus printer task failed: {}", error);
    }
    ExitCode::SUCCESS
}
