//! Pointroom - planning poker rooms
//!
//! Demo client: opens the local store, creates a room, has a few simulated
//! participants join by code and plays one round through to the reveal.

use std::sync::Arc;
use std::time::Duration;

use pointroom_app::{AnonymousIdentity, ClientConfig, Session, SessionDriver};
use pointroom_core::Database;
use pointroom_net::{ChangeFeed, ConnectivityMonitor, JoinLink};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const GUESTS: [(&str, u8); 2] = [("Grace", 5), ("Linus", 8)];

fn main() {
    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .init();

    tracing::info!("Starting Pointroom");

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    if let Err(e) = runtime.block_on(run(config)) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let feed = Arc::new(ChangeFeed::new());
    let db = Arc::new(Database::open(&db_path)?.with_change_sink(feed.clone()));
    let monitor = ConnectivityMonitor::start(db.clone(), config.monitor_config());
    let mut status = monitor.subscribe();
    tokio::spawn(async move {
        while let Some(next) = status.next().await {
            tracing::info!(status = %next, "Connectivity");
        }
    });

    let owner = Arc::new(
        Session::new(db.clone(), Arc::new(AnonymousIdentity::new())).with_monitor(monitor.clone()),
    );
    let room = owner.create_room()?;
    let name = config.display_name.as_deref().unwrap_or("Owner");
    owner.join_room(room.id, name)?;
    let link = JoinLink::new(&config.join_base_url, room.code.clone());
    tracing::info!(link = %link, "Room ready");

    let mut drivers = vec![SessionDriver::spawn(owner.clone(), feed.clone(), Some(monitor.clone()))?];
    let mut guests = Vec::new();
    for (guest_name, card) in GUESTS {
        let guest = Arc::new(
            Session::new(db.clone(), Arc::new(AnonymousIdentity::new()))
                .with_monitor(monitor.clone()),
        );
        let code = JoinLink::parse(&link.to_url())?.code;
        guest.join_room_by_code(code.as_str(), guest_name)?;
        drivers.push(SessionDriver::spawn(guest.clone(), feed.clone(), Some(monitor.clone()))?);
        guests.push((guest, card));
    }

    let round = owner.start_round(room.id)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (guest, card) in &guests {
        if let Some(me) = guest.participant() {
            guest.select_card(round.id, me.id, *card)?;
        }
    }
    if let Some(me) = owner.participant() {
        owner.select_card(round.id, me.id, 5)?;
    }

    for _ in 0..100 {
        if owner.current_round().is_some_and(|r| r.is_revealed()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    println!("{}", serde_json::to_string_pretty(&owner.view())?);

    for driver in drivers {
        driver.shutdown().await;
    }
    monitor.shutdown();
    Ok(())
}
