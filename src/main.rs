use std::env;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use roundup_eng::csv::{read_goals, read_purchases, read_users, write_goals};
use roundup_eng::memory::MemoryStore;
use roundup_eng::settings::Settings;
use roundup_eng::{Engine, PurchaseEvent, calculate_roundup};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: roundup-eng <users.csv> <goals.csv> <purchases.csv>";

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [users, goals, purchases] = args.as_slice() else {
        error!("{USAGE}");
        return ExitCode::FAILURE;
    };

    match simulate(&settings, users, goals, purchases.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Load users and goals, allocate the round-up of every purchase and print
/// the resulting ledger.
async fn simulate(
    settings: &Settings,
    users: &str,
    goals: &str,
    purchases: String,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = Arc::new(MemoryStore::new());

    for result in read_users(users)? {
        match result {
            Ok(profile) => store.add_user(profile).await,
            Err(e) => warn!("{e}"),
        }
    }

    let mut loaded = Vec::new();
    for result in read_goals(goals)? {
        match result {
            Ok(goal) => loaded.push(goal),
            Err(e) => warn!("{e}"),
        }
    }
    for e in store.load_goals(loaded).await {
        warn!("{e}");
    }

    let engine = Engine::builder()
        .store(store.clone())
        .notification_capacity(settings.notification_capacity)
        .seed(settings.seed)
        .build()?;

    let rows = read_purchases(purchases)?;
    let (event_sender, event_receiver) = tokio::sync::mpsc::channel(16);
    let ingest = store.clone();

    tokio::spawn(async move {
        for result in rows {
            match result {
                Ok(purchase) => {
                    let event = PurchaseEvent {
                        user: purchase.user,
                        purchase: purchase.id,
                        roundup: calculate_roundup(purchase.amount),
                    };
                    ingest.insert_purchase(purchase).await;
                    if event_sender.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(event_receiver)).await;
    engine.shutdown().await;

    let stdout = std::io::stdout();
    write_goals(store.goals().await, stdout.lock())?;
    Ok(())
}
