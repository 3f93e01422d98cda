mod broker;
mod config;
mod game_state;
mod handler;
mod housekeeping;
mod longpoll;
mod mailbox;
mod matchmaking;
mod naval_errors;
mod orm;
mod score;
mod session_id;
mod sharedstate;
mod utils;

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Configuration, Role};
use crate::naval_errors::NCErr;
use crate::sharedstate::SharedState;

#[tokio::main]
async fn main() {
    // Load .env first so NAVAL_LOG can come from it
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("NAVAL_LOG"))
        .init();

    let settings = match Configuration::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(target: "args", "Invalid configuration: {}", err);
            std::process::exit(2);
        }
    };

    let result = match settings.role {
        Role::Arbiter => {
            broker::arbiter::serve(&settings.arbiter_host, settings.arbiter_port).await
        }
        Role::Worker => run_worker(settings).await,
    };

    if let Err(err) = result {
        error!(target: "args", "Stopped: {}", err);
        std::process::exit(1);
    }
}

async fn run_worker(settings: Configuration) -> Result<(), NCErr> {
    let bind_addr = format!("{}:{}", settings.http_host, settings.http_port);
    let shared_state = Arc::new(SharedState::new(settings).await?);

    housekeeping::spawn_housekeeping(shared_state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(target: "http", "Worker {} listening on {}", shared_state.ids.worker_id(), bind_addr);

    axum::serve(listener, handler::router(shared_state)).await?;
    Ok(())
}
