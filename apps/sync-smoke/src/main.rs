use std::{sync::Arc, time::Duration};

use sync_core::{ChatCommand, ChatEvent};
use sync_platform::{JsonFileKvStore, NoopNotifier};
use sync_rest::spawn_runtime;
use tokio::time::timeout;
use tracing::info;

use crate::config::SmokeConfig;

mod config;
mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    let cfg = match SmokeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let store = match JsonFileKvStore::open(&cfg.store_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!(
                "Failed to open store at {}: {err}",
                cfg.store_path.display()
            );
            std::process::exit(1);
        }
    };

    let (Some(auth_token), Some(viewer_id)) = (cfg.auth_token.clone(), cfg.viewer_id.clone())
    else {
        println!("Sync engine configured for {}.", cfg.base_url);
        println!("Set TRIPCHAT_API_TOKEN and TRIPCHAT_VIEWER_ID to run a live smoke.");
        return;
    };

    let handle = spawn_runtime(store, Arc::new(NoopNotifier));
    let mut events = handle.subscribe();

    let commands = [
        ChatCommand::Init {
            base_url: cfg.base_url.clone(),
            auth_token,
            viewer_id,
            config: cfg.tuning.clone(),
        },
        ChatCommand::RefreshRooms,
        ChatCommand::RefreshUnread,
    ];
    for command in commands {
        if handle.send(command).await.is_err() {
            eprintln!("Sync runtime exited before accepting commands");
            std::process::exit(1);
        }
    }

    info!("waiting for engine events");
    while let Ok(Ok(event)) = timeout(Duration::from_secs(10), events.recv()).await {
        println!("{event:?}");
        if matches!(
            event,
            ChatEvent::UnreadChanged { .. } | ChatEvent::FatalError { .. }
        ) {
            break;
        }
    }
}
