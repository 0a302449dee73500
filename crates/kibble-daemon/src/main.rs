use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time;
use tracing::{info, warn};
use uuid::Uuid;

use kibble_daemon::{
    bridge::{Bridge, BridgeHandle, ClientMessage, DaemonMessage},
    config::AppConfig,
    engine::Engine,
    pet::{PetState, Position},
    storage::{DEFAULT_PET_KEY, Storage},
    voice::Reaction,
};

const PUMP_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load()?;
    info!("Starting Kibble daemon");

    let storage = Storage::connect(&config.storage).await?;
    let now = Utc::now().timestamp();
    let state = match storage.load_pet(DEFAULT_PET_KEY, now).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            info!("No pet on record; adopting a new {:?}", config.pet.kind);
            let mut fresh = PetState::new(config.pet.kind, config.pet.display_name.clone(), now);
            if let Err(err) = storage.save_pet(DEFAULT_PET_KEY, &mut fresh).await {
                warn!(%err, "could not persist the new pet yet");
            }
            fresh
        }
        Err(err) => {
            warn!(%err, "store unreachable at boot; starting with an in-memory pet");
            PetState::new(config.pet.kind, config.pet.display_name.clone(), now)
        }
    };
    info!(name = %state.display_name, mood = ?state.mood, "Pet loaded");

    let context_id = Uuid::new_v4();
    let mut engine = Engine::new(
        storage.clone(),
        DEFAULT_PET_KEY,
        config.behavior.clone(),
        &config.voice,
        state,
        context_id,
        true,
    );

    let mut bridge = Bridge::bind(config.bridge.clone()).await?;
    let bridge_handle = bridge.handle();

    // A sleep that resets after each tick completes, rather than a
    // fixed interval: no backpressure when a tick runs long.
    let mut next_tick = time::Instant::now() + config.behavior.tick_interval();
    let mut pump = time::interval_at(time::Instant::now() + PUMP_INTERVAL, PUMP_INTERVAL);
    let mut rewards = time::interval_at(
        time::Instant::now() + config.rewards.interval(),
        config.rewards.interval(),
    );
    let mut health = time::interval_at(
        time::Instant::now() + config.storage.health_check_interval(),
        config.storage.health_check_interval(),
    );

    loop {
        tokio::select! {
            _ = time::sleep_until(next_tick) => {
                if let Some(reaction) = engine.tick() {
                    bridge_handle.broadcast(DaemonMessage::Reaction(reaction));
                }
                next_tick = time::Instant::now() + config.behavior.tick_interval();
            }
            _ = pump.tick() => {
                engine.poll_deferred();
            }
            _ = rewards.tick() => {
                engine.add_treats(config.rewards.treats_per_interval).await;
                info!(treats = engine.snapshot().treats, "focus reward earned");
                broadcast_reload(&bridge_handle, &engine);
            }
            _ = health.tick() => {
                if !storage.is_healthy() && storage.health_check(DEFAULT_PET_KEY).await {
                    // Flush the state we kept alive through the outage.
                    engine.persist().await;
                    broadcast_reload(&bridge_handle, &engine);
                }
            }
            next = bridge.next_message() => {
                match next {
                    Some(message) => {
                        handle_client_message(message, &mut engine, &bridge_handle).await;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                engine.persist().await;
                break;
            }
        }
    }

    Ok(())
}

async fn handle_client_message(
    message: ClientMessage,
    engine: &mut Engine,
    bridge: &BridgeHandle,
) {
    match message {
        ClientMessage::Hello { context_id } => {
            info!(%context_id, "overlay context connected");
        }
        ClientMessage::Ping { nonce } => {
            log_event(bridge, "debug", format!("pong {}", nonce.unwrap_or_default()));
        }
        ClientMessage::Interact => {
            let reaction = engine.interact().await;
            announce(bridge, engine, reaction);
        }
        ClientMessage::Feed => {
            let reaction = engine.feed().await;
            announce(bridge, engine, reaction);
        }
        ClientMessage::Click { x, y } => {
            let reaction = engine.click(Position { x, y }).await;
            announce(bridge, engine, reaction);
        }
        ClientMessage::ReminderFired { message } => {
            let reaction = engine.react_to_reminder(&message).await;
            announce(bridge, engine, reaction);
        }
        ClientMessage::RewardEarned { count } => {
            engine.add_treats(count).await;
            broadcast_reload(bridge, engine);
        }
        ClientMessage::RequestSnapshot => {
            bridge.broadcast(DaemonMessage::Snapshot {
                state: engine.snapshot(),
            });
        }
    }
}

/// Authoritative mutations fan out a reaction (when the pet spoke) and
/// a reload so every other context re-reads the store.
fn announce(bridge: &BridgeHandle, engine: &Engine, reaction: Option<Reaction>) {
    if let Some(reaction) = reaction {
        bridge.broadcast(DaemonMessage::Reaction(reaction));
    }
    broadcast_reload(bridge, engine);
}

fn broadcast_reload(bridge: &BridgeHandle, engine: &Engine) {
    bridge.broadcast(DaemonMessage::Reload {
        revision: engine.revision(),
        origin: engine.context_id(),
    });
}

fn log_event(bridge: &BridgeHandle, level: &str, message: impl Into<String>) {
    bridge.broadcast(DaemonMessage::Log {
        level: level.to_string(),
        message: message.into(),
        timestamp: Utc::now().timestamp(),
    });
}
