//! Kibble overlay context.
//!
//! A secondary execution context: it runs its own behavior engine
//! over the shared store so the pet keeps living even with the bridge
//! down, but routes interaction commands through the daemon and
//! reloads from the store whenever an authoritative write lands.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod daemon_client;

use daemon_client::{BridgeClient, BridgeEvent};
use kibble_daemon::{
    bridge::{ClientMessage, DaemonMessage},
    config::AppConfig,
    engine::Engine,
    pet::PetState,
    storage::{DEFAULT_PET_KEY, Storage},
    voice::Reaction,
};

const PUMP_INTERVAL: Duration = Duration::from_secs(1);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load()?;
    let context_id = Uuid::new_v4();
    info!(%context_id, "Starting Kibble overlay context");

    let storage = Storage::connect(&config.storage).await?;
    let now = Utc::now().timestamp();
    let state = match storage.load_pet(DEFAULT_PET_KEY, now).await {
        Ok(Some(state)) => state,
        _ => {
            warn!("no readable pet record yet; running on a local snapshot");
            PetState::new(config.pet.kind, config.pet.display_name.clone(), now)
        }
    };
    let mut engine = Engine::new(
        storage.clone(),
        DEFAULT_PET_KEY,
        config.behavior.clone(),
        &config.voice,
        state,
        context_id,
        false,
    );

    let url = config.bridge.ws_url();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut client = match BridgeClient::connect(&url, event_tx.clone()).await {
        Ok(client) => {
            client.send(ClientMessage::Hello { context_id });
            Some(client)
        }
        Err(err) => {
            warn!(%err, "daemon not reachable; will keep retrying");
            None
        }
    };

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut next_tick = time::Instant::now() + config.behavior.tick_interval();
    let mut pump = time::interval_at(time::Instant::now() + PUMP_INTERVAL, PUMP_INTERVAL);
    let mut reconnect =
        time::interval_at(time::Instant::now() + RECONNECT_INTERVAL, RECONNECT_INTERVAL);

    println!("kibble overlay - commands: pet, feed, status, quit");

    loop {
        tokio::select! {
            _ = time::sleep_until(next_tick) => {
                if let Some(reaction) = engine.tick() {
                    say(&engine, &reaction);
                }
                next_tick = time::Instant::now() + config.behavior.tick_interval();
            }
            _ = pump.tick() => {
                engine.poll_deferred();
            }
            _ = reconnect.tick(), if client.is_none() => {
                match BridgeClient::connect(&url, event_tx.clone()).await {
                    Ok(fresh) => {
                        fresh.send(ClientMessage::Hello { context_id });
                        info!("bridge reconnected");
                        client = Some(fresh);
                    }
                    Err(err) => debug!(%err, "daemon still unreachable"),
                }
            }
            event = events.recv() => {
                match event {
                    Some(BridgeEvent::Message(message)) => {
                        handle_daemon_message(message, &mut engine, &storage, context_id).await;
                    }
                    Some(BridgeEvent::Disconnected) => {
                        if client.take().is_some() {
                            warn!("bridge connection lost; ticking locally until it returns");
                        }
                    }
                    // We hold a sender, so the channel never closes.
                    None => {}
                }
            }
            line = stdin_lines.next_line() => {
                match line {
                    Ok(Some(input)) => {
                        if !handle_command(input.trim(), client.as_ref(), &engine) {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Opportunistic goodbye save; a stale revision just means the
    // daemon already knows better.
    engine.persist().await;
    Ok(())
}

async fn handle_daemon_message(
    message: DaemonMessage,
    engine: &mut Engine,
    storage: &Storage,
    context_id: Uuid,
) {
    match message {
        DaemonMessage::Hello { version, .. } => {
            info!(%version, "daemon says hello");
        }
        DaemonMessage::Reload { revision, origin } => {
            if origin == context_id {
                return;
            }
            match storage.load_pet(DEFAULT_PET_KEY, Utc::now().timestamp()).await {
                Ok(Some(fresh)) => {
                    debug!(revision, "adopting reloaded pet state");
                    engine.adopt(fresh);
                }
                Ok(None) => warn!("reload signal but the store has no record"),
                Err(err) => warn!(%err, "reload failed; keeping possibly stale state"),
            }
        }
        DaemonMessage::Reaction(reaction) => say(engine, &reaction),
        DaemonMessage::Snapshot { state } => print_status(&state),
        DaemonMessage::Log { level, message, .. } => debug!(%level, %message, "daemon log"),
    }
}

/// Returns false when the overlay should exit.
fn handle_command(input: &str, client: Option<&BridgeClient>, engine: &Engine) -> bool {
    // Interactions are routed through the daemon so the authoritative
    // context persists them and fans out the reload.
    match input {
        "pet" => route(client, ClientMessage::Interact),
        "feed" => route(client, ClientMessage::Feed),
        "status" => print_status(&engine.snapshot()),
        "quit" | "exit" => return false,
        "" => {}
        other => println!("unknown command: {other}"),
    }
    true
}

fn route(client: Option<&BridgeClient>, message: ClientMessage) {
    match client {
        Some(client) => client.send(message),
        None => println!("(daemon offline - try again in a moment)"),
    }
}

fn say(engine: &Engine, reaction: &Reaction) {
    println!("{}: {}", engine.snapshot().display_name, reaction.text);
}

fn print_status(state: &PetState) {
    println!(
        "{} the {:?} - mood {:?}, happiness {:.0}, energy {:.0}, satiety {:.0}, treats {}, doing {:?}",
        state.display_name,
        state.kind,
        state.mood,
        state.happiness,
        state.energy,
        state.satiety,
        state.treats,
        state.current_animation,
    );
}
