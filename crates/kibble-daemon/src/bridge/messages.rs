use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{pet::PetState, voice::Reaction};

/// Messages sent by overlay contexts to the privileged daemon.
///
/// Interaction-triggering events are routed here rather than applied
/// to the overlay's local engine, so the daemon can persist them
/// authoritatively and fan out a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        context_id: Uuid,
    },
    Ping {
        nonce: Option<String>,
    },
    Interact,
    Feed,
    Click {
        x: f64,
        y: f64,
    },
    /// Forwarded by the reminder scheduler when an alarm fires.
    ReminderFired {
        message: String,
    },
    /// Forwarded by the focus tracker when a reward lands.
    RewardEarned {
        count: u32,
    },
    RequestSnapshot,
}

/// Messages fanned out from the daemon to every connected context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    Hello {
        version: String,
        capabilities: Vec<String>,
    },
    /// Discard your in-memory pet and re-read from the store. Contexts
    /// compare `origin` against their own id to skip self-reloads.
    Reload {
        revision: u64,
        origin: Uuid,
    },
    Reaction(Reaction),
    Snapshot {
        state: PetState,
    },
    Log {
        level: String,
        message: String,
        timestamp: i64,
    },
}
