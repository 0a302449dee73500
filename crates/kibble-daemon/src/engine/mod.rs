//! Behavior engine - one per running context.
//!
//! Owns the in-memory copy of the pet, ages it on a periodic tick,
//! reacts to user interactions, and persists every mutation back to
//! the shared store. Persistence is always best-effort: the pet keeps
//! living in memory while the durable layer is down.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::{BehaviorConfig, VoiceConfig},
    pet::{Animation, Mood, PetState, Position},
    storage::{SaveOutcome, Storage},
    voice::{Reaction, Trigger, VoiceBox},
};

const INTERACT_HAPPINESS: f64 = 10.0;
const FEED_HAPPINESS: f64 = 15.0;
const NEGLECT_HAPPINESS_DECAY: f64 = 2.0;
const LOW_SATIETY_WORRY: f64 = 20.0;

const INTERACT_RETURN_SECS: i64 = 2;
const FEED_RETURN_SECS: i64 = 3;
const REMINDER_RETURN_SECS: i64 = 4;

const ATTRACTION_RADIUS: f64 = 200.0;
const CLICK_RADIUS: f64 = 50.0;
const MOVE_RATE: f64 = 0.02;
const MOVE_EPSILON: f64 = 1.0;

/// A scheduled fall-back to Idle. Carries the animation generation it
/// was scheduled under; if any other transition lands first, the
/// generation moves on and this return is dropped instead of stomping
/// the newer animation.
#[derive(Debug, Clone, Copy)]
struct PendingReturn {
    due_at: i64,
    generation: u64,
}

pub struct Engine {
    state: PetState,
    config: BehaviorConfig,
    storage: Storage,
    pet_key: String,
    voice: VoiceBox,
    context_id: Uuid,
    /// The privileged background context persists unconditionally;
    /// overlay contexts yield to newer stored revisions.
    authoritative: bool,
    rng: StdRng,
    animation_generation: u64,
    pending_return: Option<PendingReturn>,
}

impl Engine {
    pub fn new(
        storage: Storage,
        pet_key: impl Into<String>,
        behavior: BehaviorConfig,
        voice: &VoiceConfig,
        state: PetState,
        context_id: Uuid,
        authoritative: bool,
    ) -> Self {
        Self {
            state,
            config: behavior,
            storage,
            pet_key: pet_key.into(),
            voice: VoiceBox::new(voice.cooldown_secs),
            context_id,
            authoritative,
            rng: StdRng::from_entropy(),
            animation_generation: 0,
            pending_return: None,
        }
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    /// Read-only copy for rendering.
    pub fn snapshot(&self) -> PetState {
        self.state.clone()
    }

    /// Replace the in-memory pet with a freshly loaded snapshot (the
    /// reload path). Anything unpersisted since our last write is
    /// deliberately lost; the generation bump kills stale deferred
    /// returns scheduled against the old copy.
    pub fn adopt(&mut self, state: PetState) {
        self.state = state;
        self.animation_generation += 1;
        self.pending_return = None;
    }

    /// One aging step. Never blocks on the store - the persist runs
    /// detached and failures only log.
    pub fn tick(&mut self) -> Option<Reaction> {
        let reaction = self.apply_tick(Utc::now().timestamp());
        self.persist_detached();
        reaction
    }

    /// Apply any due deferred return-to-idle. Returns true when the
    /// animation changed (the host persists opportunistically then).
    pub fn poll_deferred(&mut self) -> bool {
        let changed = self.apply_deferred(Utc::now().timestamp());
        if changed {
            self.persist_detached();
        }
        changed
    }

    pub async fn interact(&mut self) -> Option<Reaction> {
        let reaction = self.apply_interact(Utc::now().timestamp());
        self.persist().await;
        reaction
    }

    pub async fn feed(&mut self) -> Option<Reaction> {
        let reaction = self.apply_feed(Utc::now().timestamp());
        self.persist().await;
        reaction
    }

    pub async fn click(&mut self, at: Position) -> Option<Reaction> {
        let (hit, reaction) = self.apply_click(at, Utc::now().timestamp());
        if hit {
            self.persist().await;
        }
        reaction
    }

    /// Camera-follow easing. Low stakes: applied locally and persisted
    /// detached, never broadcast.
    pub fn move_toward(&mut self, target: Position) {
        if self.apply_move(target) {
            self.persist_detached();
        }
    }

    pub async fn react_to_reminder(&mut self, message: &str) -> Option<Reaction> {
        let reaction = self.apply_reminder(message, Utc::now().timestamp());
        self.persist().await;
        reaction
    }

    pub async fn add_treats(&mut self, count: u32) {
        self.state.treats = self.state.treats.saturating_add(count);
        self.persist().await;
    }

    pub async fn unlock_animation(&mut self, animation: Animation) -> bool {
        let added = self.state.unlocked_animations.insert(animation);
        if added {
            self.persist().await;
        }
        added
    }

    fn apply_tick(&mut self, now: i64) -> Option<Reaction> {
        let mut reaction = None;
        let idle_for = now - self.state.last_interaction_at;

        if idle_for > self.config.nap_threshold_secs {
            // Already napping ticks are quiet; only the transition
            // itself may speak.
            if self.state.current_animation != Animation::Nap && self.enter(Animation::Nap) {
                reaction = self
                    .voice
                    .say(&mut self.rng, self.state.kind, Trigger::EnteredNap, now);
            }
            let idle_minutes = idle_for as f64 / 60.0;
            self.state
                .add_energy(idle_minutes.min(self.config.energy_cap_per_tick));
        } else {
            self.state.add_energy(-1.0);
            if self.state.current_animation == Animation::Nap {
                self.enter(Animation::Idle);
            } else if self.rng.gen_bool(self.config.random_behavior_chance) {
                let choice = *[Animation::Sit, Animation::Play]
                    .choose(&mut self.rng)
                    .expect("non-empty candidates");
                if self.enter(choice) {
                    let dwell = self.rng.gen_range(5..=15);
                    self.schedule_return(now, dwell);
                }
            }
        }

        if idle_for > self.config.neglect_threshold_secs {
            self.state.add_happiness(-NEGLECT_HAPPINESS_DECAY);
        }

        // Hunger grows on its own checkpoint, not per tick, so tick
        // frequency changes never alter the decay rate.
        if now - self.state.last_satiety_decay_at >= self.config.satiety_decay_interval_secs {
            self.state.add_satiety(-1.0);
            self.state.last_satiety_decay_at = now;
        }

        self.reflect_wellbeing();
        reaction
    }

    fn apply_deferred(&mut self, now: i64) -> bool {
        let Some(pending) = self.pending_return else {
            return false;
        };
        if now < pending.due_at {
            return false;
        }
        self.pending_return = None;
        if pending.generation != self.animation_generation {
            debug!("dropping superseded return-to-idle");
            return false;
        }
        self.enter(Animation::Idle)
    }

    fn apply_interact(&mut self, now: i64) -> Option<Reaction> {
        let was_napping = self.state.current_animation == Animation::Nap;
        self.state.add_happiness(INTERACT_HAPPINESS);
        self.state.last_interaction_at = now;

        let reaction = if was_napping {
            self.enter(Animation::Excited);
            self.voice
                .say(&mut self.rng, self.state.kind, Trigger::WokeFromNap, now)
        } else {
            let choice = *[Animation::Excited, Animation::Play]
                .choose(&mut self.rng)
                .expect("non-empty candidates");
            self.enter(choice);
            self.voice
                .say(&mut self.rng, self.state.kind, Trigger::Interacted, now)
        };
        self.schedule_return(now, INTERACT_RETURN_SECS);
        reaction
    }

    fn apply_feed(&mut self, now: i64) -> Option<Reaction> {
        if self.state.treats == 0 {
            debug!("feed requested with no treats");
            return None;
        }
        self.state.treats -= 1;
        if self.state.happiness < 100.0 {
            self.state.add_happiness(FEED_HAPPINESS);
        }
        if self.state.satiety < 100.0 {
            let portion = self.rng.gen_range(15.0..=20.0);
            self.state.add_satiety(portion);
        }
        self.state.last_interaction_at = now;
        self.enter(Animation::Excited);
        let reaction = self
            .voice
            .say(&mut self.rng, self.state.kind, Trigger::Fed, now);
        self.schedule_return(now, FEED_RETURN_SECS);
        reaction
    }

    /// A click lands as an interaction only when it is close enough to
    /// the pet. The flag reports a hit even when the cooldown keeps
    /// the reaction quiet.
    fn apply_click(&mut self, at: Position, now: i64) -> (bool, Option<Reaction>) {
        if self.state.position.distance_to(at) <= CLICK_RADIUS {
            (true, self.apply_interact(now))
        } else {
            (false, None)
        }
    }

    /// Ease toward the target: a fractional step per call, so the pet
    /// glides instead of teleporting. Returns true when anything moved.
    fn apply_move(&mut self, target: Position) -> bool {
        if self.state.current_animation == Animation::Nap {
            return false;
        }
        if self.state.mood == Mood::Neglected {
            return false;
        }
        let distance = self.state.position.distance_to(target);
        if distance > ATTRACTION_RADIUS {
            return false;
        }

        self.state.position.x += (target.x - self.state.position.x) * MOVE_RATE;
        self.state.position.y += (target.y - self.state.position.y) * MOVE_RATE;

        if self.state.position.distance_to(target) > MOVE_EPSILON {
            if self.state.current_animation != Animation::Walk {
                self.enter(Animation::Walk);
            }
        } else if self.state.current_animation == Animation::Walk {
            self.enter(Animation::Idle);
        }
        true
    }

    fn apply_reminder(&mut self, message: &str, now: i64) -> Option<Reaction> {
        self.enter(Animation::Excited);
        let reaction = self.voice.say_verbatim(message, now);
        self.schedule_return(now, REMINDER_RETURN_SECS);
        reaction
    }

    /// An Idle pet wears its state: hungry pets look worried, neglected
    /// pets look sad, and both revert once the resources recover.
    fn reflect_wellbeing(&mut self) {
        let shown = self.state.current_animation;
        let wanted = if self.state.mood == Mood::Neglected {
            Some(Animation::Sad)
        } else if self.state.satiety < LOW_SATIETY_WORRY {
            Some(Animation::Worried)
        } else {
            None
        };
        match wanted {
            Some(animation) if shown == Animation::Idle => {
                self.enter(animation);
            }
            None if shown == Animation::Worried || shown == Animation::Sad => {
                self.enter(Animation::Idle);
            }
            _ => {}
        }
    }

    fn enter(&mut self, animation: Animation) -> bool {
        if self.state.set_animation(animation) {
            self.animation_generation += 1;
            true
        } else {
            false
        }
    }

    fn schedule_return(&mut self, now: i64, delay_secs: i64) {
        self.pending_return = Some(PendingReturn {
            due_at: now + delay_secs,
            generation: self.animation_generation,
        });
    }

    /// Awaited best-effort persist. On failure, one reconciling
    /// re-read: a newer stored revision wins, otherwise we carry on
    /// purely in-memory until the next successful write.
    pub async fn persist(&mut self) {
        let now = Utc::now().timestamp();
        self.state.repair(now);
        self.state.revision += 1;

        let result = if self.authoritative {
            self.storage
                .write_pet(&self.pet_key, &self.state)
                .await
                .map(|_| SaveOutcome::Saved)
        } else {
            self.storage
                .write_pet_if_fresh(&self.pet_key, &self.state)
                .await
        };

        match result {
            Ok(SaveOutcome::Saved) => {}
            Ok(SaveOutcome::Stale) => {
                debug!("opportunistic persist skipped; store has a newer revision")
            }
            Err(err) => {
                warn!(%err, "persist failed; continuing with in-memory state");
                if let Ok(Some(stored)) = self.storage.load_pet(&self.pet_key, now).await
                    && stored.revision > self.state.revision
                {
                    self.adopt(stored);
                }
            }
        }
    }

    /// Fire-and-forget persist for tick-path mutations. Requires a
    /// tokio runtime.
    pub fn persist_detached(&mut self) {
        let now = Utc::now().timestamp();
        self.state.repair(now);
        self.state.revision += 1;

        let storage = self.storage.clone();
        let key = self.pet_key.clone();
        let snapshot = self.state.clone();
        let authoritative = self.authoritative;
        tokio::spawn(async move {
            let result = if authoritative {
                storage.write_pet(&key, &snapshot).await.map(|_| SaveOutcome::Saved)
            } else {
                storage.write_pet_if_fresh(&key, &snapshot).await
            };
            if let Err(err) = result {
                warn!(%err, "background persist failed; keeping in-memory state");
            }
        });
    }
}
