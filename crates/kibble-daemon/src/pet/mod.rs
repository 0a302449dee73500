//! Pet state model - the persisted aggregate plus validation/repair

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed set of pet species. Picked once at first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Cat,
    Dog,
    Bunny,
    Hamster,
    Dragon,
}

/// Derived mood. Never written directly - always recomputed from the
/// three resource values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Content,
    Bored,
    Neglected,
}

impl Mood {
    pub fn from_resources(happiness: f64, energy: f64, satiety: f64) -> Self {
        let avg = (happiness + energy + satiety) / 3.0;
        if avg >= 80.0 {
            Mood::Happy
        } else if avg >= 60.0 {
            Mood::Content
        } else if avg >= 40.0 {
            Mood::Bored
        } else {
            Mood::Neglected
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Animation {
    Idle,
    Walk,
    Sit,
    Nap,
    Play,
    Excited,
    Worried,
    Sad,
}

impl Animation {
    /// Every pet can at least stand around, wander, and sit.
    pub const BASELINE: [Animation; 3] = [Animation::Idle, Animation::Walk, Animation::Sit];
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance_to(&self, other: Position) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// The one persisted record per pet. The store holds it as an opaque
/// JSON blob, so every field an older revision may lack carries a
/// serde default and `repair` normalizes whatever comes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetState {
    pub kind: Archetype,
    pub display_name: String,
    pub mood: Mood,
    pub happiness: f64,
    pub energy: f64,
    pub satiety: f64,
    #[serde(default)]
    pub treats: u32,
    #[serde(default)]
    pub unlocked_animations: BTreeSet<Animation>,
    #[serde(default)]
    pub accessories: BTreeSet<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_animation")]
    pub current_animation: Animation,
    #[serde(default)]
    pub last_interaction_at: i64,
    #[serde(default)]
    pub last_satiety_decay_at: i64,
    #[serde(default)]
    pub revision: u64,
}

fn default_animation() -> Animation {
    Animation::Idle
}

impl PetState {
    pub fn new(kind: Archetype, display_name: impl Into<String>, now: i64) -> Self {
        let mut unlocked: BTreeSet<Animation> = Animation::BASELINE.into_iter().collect();
        unlocked.insert(Animation::Nap);
        unlocked.insert(Animation::Play);
        unlocked.insert(Animation::Excited);

        let mut state = Self {
            kind,
            display_name: display_name.into(),
            mood: Mood::Content,
            happiness: 70.0,
            energy: 90.0,
            satiety: 80.0,
            treats: 3,
            unlocked_animations: unlocked,
            accessories: BTreeSet::new(),
            position: Position::default(),
            current_animation: Animation::Idle,
            last_interaction_at: now,
            last_satiety_decay_at: now,
            revision: 0,
        };
        state.refresh_mood();
        state
    }

    pub fn refresh_mood(&mut self) {
        self.mood = Mood::from_resources(self.happiness, self.energy, self.satiety);
    }

    pub fn add_happiness(&mut self, delta: f64) {
        self.happiness = (self.happiness + delta).clamp(0.0, 100.0);
        self.refresh_mood();
    }

    pub fn add_energy(&mut self, delta: f64) {
        self.energy = (self.energy + delta).clamp(0.0, 100.0);
        self.refresh_mood();
    }

    pub fn add_satiety(&mut self, delta: f64) {
        self.satiety = (self.satiety + delta).clamp(0.0, 100.0);
        self.refresh_mood();
    }

    /// Enter an animation, gated on the unlocked set. A request for a
    /// locked animation is dropped without touching the current one.
    pub fn set_animation(&mut self, animation: Animation) -> bool {
        if !self.unlocked_animations.contains(&animation) {
            debug!(?animation, "rejected transition to locked animation");
            return false;
        }
        self.current_animation = animation;
        true
    }

    /// Normalize a record read from (or about to be written to) the
    /// store. Idempotent; safe to run on every load and persist.
    ///
    /// All three resources at exactly zero cannot happen through
    /// normal decay, so that shape marks a corrupted record.
    pub fn repair(&mut self, now: i64) {
        if self.happiness == 0.0 && self.satiety == 0.0 && self.energy == 0.0 {
            warn!(name = %self.display_name, "corrupted pet record, resetting resources");
            self.happiness = 50.0;
            self.satiety = 50.0;
            self.energy = 75.0;
            self.treats = self.treats.max(3);
            self.last_interaction_at = now;
            self.last_satiety_decay_at = now;
        }

        // A negative value means a past arithmetic bug already cost the
        // user; floor generously instead of at zero.
        if self.happiness < 0.0 {
            self.happiness = 50.0;
        }
        if self.satiety < 0.0 {
            self.satiety = 50.0;
        }
        if self.energy < 0.0 {
            self.energy = 75.0;
        }
        self.happiness = self.happiness.clamp(0.0, 100.0);
        self.satiety = self.satiety.clamp(0.0, 100.0);
        self.energy = self.energy.clamp(0.0, 100.0);

        for animation in Animation::BASELINE {
            self.unlocked_animations.insert(animation);
        }
        if !self.unlocked_animations.contains(&self.current_animation) {
            self.current_animation = Animation::Idle;
        }

        if self.last_interaction_at <= 0 {
            self.last_interaction_at = now;
        }
        if self.last_satiety_decay_at <= 0 {
            self.last_satiety_decay_at = now;
        }

        self.refresh_mood();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: i64) -> PetState {
        PetState::new(Archetype::Cat, "Miso", now)
    }

    #[test]
    fn mood_is_pure_in_resources() {
        assert_eq!(Mood::from_resources(90.0, 80.0, 85.0), Mood::Happy);
        assert_eq!(Mood::from_resources(60.0, 60.0, 60.0), Mood::Content);
        assert_eq!(Mood::from_resources(40.0, 40.0, 45.0), Mood::Bored);
        assert_eq!(Mood::from_resources(10.0, 20.0, 30.0), Mood::Neglected);
        // Same inputs, same answer, regardless of how we got there.
        assert_eq!(
            Mood::from_resources(55.0, 65.0, 60.0),
            Mood::from_resources(55.0, 65.0, 60.0)
        );
    }

    #[test]
    fn resource_mutations_stay_bounded() {
        let mut state = sample(1_000);
        state.add_happiness(500.0);
        assert_eq!(state.happiness, 100.0);
        state.add_happiness(-500.0);
        assert_eq!(state.happiness, 0.0);
        state.add_energy(-500.0);
        assert_eq!(state.energy, 0.0);
        state.add_satiety(500.0);
        assert_eq!(state.satiety, 100.0);
    }

    #[test]
    fn locked_animation_is_rejected() {
        let mut state = sample(1_000);
        state.unlocked_animations.remove(&Animation::Nap);
        assert!(!state.set_animation(Animation::Nap));
        assert_eq!(state.current_animation, Animation::Idle);
        assert!(state.set_animation(Animation::Sit));
        assert_eq!(state.current_animation, Animation::Sit);
    }

    #[test]
    fn repair_resets_all_zero_record() {
        let mut state = sample(1_000);
        state.happiness = 0.0;
        state.energy = 0.0;
        state.satiety = 0.0;
        state.treats = 0;
        state.repair(2_000);

        assert_eq!(state.happiness, 50.0);
        assert_eq!(state.satiety, 50.0);
        assert_eq!(state.energy, 75.0);
        assert_eq!(state.treats, 3);
        assert_eq!(state.mood, Mood::Content);
        assert_eq!(state.last_interaction_at, 2_000);
        assert_eq!(state.last_satiety_decay_at, 2_000);
    }

    #[test]
    fn repair_floors_negative_resources_generously() {
        let mut state = sample(1_000);
        state.happiness = -12.0;
        state.energy = -3.0;
        state.repair(2_000);
        assert_eq!(state.happiness, 50.0);
        assert_eq!(state.energy, 75.0);
        assert_eq!(state.satiety, 80.0);
    }

    #[test]
    fn repair_restores_baseline_animations_without_removing_extras() {
        let mut state = sample(1_000);
        state.unlocked_animations.clear();
        state.unlocked_animations.insert(Animation::Sad);
        state.current_animation = Animation::Play;
        state.repair(2_000);

        for animation in Animation::BASELINE {
            assert!(state.unlocked_animations.contains(&animation));
        }
        assert!(state.unlocked_animations.contains(&Animation::Sad));
        // Play was left locked, so the active animation fell back.
        assert_eq!(state.current_animation, Animation::Idle);
    }

    #[test]
    fn repair_is_idempotent() {
        let mut state = sample(1_000);
        state.happiness = 0.0;
        state.energy = 0.0;
        state.satiety = 0.0;
        state.unlocked_animations.clear();
        state.repair(2_000);
        let once = state.clone();
        state.repair(2_000);
        assert_eq!(format!("{once:?}"), format!("{state:?}"));
    }

    #[test]
    fn missing_fields_default_then_repair_fills_timestamps() {
        // An old record without the newer fields.
        let raw = r#"{
            "kind": "dog",
            "display_name": "Biscuit",
            "mood": "content",
            "happiness": 70.0,
            "energy": 90.0,
            "satiety": 80.0
        }"#;
        let mut state: PetState = serde_json::from_str(raw).expect("legacy record parses");
        state.repair(5_000);
        assert_eq!(state.current_animation, Animation::Idle);
        assert_eq!(state.last_interaction_at, 5_000);
        assert_eq!(state.last_satiety_decay_at, 5_000);
        assert!(state.unlocked_animations.contains(&Animation::Walk));
    }
}
