//! Reaction layer - maps (archetype, trigger) to a short outward
//! message behind one shared cooldown.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::pet::Archetype;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Interacted,
    Fed,
    WokeFromNap,
    EnteredNap,
    Reminder,
}

/// One outward message. The host loop decides where it goes (speech
/// bubble, notification, bridge broadcast).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub trigger: Trigger,
    pub text: String,
    pub timestamp: i64,
}

/// All outward messages share a single cooldown window, whatever the
/// trigger. A tick-driven nap landing next to an interaction produces
/// one message, not two.
#[derive(Debug)]
pub struct VoiceBox {
    cooldown_secs: i64,
    last_spoke_at: Option<i64>,
}

impl VoiceBox {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown_secs,
            last_spoke_at: None,
        }
    }

    pub fn is_on_cooldown(&self, now: i64) -> bool {
        self.last_spoke_at
            .map(|ts| now - ts < self.cooldown_secs)
            .unwrap_or(false)
    }

    /// Pick a phrase for (archetype, trigger). Returns `None` when on
    /// cooldown or when that pair has no candidates.
    pub fn say(
        &mut self,
        rng: &mut impl Rng,
        kind: Archetype,
        trigger: Trigger,
        now: i64,
    ) -> Option<Reaction> {
        if self.is_on_cooldown(now) {
            return None;
        }
        let candidates = phrases(kind, trigger);
        let text = candidates.choose(rng)?;
        self.last_spoke_at = Some(now);
        Some(Reaction {
            trigger,
            text: (*text).to_string(),
            timestamp: now,
        })
    }

    /// Emit externally supplied text verbatim (reminder callbacks),
    /// still subject to the shared cooldown.
    pub fn say_verbatim(&mut self, text: impl Into<String>, now: i64) -> Option<Reaction> {
        if self.is_on_cooldown(now) {
            return None;
        }
        self.last_spoke_at = Some(now);
        Some(Reaction {
            trigger: Trigger::Reminder,
            text: text.into(),
            timestamp: now,
        })
    }
}

/// Static candidate phrasings per (archetype, trigger). An empty slice
/// means that pet stays quiet for that trigger.
fn phrases(kind: Archetype, trigger: Trigger) -> &'static [&'static str] {
    use Archetype::*;
    use Trigger::*;
    match (kind, trigger) {
        (Cat, Interacted) => &["Prrrp.", "Mrow! Again.", "Acceptable scritches."],
        (Cat, Fed) => &["Finally.", "Mmm, treats.", "You may live."],
        (Cat, WokeFromNap) => &["...I was sleeping.", "Mrrp?!"],
        (Cat, EnteredNap) => &["Zzz...", "Five minutes."],

        (Dog, Interacted) => &["Woof woof!", "Best! Day! Ever!", "More pets please!"],
        (Dog, Fed) => &["TREAT!!", "Chomp chomp chomp.", "You're my favorite."],
        (Dog, WokeFromNap) => &["I'm up! I'm up!", "Was I asleep?"],
        (Dog, EnteredNap) => &["Sleepy puppy...", "Zzz."],

        (Bunny, Interacted) => &["*happy binky*", "Nose boop!"],
        (Bunny, Fed) => &["*munch munch*", "Crunchy!"],
        (Bunny, WokeFromNap) => &["*ears perk up*"],
        (Bunny, EnteredNap) => &["*flops over*"],

        (Hamster, Interacted) => &["Squeak!", "*stuffs cheeks excitedly*"],
        (Hamster, Fed) => &["*cheeks at maximum capacity*", "Squeak squeak!"],
        (Hamster, WokeFromNap) => &["*tiny yawn*"],
        // Hamsters vanish into the bedding without a word.
        (Hamster, EnteredNap) => &[],

        (Dragon, Interacted) => &["*pleased rumble*", "You dare... actually, continue."],
        (Dragon, Fed) => &["A worthy offering.", "*incinerates treat, eats ashes*"],
        (Dragon, WokeFromNap) => &["*smoke puffs from nostrils*"],
        (Dragon, EnteredNap) => &[],

        // Reminders pass through verbatim, never from a table.
        (_, Reminder) => &[],
    }
}
