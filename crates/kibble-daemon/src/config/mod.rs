use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pet::Archetype;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub rewards: RewardConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub pet: PetConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        if let Ok(path) = env::var("KIBBLE_CONFIG") {
            return Self::from_path(Path::new(&path));
        }

        let project_root = env::var("KIBBLE_ROOT").unwrap_or_else(|_| ".".to_string());
        let default_path = Path::new(&project_root).join("config/kibble.toml");
        if default_path.exists() {
            return Self::from_path(&default_path);
        }

        let example_path = Path::new(&project_root).join("config/kibble.example.toml");
        if example_path.exists() {
            tracing::warn!("Using example configuration at {:?}", example_path);
            return Self::from_path(&example_path);
        }

        Ok(Self::default())
    }

    fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("invalid config: {:?}", path))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "BridgeConfig::default_max_clients")]
    pub max_clients: usize,
}

impl BridgeConfig {
    fn default_listen_addr() -> String {
        "127.0.0.1:7771".into()
    }
    fn default_max_clients() -> usize {
        8
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.listen_addr)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            max_clients: Self::default_max_clients(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_url")]
    pub url: String,
    #[serde(default = "StorageConfig::default_auth_token_env")]
    pub auth_token_env: String,
    #[serde(default = "StorageConfig::default_health_check_secs")]
    pub health_check_secs: u64,
}

impl StorageConfig {
    fn default_url() -> String {
        "file:kibble.db".into()
    }
    fn default_auth_token_env() -> String {
        "TURSO_AUTH_TOKEN".into()
    }
    fn default_health_check_secs() -> u64 {
        60
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            auth_token_env: Self::default_auth_token_env(),
            health_check_secs: Self::default_health_check_secs(),
        }
    }
}

/// Knobs for the behavior state machine. Satiety cadence is tracked by
/// its own checkpoint so retuning the tick interval never changes how
/// fast the pet gets hungry.
#[derive(Debug, Clone, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "BehaviorConfig::default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "BehaviorConfig::default_nap_threshold_secs")]
    pub nap_threshold_secs: i64,
    #[serde(default = "BehaviorConfig::default_neglect_threshold_secs")]
    pub neglect_threshold_secs: i64,
    #[serde(default = "BehaviorConfig::default_satiety_decay_interval_secs")]
    pub satiety_decay_interval_secs: i64,
    #[serde(default = "BehaviorConfig::default_random_behavior_chance")]
    pub random_behavior_chance: f64,
    #[serde(default = "BehaviorConfig::default_energy_cap_per_tick")]
    pub energy_cap_per_tick: f64,
}

impl BehaviorConfig {
    fn default_tick_interval_secs() -> u64 {
        30
    }
    fn default_nap_threshold_secs() -> i64 {
        120
    }
    fn default_neglect_threshold_secs() -> i64 {
        300
    }
    fn default_satiety_decay_interval_secs() -> i64 {
        120
    }
    fn default_random_behavior_chance() -> f64 {
        0.3
    }
    fn default_energy_cap_per_tick() -> f64 {
        10.0
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: Self::default_tick_interval_secs(),
            nap_threshold_secs: Self::default_nap_threshold_secs(),
            neglect_threshold_secs: Self::default_neglect_threshold_secs(),
            satiety_decay_interval_secs: Self::default_satiety_decay_interval_secs(),
            random_behavior_chance: Self::default_random_behavior_chance(),
            energy_cap_per_tick: Self::default_energy_cap_per_tick(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "RewardConfig::default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "RewardConfig::default_treats_per_interval")]
    pub treats_per_interval: u32,
}

impl RewardConfig {
    fn default_interval_secs() -> u64 {
        1500
    }
    fn default_treats_per_interval() -> u32 {
        1
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            treats_per_interval: Self::default_treats_per_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "VoiceConfig::default_cooldown_secs")]
    pub cooldown_secs: i64,
}

impl VoiceConfig {
    fn default_cooldown_secs() -> i64 {
        10
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: Self::default_cooldown_secs(),
        }
    }
}

/// Identity used when the store holds no pet yet.
#[derive(Debug, Clone, Deserialize)]
pub struct PetConfig {
    #[serde(default = "PetConfig::default_kind")]
    pub kind: Archetype,
    #[serde(default = "PetConfig::default_display_name")]
    pub display_name: String,
}

impl PetConfig {
    fn default_kind() -> Archetype {
        Archetype::Cat
    }
    fn default_display_name() -> String {
        "Mochi".into()
    }
}

impl Default for PetConfig {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
            display_name: Self::default_display_name(),
        }
    }
}
