//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Tick clock and render timing.
    pub simulation: SimulationConfig,
    /// Loopback transport settings.
    pub network: NetworkConfig,
    /// Projectile and weapon tuning shared by every strategy.
    pub weapon: WeaponConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Tick clock and render timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed simulation rate in ticks per second.
    pub tick_rate: u32,
    /// How far (in ticks) the remote render frame trails the newest
    /// confirmed snapshot.
    pub interpolation_delay_ticks: f64,
    /// Ticks a predicted spawn may stay unconfirmed before it is discarded.
    /// Must stay below 256 so prediction keys cannot alias while pending.
    pub prediction_window_ticks: u32,
    /// Number of ticks of hitbox history kept for lag compensation.
    pub hitbox_history_ticks: usize,
}

/// Loopback transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// One-way latency between authority and clients, in ticks.
    pub latency_ticks: u32,
    /// Number of observing (non-firing) peers the demo connects.
    pub observers: u32,
}

/// Weapon and projectile tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeaponConfig {
    /// Kinematic projectile speed in meters per second.
    pub speed: f32,
    /// Projectile lifetime in seconds. Zero or less means unbounded.
    pub lifetime_secs: f32,
    /// How long a projectile lingers after a hit, in seconds.
    pub lifetime_after_hit_secs: f32,
    /// Impulse applied to a dynamic body that gets hit.
    pub hit_impulse: f32,
    /// Launch impulse of the full-state physics projectile.
    pub launch_impulse: f32,
    /// Mass of the full-state physics projectile in kilograms.
    pub projectile_mass: f32,
    /// Gravity applied to the full-state physics projectile.
    pub gravity: [f32; 3],
    /// Hidden full-state projectiles a weapon keeps spawned ahead of time so
    /// its input holder can fire them without waiting for a spawn. Zero
    /// spawns a fresh projectile per shot instead.
    pub projectile_pool_size: usize,
    /// Maximum hitscan distance in meters.
    pub hitscan_range: f32,
    /// Speed of cosmetic dummy projectiles in meters per second.
    pub dummy_speed: f32,
    /// Number of slots in the ring-buffered weapon.
    pub ring_capacity: usize,
    /// Whether the input holder predicts fire-data projectile spawns.
    pub use_spawn_prediction: bool,
    /// Collision layers a projectile can hit.
    pub hit_mask: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            interpolation_delay_ticks: 2.0,
            prediction_window_ticks: 64,
            hitbox_history_ticks: 128,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_ticks: 3,
            observers: 1,
        }
    }
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            speed: 50.0,
            lifetime_secs: 4.0,
            lifetime_after_hit_secs: 2.0,
            hit_impulse: 50.0,
            launch_impulse: 100.0,
            projectile_mass: 1.0,
            gravity: [0.0, -9.81, 0.0],
            projectile_pool_size: 0,
            hitscan_range: 100.0,
            dummy_speed: 80.0,
            ring_capacity: 64,
            use_spawn_prediction: true,
            hit_mask: u32::MAX,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the per-user configuration directory (`<config>/volley`), falling
/// back to the working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("volley"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("tick_rate: 60"));
        assert!(ron_str.contains("ring_capacity: 64"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(simulation: (), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.weapon, WeaponConfig::default());
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_partial_weapon_section_keeps_other_defaults() {
        let ron_str = "(weapon: (speed: 120.0, ring_capacity: 8))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.weapon.speed, 120.0);
        assert_eq!(config.weapon.ring_capacity, 8);
        assert_eq!(config.weapon.lifetime_secs, 4.0);
    }

    #[test]
    fn test_projectile_pool_is_opt_in() {
        assert_eq!(WeaponConfig::default().projectile_pool_size, 0);
        let config: Config = ron::from_str("(weapon: (projectile_pool_size: 4))").unwrap();
        assert_eq!(config.weapon.projectile_pool_size, 4);
        assert_eq!(config.weapon.launch_impulse, 100.0);
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_default_prediction_window_fits_key_range() {
        // Prediction keys carry the tick as a single byte.
        assert!(SimulationConfig::default().prediction_window_ticks < 256);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.simulation.tick_rate = 30;
        config.weapon.use_spawn_prediction = false;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.network.latency_ticks = 9;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().network.latency_ticks, 9);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
