//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Shared command-line overrides.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default, Clone)]
pub struct CliArgs {
    /// Simulation tick rate in Hz.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// One-way latency in ticks between authority and clients.
    #[arg(long)]
    pub latency: Option<u32>,

    /// Number of observing peers.
    #[arg(long)]
    pub observers: Option<u32>,

    /// Ring-buffered weapon capacity.
    #[arg(long)]
    pub ring_capacity: Option<usize>,

    /// Disable predicted spawning of fire-data projectiles.
    #[arg(long)]
    pub no_spawn_prediction: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(rate) = args.tick_rate {
            self.simulation.tick_rate = rate.max(1);
        }
        if let Some(latency) = args.latency {
            self.network.latency_ticks = latency;
        }
        if let Some(observers) = args.observers {
            self.network.observers = observers;
        }
        if let Some(capacity) = args.ring_capacity {
            self.weapon.ring_capacity = capacity.max(1);
        }
        if args.no_spawn_prediction {
            self.weapon.use_spawn_prediction = false;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            latency: Some(7),
            ring_capacity: Some(16),
            no_spawn_prediction: true,
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.latency_ticks, 7);
        assert_eq!(config.weapon.ring_capacity, 16);
        assert!(!config.weapon.use_spawn_prediction);
        // Non-overridden fields retain defaults
        assert_eq!(config.simulation.tick_rate, 60);
        assert_eq!(config.network.observers, 1);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let mut config = Config::default();
        let args = CliArgs {
            tick_rate: Some(0),
            ring_capacity: Some(0),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.simulation.tick_rate, 1);
        assert_eq!(config.weapon.ring_capacity, 1);
    }

    #[test]
    fn test_parse_from_args() {
        let args = CliArgs::parse_from(["volley", "--latency", "5", "--log-level", "debug"]);
        assert_eq!(args.latency, Some(5));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(!args.no_spawn_prediction);
    }
}
