//! Randomization
//!
//! Timing and sizing jitter so executions do not form a pattern other traders
//! can key on. Every random draw in the crate goes through a `Randomizer`, which
//! can be seeded for reproducible tests.

use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::SignalKind;

/// Jitter applied to strategy-generated signals before they are scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitterConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_entry_delay_min_ms")]
    pub entry_delay_min_ms: u64,
    #[serde(default = "default_entry_delay_max_ms")]
    pub entry_delay_max_ms: u64,
    #[serde(default)]
    pub exit_delay_min_ms: u64,
    #[serde(default = "default_exit_delay_max_ms")]
    pub exit_delay_max_ms: u64,
    /// Tick interval variance, percent
    #[serde(default = "default_interval_jitter_pct")]
    pub interval_jitter_pct: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_entry_delay_min_ms() -> u64 {
    200
}

fn default_entry_delay_max_ms() -> u64 {
    2_000
}

fn default_exit_delay_max_ms() -> u64 {
    500
}

fn default_interval_jitter_pct() -> f64 {
    10.0
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entry_delay_min_ms: default_entry_delay_min_ms(),
            entry_delay_max_ms: default_entry_delay_max_ms(),
            exit_delay_min_ms: 0,
            exit_delay_max_ms: default_exit_delay_max_ms(),
            interval_jitter_pct: default_interval_jitter_pct(),
        }
    }
}

/// Seedable source of jitter
#[derive(Debug)]
pub struct Randomizer {
    config: JitterConfig,
    rng: StdRng,
}

impl Randomizer {
    pub fn new(config: JitterConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    pub fn from_entropy(config: JitterConfig) -> Self {
        Self::new(config, None)
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(JitterConfig::default(), Some(seed))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Uniform draw in `[low, high]`; returns `low` for an empty range
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// True with probability `p`
    pub fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        self.rng.gen::<f64>() < p
    }

    /// Delay before a strategy signal is handed to the scheduler.
    /// Exits get the shorter window.
    pub fn signal_delay(&mut self, kind: SignalKind) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        let (min, max) = match kind {
            SignalKind::Sell | SignalKind::Close => {
                (self.config.exit_delay_min_ms, self.config.exit_delay_max_ms)
            }
            _ => (self.config.entry_delay_min_ms, self.config.entry_delay_max_ms),
        };
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// Vary a polling interval by up to `interval_jitter_pct`
    pub fn jitter_interval(&mut self, base: Duration) -> Duration {
        if !self.config.enabled || self.config.interval_jitter_pct <= 0.0 {
            return base;
        }
        let jitter = self.config.interval_jitter_pct / 100.0;
        let factor = self.rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Random bytes for synthetic identifiers
    pub fn bytes(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.rng.fill_bytes(&mut out);
        out
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}

impl Default for Randomizer {
    fn default() -> Self {
        Self::from_entropy(JitterConfig::default())
    }
}
