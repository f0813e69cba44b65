use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::media::queue::DEFAULT_CAPACITY;

/// Empirical video pacing factors used when the audio clock governs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Multiplier on the offset added to the frame interval when video runs ahead.
    pub ahead_factor: f64,
    /// Fraction of the frame interval to wait when video lags behind.
    pub behind_factor: f64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            ahead_factor: 1.5,
            behind_factor: 0.8,
        }
    }
}

/// Shape of the crossfade opacity ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FadeCurve {
    Linear,
    SmoothStep,
}

impl FadeCurve {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::SmoothStep => t * t * (3.0 - 2.0 * t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub version: u32,
    pub queue_capacity: usize,
    pub fade_duration_ms: u64,
    pub fade_curve: FadeCurve,
    pub cache_idle_timeout_ms: u64,
    pub cache_cycle_ms: u64,
    pub seek_timeout_ms: u64,
    pub start_timeout_ms: u64,
    /// Sleep slice for paused consumers and gate re-checks.
    pub pause_poll_ms: u64,
    pub sync: SyncTuning,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            queue_capacity: DEFAULT_CAPACITY,
            fade_duration_ms: 500,
            fade_curve: FadeCurve::Linear,
            cache_idle_timeout_ms: 5_000,
            cache_cycle_ms: 33,
            seek_timeout_ms: 5_000,
            start_timeout_ms: 5_000,
            pause_poll_ms: 10,
            sync: SyncTuning::default(),
        }
    }
}

impl PlayerConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cueplay").join("player.json"))
    }

    /// Load from the user config directory, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default player config: {e:#}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) {
        let Some(path) = Self::default_path() else {
            return;
        };
        if let Err(e) = self.save_to(&path) {
            log::warn!("Failed to save player config: {e:#}");
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_duration_ms)
    }

    pub fn cache_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_idle_timeout_ms)
    }

    pub fn cache_cycle(&self) -> Duration {
        Duration::from_millis(self.cache_cycle_ms.max(1))
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let c = PlayerConfig::default();
        assert_eq!(c.queue_capacity, 256);
        assert_eq!(c.fade_duration(), Duration::from_millis(500));
        assert_eq!(c.cache_idle_timeout(), Duration::from_secs(5));
        assert!((c.sync.ahead_factor - 1.5).abs() < 1e-12);
        assert!((c.sync.behind_factor - 0.8).abs() < 1e-12);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("player.json");
        let mut config = PlayerConfig::default();
        config.fade_duration_ms = 1200;
        config.fade_curve = FadeCurve::SmoothStep;
        config.save_to(&path).unwrap();
        assert_eq!(PlayerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        std::fs::write(&path, r#"{ "queue_capacity": 16, "sync": { "ahead_factor": 2.0 } }"#).unwrap();
        let config = PlayerConfig::load_from(&path).unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert!((config.sync.ahead_factor - 2.0).abs() < 1e-12);
        assert!((config.sync.behind_factor - 0.8).abs() < 1e-12);
        assert_eq!(config.seek_timeout_ms, 5_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(PlayerConfig::load_from(&path).is_err());
    }

    #[test]
    fn smoothstep_curve_endpoints() {
        assert_eq!(FadeCurve::SmoothStep.apply(0.0), 0.0);
        assert_eq!(FadeCurve::SmoothStep.apply(1.0), 1.0);
        assert!((FadeCurve::SmoothStep.apply(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(FadeCurve::Linear.apply(2.0), 1.0);
    }
}
