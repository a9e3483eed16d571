//! Run configuration: an optional JSON file whose values the command line
//! overrides. Every field has a default, so a partial file is fine.

use crate::bridge::BridgeConfig;
use crate::error::{Error, Result};
use crate::harmony::{HarmonyProfile, HarmonyStyle, DEFAULT_HISTORY_CAPACITY};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_WS_PORT: u16 = 8765;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub harmony: HarmonyConfig,
    pub gesture: BridgeConfig,
    pub visualization: VisualizationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub velocity: u8,
    /// Stop after this many melody notes; run until interrupted if unset.
    pub num_notes: Option<u64>,
    pub min_duration: f64,
    pub max_duration: f64,
    /// Multiplier on step and duration; 2.0 plays at half tempo.
    pub speed: f64,
    pub channel: u8,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 2.0,
            velocity: 80,
            num_notes: None,
            min_duration: 0.1,
            max_duration: 2.0,
            speed: 1.0,
            channel: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    pub enabled: bool,
    /// Profile name, checked against the known styles at validation.
    pub style: String,
    /// Defaults to the melody channel.
    pub channel: Option<u8>,
    pub history: usize,
    /// Replacement weights for the style's intervals.
    pub weights: Option<Vec<f64>>,
    /// Fixed RNG seed for reproducible harmony.
    pub rng_seed: Option<u64>,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            style: HarmonyStyle::Classical.to_string(),
            channel: None,
            history: DEFAULT_HISTORY_CAPACITY,
            weights: None,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub enabled: bool,
    pub addr: String,
    pub port: u16,
    /// HTML page served to plain HTTP requests on the same port.
    pub page: Option<PathBuf>,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0".into(),
            port: DEFAULT_WS_PORT,
            page: None,
        }
    }
}

impl VisualizationConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Reject values the performance loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        if !(g.temperature > 0.0) || !g.temperature.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "temperature must be positive, got {}",
                g.temperature
            )));
        }
        if g.velocity > 127 {
            return Err(Error::InvalidConfig(format!("velocity {} out of 0-127", g.velocity)));
        }
        if !g.min_duration.is_finite() || !g.max_duration.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "durations must be finite, got [{}, {}]",
                g.min_duration, g.max_duration
            )));
        }
        if !(g.min_duration > 0.0) || g.max_duration < g.min_duration {
            return Err(Error::InvalidConfig(format!(
                "duration range [{}, {}] is empty",
                g.min_duration, g.max_duration
            )));
        }
        if !(g.speed > 0.0) || !g.speed.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "speed must be positive and finite, got {}",
                g.speed
            )));
        }
        for (what, ch) in [
            ("melody", Some(g.channel)),
            ("harmony", self.harmony.channel),
            ("gesture", Some(self.gesture.channel)),
        ] {
            if let Some(ch) = ch {
                if ch > 15 {
                    return Err(Error::InvalidConfig(format!("{} channel {} out of 0-15", what, ch)));
                }
            }
        }
        if self.gesture.rate_hz == 0 || self.gesture.window == 0 {
            return Err(Error::InvalidConfig(
                "gesture rate and smoothing window must be non-zero".into(),
            ));
        }
        if self.harmony.history == 0 {
            return Err(Error::InvalidConfig("harmony history must hold at least one note".into()));
        }
        self.harmony_profile()?;
        Ok(())
    }

    /// The interval profile named by `harmony.style`, with any weight override.
    pub fn harmony_profile(&self) -> Result<HarmonyProfile> {
        let style: HarmonyStyle = self.harmony.style.parse()?;
        match &self.harmony.weights {
            Some(w) => HarmonyProfile::with_weights(style, w.clone()),
            None => Ok(HarmonyProfile::for_style(style)),
        }
    }

    pub fn harmony_channel(&self) -> u8 {
        self.harmony.channel.unwrap_or(self.generation.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.generation.temperature, 2.0);
        assert_eq!(c.generation.velocity, 80);
        assert_eq!(c.generation.min_duration, 0.1);
        assert_eq!(c.generation.max_duration, 2.0);
        assert_eq!(c.visualization.port, 8765);
        assert_eq!(c.gesture.rate_hz, 20);
        assert_eq!(c.gesture.window, 5);
        assert_eq!(c.harmony.history, 8);
        assert!(!c.harmony.enabled);
        c.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let c: Config =
            serde_json::from_str(r#"{"harmony":{"enabled":true,"style":"jazz"},"gesture":{"rate_hz":10}}"#)
                .unwrap();
        assert!(c.harmony.enabled);
        assert_eq!(c.harmony_profile().unwrap().style(), HarmonyStyle::Jazz);
        assert_eq!(c.gesture.rate_hz, 10);
        assert_eq!(c.gesture.window, 5);
        assert_eq!(c.generation.velocity, 80);
    }

    #[test]
    fn test_unknown_style_rejected() {
        let mut c = Config::default();
        c.harmony.style = "baroque".into();
        assert!(matches!(c.validate(), Err(Error::UnknownHarmonyStyle(_))));
    }

    #[test]
    fn test_bad_ranges_rejected() {
        let mut c = Config::default();
        c.generation.min_duration = 3.0;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));

        let mut c = Config::default();
        c.gesture.channel = 16;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.generation.speed = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_non_finite_timing_rejected() {
        let mut c = Config::default();
        c.generation.speed = f64::INFINITY;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));

        let mut c = Config::default();
        c.generation.max_duration = f64::INFINITY;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.generation.min_duration = f64::NAN;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.generation.speed = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_harmony_channel_follows_melody() {
        let mut c = Config::default();
        c.generation.channel = 3;
        assert_eq!(c.harmony_channel(), 3);
        c.harmony.channel = Some(5);
        assert_eq!(c.harmony_channel(), 5);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("gh_config_{}.json", std::process::id()));
        let mut c = Config::default();
        c.generation.num_notes = Some(42);
        c.harmony.style = "modern".into();
        c.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.generation.num_notes, Some(42));
        assert_eq!(loaded.harmony.style, "modern");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/config.json")),
            Err(Error::InvalidConfig(_))
        ));
    }
}
