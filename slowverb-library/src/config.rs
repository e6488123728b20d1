//! Simple configuration persistence for slowverb
//!
//! Stores the initial effect settings, timing windows and the folder rendered
//! files are saved into.

use slowverb_audio::{EffectParameters, ParamKind};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub playback_rate: f64,
    pub reverb_wet: f64,
    pub reverb_decay: f64,
    pub reverb_pre_delay: f64,
    /// Quiescence window for decay and pre-delay changes
    pub debounce_ms: u64,
    /// Position ticker period
    pub tick_ms: u64,
    /// Where rendered files are saved
    pub output_folder: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let params = EffectParameters::default();
        Self {
            playback_rate: params.playback_rate,
            reverb_wet: params.reverb_wet,
            reverb_decay: params.reverb_decay,
            reverb_pre_delay: params.reverb_pre_delay,
            debounce_ms: 500,
            tick_ms: 1000,
            output_folder: None,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "using default config");
                Self::default()
            }
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slowverb")
            .join("config.txt")
    }

    /// Initial parameters, clamped into their valid domains
    pub fn effect_parameters(&self) -> EffectParameters {
        let defaults = EffectParameters::default();
        let pick = |kind: ParamKind, value: f64| kind.clamp(value).unwrap_or(defaults.get(kind));
        EffectParameters {
            playback_rate: pick(ParamKind::PlaybackRate, self.playback_rate),
            reverb_wet: pick(ParamKind::ReverbWet, self.reverb_wet),
            reverb_decay: pick(ParamKind::ReverbDecay, self.reverb_decay),
            reverb_pre_delay: pick(ParamKind::ReverbPreDelay, self.reverb_pre_delay),
        }
    }

    /// Make `params` the initial values on the next start
    pub fn set_effect_parameters(&mut self, params: &EffectParameters) {
        self.playback_rate = params.playback_rate;
        self.reverb_wet = params.reverb_wet;
        self.reverb_decay = params.reverb_decay;
        self.reverb_pre_delay = params.reverb_pre_delay;
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        // A zero period would spin the ticker thread
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "playback_rate" => set_float(&mut config.playback_rate, key, value),
                "reverb_wet" => set_float(&mut config.reverb_wet, key, value),
                "reverb_decay" => set_float(&mut config.reverb_decay, key, value),
                "reverb_pre_delay" => set_float(&mut config.reverb_pre_delay, key, value),
                "debounce_ms" => set_millis(&mut config.debounce_ms, key, value),
                "tick_ms" => set_millis(&mut config.tick_ms, key, value),
                "output_folder" => {
                    if !value.is_empty() {
                        config.output_folder = Some(PathBuf::from(value));
                    }
                }
                _ => {} // Ignore unknown keys
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let mut lines = vec![
            "# slowverb configuration".to_string(),
            format!("playback_rate={}", self.playback_rate),
            format!("reverb_wet={}", self.reverb_wet),
            format!("reverb_decay={}", self.reverb_decay),
            format!("reverb_pre_delay={}", self.reverb_pre_delay),
            format!("debounce_ms={}", self.debounce_ms),
            format!("tick_ms={}", self.tick_ms),
        ];
        if let Some(ref folder) = self.output_folder {
            lines.push(format!("output_folder={}", folder.display()));
        }
        lines.join("\n")
    }
}

fn set_float(slot: &mut f64, key: &str, value: &str) {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => *slot = v,
        _ => tracing::warn!(key, value, "ignoring unparseable config value"),
    }
}

fn set_millis(slot: &mut u64, key: &str, value: &str) {
    match value.parse::<u64>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value, "ignoring unparseable config value"),
    }
}
