//! Effect parameters and their valid domains

use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Rejected parameter input
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ParameterError {
    #[error("{kind} must be a finite number, got {value}")]
    NotFinite { kind: ParamKind, value: f64 },
}

/// The four user-adjustable parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    PlaybackRate,
    ReverbWet,
    ReverbDecay,
    ReverbPreDelay,
}

impl ParamKind {
    pub const ALL: [ParamKind; 4] = [
        ParamKind::PlaybackRate,
        ParamKind::ReverbWet,
        ParamKind::ReverbDecay,
        ParamKind::ReverbPreDelay,
    ];

    /// Valid domain, inclusive
    pub fn range(self) -> RangeInclusive<f64> {
        match self {
            ParamKind::PlaybackRate => 0.6..=1.0,
            ParamKind::ReverbWet => 0.0..=1.0,
            ParamKind::ReverbDecay => 0.5..=10.0,
            ParamKind::ReverbPreDelay => 0.0..=1.0,
        }
    }

    /// Clamp a finite value into the domain
    pub fn clamp(self, value: f64) -> Result<f64, ParameterError> {
        if !value.is_finite() {
            return Err(ParameterError::NotFinite { kind: self, value });
        }
        let range = self.range();
        let clamped = value.clamp(*range.start(), *range.end());
        if clamped != value {
            tracing::warn!(param = %self, requested = value, applied = clamped, "parameter clamped");
        }
        Ok(clamped)
    }

    /// Whether changing this parameter requires regenerating the impulse response
    pub fn is_expensive(self) -> bool {
        matches!(self, ParamKind::ReverbDecay | ParamKind::ReverbPreDelay)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::PlaybackRate => "playback rate",
            ParamKind::ReverbWet => "reverb wet",
            ParamKind::ReverbDecay => "reverb decay",
            ParamKind::ReverbPreDelay => "reverb pre-delay",
        };
        f.write_str(name)
    }
}

/// Current effect settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectParameters {
    /// Speed multiplier (0.6 - 1.0), pitch follows
    pub playback_rate: f64,
    /// Wet level (0.0 - 1.0)
    pub reverb_wet: f64,
    /// Impulse decay time in seconds (0.5 - 10.0)
    pub reverb_decay: f64,
    /// Silence before the tail starts, seconds (0.0 - 1.0)
    pub reverb_pre_delay: f64,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            playback_rate: 0.8,
            reverb_wet: 0.5,
            reverb_decay: 0.5,
            reverb_pre_delay: 0.01,
        }
    }
}

impl EffectParameters {
    /// Build from raw values, clamping each into its domain
    pub fn new(
        playback_rate: f64,
        reverb_wet: f64,
        reverb_decay: f64,
        reverb_pre_delay: f64,
    ) -> Result<Self, ParameterError> {
        Ok(Self {
            playback_rate: ParamKind::PlaybackRate.clamp(playback_rate)?,
            reverb_wet: ParamKind::ReverbWet.clamp(reverb_wet)?,
            reverb_decay: ParamKind::ReverbDecay.clamp(reverb_decay)?,
            reverb_pre_delay: ParamKind::ReverbPreDelay.clamp(reverb_pre_delay)?,
        })
    }

    pub fn get(&self, kind: ParamKind) -> f64 {
        match kind {
            ParamKind::PlaybackRate => self.playback_rate,
            ParamKind::ReverbWet => self.reverb_wet,
            ParamKind::ReverbDecay => self.reverb_decay,
            ParamKind::ReverbPreDelay => self.reverb_pre_delay,
        }
    }

    /// Store a value after clamping; returns what was stored
    pub fn set(&mut self, kind: ParamKind, value: f64) -> Result<f64, ParameterError> {
        let value = kind.clamp(value)?;
        match kind {
            ParamKind::PlaybackRate => self.playback_rate = value,
            ParamKind::ReverbWet => self.reverb_wet = value,
            ParamKind::ReverbDecay => self.reverb_decay = value,
            ParamKind::ReverbPreDelay => self.reverb_pre_delay = value,
        }
        Ok(value)
    }
}
