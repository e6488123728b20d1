//! Convolution reverb with a generated impulse response
//!
//! Decay and pre-delay shape the impulse response, so changing either means
//! generating and transforming a new one. Wet level is a plain equal-power
//! crossfade and can move every block.

use super::convolver::{Convolver, PreparedImpulse, BLOCK_SIZE};
use super::impulse::ImpulseResponse;
use super::Effect;
use std::f32::consts::FRAC_PI_2;

/// The parameters baked into an impulse response
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    /// Tail length in seconds
    pub decay: f64,
    /// Silence before the tail, in seconds
    pub pre_delay: f64,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            decay: 0.5,
            pre_delay: 0.01,
        }
    }
}

/// Stereo convolution reverb
pub struct Reverb {
    sample_rate: u32,
    convolver: Convolver,
    settings: ReverbSettings,
    wet: f32,
    dry_gain: f32,
    wet_gain: f32,
    dry_target: f32,
    wet_target: f32,
    /// Number of impulse responses installed so far
    impulse_generation: u64,
}

impl Reverb {
    /// Gain smoothing coefficient for click-free wet changes
    const GAIN_SMOOTH_COEFF: f32 = 0.999;

    /// Create a reverb, generating its first impulse response synchronously
    pub fn new(sample_rate: u32, wet: f64, settings: ReverbSettings) -> Self {
        let prepared = Self::prepare(sample_rate, settings);
        let wet = (wet as f32).clamp(0.0, 1.0);
        let (dry_gain, wet_gain) = equal_power(wet);

        Self {
            sample_rate,
            convolver: Convolver::new(prepared),
            settings,
            wet,
            dry_gain,
            wet_gain,
            dry_target: dry_gain,
            wet_target: wet_gain,
            impulse_generation: 1,
        }
    }

    /// Generate and transform an impulse response.
    ///
    /// This is the expensive step; call it off the audio thread and pass the
    /// result to [`Reverb::install`].
    pub fn prepare(sample_rate: u32, settings: ReverbSettings) -> PreparedImpulse {
        let impulse = ImpulseResponse::generate(settings.decay, settings.pre_delay, sample_rate);
        tracing::debug!(
            decay = settings.decay,
            pre_delay = settings.pre_delay,
            frames = impulse.len(),
            "generated impulse response"
        );
        PreparedImpulse::new(&impulse, BLOCK_SIZE)
    }

    /// Swap in an impulse response built by [`Reverb::prepare`]
    pub fn install(&mut self, prepared: PreparedImpulse, settings: ReverbSettings) {
        self.convolver.install(prepared);
        self.settings = settings;
        self.impulse_generation += 1;
    }

    /// Set wet level (0.0 - 1.0), ramped to avoid clicks
    pub fn set_wet(&mut self, wet: f64) {
        self.wet = (wet as f32).clamp(0.0, 1.0);
        let (dry, wet) = equal_power(self.wet);
        self.dry_target = dry;
        self.wet_target = wet;
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    pub fn settings(&self) -> ReverbSettings {
        self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// How many impulse responses have been installed, the first included
    pub fn impulse_generation(&self) -> u64 {
        self.impulse_generation
    }
}

/// Equal-power crossfade gains (dry, wet)
fn equal_power(wet: f32) -> (f32, f32) {
    let angle = wet * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

impl Effect for Reverb {
    fn process(&mut self, samples: &mut [f32]) {
        let smooth = 1.0 - Self::GAIN_SMOOTH_COEFF;
        for chunk in samples.chunks_mut(2) {
            if chunk.len() < 2 {
                continue;
            }
            self.dry_gain += (self.dry_target - self.dry_gain) * smooth;
            self.wet_gain += (self.wet_target - self.wet_gain) * smooth;

            let (wet, dry) = self.convolver.process_frame(chunk[0], chunk[1]);
            chunk[0] = dry[0] * self.dry_gain + wet[0] * self.wet_gain;
            chunk[1] = dry[1] * self.dry_gain + wet[1] * self.wet_gain;
        }
    }

    fn reset(&mut self) {
        self.convolver.reset();
        self.dry_gain = self.dry_target;
        self.wet_gain = self.wet_target;
    }

    fn latency_frames(&self) -> usize {
        self.convolver.latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_power_endpoints() {
        let (dry, wet) = equal_power(0.0);
        assert!((dry - 1.0).abs() < 1e-6 && wet.abs() < 1e-6);
        let (dry, wet) = equal_power(1.0);
        assert!(dry.abs() < 1e-6 && (wet - 1.0).abs() < 1e-6);
        let (dry, wet) = equal_power(0.5);
        assert!((dry * dry + wet * wet - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fully_dry_passes_signal_delayed() {
        let mut reverb = Reverb::new(8000, 0.0, ReverbSettings::default());
        let latency = reverb.latency_frames();
        let mut samples = vec![0.0f32; (latency + 4) * 2];
        samples[0] = 0.5;
        samples[1] = -0.5;
        reverb.process(&mut samples);
        assert!((samples[latency * 2] - 0.5).abs() < 1e-6);
        assert!((samples[latency * 2 + 1] + 0.5).abs() < 1e-6);
        assert!(samples[..latency * 2].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_wet_adds_tail() {
        let mut reverb = Reverb::new(8000, 1.0, ReverbSettings::default());
        let latency = reverb.latency_frames();
        let mut samples = vec![0.0f32; 8000 * 2];
        samples[0] = 1.0;
        samples[1] = 1.0;
        reverb.process(&mut samples);
        let tail = &samples[(latency + 400) * 2..(latency + 2000) * 2];
        assert!(tail.iter().any(|&s| s.abs() > 1e-6));
        assert!(samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_install_tracks_settings() {
        let mut reverb = Reverb::new(8000, 0.5, ReverbSettings::default());
        assert_eq!(reverb.impulse_generation(), 1);
        let settings = ReverbSettings {
            decay: 2.0,
            pre_delay: 0.2,
        };
        reverb.install(Reverb::prepare(8000, settings), settings);
        assert_eq!(reverb.settings(), settings);
        assert_eq!(reverb.impulse_generation(), 2);
    }

    #[test]
    fn test_wet_change_is_ramped() {
        let mut reverb = Reverb::new(8000, 0.0, ReverbSettings::default());
        reverb.set_wet(1.0);
        assert_eq!(reverb.wet(), 1.0);
        let mut samples = vec![0.0f32; 2];
        reverb.process(&mut samples);
        // One frame in, the dry gain has barely moved
        assert!(reverb.dry_gain > 0.99);
    }
}
