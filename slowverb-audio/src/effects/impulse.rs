//! Generated reverb impulse responses
//!
//! Stereo white noise shaped by an envelope: silent for the pre-delay, then an
//! exponential approach to zero over `decay` seconds with a short linear tail.

/// -58 dB, keeps a normalized response near unity loudness
const GAIN_CALIBRATION: f32 = 0.00125;

/// Rate the calibration gain was measured at
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;

/// Floor for the measured power of a response
const MIN_POWER: f32 = 0.000125;

/// Seeds for the left and right noise generators
const NOISE_SEEDS: [u64; 2] = [0x9E37_79B9_7F4A_7C15, 0xD1B5_4A32_D192_ED03];

/// A two-channel impulse response
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    sample_rate: u32,
    channels: [Vec<f32>; 2],
}

impl ImpulseResponse {
    /// Generate a response `decay + pre_delay` seconds long
    pub fn generate(decay: f64, pre_delay: f64, sample_rate: u32) -> Self {
        let length = ((decay + pre_delay) * sample_rate as f64).ceil().max(1.0) as usize;
        let envelope: Vec<f32> = (0..length)
            .map(|i| envelope(i as f64 / sample_rate as f64, decay, pre_delay) as f32)
            .collect();

        let channels = NOISE_SEEDS.map(|seed| {
            let mut noise = WhiteNoise::new(seed);
            envelope.iter().map(|&gain| noise.sample() * gain).collect()
        });

        Self {
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples of channel 0 (left) or 1 (right)
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index.min(1)]
    }

    /// Gain that brings the response to calibrated loudness
    pub fn normalization_scale(&self) -> f32 {
        let channel_count = self.channels.len();
        let power: f32 = self
            .channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|s| s * s)
            .sum();
        let mut power = (power / (channel_count * self.len().max(1)) as f32).sqrt();
        if !power.is_finite() || power < MIN_POWER {
            power = MIN_POWER;
        }

        (1.0 / power) * GAIN_CALIBRATION * (GAIN_CALIBRATION_SAMPLE_RATE / self.sample_rate as f32)
    }
}

/// Envelope gain at `t` seconds
fn envelope(t: f64, decay: f64, pre_delay: f64) -> f64 {
    if t < pre_delay {
        return 0.0;
    }

    // Reaches ~1/200 of full scale after `decay` seconds
    let time_constant = (decay + 1.0).ln() / 200f64.ln();
    let hold_at = decay * 0.9;
    let elapsed = t - pre_delay;

    if elapsed < hold_at {
        (-elapsed / time_constant).exp()
    } else if elapsed < decay {
        let held = (-hold_at / time_constant).exp();
        held * (decay - elapsed) / (decay - hold_at)
    } else {
        0.0
    }
}

/// xorshift64 white noise in [-1, 1]
struct WhiteNoise {
    state: u64,
}

impl WhiteNoise {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    #[inline]
    fn sample(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state as f32) / (u64::MAX as f32) * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_covers_decay_and_pre_delay() {
        let ir = ImpulseResponse::generate(1.5, 0.5, 1000);
        assert_eq!(ir.len(), 2000);
    }

    #[test]
    fn test_silent_during_pre_delay() {
        let ir = ImpulseResponse::generate(1.0, 0.25, 1000);
        for ch in 0..2 {
            assert!(ir.channel(ch)[..250].iter().all(|&s| s == 0.0));
            assert!(ir.channel(ch)[250..300].iter().any(|&s| s != 0.0));
        }
    }

    #[test]
    fn test_envelope_shape() {
        assert_eq!(envelope(0.05, 2.0, 0.1), 0.0);
        assert!((envelope(0.1, 2.0, 0.1) - 1.0).abs() < 1e-12);
        assert!(envelope(1.0, 2.0, 0.1) < envelope(0.5, 2.0, 0.1));
        assert_eq!(envelope(2.5, 2.0, 0.1), 0.0);
        // Linear tail ends at zero
        assert!(envelope(2.099, 2.0, 0.1) < 1e-3);
    }

    #[test]
    fn test_channels_decorrelated() {
        let ir = ImpulseResponse::generate(0.5, 0.0, 8000);
        assert_ne!(ir.channel(0), ir.channel(1));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = ImpulseResponse::generate(0.7, 0.1, 8000);
        let b = ImpulseResponse::generate(0.7, 0.1, 8000);
        assert_eq!(a.channel(0), b.channel(0));
        assert_eq!(a.channel(1), b.channel(1));
    }

    #[test]
    fn test_noise_in_range() {
        let mut noise = WhiteNoise::new(7);
        for _ in 0..10_000 {
            let s = noise.sample();
            assert!((-1.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_normalization_floor() {
        // All-silent response hits the power floor rather than dividing by zero
        let ir = ImpulseResponse::generate(0.5, 1.0, 44100);
        let silent = ImpulseResponse {
            sample_rate: 44100,
            channels: [vec![0.0; 10], vec![0.0; 10]],
        };
        assert!(ir.normalization_scale().is_finite());
        assert!((silent.normalization_scale() - GAIN_CALIBRATION / MIN_POWER).abs() < 1e-3);
    }
}
