//! Audio effects for slowverb

mod convolver;
mod impulse;
mod reverb;

pub use convolver::{Convolver, PreparedImpulse, BLOCK_SIZE};
pub use impulse::ImpulseResponse;
pub use reverb::{Reverb, ReverbSettings};

/// Trait for audio effects
pub trait Effect: Send {
    /// Process audio samples in place (stereo interleaved)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);

    /// Frames of delay the effect adds to the signal
    fn latency_frames(&self) -> usize {
        0
    }
}
