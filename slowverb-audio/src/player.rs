//! Buffer source node - plays an `AudioSource` at a variable rate

use crate::source::AudioSource;

/// Transport state of a source node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

/// Plays a decoded buffer into a stereo stream
///
/// Rate changes alter speed and pitch together. The node resamples from the
/// source's native rate to the context rate with linear interpolation.
pub struct BufferSource {
    source: Option<AudioSource>,
    /// Output sample rate of the owning context
    context_rate: u32,
    /// Read position in source frames
    position: f64,
    state: TransportState,
    /// Speed multiplier (1.0 = native)
    playback_rate: f64,
    /// Bumped on every start so end reports can be matched to the start that caused them
    generation: u64,
    /// Generation that reached the end of the buffer, not yet collected
    ended: Option<u64>,
}

impl BufferSource {
    /// Create an empty source node for a context running at `context_rate`
    pub fn new(context_rate: u32) -> Self {
        Self {
            source: None,
            context_rate: context_rate.max(1),
            position: 0.0,
            state: TransportState::Stopped,
            playback_rate: 1.0,
            generation: 0,
            ended: None,
        }
    }

    /// Load a buffer. Stops playback and rewinds.
    pub fn load(&mut self, source: AudioSource) {
        self.source = Some(source);
        self.position = 0.0;
        self.state = TransportState::Stopped;
        self.ended = None;
    }

    /// Drop the loaded buffer
    pub fn unload(&mut self) {
        self.source = None;
        self.position = 0.0;
        self.state = TransportState::Stopped;
        self.ended = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.source.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start playing from `offset` seconds of native (unscaled) source time.
    /// Returns the generation assigned to this start.
    pub fn start(&mut self, offset: f64) -> u64 {
        self.generation += 1;
        self.ended = None;
        let Some(source) = &self.source else {
            return self.generation;
        };
        let max = source.frames() as f64;
        self.position = (offset.max(0.0) * source.sample_rate() as f64).min(max);
        self.state = TransportState::Playing;
        self.generation
    }

    /// Halt output immediately, keeping the read position
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate = rate;
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Current read position in native seconds
    pub fn position_secs(&self) -> f64 {
        match &self.source {
            Some(source) => self.position / source.sample_rate() as f64,
            None => 0.0,
        }
    }

    /// Collect the generation whose playback ran off the end of the buffer
    pub fn take_ended(&mut self) -> Option<u64> {
        self.ended.take()
    }

    /// Fill a stereo interleaved buffer, overwriting its contents
    pub fn process(&mut self, output: &mut [f32]) {
        let source = match &self.source {
            Some(s) if self.state == TransportState::Playing => s,
            _ => {
                output.fill(0.0);
                return;
            }
        };

        let frames = source.frames();
        let step = self.playback_rate * source.sample_rate() as f64 / self.context_rate as f64;

        for frame in output.chunks_mut(2) {
            if self.state != TransportState::Playing {
                frame.fill(0.0);
                continue;
            }

            let index = self.position as usize;
            if index >= frames {
                // End of buffer
                self.state = TransportState::Stopped;
                self.position = 0.0;
                self.ended = Some(self.generation);
                frame.fill(0.0);
                continue;
            }

            let (l0, r0) = source.frame(index);
            let (left, right) = if index + 1 < frames {
                let frac = self.position.fract() as f32;
                let (l1, r1) = source.frame(index + 1);
                (l0 + frac * (l1 - l0), r0 + frac * (r1 - r0))
            } else {
                (l0, r0)
            };

            frame[0] = left;
            if frame.len() > 1 {
                frame[1] = right;
            }

            self.position += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, rate: u32) -> AudioSource {
        let samples = (0..frames).flat_map(|i| [i as f32, -(i as f32)]).collect();
        AudioSource::new(samples, 2, rate)
    }

    #[test]
    fn test_silent_until_started() {
        let mut node = BufferSource::new(100);
        node.load(ramp(10, 100));
        let mut out = vec![1.0; 8];
        node.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_native_rate_reads_each_frame() {
        let mut node = BufferSource::new(100);
        node.load(ramp(10, 100));
        node.start(0.0);
        let mut out = vec![0.0; 8];
        node.process(&mut out);
        assert_eq!(out, vec![0.0, -0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn test_half_rate_interpolates() {
        let mut node = BufferSource::new(100);
        node.load(ramp(10, 100));
        node.set_playback_rate(0.5);
        node.start(0.0);
        let mut out = vec![0.0; 6];
        node.process(&mut out);
        assert_eq!(out[0], 0.0);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert!((out[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resamples_to_context_rate() {
        // Source at 50 Hz played in a 100 Hz context advances half a frame per output frame
        let mut node = BufferSource::new(100);
        node.load(ramp(10, 50));
        node.start(0.0);
        let mut out = vec![0.0; 4];
        node.process(&mut out);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert!((node.position_secs() - 2.0 / 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_offset_in_native_seconds() {
        let mut node = BufferSource::new(100);
        node.load(ramp(100, 100));
        node.start(0.5);
        let mut out = vec![0.0; 2];
        node.process(&mut out);
        assert_eq!(out[0], 50.0);
    }

    #[test]
    fn test_end_reports_generation() {
        let mut node = BufferSource::new(100);
        node.load(ramp(4, 100));
        let generation = node.start(0.0);
        let mut out = vec![0.0; 12];
        node.process(&mut out);
        assert_eq!(node.state(), TransportState::Stopped);
        assert_eq!(node.take_ended(), Some(generation));
        assert_eq!(node.take_ended(), None);
        assert!(out[8..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_restart_bumps_generation() {
        let mut node = BufferSource::new(100);
        node.load(ramp(4, 100));
        let first = node.start(0.0);
        let second = node.start(0.0);
        assert!(second > first);
    }

    #[test]
    fn test_stop_keeps_position() {
        let mut node = BufferSource::new(100);
        node.load(ramp(100, 100));
        node.start(0.0);
        let mut out = vec![0.0; 20];
        node.process(&mut out);
        node.stop();
        assert!((node.position_secs() - 0.1).abs() < 1e-9);
    }
}
