//! Decoded audio source and its tag metadata

use std::sync::Arc;

/// Track metadata supplied alongside a decoded source
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Embedded cover image bytes, if the file carried one
    pub cover: Option<Arc<Vec<u8>>>,
    /// Length in seconds (0 when tags don't say)
    pub length: f64,
}

impl Default for TrackMetadata {
    fn default() -> Self {
        Self {
            title: "Unknown Song".to_string(),
            artist: "Unknown Artist".to_string(),
            album: "Unknown album".to_string(),
            cover: None,
            length: 0.0,
        }
    }
}

/// An immutable decoded audio buffer
///
/// Samples are interleaved and shared through an `Arc`, so the live graph and
/// any offline render read the same bytes without copying.
#[derive(Debug, Clone)]
pub struct AudioSource {
    samples: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
    metadata: TrackMetadata,
}

impl AudioSource {
    /// Wrap interleaved samples. `channels` and `sample_rate` must be non-zero.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
            metadata: TrackMetadata::default(),
        }
    }

    /// Attach tag metadata
    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn samples(&self) -> &Arc<Vec<f32>> {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Native duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Stereo frame at an integer index. Mono is duplicated, extra channels are ignored.
    #[inline]
    pub(crate) fn frame(&self, index: usize) -> (f32, f32) {
        let ch = self.channels as usize;
        let base = index * ch;
        let left = self.samples[base];
        let right = if ch > 1 { self.samples[base + 1] } else { left };
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metadata() {
        let meta = TrackMetadata::default();
        assert_eq!(meta.album, "Unknown album");
        assert_eq!(meta.artist, "Unknown Artist");
        assert_eq!(meta.title, "Unknown Song");
        assert_eq!(meta.length, 0.0);
        assert!(meta.cover.is_none());
    }

    #[test]
    fn test_duration_stereo() {
        let source = AudioSource::new(vec![0.0; 44100 * 2 * 3], 2, 44100);
        assert_eq!(source.frames(), 44100 * 3);
        assert!((source.duration() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mono_frame_duplicates() {
        let source = AudioSource::new(vec![0.25, -0.5], 1, 8000);
        assert_eq!(source.frame(1), (-0.5, -0.5));
    }

    #[test]
    fn test_multichannel_takes_front_pair() {
        let source = AudioSource::new(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3, 8000);
        assert_eq!(source.frames(), 2);
        assert_eq!(source.frame(1), (0.4, 0.5));
    }
}
