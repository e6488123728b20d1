//! Audio contexts - the live graph and the isolated offline graph
//!
//! Both run the same fixed chain (buffer source -> reverb -> output) but each
//! context owns its own instance, so an offline render never touches what the
//! output stream is playing.

use crate::effects::{Effect, Reverb, ReverbSettings};
use crate::params::EffectParameters;
use crate::player::BufferSource;
use crate::source::AudioSource;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Frames rendered per offline processing block
const OFFLINE_BLOCK_FRAMES: usize = 1024;

/// Source node feeding a reverb
pub struct SignalChain {
    source: BufferSource,
    reverb: Reverb,
}

impl SignalChain {
    /// Build the chain for a context running at `sample_rate`
    pub fn new(sample_rate: u32, params: &EffectParameters) -> Self {
        let mut source = BufferSource::new(sample_rate);
        source.set_playback_rate(params.playback_rate);
        let settings = ReverbSettings {
            decay: params.reverb_decay,
            pre_delay: params.reverb_pre_delay,
        };
        Self {
            source,
            reverb: Reverb::new(sample_rate, params.reverb_wet, settings),
        }
    }

    pub fn source(&self) -> &BufferSource {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut BufferSource {
        &mut self.source
    }

    pub fn reverb(&self) -> &Reverb {
        &self.reverb
    }

    pub fn reverb_mut(&mut self) -> &mut Reverb {
        &mut self.reverb
    }

    /// Delay between the source and the output, in frames
    pub fn latency_frames(&self) -> usize {
        self.reverb.latency_frames()
    }

    /// Render into a stereo interleaved buffer
    pub fn process(&mut self, output: &mut [f32]) {
        self.source.process(output);
        self.reverb.process(output);
    }
}

/// Notifications from the live transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The source played off the end of its buffer
    Ended { generation: u64 },
}

/// Real-time playback context
///
/// The chain sits behind a mutex shared with a [`LiveRenderer`] that the
/// output stream callback drives.
pub struct LiveContext {
    sample_rate: u32,
    graph: Arc<Mutex<SignalChain>>,
    event_tx: Sender<TransportEvent>,
    event_rx: Receiver<TransportEvent>,
}

impl LiveContext {
    pub fn new(sample_rate: u32, params: &EffectParameters) -> Self {
        let (event_tx, event_rx) = bounded(64);
        Self {
            sample_rate,
            graph: Arc::new(Mutex::new(SignalChain::new(sample_rate, params))),
            event_tx,
            event_rx,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Handle for the output stream callback
    pub fn renderer(&self) -> LiveRenderer {
        LiveRenderer {
            graph: self.graph.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Run `f` with the graph locked
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut SignalChain) -> R) -> R {
        let mut graph = self.graph.lock();
        f(&mut graph)
    }

    /// Drain pending transport events
    pub fn poll_events(&self) -> Vec<TransportEvent> {
        self.event_rx.try_iter().collect()
    }
}

/// Pulls audio from the live graph on the output thread
#[derive(Clone)]
pub struct LiveRenderer {
    graph: Arc<Mutex<SignalChain>>,
    event_tx: Sender<TransportEvent>,
}

impl LiveRenderer {
    /// Fill a stereo interleaved output buffer
    pub fn process(&self, output: &mut [f32]) {
        // Never block the real-time thread; output silence on contention
        let Some(mut graph) = self.graph.try_lock() else {
            output.fill(0.0);
            return;
        };
        graph.process(output);
        if let Some(generation) = graph.source_mut().take_ended() {
            let _ = self.event_tx.try_send(TransportEvent::Ended { generation });
        }
    }
}

/// Rendered audio held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub channels: u16,
    pub sample_rate: u32,
    /// Interleaved samples
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Non-real-time rendering context with a fixed length
pub struct OfflineContext {
    channels: u16,
    length: usize,
    sample_rate: u32,
    chain: Option<SignalChain>,
}

impl OfflineContext {
    /// Create a context producing `duration` seconds of audio.
    /// The frame count is rounded to the nearest frame.
    pub fn new(channels: u16, duration: f64, sample_rate: u32) -> Self {
        let length = if duration.is_finite() && duration > 0.0 {
            (duration * sample_rate as f64).round() as usize
        } else {
            0
        };
        Self {
            channels: channels.clamp(1, 2),
            length,
            sample_rate,
            chain: None,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames
    pub fn length(&self) -> usize {
        self.length
    }

    /// Build a fresh chain in this context, loaded with `source`
    pub fn build_chain(&mut self, source: AudioSource, params: &EffectParameters) -> &mut SignalChain {
        let mut chain = SignalChain::new(self.sample_rate, params);
        chain.source_mut().load(source);
        self.chain.insert(chain)
    }

    /// Render to completion.
    ///
    /// Returns `None` when there is nothing to render: no chain was built or
    /// the context has zero length.
    pub fn render(self) -> Option<AudioBuffer> {
        let mut chain = self.chain?;
        if self.length == 0 {
            return None;
        }

        let latency = chain.latency_frames();
        let total = self.length + latency;
        let mut stereo = Vec::with_capacity(total * 2);
        let mut block = vec![0.0f32; OFFLINE_BLOCK_FRAMES * 2];
        let mut rendered = 0;
        while rendered < total {
            let frames = (total - rendered).min(OFFLINE_BLOCK_FRAMES);
            let chunk = &mut block[..frames * 2];
            chain.process(chunk);
            stereo.extend_from_slice(chunk);
            rendered += frames;
        }

        // Drop the chain's latency so frame 0 lines up with source time 0
        let stereo = &stereo[latency * 2..];
        let samples = match self.channels {
            1 => stereo.chunks(2).map(|f| (f[0] + f[1]) * 0.5).collect(),
            _ => stereo.to_vec(),
        };

        Some(AudioBuffer {
            channels: self.channels,
            sample_rate: self.sample_rate,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_params() -> EffectParameters {
        EffectParameters {
            playback_rate: 1.0,
            reverb_wet: 0.0,
            ..EffectParameters::default()
        }
    }

    #[test]
    fn test_offline_length_rounds() {
        let context = OfflineContext::new(2, 12.5, 44100);
        assert_eq!(context.length(), 551_250);
        let context = OfflineContext::new(2, 1.0 / 3.0, 100);
        assert_eq!(context.length(), 33);
    }

    #[test]
    fn test_offline_without_chain_renders_nothing() {
        let context = OfflineContext::new(2, 1.0, 8000);
        assert!(context.render().is_none());
    }

    #[test]
    fn test_offline_zero_duration_renders_nothing() {
        let mut context = OfflineContext::new(2, 0.0, 8000);
        context.build_chain(AudioSource::new(vec![0.5; 200], 2, 8000), &dry_params());
        assert!(context.render().is_none());
    }

    #[test]
    fn test_offline_aligns_source_to_frame_zero() {
        let samples: Vec<f32> = (0..100).flat_map(|i| [i as f32 / 100.0; 2]).collect();
        let mut context = OfflineContext::new(2, 100.0 / 8000.0, 8000);
        let chain = context.build_chain(AudioSource::new(samples, 2, 8000), &dry_params());
        chain.source_mut().start(0.0);
        let buffer = context.render().unwrap();
        assert_eq!(buffer.frames(), 100);
        assert_eq!(buffer.channels, 2);
        for i in 0..100 {
            assert!((buffer.samples[i * 2] - i as f32 / 100.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_offline_mono_downmix() {
        let samples: Vec<f32> = (0..50).flat_map(|_| [0.2, 0.4]).collect();
        let mut context = OfflineContext::new(1, 50.0 / 8000.0, 8000);
        let chain = context.build_chain(AudioSource::new(samples, 2, 8000), &dry_params());
        chain.source_mut().start(0.0);
        let buffer = context.render().unwrap();
        assert_eq!(buffer.channels, 1);
        assert_eq!(buffer.frames(), 50);
        assert!((buffer.samples[10] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_live_renderer_reports_end() {
        let context = LiveContext::new(8000, &dry_params());
        context.with_graph(|graph| {
            graph.source_mut().load(AudioSource::new(vec![0.1; 20], 2, 8000));
            graph.source_mut().start(0.0);
        });
        let renderer = context.renderer();
        let mut out = vec![0.0; 64];
        renderer.process(&mut out);
        let events = context.poll_events();
        assert_eq!(events, vec![TransportEvent::Ended { generation: 1 }]);
        assert!(context.poll_events().is_empty());
    }

    #[test]
    fn test_live_renderer_silent_on_contention() {
        let context = LiveContext::new(8000, &dry_params());
        let renderer = context.renderer();
        let mut out = vec![1.0; 16];
        context.with_graph(|_| renderer.process(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
