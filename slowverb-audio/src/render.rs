//! Offline render engine
//!
//! A render snapshots the source and parameters, builds its own offline
//! context, plays the source from time 0 to completion, and encodes the
//! result as WAV. Jobs run on a worker thread, one at a time.

use crate::context::{AudioBuffer, OfflineContext};
use crate::params::EffectParameters;
use crate::song_length::song_length;
use crate::source::AudioSource;
use crate::wav::{encode_wav, SampleFormat, WavError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Output rate of every offline render
pub const RENDER_SAMPLE_RATE: u32 = 44100;
/// Offline renders are always stereo
pub const RENDER_CHANNELS: u16 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("offline render produced no audio")]
    EmptyBuffer,
    #[error("a render is already in progress")]
    Busy,
    #[error("render duration {0} is not a positive finite number of seconds")]
    InvalidDuration(String),
    #[error("failed to encode render: {0}")]
    Encode(#[from] WavError),
}

/// One render invocation
#[derive(Clone)]
pub struct RenderJob {
    source: AudioSource,
    params: EffectParameters,
    format: SampleFormat,
}

impl RenderJob {
    pub fn new(source: AudioSource, params: EffectParameters) -> Self {
        Self {
            source,
            params,
            format: SampleFormat::default(),
        }
    }

    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    /// Seconds of output: native duration over playback rate
    pub fn duration(&self) -> f64 {
        song_length(self.source.duration(), self.params.playback_rate)
    }

    /// Render to an in-memory buffer
    pub fn render_buffer(&self) -> Result<AudioBuffer, RenderError> {
        let duration = self.duration();
        if !duration.is_finite() || duration < 0.0 {
            return Err(RenderError::InvalidDuration(duration.to_string()));
        }

        let mut context = OfflineContext::new(RENDER_CHANNELS, duration, RENDER_SAMPLE_RATE);
        let chain = context.build_chain(self.source.clone(), &self.params);
        chain.source_mut().start(0.0);

        let buffer = context.render().ok_or(RenderError::EmptyBuffer)?;
        if buffer.is_empty() {
            return Err(RenderError::EmptyBuffer);
        }
        Ok(buffer)
    }

    /// Render and encode
    pub fn run(&self) -> Result<Vec<u8>, RenderError> {
        let buffer = self.render_buffer()?;
        Ok(encode_wav(&buffer, self.format)?)
    }
}

/// Result of a finished job
#[derive(Debug)]
pub struct RenderOutcome {
    pub id: u64,
    pub result: Result<Vec<u8>, RenderError>,
    pub elapsed: Duration,
}

struct InFlight {
    id: u64,
    thread: JoinHandle<()>,
}

/// Single-flight worker for render jobs
pub struct OfflineRenderer {
    next_id: u64,
    in_flight: Option<InFlight>,
    done_tx: Sender<RenderOutcome>,
    done_rx: Receiver<RenderOutcome>,
}

impl Default for OfflineRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineRenderer {
    pub fn new() -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            next_id: 0,
            in_flight: None,
            done_tx,
            done_rx,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Completed jobs arrive here; pass each to [`OfflineRenderer::complete`]
    pub fn completions(&self) -> &Receiver<RenderOutcome> {
        &self.done_rx
    }

    /// Start a job on a worker thread. Rejected while another job runs.
    pub fn submit(&mut self, job: RenderJob) -> Result<u64, RenderError> {
        if self.is_busy() {
            return Err(RenderError::Busy);
        }
        self.next_id += 1;
        let id = self.next_id;
        let done_tx = self.done_tx.clone();

        let thread = thread::spawn(move || {
            let started = Instant::now();
            let result = job.run();
            let elapsed = started.elapsed();
            match &result {
                Ok(bytes) => tracing::info!(id, bytes = bytes.len(), ?elapsed, "render finished"),
                Err(e) => tracing::warn!(id, error = %e, "render failed"),
            }
            let _ = done_tx.send(RenderOutcome { id, result, elapsed });
        });

        self.in_flight = Some(InFlight { id, thread });
        Ok(id)
    }

    /// Mark a received outcome as handled, freeing the worker slot
    pub fn complete(&mut self, outcome: &RenderOutcome) {
        if self.in_flight.as_ref().is_some_and(|job| job.id == outcome.id) {
            if let Some(job) = self.in_flight.take() {
                if job.thread.join().is_err() {
                    tracing::warn!(id = job.id, "render thread panicked");
                }
            }
        }
    }

    /// Block until the running job finishes
    pub fn wait(&mut self) -> Option<RenderOutcome> {
        self.in_flight.as_ref()?;
        let outcome = self.done_rx.recv().ok()?;
        self.complete(&outcome);
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::WavHeader;

    fn tone(seconds: f64, sample_rate: u32) -> AudioSource {
        let frames = (seconds * sample_rate as f64) as usize;
        let samples = (0..frames)
            .flat_map(|i| {
                let s = (i as f32 * 0.05).sin() * 0.5;
                [s, s]
            })
            .collect();
        AudioSource::new(samples, 2, sample_rate)
    }

    fn scenario_params() -> EffectParameters {
        EffectParameters::new(0.8, 0.6, 6.0, 0.1).unwrap()
    }

    #[test]
    fn test_render_header_matches_parameters() {
        let source = tone(0.5, 22050);
        let job = RenderJob::new(source.clone(), scenario_params());
        let wav = job.run().unwrap();
        let header = WavHeader::parse(&wav).unwrap();
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 44100);
        let expected = source.duration() / 0.8;
        assert!((header.duration() - expected).abs() <= 1.0 / 44100.0);
    }

    #[test]
    fn test_render_is_deterministic() {
        let source = tone(0.25, 44100);
        let params = EffectParameters::new(0.7, 0.5, 1.0, 0.05).unwrap();
        let first = RenderJob::new(source.clone(), params).run().unwrap();
        let second = RenderJob::new(source, params).run().unwrap();
        assert_eq!(
            WavHeader::parse(&first).unwrap(),
            WavHeader::parse(&second).unwrap()
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_source_fails() {
        let source = AudioSource::new(Vec::new(), 2, 44100);
        let job = RenderJob::new(source, EffectParameters::default());
        assert_eq!(job.run(), Err(RenderError::EmptyBuffer));
    }

    #[test]
    fn test_float_render() {
        let job = RenderJob::new(tone(0.1, 44100), EffectParameters::default())
            .with_format(SampleFormat::Float32);
        let header = WavHeader::parse(&job.run().unwrap()).unwrap();
        assert_eq!(header.format, SampleFormat::Float32);
    }

    #[test]
    fn test_worker_is_single_flight() {
        let mut renderer = OfflineRenderer::new();
        let job = RenderJob::new(tone(0.2, 44100), EffectParameters::default());
        let id = renderer.submit(job.clone()).unwrap();
        assert!(renderer.is_busy());
        assert_eq!(renderer.submit(job.clone()), Err(RenderError::Busy));

        let outcome = renderer.wait().unwrap();
        assert_eq!(outcome.id, id);
        assert!(outcome.result.is_ok());
        assert!(!renderer.is_busy());
        assert!(renderer.submit(job).is_ok());
    }

    #[test]
    fn test_render_leaves_source_untouched() {
        let source = tone(0.1, 44100);
        let before = source.samples().clone();
        RenderJob::new(source.clone(), scenario_params()).run().unwrap();
        assert_eq!(source.samples(), &before);
    }
}
