//! Live playback controller
//!
//! Tracks the user-facing transport (playing flag, position, effective
//! length) and drives the source node in the live context. Positions are kept
//! in rate-adjusted seconds; they are scaled by the playback rate only at the
//! point where the source node is started.

use crate::context::{LiveContext, TransportEvent};
use crate::effects::Effect;
use crate::song_length::song_length;
use crate::source::AudioSource;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no audio source loaded")]
    NotLoaded,
}

/// Transport state as presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// Rate-adjusted seconds, within `[0, effective_length]`
    pub position: f64,
    /// Native duration divided by the playback rate
    pub effective_length: f64,
}

pub struct PlaybackController {
    context: LiveContext,
    state: PlaybackState,
    /// Native duration of the loaded source
    native_duration: Option<f64>,
    playback_rate: f64,
    /// Generation of the most recent source start
    generation: u64,
}

impl PlaybackController {
    pub fn new(context: LiveContext, playback_rate: f64) -> Self {
        context.with_graph(|graph| graph.source_mut().set_playback_rate(playback_rate));
        Self {
            context,
            state: PlaybackState::default(),
            native_duration: None,
            playback_rate,
            generation: 0,
        }
    }

    pub fn context(&self) -> &LiveContext {
        &self.context
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn is_loaded(&self) -> bool {
        self.native_duration.is_some()
    }

    /// Put a new source into the live graph, stopped at position 0
    pub fn load(&mut self, source: AudioSource) {
        let duration = source.duration();
        // The old song's tail must not bleed into the new one
        self.context.with_graph(|graph| {
            graph.source_mut().load(source);
            graph.reverb_mut().reset();
        });
        self.native_duration = Some(duration);
        self.state = PlaybackState {
            is_playing: false,
            position: 0.0,
            effective_length: song_length(duration, self.playback_rate),
        };
    }

    pub fn unload(&mut self) {
        self.context.with_graph(|graph| {
            graph.source_mut().unload();
            graph.reverb_mut().reset();
        });
        self.native_duration = None;
        self.state = PlaybackState::default();
    }

    /// Start from `from` rate-adjusted seconds, restarting if already playing
    pub fn play(&mut self, from: f64) -> Result<(), PlaybackError> {
        if !self.is_loaded() {
            return Err(PlaybackError::NotLoaded);
        }
        let from = if from.is_finite() {
            from.clamp(0.0, self.state.effective_length)
        } else {
            0.0
        };
        let native = from * self.playback_rate;
        let rate = self.playback_rate;
        self.generation = self.context.with_graph(|graph| {
            let source = graph.source_mut();
            source.stop();
            source.set_playback_rate(rate);
            source.start(native)
        });
        self.state.is_playing = true;
        self.state.position = from;
        tracing::debug!(position = from, native, generation = self.generation, "playback started");
        Ok(())
    }

    /// Halt output, keeping the position
    pub fn stop(&mut self) {
        if !self.state.is_playing {
            return;
        }
        self.context.with_graph(|graph| graph.source_mut().stop());
        self.state.is_playing = false;
        tracing::debug!(position = self.state.position, "playback stopped");
    }

    /// Stop, then restart at `position`
    pub fn seek(&mut self, position: f64) -> Result<(), PlaybackError> {
        if !self.is_loaded() {
            return Err(PlaybackError::NotLoaded);
        }
        self.stop();
        self.play(position)
    }

    /// The source reached its end: stop and rewind
    pub fn on_native_end(&mut self) {
        self.context.with_graph(|graph| graph.source_mut().stop());
        self.state.is_playing = false;
        self.state.position = 0.0;
        tracing::debug!("song over");
    }

    /// Change speed immediately, preserving relative progress
    pub fn set_playback_rate(&mut self, rate: f64) {
        let old_length = self.state.effective_length;
        self.playback_rate = rate;
        self.context.with_graph(|graph| graph.source_mut().set_playback_rate(rate));

        let Some(duration) = self.native_duration else {
            return;
        };
        let new_length = song_length(duration, rate);
        if old_length > 0.0 {
            self.state.position = (self.state.position * new_length / old_length).clamp(0.0, new_length);
        }
        self.state.effective_length = new_length;
    }

    /// Move the coarse clock forward while playing.
    ///
    /// Returns true when the position ran past the effective length and the
    /// song was ended.
    pub fn advance(&mut self, secs: f64) -> bool {
        if !self.state.is_playing {
            return false;
        }
        self.state.position += secs;
        if self.state.position > self.state.effective_length {
            self.on_native_end();
            return true;
        }
        false
    }

    /// Handle end reports from the output thread.
    ///
    /// Reports from an earlier start are ignored. Returns true when the
    /// current playback ended.
    pub fn poll_transport(&mut self) -> bool {
        let mut ended = false;
        for event in self.context.poll_events() {
            match event {
                TransportEvent::Ended { generation } => {
                    if generation == self.generation && self.state.is_playing {
                        self.on_native_end();
                        ended = true;
                    } else {
                        tracing::trace!(generation, current = self.generation, "stale end event");
                    }
                }
            }
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EffectParameters;

    const RATE: u32 = 8000;

    fn controller(playback_rate: f64) -> PlaybackController {
        let params = EffectParameters {
            playback_rate,
            ..EffectParameters::default()
        };
        PlaybackController::new(LiveContext::new(RATE, &params), playback_rate)
    }

    fn source(seconds: f64) -> AudioSource {
        let frames = (seconds * RATE as f64) as usize;
        AudioSource::new(vec![0.1; frames * 2], 2, RATE)
    }

    fn native_position(controller: &PlaybackController) -> f64 {
        controller.context().with_graph(|graph| graph.source().position_secs())
    }

    #[test]
    fn test_rejects_before_load() {
        let mut controller = controller(0.8);
        assert_eq!(controller.play(0.0), Err(PlaybackError::NotLoaded));
        assert_eq!(controller.seek(1.0), Err(PlaybackError::NotLoaded));
        assert!(!controller.state().is_playing);
    }

    #[test]
    fn test_load_clears_reverb_tail() {
        let mut controller = controller(0.8);
        let renderer = controller.context().renderer();
        controller.load(source(10.0));
        controller.play(0.0).unwrap();
        let mut out = vec![0.0f32; 4096 * 2];
        renderer.process(&mut out);
        controller.stop();

        renderer.process(&mut out);
        assert!(out.iter().any(|s| s.abs() > 1e-6));

        controller.load(source(10.0));
        renderer.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_effective_length_tracks_rate() {
        let mut controller = controller(0.8);
        controller.load(source(10.0));
        assert!((controller.state().effective_length - 12.5).abs() < 1e-9);
        for rate in [0.6, 0.75, 1.0] {
            controller.set_playback_rate(rate);
            assert!((controller.state().effective_length - 10.0 / rate).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rate_change_preserves_progress() {
        let mut controller = controller(1.0);
        controller.load(source(10.0));
        controller.play(4.0).unwrap();
        let before = controller.state();
        controller.set_playback_rate(0.6);
        let after = controller.state();
        let progress_before = before.position / before.effective_length;
        let progress_after = after.position / after.effective_length;
        assert!((progress_before - progress_after).abs() < 1e-9);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut controller = controller(0.8);
        controller.load(source(10.0));
        controller.play(3.0).unwrap();
        controller.advance(1.0);
        controller.stop();
        let first = controller.state();
        controller.stop();
        assert_eq!(controller.state(), first);
        assert!(!first.is_playing);
        assert!((first.position - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_scales_to_native_time() {
        let mut controller = controller(0.8);
        controller.load(source(10.0));
        controller.seek(5.0).unwrap();
        assert!(controller.state().is_playing);
        assert!((controller.state().position - 5.0).abs() < 1e-9);
        assert!((native_position(&controller) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_zero_starts_at_native_zero() {
        for rate in [0.6, 0.8, 1.0] {
            let mut controller = controller(rate);
            controller.load(source(2.0));
            controller.seek(0.0).unwrap();
            controller.play(0.0).unwrap();
            assert_eq!(native_position(&controller), 0.0);
        }
    }

    #[test]
    fn test_play_restarts_when_playing() {
        let mut controller = controller(1.0);
        controller.load(source(10.0));
        controller.play(2.0).unwrap();
        controller.play(6.0).unwrap();
        assert!(controller.state().is_playing);
        assert!((native_position(&controller) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_ticks_past_length_end_song() {
        let mut controller = controller(0.8);
        controller.load(source(10.0));
        controller.play(0.0).unwrap();
        let mut over_at = None;
        for tick in 1..=13 {
            if controller.advance(1.0) {
                over_at = Some(tick);
            }
        }
        assert_eq!(over_at, Some(13));
        let state = controller.state();
        assert!(!state.is_playing);
        assert_eq!(state.position, 0.0);
    }

    #[test]
    fn test_native_end_resets() {
        let mut controller = controller(1.0);
        controller.load(source(0.01));
        controller.play(0.0).unwrap();
        let renderer = controller.context().renderer();
        let mut out = vec![0.0; 512];
        renderer.process(&mut out);
        assert!(controller.poll_transport());
        assert!(!controller.state().is_playing);
        assert_eq!(controller.state().position, 0.0);
    }

    #[test]
    fn test_stale_end_ignored() {
        let mut controller = controller(1.0);
        controller.load(source(0.01));
        controller.play(0.0).unwrap();
        let renderer = controller.context().renderer();
        let mut out = vec![0.0; 512];
        renderer.process(&mut out);
        // Restarted before the end report was collected
        controller.play(0.0).unwrap();
        assert!(!controller.poll_transport());
        assert!(controller.state().is_playing);
    }
}
