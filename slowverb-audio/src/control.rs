//! Parameter update channel
//!
//! Playback rate and wet level reach the live graph as soon as they are set.
//! Decay and pre-delay change the impulse response, so their engine
//! application waits for the slider to settle. The displayed parameters
//! always update immediately.

use crate::context::LiveContext;
use crate::debounce::Debouncer;
use crate::effects::{Reverb, ReverbSettings};
use crate::params::{EffectParameters, ParamKind, ParameterError};
use crate::playback::PlaybackController;
use std::time::{Duration, Instant};

/// Default quiescence window for impulse-response parameters
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub struct ParameterChannel {
    params: EffectParameters,
    /// Settings of the impulse response currently in the live graph
    applied: ReverbSettings,
    decay: Debouncer<f64>,
    pre_delay: Debouncer<f64>,
    /// Impulse responses regenerated through this channel
    applications: u64,
}

impl ParameterChannel {
    /// `params` must match what the live graph was built with
    pub fn new(params: EffectParameters, window: Duration) -> Self {
        Self {
            params,
            applied: ReverbSettings {
                decay: params.reverb_decay,
                pre_delay: params.reverb_pre_delay,
            },
            decay: Debouncer::new(window),
            pre_delay: Debouncer::new(window),
            applications: 0,
        }
    }

    /// Parameters as the user last set them
    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    pub fn applied(&self) -> ReverbSettings {
        self.applied
    }

    pub fn applications(&self) -> u64 {
        self.applications
    }

    pub fn is_pending(&self) -> bool {
        self.decay.is_pending() || self.pre_delay.is_pending()
    }

    pub fn set_playback_rate(
        &mut self,
        value: f64,
        controller: &mut PlaybackController,
    ) -> Result<f64, ParameterError> {
        let value = self.params.set(ParamKind::PlaybackRate, value)?;
        controller.set_playback_rate(value);
        Ok(value)
    }

    pub fn set_reverb_wet(&mut self, value: f64, context: &LiveContext) -> Result<f64, ParameterError> {
        let value = self.params.set(ParamKind::ReverbWet, value)?;
        context.with_graph(|graph| graph.reverb_mut().set_wet(value));
        Ok(value)
    }

    pub fn set_reverb_decay(&mut self, value: f64, now: Instant) -> Result<f64, ParameterError> {
        let value = self.params.set(ParamKind::ReverbDecay, value)?;
        self.decay.schedule(value, now);
        Ok(value)
    }

    pub fn set_reverb_pre_delay(&mut self, value: f64, now: Instant) -> Result<f64, ParameterError> {
        let value = self.params.set(ParamKind::ReverbPreDelay, value)?;
        self.pre_delay.schedule(value, now);
        Ok(value)
    }

    /// Earliest instant a pending update becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.decay.deadline(), self.pre_delay.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply whatever has settled by `now`.
    ///
    /// The impulse response is generated before the graph is locked and
    /// swapped in afterwards. Returns the settings installed, if any.
    pub fn apply_due(&mut self, now: Instant, context: &LiveContext) -> Option<ReverbSettings> {
        let decay = self.decay.poll(now);
        let pre_delay = self.pre_delay.poll(now);
        self.install(decay, pre_delay, context)
    }

    /// Apply pending updates without waiting for their windows
    pub fn flush(&mut self, context: &LiveContext) -> Option<ReverbSettings> {
        let decay = self.decay.flush();
        let pre_delay = self.pre_delay.flush();
        self.install(decay, pre_delay, context)
    }

    fn install(
        &mut self,
        decay: Option<f64>,
        pre_delay: Option<f64>,
        context: &LiveContext,
    ) -> Option<ReverbSettings> {
        if decay.is_none() && pre_delay.is_none() {
            return None;
        }
        let settings = ReverbSettings {
            decay: decay.unwrap_or(self.applied.decay),
            pre_delay: pre_delay.unwrap_or(self.applied.pre_delay),
        };

        let prepared = Reverb::prepare(context.sample_rate(), settings);
        context.with_graph(|graph| graph.reverb_mut().install(prepared, settings));
        self.applied = settings;
        self.applications += 1;
        tracing::debug!(
            decay = settings.decay,
            pre_delay = settings.pre_delay,
            "reverb impulse applied"
        );
        Some(settings)
    }
}
