//! Session - the single owner of playback, parameter and render state
//!
//! The presentation layer talks to a session only through [`SessionCommand`]
//! messages and listens for [`SessionEvent`]s. All state transitions happen
//! on the session thread; the output stream and render workers run beside it.

use crate::artifact::{ArtifactStore, ArtifactUrl, RenderedArtifact};
use crate::context::{LiveContext, LiveRenderer};
use crate::control::{ParameterChannel, DEBOUNCE_WINDOW};
use crate::effects::ReverbSettings;
use crate::params::{EffectParameters, ParameterError};
use crate::playback::{PlaybackController, PlaybackError, PlaybackState};
use crate::render::{OfflineRenderer, RenderError, RenderJob, RenderOutcome};
use crate::source::{AudioSource, TrackMetadata};
use crate::ticker::PositionTicker;
use crate::wav::{SampleFormat, WavHeader};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest the run loop sleeps before checking for transport end reports
const TRANSPORT_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("no audio source loaded")]
    NotLoaded,
    #[error("audio source failed to load: {0}")]
    LoadFailed(String),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<PlaybackError> for SessionError {
    fn from(e: PlaybackError) -> Self {
        match e {
            PlaybackError::NotLoaded => SessionError::NotLoaded,
        }
    }
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sample rate of the output device the live context feeds
    pub live_sample_rate: u32,
    /// Initial effect parameters, already clamped
    pub params: EffectParameters,
    /// Quiescence window for decay and pre-delay
    pub debounce: Duration,
    /// Position ticker period
    pub tick_interval: Duration,
    /// Encoding of rendered files
    pub sample_format: SampleFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            live_sample_rate: 44100,
            params: EffectParameters::default(),
            debounce: DEBOUNCE_WINDOW,
            tick_interval: Duration::from_secs(1),
            sample_format: SampleFormat::default(),
        }
    }
}

/// Commands sent to the session
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// A decoded source is ready
    Load(AudioSource),
    /// Decoding failed
    LoadFailed(String),
    /// Resume from the current position
    Play,
    PlayFrom(f64),
    Stop,
    Seek(f64),
    SetPlaybackRate(f64),
    SetReverbWet(f64),
    SetReverbDecay(f64),
    SetReverbPreDelay(f64),
    /// Position ticker fired, tagged with the run that posted it
    Tick(u64),
    RequestRender,
    /// Revoke the current rendered artifact
    ReleaseArtifact,
    Shutdown,
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            SessionCommand::Load(_) => "load",
            SessionCommand::LoadFailed(_) => "load failed",
            SessionCommand::Play => "play",
            SessionCommand::PlayFrom(_) => "play from",
            SessionCommand::Stop => "stop",
            SessionCommand::Seek(_) => "seek",
            SessionCommand::SetPlaybackRate(_) => "set playback rate",
            SessionCommand::SetReverbWet(_) => "set reverb wet",
            SessionCommand::SetReverbDecay(_) => "set reverb decay",
            SessionCommand::SetReverbPreDelay(_) => "set reverb pre-delay",
            SessionCommand::Tick(_) => "tick",
            SessionCommand::RequestRender => "render",
            SessionCommand::ReleaseArtifact => "release artifact",
            SessionCommand::Shutdown => "shutdown",
        }
    }
}

/// Everything the presentation layer displays
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub loaded: bool,
    pub playback: PlaybackState,
    /// Parameters as last set, including ones still settling
    pub params: EffectParameters,
    /// Reverb settings currently heard
    pub reverb: ReverbSettings,
    pub rendering: bool,
    pub artifact: Option<ArtifactUrl>,
}

/// Events sent from the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateUpdate(SessionSnapshot),
    Loaded {
        metadata: TrackMetadata,
        native_duration: f64,
        effective_length: f64,
    },
    LoadFailed(String),
    /// Playback reached the end and rewound
    SongOver,
    RenderStarted { duration: f64 },
    RenderComplete(RenderedArtifact),
    RenderFailed(String),
    ArtifactRevoked(ArtifactUrl),
    Rejected { command: &'static str, reason: String },
}

enum LoadState {
    Empty,
    Ready(AudioSource),
    Failed(String),
}

pub struct Session {
    config: SessionConfig,
    load_state: LoadState,
    controller: PlaybackController,
    params: ParameterChannel,
    renderer: OfflineRenderer,
    /// Job whose result should become the current artifact
    expected_render: Option<u64>,
    artifacts: ArtifactStore,
    current: Option<RenderedArtifact>,
    ticker: PositionTicker,
    /// Bumped on every ticker start and cancel so queued ticks of an old run are ignored
    tick_generation: u64,
    /// Where ticker callbacks post `Tick`; none means ticks are fed by hand
    tick_tx: Option<Sender<SessionCommand>>,
    events: Sender<SessionEvent>,
}

impl Session {
    pub fn new(config: SessionConfig, events: Sender<SessionEvent>) -> Self {
        let params = config.params;
        let context = LiveContext::new(config.live_sample_rate, &params);
        Self {
            controller: PlaybackController::new(context, params.playback_rate),
            params: ParameterChannel::new(params, config.debounce),
            ticker: PositionTicker::new(config.tick_interval),
            tick_generation: 0,
            load_state: LoadState::Empty,
            renderer: OfflineRenderer::new(),
            expected_render: None,
            artifacts: ArtifactStore::new(),
            current: None,
            tick_tx: None,
            events,
            config,
        }
    }

    /// Run the position ticker, posting ticks to `commands`
    pub fn with_ticks(mut self, commands: Sender<SessionCommand>) -> Self {
        self.tick_tx = Some(commands);
        self
    }

    /// Handle for the output stream callback
    pub fn live_renderer(&self) -> LiveRenderer {
        self.controller.context().renderer()
    }

    pub fn artifacts(&self) -> ArtifactStore {
        self.artifacts.clone()
    }

    pub fn current_artifact(&self) -> Option<&RenderedArtifact> {
        self.current.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            loaded: matches!(self.load_state, LoadState::Ready(_)),
            playback: self.controller.state(),
            params: *self.params.params(),
            reverb: self.params.applied(),
            rendering: self.renderer.is_busy(),
            artifact: self.current.as_ref().map(|a| a.url.clone()),
        }
    }

    /// Apply one command. Returns false once the session should shut down.
    pub fn handle_command(&mut self, cmd: SessionCommand, now: Instant) -> bool {
        let name = cmd.name();
        let result = match cmd {
            SessionCommand::Load(source) => {
                self.load(source);
                Ok(())
            }
            SessionCommand::LoadFailed(reason) => {
                self.load_failed(reason);
                Ok(())
            }
            SessionCommand::Play => self.play(None),
            SessionCommand::PlayFrom(position) => self.play(Some(position)),
            SessionCommand::Stop => {
                self.stop();
                Ok(())
            }
            SessionCommand::Seek(position) => self.seek(position),
            SessionCommand::SetPlaybackRate(v) => self.set_playback_rate(v).map(drop),
            SessionCommand::SetReverbWet(v) => self.set_reverb_wet(v).map(drop),
            SessionCommand::SetReverbDecay(v) => self.set_reverb_decay(v, now).map(drop),
            SessionCommand::SetReverbPreDelay(v) => self.set_reverb_pre_delay(v, now).map(drop),
            SessionCommand::Tick(generation) => {
                if generation == self.tick_generation {
                    self.tick();
                } else {
                    tracing::trace!(generation, current = self.tick_generation, "stale tick ignored");
                }
                Ok(())
            }
            SessionCommand::RequestRender => self.request_render().map(drop),
            SessionCommand::ReleaseArtifact => {
                self.release_artifact();
                Ok(())
            }
            SessionCommand::Shutdown => return false,
        };

        if let Err(e) = result {
            tracing::warn!(command = name, error = %e, "command rejected");
            self.emit(SessionEvent::Rejected {
                command: name,
                reason: e.to_string(),
            });
        }
        true
    }

    /// Replace the source. Stops playback and drops the previous render.
    pub fn load(&mut self, source: AudioSource) {
        self.cancel_ticker();
        self.controller.stop();
        self.release_artifact();
        // A render of the old source must not become the new artifact
        self.expected_render = None;

        let native_duration = source.duration();
        let metadata = source.metadata().clone();
        self.controller.load(source.clone());
        self.load_state = LoadState::Ready(source);

        let effective_length = self.controller.state().effective_length;
        tracing::info!(
            title = %metadata.title,
            native_duration,
            effective_length,
            "source loaded"
        );
        self.emit(SessionEvent::Loaded {
            metadata,
            native_duration,
            effective_length,
        });
        self.emit_state();
    }

    /// Decoding failed; playback stays blocked until the next load
    pub fn load_failed(&mut self, reason: String) {
        self.cancel_ticker();
        self.controller.unload();
        self.release_artifact();
        self.expected_render = None;
        tracing::warn!(%reason, "source failed to load");
        self.load_state = LoadState::Failed(reason.clone());
        self.emit(SessionEvent::LoadFailed(reason));
        self.emit_state();
    }

    fn ensure_loaded(&self) -> Result<&AudioSource, SessionError> {
        match &self.load_state {
            LoadState::Ready(source) => Ok(source),
            LoadState::Empty => Err(SessionError::NotLoaded),
            LoadState::Failed(reason) => Err(SessionError::LoadFailed(reason.clone())),
        }
    }

    /// Start playback, from the current position when `from` is none
    pub fn play(&mut self, from: Option<f64>) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        let from = from.unwrap_or(self.controller.state().position);
        self.controller.play(from)?;
        self.start_ticker();
        self.emit_state();
        Ok(())
    }

    pub fn stop(&mut self) {
        self.cancel_ticker();
        self.controller.stop();
        self.emit_state();
    }

    pub fn seek(&mut self, position: f64) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.cancel_ticker();
        self.controller.seek(position)?;
        self.start_ticker();
        self.emit_state();
        Ok(())
    }

    /// Advance the coarse clock by one ticker period
    pub fn tick(&mut self) {
        if !self.controller.state().is_playing {
            return;
        }
        if self.controller.advance(self.config.tick_interval.as_secs_f64()) {
            self.song_over();
        } else {
            self.emit_state();
        }
    }

    fn song_over(&mut self) {
        self.cancel_ticker();
        tracing::debug!("song over");
        self.emit(SessionEvent::SongOver);
        self.emit_state();
    }

    fn start_ticker(&mut self) {
        self.cancel_ticker();
        let Some(tx) = self.tick_tx.clone() else {
            return;
        };
        self.tick_generation += 1;
        let generation = self.tick_generation;
        self.ticker.start(move || {
            let _ = tx.try_send(SessionCommand::Tick(generation));
        });
    }

    fn cancel_ticker(&mut self) {
        self.ticker.cancel();
        self.tick_generation += 1;
    }

    pub fn set_playback_rate(&mut self, value: f64) -> Result<f64, SessionError> {
        let value = self.params.set_playback_rate(value, &mut self.controller)?;
        self.emit_state();
        Ok(value)
    }

    pub fn set_reverb_wet(&mut self, value: f64) -> Result<f64, SessionError> {
        let value = self.params.set_reverb_wet(value, self.controller.context())?;
        self.emit_state();
        Ok(value)
    }

    pub fn set_reverb_decay(&mut self, value: f64, now: Instant) -> Result<f64, SessionError> {
        let value = self.params.set_reverb_decay(value, now)?;
        self.emit_state();
        Ok(value)
    }

    pub fn set_reverb_pre_delay(&mut self, value: f64, now: Instant) -> Result<f64, SessionError> {
        let value = self.params.set_reverb_pre_delay(value, now)?;
        self.emit_state();
        Ok(value)
    }

    /// Start an offline render of the loaded source with the current parameters.
    ///
    /// The previous artifact is revoked before the job starts.
    pub fn request_render(&mut self) -> Result<u64, SessionError> {
        let source = self.ensure_loaded()?.clone();
        if self.renderer.is_busy() {
            return Err(RenderError::Busy.into());
        }
        self.release_artifact();

        let job = RenderJob::new(source, *self.params.params()).with_format(self.config.sample_format);
        let duration = job.duration();
        let id = self.renderer.submit(job)?;
        self.expected_render = Some(id);
        tracing::info!(id, duration, "render started");
        self.emit(SessionEvent::RenderStarted { duration });
        self.emit_state();
        Ok(id)
    }

    /// Take in a finished job from the render worker
    pub fn on_render_complete(&mut self, outcome: RenderOutcome) {
        self.renderer.complete(&outcome);
        if self.expected_render != Some(outcome.id) {
            tracing::debug!(id = outcome.id, "discarding stale render");
            self.emit_state();
            return;
        }
        self.expected_render = None;

        let result = outcome.result.and_then(|bytes| {
            let header = WavHeader::parse(&bytes)?;
            let size = bytes.len();
            Ok(RenderedArtifact {
                url: self.artifacts.create(bytes),
                size,
                header,
            })
        });
        match result {
            Ok(artifact) => {
                self.current = Some(artifact.clone());
                self.emit(SessionEvent::RenderComplete(artifact));
            }
            Err(e) => self.emit(SessionEvent::RenderFailed(e.to_string())),
        }
        self.emit_state();
    }

    /// Revoke the current artifact, if any
    pub fn release_artifact(&mut self) {
        if let Some(artifact) = self.current.take() {
            self.artifacts.revoke(&artifact.url);
            self.emit(SessionEvent::ArtifactRevoked(artifact.url));
        }
    }

    /// Handle transport end reports and settled parameter updates
    pub fn poll(&mut self, now: Instant) {
        if self.controller.poll_transport() {
            self.song_over();
        }
        if self.params.apply_due(now, self.controller.context()).is_some() {
            self.emit_state();
        }
    }

    /// How long the run loop may sleep
    fn next_wakeup(&self, now: Instant) -> Duration {
        match self.params.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(TRANSPORT_POLL),
            None => TRANSPORT_POLL,
        }
    }

    /// Process commands until `Shutdown` or until every sender is gone
    pub fn run(mut self, commands: Receiver<SessionCommand>) {
        let completions = self.renderer.completions().clone();
        loop {
            let timeout = self.next_wakeup(Instant::now());
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => {
                        if !self.handle_command(cmd, Instant::now()) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(completions) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.on_render_complete(outcome);
                    }
                }
                default(timeout) => {}
            }
            self.poll(Instant::now());
        }
        tracing::debug!("session loop exiting");
    }

    /// Cancel the ticker, silence the live graph and revoke every artifact
    pub fn teardown(&mut self) {
        self.cancel_ticker();
        self.controller.stop();
        self.current = None;
        let revoked = self.artifacts.revoke_all();
        if revoked > 0 {
            tracing::debug!(revoked, "revoked artifacts on teardown");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self) {
        self.emit(SessionEvent::StateUpdate(self.snapshot()));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Handle to a session running on its own thread
pub struct SessionHandle {
    command_tx: Sender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
    artifacts: ArtifactStore,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Create channels for session communication
    pub fn create_channels() -> (
        Sender<SessionCommand>,
        Receiver<SessionCommand>,
        Sender<SessionEvent>,
        Receiver<SessionEvent>,
    ) {
        let (cmd_tx, cmd_rx) = bounded(1024);
        let (evt_tx, evt_rx) = unbounded();
        (cmd_tx, cmd_rx, evt_tx, evt_rx)
    }

    /// Spawn a session thread. Returns the handle and the renderer for the output stream.
    pub fn start(config: SessionConfig) -> std::io::Result<(Self, LiveRenderer)> {
        let (command_tx, command_rx, event_tx, event_rx) = Self::create_channels();
        let session = Session::new(config, event_tx).with_ticks(command_tx.clone());
        let renderer = session.live_renderer();
        let artifacts = session.artifacts();

        let thread = thread::Builder::new()
            .name("slowverb-session".to_string())
            .spawn(move || session.run(command_rx))?;

        Ok((
            Self {
                command_tx,
                event_rx,
                artifacts,
                thread: Some(thread),
            },
            renderer,
        ))
    }

    /// Send a command, dropping it if the queue is full
    pub fn send(&self, cmd: SessionCommand) {
        if self.command_tx.try_send(cmd).is_err() {
            tracing::warn!("session command queue full or closed");
        }
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.event_rx
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Stop the session thread and wait for it
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.command_tx.send(SessionCommand::Shutdown);
            if thread.join().is_err() {
                tracing::warn!("session thread panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
