//! Audio core for slowverb - slowed playback with reverb, live and offline
//!
//! This crate provides the processing and control pipeline:
//! - Source: decoded buffer and its tag metadata
//! - Effects: convolution reverb with a generated impulse response
//! - Context: the live graph fed to the output stream, and isolated offline graphs
//! - Playback: user-facing transport over the live graph
//! - Control: immediate and debounced parameter application
//! - Render: single-flight offline render to WAV
//! - Session: the command/event state owner tying it together

mod artifact;
mod context;
mod control;
mod debounce;
mod effects;
mod params;
mod playback;
mod player;
mod render;
mod session;
mod song_length;
mod source;
mod ticker;
mod wav;

pub use artifact::{ArtifactError, ArtifactStore, ArtifactUrl, RenderedArtifact, DOWNLOAD_FILE_NAME};
pub use context::{AudioBuffer, LiveContext, LiveRenderer, OfflineContext, SignalChain, TransportEvent};
pub use control::{ParameterChannel, DEBOUNCE_WINDOW};
pub use debounce::Debouncer;
pub use effects::{Convolver, Effect, ImpulseResponse, PreparedImpulse, Reverb, ReverbSettings, BLOCK_SIZE};
pub use params::{EffectParameters, ParamKind, ParameterError};
pub use playback::{PlaybackController, PlaybackError, PlaybackState};
pub use player::{BufferSource, TransportState};
pub use render::{OfflineRenderer, RenderError, RenderJob, RenderOutcome, RENDER_CHANNELS, RENDER_SAMPLE_RATE};
pub use session::{Session, SessionCommand, SessionConfig, SessionError, SessionEvent, SessionHandle, SessionSnapshot};
pub use song_length::song_length;
pub use source::{AudioSource, TrackMetadata};
pub use ticker::PositionTicker;
pub use wav::{encode_wav, SampleFormat, WavError, WavHeader};
