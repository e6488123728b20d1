//! Audio file loading and decoding

use slowverb_audio::{AudioSource, TrackMetadata};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Errors that can occur during track loading
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("File decoded to no audio")]
    Empty,
}

/// Audio file loader using Symphonia
///
/// Files are read fully into memory and decoded at their native sample rate;
/// the source node resamples during playback.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackLoader;

impl TrackLoader {
    pub fn new() -> Self {
        Self
    }

    /// Read and decode an audio file
    pub fn load(&self, path: &Path) -> Result<AudioSource, LoadError> {
        let bytes = std::fs::read(path)?;
        let ext = path.extension().and_then(|e| e.to_str());
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "read audio file");
        self.load_bytes(bytes, ext)
    }

    /// Decode an in-memory file; `extension` helps the format probe
    pub fn load_bytes(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioSource, LoadError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        // Tags ahead of the container (ID3v2) come from the probe
        let mut metadata = TrackMetadata::default();
        if let Some(probe_meta) = probed.metadata.get() {
            if let Some(revision) = probe_meta.current() {
                apply_tags(&mut metadata, revision);
            }
        }

        let mut format = probed.format;
        if let Some(revision) = format.metadata().current() {
            apply_tags(&mut metadata, revision);
        }

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let mut channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            // Convert to f32 interleaved
            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        if samples.is_empty() {
            return Err(LoadError::Empty);
        }

        let source = AudioSource::new(samples, channels, sample_rate);
        metadata.length = source.duration();
        tracing::info!(
            title = %metadata.title,
            channels,
            sample_rate,
            duration = metadata.length,
            "decoded audio"
        );
        Ok(source.with_metadata(metadata))
    }
}

/// Overlay title/artist/album tags and the first embedded picture
fn apply_tags(metadata: &mut TrackMetadata, revision: &MetadataRevision) {
    for tag in revision.tags() {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => metadata.title = tag.value.to_string(),
            Some(StandardTagKey::Artist) => metadata.artist = tag.value.to_string(),
            Some(StandardTagKey::Album) => metadata.album = tag.value.to_string(),
            _ => {}
        }
    }
    if let Some(visual) = revision.visuals().first() {
        metadata.cover = Some(Arc::new(visual.data.to_vec()));
    }
}
