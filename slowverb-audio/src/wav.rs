//! Canonical WAV encoding
//!
//! Writes the 44-byte RIFF/WAVE header (`fmt ` chunk then `data` chunk)
//! followed by interleaved little-endian samples.

use crate::context::AudioBuffer;
use thiserror::Error;

/// Size of the canonical header
pub const HEADER_LEN: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Sample encoding of the data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 16-bit signed integer
    #[default]
    Pcm16,
    /// 32-bit IEEE float
    Float32,
}

impl SampleFormat {
    pub fn bits_per_sample(self) -> u16 {
        match self {
            SampleFormat::Pcm16 => 16,
            SampleFormat::Float32 => 32,
        }
    }

    fn format_tag(self) -> u16 {
        match self {
            SampleFormat::Pcm16 => FORMAT_PCM,
            SampleFormat::Float32 => FORMAT_IEEE_FLOAT,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    #[error("WAV data is {0} bytes, shorter than the 44-byte header")]
    TooShort(usize),
    #[error("missing {0} marker")]
    BadMarker(&'static str),
    #[error("unsupported format tag {tag} with {bits} bits per sample")]
    Unsupported { tag: u16, bits: u16 },
    #[error("{0} samples do not fit in a RIFF file")]
    TooLong(usize),
}

/// Encode a buffer as a WAV file
pub fn encode_wav(buffer: &AudioBuffer, format: SampleFormat) -> Result<Vec<u8>, WavError> {
    let channels = buffer.channels.max(1);
    let bytes_per_sample = (format.bits_per_sample() / 8) as u32;
    let block_align = channels as u32 * bytes_per_sample;
    let byte_rate = buffer.sample_rate.saturating_mul(block_align);
    let data_len = data_len(buffer.samples.len(), bytes_per_sample)?;

    let mut out = Vec::with_capacity(HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.format_tag().to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&buffer.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample().to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    match format {
        SampleFormat::Pcm16 => {
            for &sample in &buffer.samples {
                out.extend_from_slice(&pcm16(sample).to_le_bytes());
            }
        }
        SampleFormat::Float32 => {
            for &sample in &buffer.samples {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }

    Ok(out)
}

/// Data chunk size, leaving room for the 36 header bytes the RIFF size also counts
fn data_len(samples: usize, bytes_per_sample: u32) -> Result<u32, WavError> {
    u32::try_from(samples)
        .ok()
        .and_then(|n| n.checked_mul(bytes_per_sample))
        .filter(|len| len.checked_add(36).is_some())
        .ok_or(WavError::TooLong(samples))
}

/// Asymmetric scaling so both -1.0 and 1.0 hit full scale
fn pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Fields of a canonical WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Length of the data chunk in bytes
    pub data_len: u32,
}

impl WavHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, WavError> {
        if bytes.len() < HEADER_LEN {
            return Err(WavError::TooShort(bytes.len()));
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        for (at, marker, name) in [
            (0, b"RIFF", "RIFF"),
            (8, b"WAVE", "WAVE"),
            (12, b"fmt ", "fmt"),
            (36, b"data", "data"),
        ] {
            if &bytes[at..at + 4] != marker {
                return Err(WavError::BadMarker(name));
            }
        }

        let tag = u16_at(20);
        let bits = u16_at(34);
        let format = match (tag, bits) {
            (FORMAT_PCM, 16) => SampleFormat::Pcm16,
            (FORMAT_IEEE_FLOAT, 32) => SampleFormat::Float32,
            _ => return Err(WavError::Unsupported { tag, bits }),
        };

        Ok(Self {
            format,
            channels: u16_at(22),
            sample_rate: u32_at(24),
            bits_per_sample: bits,
            data_len: u32_at(40),
        })
    }

    pub fn frames(&self) -> u64 {
        let frame_bytes = self.channels.max(1) as u64 * (self.bits_per_sample / 8).max(1) as u64;
        self.data_len as u64 / frame_bytes
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(frames: usize) -> AudioBuffer {
        AudioBuffer {
            channels: 2,
            sample_rate: 44100,
            samples: (0..frames * 2).map(|i| (i as f32 / 10.0).sin() * 0.5).collect(),
        }
    }

    #[test]
    fn test_header_layout() {
        let wav = encode_wav(&buffer(100), SampleFormat::Pcm16).unwrap();
        assert_eq!(wav.len(), HEADER_LEN + 400);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 400);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(u32::from_le_bytes(wav[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 2);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 44100);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 44100 * 4);
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 4);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 400);
    }

    #[test]
    fn test_parse_reads_back_fields() {
        let wav = encode_wav(&buffer(441), SampleFormat::Pcm16).unwrap();
        let header = WavHeader::parse(&wav).unwrap();
        assert_eq!(header.format, SampleFormat::Pcm16);
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.frames(), 441);
        assert!((header.duration() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_float_format() {
        let wav = encode_wav(&buffer(10), SampleFormat::Float32).unwrap();
        let header = WavHeader::parse(&wav).unwrap();
        assert_eq!(header.format, SampleFormat::Float32);
        assert_eq!(header.bits_per_sample, 32);
        assert_eq!(header.frames(), 10);
        let first = f32::from_le_bytes(wav[44..48].try_into().unwrap());
        assert_eq!(first, 0.0);
    }

    #[test]
    fn test_pcm16_full_scale_and_clamp() {
        assert_eq!(pcm16(1.0), 32767);
        assert_eq!(pcm16(-1.0), -32768);
        assert_eq!(pcm16(3.0), 32767);
        assert_eq!(pcm16(-3.0), -32768);
        assert_eq!(pcm16(0.0), 0);
    }

    #[test]
    fn test_empty_buffer_is_header_only() {
        let empty = AudioBuffer {
            channels: 2,
            sample_rate: 44100,
            samples: Vec::new(),
        };
        let wav = encode_wav(&empty, SampleFormat::Pcm16).unwrap();
        assert_eq!(wav.len(), HEADER_LEN);
        assert_eq!(WavHeader::parse(&wav).unwrap().frames(), 0);
    }

    #[test]
    fn test_data_len_limit() {
        assert_eq!(data_len(1000, 2), Ok(2000));
        let max = (u32::MAX - 36) / 4;
        assert_eq!(data_len(max as usize, 4), Ok(max * 4));
        assert_eq!(data_len(max as usize + 1, 4), Err(WavError::TooLong(max as usize + 1)));
        assert_eq!(
            data_len(u32::MAX as usize / 2 + 1, 2),
            Err(WavError::TooLong(u32::MAX as usize / 2 + 1))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(WavHeader::parse(&[0; 10]), Err(WavError::TooShort(10)));
        let mut wav = encode_wav(&buffer(4), SampleFormat::Pcm16).unwrap();
        wav[8] = b'X';
        assert_eq!(WavHeader::parse(&wav), Err(WavError::BadMarker("WAVE")));
    }
}
