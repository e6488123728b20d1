//! Effective play duration under a playback rate

/// Returns how long a buffer of `native_duration` seconds takes to play at `playback_rate`
pub fn song_length(native_duration: f64, playback_rate: f64) -> f64 {
    native_duration / playback_rate
}
