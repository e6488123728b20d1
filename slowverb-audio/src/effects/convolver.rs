//! Uniform partitioned FFT convolution (overlap-save)
//!
//! The impulse response is cut into `BLOCK_SIZE` partitions whose spectra are
//! multiplied against a delay line of past input spectra. Output lags input by
//! exactly one block.

use super::impulse::ImpulseResponse;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Frames per partition, and the latency of the convolver
pub const BLOCK_SIZE: usize = 1024;

/// Impulse response transformed into per-partition spectra
///
/// Building one is the expensive part of changing the reverb, so it is done
/// away from the audio thread and handed over ready to install.
pub struct PreparedImpulse {
    block: usize,
    /// Per channel, per partition spectrum of length `2 * block`
    partitions: [Vec<Vec<Complex<f32>>>; 2],
}

impl PreparedImpulse {
    /// Normalize and transform an impulse response
    pub fn new(impulse: &ImpulseResponse, block: usize) -> Self {
        let block = block.max(1);
        let size = block * 2;
        let fft = FftPlanner::new().plan_fft_forward(size);
        let mut scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let scale = impulse.normalization_scale();

        let partitions = [0, 1].map(|ch| {
            let mut spectra: Vec<Vec<Complex<f32>>> = impulse
                .channel(ch)
                .chunks(block)
                .map(|chunk| {
                    let mut spectrum = vec![Complex::default(); size];
                    for (bin, &sample) in spectrum.iter_mut().zip(chunk) {
                        *bin = Complex::new(sample * scale, 0.0);
                    }
                    fft.process_with_scratch(&mut spectrum, &mut scratch);
                    spectrum
                })
                .collect();
            if spectra.is_empty() {
                spectra.push(vec![Complex::default(); size]);
            }
            spectra
        });

        Self { block, partitions }
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn partition_count(&self) -> usize {
        self.partitions[0].len()
    }
}

/// Per-channel streaming state
struct ChannelState {
    /// Block currently being filled
    input: Vec<f32>,
    /// Previous complete block
    previous: Vec<f32>,
    /// Output of the last processed block
    output: Vec<f32>,
    /// Frequency-domain delay line, one spectrum per partition
    history: Vec<Vec<Complex<f32>>>,
    /// Slot holding the newest spectrum
    head: usize,
}

impl ChannelState {
    fn new(block: usize, partitions: usize) -> Self {
        Self {
            input: vec![0.0; block],
            previous: vec![0.0; block],
            output: vec![0.0; block],
            history: vec![vec![Complex::default(); block * 2]; partitions],
            head: 0,
        }
    }

    /// Resize the delay line, keeping the newest spectra
    fn resize_history(&mut self, partitions: usize) {
        let old = self.history.len();
        let size = self.input.len() * 2;
        let mut history = Vec::with_capacity(partitions);
        for k in 0..partitions {
            if k < old {
                history.push(std::mem::take(&mut self.history[(self.head + k) % old]));
            } else {
                history.push(vec![Complex::default(); size]);
            }
        }
        self.history = history;
        self.head = 0;
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        self.previous.fill(0.0);
        self.output.fill(0.0);
        for spectrum in &mut self.history {
            spectrum.fill(Complex::default());
        }
        self.head = 0;
    }
}

/// Streaming stereo convolver
pub struct Convolver {
    block: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    spectrum: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
    impulse: PreparedImpulse,
    channels: [ChannelState; 2],
    /// Write index into the current block
    pos: usize,
}

impl Convolver {
    pub fn new(impulse: PreparedImpulse) -> Self {
        let block = impulse.block;
        let size = block * 2;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let partitions = impulse.partition_count();

        Self {
            block,
            forward,
            inverse,
            scratch: vec![Complex::default(); scratch_len],
            spectrum: vec![Complex::default(); size],
            accumulator: vec![Complex::default(); size],
            impulse,
            channels: [
                ChannelState::new(block, partitions),
                ChannelState::new(block, partitions),
            ],
            pos: 0,
        }
    }

    /// Latency in frames
    pub fn latency(&self) -> usize {
        self.block
    }

    /// Swap in a new impulse response without dropping the running input history
    pub fn install(&mut self, impulse: PreparedImpulse) {
        if impulse.block != self.block {
            // Block size is fixed for the life of the convolver
            tracing::warn!(
                expected = self.block,
                got = impulse.block,
                "impulse block size mismatch, ignoring"
            );
            return;
        }
        let partitions = impulse.partition_count();
        for state in &mut self.channels {
            state.resize_history(partitions);
        }
        self.impulse = impulse;
    }

    /// Push one stereo frame.
    ///
    /// Returns the convolved frame and the input frame, both delayed by one block.
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> ([f32; 2], [f32; 2]) {
        let pos = self.pos;
        let mut wet = [0.0; 2];
        let mut dry = [0.0; 2];

        for (ch, sample) in [left, right].into_iter().enumerate() {
            let state = &mut self.channels[ch];
            wet[ch] = state.output[pos];
            // Still holds the sample written one block ago
            dry[ch] = state.input[pos];
            state.input[pos] = sample;
        }

        self.pos += 1;
        if self.pos == self.block {
            self.pos = 0;
            self.process_block(0);
            self.process_block(1);
        }

        (wet, dry)
    }

    fn process_block(&mut self, ch: usize) {
        let block = self.block;
        let state = &mut self.channels[ch];

        for i in 0..block {
            self.spectrum[i] = Complex::new(state.previous[i], 0.0);
            self.spectrum[block + i] = Complex::new(state.input[i], 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let partitions = state.history.len();
        state.head = (state.head + partitions - 1) % partitions;
        state.history[state.head].copy_from_slice(&self.spectrum);

        self.accumulator.fill(Complex::default());
        for (k, response) in self.impulse.partitions[ch].iter().enumerate() {
            let input = &state.history[(state.head + k) % partitions];
            for ((acc, x), h) in self.accumulator.iter_mut().zip(input).zip(response) {
                *acc += x * h;
            }
        }
        self.inverse
            .process_with_scratch(&mut self.accumulator, &mut self.scratch);

        // rustfft leaves the inverse unnormalized
        let norm = 1.0 / (block * 2) as f32;
        for (out, acc) in state.output.iter_mut().zip(&self.accumulator[block..]) {
            *out = acc.re * norm;
        }
        state.previous.copy_from_slice(&state.input);
    }

    pub fn reset(&mut self) {
        for state in &mut self.channels {
            state.reset();
        }
        self.pos = 0;
    }
}
