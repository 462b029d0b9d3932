//! Channel-layout and sample-rate conversion onto the output contract.
//!
//! ```text
//! raw interleaved samples (any rate, any channel count)
//!         |
//!         |  convert_channels()      downmix / spread to the requested layout
//!         v
//!   StreamResampler                  sinc resampler, stateful across calls
//!         |
//!         v
//! 16 kHz samples in the requested layout
//! ```
//!
//! [`FrameConverter`] bundles the two steps. The file-decode pipeline and the
//! capture worker each run every sample through their own instance, so all
//! three acquisition paths land on one output format. The converter is fed
//! incrementally and produces identical output whether a signal arrives whole
//! or split across calls, which is what keeps chunked streaming equal to
//! whole-file decode.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

use crate::buffer::{ChannelMode, TARGET_SAMPLE_RATE};

/// Frames fed to the sinc resampler per internal chunk.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from constructing or running the sample-rate converter.
#[derive(Debug, Clone, Error)]
pub enum ResampleError {
    /// Source sample rate was zero or otherwise unusable.
    #[error("invalid source sample rate: {0} Hz")]
    InvalidRate(u32),

    /// The resampler backend rejected the conversion setup.
    #[error("failed to construct resampler: {0}")]
    Construction(String),

    /// The resampler backend failed mid-conversion.
    #[error("resampling failed: {0}")]
    Process(String),
}

// ---------------------------------------------------------------------------
// Channel conversion
// ---------------------------------------------------------------------------

/// Downmix interleaved samples to mono by averaging each frame.
///
/// Fast paths: zero channels yields an empty vec, mono input is returned
/// as-is. A trailing partial frame is dropped.
///
/// # Example
///
/// ```rust
/// use audio_intake::resample::downmix_to_mono;
///
/// let stereo = [0.2, 0.4, -1.0, 1.0];
/// assert_eq!(downmix_to_mono(&stereo, 2), vec![0.3, 0.0]);
/// ```
pub fn downmix_to_mono(samples: &[f32], src_channels: usize) -> Vec<f32> {
    match src_channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// Spread interleaved samples to stereo.
///
/// Mono input is duplicated into both channels. Sources with more than two
/// channels keep the first two of each frame (the front pair) and drop the
/// rest.
pub fn spread_to_stereo(samples: &[f32], src_channels: usize) -> Vec<f32> {
    match src_channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Convert interleaved samples from `src_channels` to the requested layout.
pub fn convert_channels(samples: &[f32], src_channels: usize, mode: ChannelMode) -> Vec<f32> {
    match mode {
        ChannelMode::Mono => downmix_to_mono(samples, src_channels),
        ChannelMode::Stereo => spread_to_stereo(samples, src_channels),
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Stateful sample-rate converter onto [`TARGET_SAMPLE_RATE`].
///
/// Accepts interleaved samples already in the target channel layout, in
/// slices of any size, and emits converted samples as enough input
/// accumulates. Call [`finish`](Self::finish) once at end of signal to flush
/// the tail; the total output is trimmed to the rate-exact frame count so
/// internal padding never leaks into the signal.
///
/// When the source already runs at the target rate the converter passes
/// samples through untouched, which keeps 16 kHz sources bit-exact.
pub struct StreamResampler {
    /// None when the source rate equals the target rate.
    inner: Option<SincFixedIn<f32>>,
    channels: usize,
    ratio: f64,
    /// Per-channel input awaiting a full resampler chunk.
    pending: Vec<Vec<f32>>,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    /// Build a converter from `source_rate` Hz to the target rate.
    ///
    /// # Errors
    ///
    /// `ResampleError::InvalidRate` for a zero source rate,
    /// `ResampleError::Construction` if the backend rejects the ratio.
    pub fn new(source_rate: u32, channels: ChannelMode) -> Result<Self, ResampleError> {
        if source_rate == 0 {
            return Err(ResampleError::InvalidRate(source_rate));
        }

        let ch = channels.count();
        let ratio = f64::from(TARGET_SAMPLE_RATE) / f64::from(source_rate);

        let inner = if source_rate == TARGET_SAMPLE_RATE {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK_FRAMES, ch)
                .map_err(|e| ResampleError::Construction(e.to_string()))?;
            Some(resampler)
        };

        Ok(Self {
            inner,
            channels: ch,
            ratio,
            pending: vec![Vec::new(); ch],
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Feed interleaved samples at the source rate.
    ///
    /// Returns converted interleaved samples, possibly empty while input
    /// accumulates. A trailing partial frame in `interleaved` is dropped.
    ///
    /// # Errors
    ///
    /// `ResampleError::Process` if the backend fails; the converter should be
    /// discarded afterwards.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, ResampleError> {
        let frames = interleaved.len() / self.channels;
        self.frames_in += frames as u64;

        if self.inner.is_none() {
            self.frames_out += frames as u64;
            return Ok(interleaved[..frames * self.channels].to_vec());
        }

        for frame in interleaved.chunks_exact(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.pending[ch].push(*sample);
            }
        }

        let mut out = Vec::new();
        while self.pending[0].len() >= RESAMPLE_CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..RESAMPLE_CHUNK_FRAMES).collect())
                .collect();
            self.run_chunk(&chunk, &mut out)?;
        }
        Ok(out)
    }

    /// Flush the converter at end of signal.
    ///
    /// Runs silence-padded chunks through the backend until the cumulative
    /// output covers the rate-exact expected length, then trims the excess
    /// padding. After `finish` the total output is `round(frames_in * ratio)`
    /// frames whether or not the input divided evenly into internal chunks.
    pub fn finish(&mut self) -> Result<Vec<f32>, ResampleError> {
        if self.inner.is_none() {
            return Ok(Vec::new());
        }

        let expected_total = (self.frames_in as f64 * self.ratio).round() as u64;

        // The sinc filter holds back half a window of signal, so frames are
        // still inside the backend even when input ended exactly on a chunk
        // boundary. One padded chunk is not always enough: a long pending
        // tail plus the filter delay can exceed a single chunk's output.
        let mut tail = Vec::new();
        while self.frames_out < expected_total {
            for ch in &mut self.pending {
                ch.resize(RESAMPLE_CHUNK_FRAMES, 0.0);
            }
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
            let before = tail.len();
            self.run_chunk(&chunk, &mut tail)?;
            if tail.len() == before {
                // A round that yields nothing cannot close the gap.
                break;
            }
        }

        // frames_out was advanced by run_chunk; rewind to the pre-flush count
        // before deciding how much of the padded output is real signal.
        let tail_frames = tail.len() / self.channels;
        self.frames_out -= tail_frames as u64;
        let keep = expected_total
            .saturating_sub(self.frames_out)
            .min(tail_frames as u64) as usize;
        tail.truncate(keep * self.channels);
        self.frames_out += keep as u64;
        Ok(tail)
    }

    fn run_chunk(&mut self, chunk: &[Vec<f32>], out: &mut Vec<f32>) -> Result<(), ResampleError> {
        let resampler = match self.inner.as_mut() {
            Some(r) => r,
            None => return Ok(()),
        };
        let converted = resampler
            .process(chunk, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        let frames = converted.first().map_or(0, Vec::len);
        out.reserve(frames * self.channels);
        for i in 0..frames {
            for ch in &converted {
                out.push(ch[i]);
            }
        }
        self.frames_out += frames as u64;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FrameConverter
// ---------------------------------------------------------------------------

/// Combined channel + rate conversion onto the output contract.
///
/// One instance per source; channel layout converts first so the resampler
/// only ever runs at the target channel count.
pub(crate) struct FrameConverter {
    src_channels: usize,
    mode: ChannelMode,
    resampler: StreamResampler,
}

impl FrameConverter {
    pub(crate) fn new(
        source_rate: u32,
        src_channels: usize,
        mode: ChannelMode,
    ) -> Result<Self, ResampleError> {
        Ok(Self {
            src_channels,
            mode,
            resampler: StreamResampler::new(source_rate, mode)?,
        })
    }

    /// Feed raw interleaved source samples; returns contract-format samples.
    pub(crate) fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, ResampleError> {
        let laid_out = convert_channels(interleaved, self.src_channels, self.mode);
        self.resampler.process(&laid_out)
    }

    /// Flush the tail at end of signal.
    pub(crate) fn finish(&mut self) -> Result<Vec<f32>, ResampleError> {
        self.resampler.finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
