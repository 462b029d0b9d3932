//! Model-ready PCM containers and the shared output format contract.
//!
//! Every producer in this crate (whole-file decode, streaming reads, live
//! capture) lands on the same normalized format: [`TARGET_SAMPLE_RATE`] Hz,
//! `f32` samples in `[-1.0, 1.0]`, mono or stereo per request. [`AudioBuffer`]
//! is the immutable container handed to the transcription consumer.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Format contract
// ---------------------------------------------------------------------------

/// Sample rate of every buffer and chunk this crate produces, in hertz.
///
/// Fixed by the downstream transcription model. Conversion from the source
/// rate always runs inside this crate and is never bypassed.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Output channel layout requested by the caller.
///
/// Mono is the transcription default. Stereo keeps two interleaved channels
/// for consumers that separate speakers by channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Mono,
    Stereo,
}

impl ChannelMode {
    /// Number of interleaved channels in this layout.
    pub fn count(self) -> usize {
        match self {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// A complete PCM clip in the normalized output format.
///
/// Samples are interleaved when stereo. The buffer is immutable after
/// creation; ownership transfers to the caller on return, and the raw samples
/// can be reclaimed with [`into_samples`](Self::into_samples).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: ChannelMode,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap an interleaved sample sequence.
    ///
    /// # Panics
    ///
    /// Panics if `samples.len()` is not a multiple of the channel count.
    pub fn new(samples: Vec<f32>, channels: ChannelMode, sample_rate: u32) -> Self {
        assert!(
            samples.len() % channels.count() == 0,
            "interleaved sample count must be a multiple of the channel count"
        );
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Interleaved PCM samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Channel layout of the interleaved data.
    pub fn channels(&self) -> ChannelMode {
        self.channels
    }

    /// Sample rate in hertz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total sample count across all channels.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.count()
    }

    /// Clip length in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.frames() as f32 / self.sample_rate as f32
    }

    /// Consume the buffer and return the raw interleaved samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
