//! Incremental, pull-based decode for large media files.
//!
//! [`StreamingReader`] opens the same kinds of sources as
//! [`decode_file`](crate::decode::decode_file) but hands samples out in
//! bounded chunks, so a consumer can transcribe a long recording without
//! holding the whole clip in memory. Chunk boundaries never change the
//! signal: concatenating every chunk up to EOF equals the whole-file decode
//! of the same source, sample for sample.
//!
//! The reader owns its source handle and decode cursor; dropping it releases
//! the source. Two readers over the same file advance independently.

use std::path::Path;

use crate::buffer::ChannelMode;
use crate::decode::DecodeError;
use crate::pipeline::MediaPipeline;

// ---------------------------------------------------------------------------
// ReadChunk
// ---------------------------------------------------------------------------

/// One bounded slice of the decoded signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadChunk {
    /// Contract-format samples, interleaved when stereo.
    pub samples: Vec<f32>,
    /// True once the source is exhausted; later reads repeat it with no data.
    pub is_eof: bool,
}

// ---------------------------------------------------------------------------
// StreamingReader
// ---------------------------------------------------------------------------

enum ReaderState {
    Active,
    Eof,
    Failed(DecodeError),
}

/// Pull-based decoder over one media source.
///
/// Reads advance a monotonic cursor: no reordering, no duplication, no gaps
/// except at source EOF. After a [`DecodeError`] the reader is unusable and
/// repeats the same error until dropped; reopen the path to retry.
///
/// # Example
///
/// ```rust,no_run
/// use audio_intake::{ChannelMode, StreamingReader};
///
/// # fn main() -> Result<(), audio_intake::DecodeError> {
/// let mut reader = StreamingReader::open("lecture.mp3", ChannelMode::Mono)?;
/// loop {
///     let chunk = reader.read_chunk(16_000)?;
///     // feed chunk.samples to the transcription model here
///     if chunk.is_eof {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamingReader {
    pipeline: MediaPipeline,
    carry: Vec<f32>,
    channels: ChannelMode,
    delivered: usize,
    state: ReaderState,
}

impl StreamingReader {
    /// Open a media source for incremental decode.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`decode_file`](crate::decode::decode_file):
    /// [`DecodeError::NotFound`], [`DecodeError::UnsupportedFormat`],
    /// [`DecodeError::DecodeFailure`].
    pub fn open<P: AsRef<Path>>(path: P, mode: ChannelMode) -> Result<Self, DecodeError> {
        let pipeline = MediaPipeline::open(path.as_ref(), mode)?;
        Ok(Self {
            pipeline,
            carry: Vec::new(),
            channels: mode,
            delivered: 0,
            state: ReaderState::Active,
        })
    }

    /// Channel layout of every chunk this reader produces.
    pub fn channels(&self) -> ChannelMode {
        self.channels
    }

    /// Source duration in seconds, when the container declares one.
    ///
    /// Known immediately after open, before any samples decode, so a
    /// consumer can size progress reporting against the stream. Sources
    /// without a declared length (raw streams) return `None`; the value is
    /// the container's claim and is not corrected as reads advance.
    pub fn duration_secs(&self) -> Option<f64> {
        self.pipeline.duration_secs()
    }

    /// Read up to `max_samples` samples, blocking until at least one sample
    /// is available or the source is exhausted.
    ///
    /// Stereo chunks are frame-aligned: the cap rounds down to a whole frame,
    /// and a cap of one sample still yields one full frame. A cap of zero
    /// returns an empty chunk without advancing the cursor. Reads after EOF
    /// keep returning an empty chunk with `is_eof` set.
    ///
    /// # Errors
    ///
    /// [`DecodeError::DecodeFailure`] aborts the stream; every later call
    /// repeats the same error.
    pub fn read_chunk(&mut self, max_samples: usize) -> Result<ReadChunk, DecodeError> {
        match &self.state {
            ReaderState::Failed(err) => return Err(err.clone()),
            ReaderState::Eof => {
                return Ok(ReadChunk {
                    samples: Vec::new(),
                    is_eof: true,
                })
            }
            ReaderState::Active => {}
        }

        if max_samples == 0 {
            return Ok(ReadChunk {
                samples: Vec::new(),
                is_eof: false,
            });
        }

        let per_frame = self.channels.count();
        let cap = (max_samples - max_samples % per_frame).max(per_frame);

        while self.carry.len() < cap {
            match self.pipeline.next_block() {
                Ok(Some(block)) => self.carry.extend_from_slice(&block),
                Ok(None) => break,
                Err(err) => {
                    self.state = ReaderState::Failed(err.clone());
                    return Err(err);
                }
            }
        }

        let take = cap.min(self.carry.len());
        let rest = self.carry.split_off(take);
        let samples = std::mem::replace(&mut self.carry, rest);
        self.delivered += samples.len();

        let is_eof = self.pipeline.is_finished() && self.carry.is_empty();
        if is_eof {
            self.state = ReaderState::Eof;
            log::debug!("stream exhausted after {} samples", self.delivered);
        }

        Ok(ReadChunk { samples, is_eof })
    }

    #[cfg(test)]
    fn force_failure(&mut self, err: DecodeError) {
        self.state = ReaderState::Failed(err);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
