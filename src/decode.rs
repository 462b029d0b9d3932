//! Whole-file decode of audio and video containers into [`AudioBuffer`]s.
//!
//! [`decode_file`] drains the shared media pipeline in one call and hands back
//! a complete clip in the output contract format. For large sources where a
//! full decode is wasteful, use [`StreamingReader`](crate::stream::StreamingReader)
//! instead; both produce identical samples for the same source.

use std::path::Path;

use thiserror::Error;

use crate::buffer::{AudioBuffer, ChannelMode, TARGET_SAMPLE_RATE};
use crate::pipeline::MediaPipeline;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from file-based decode operations.
///
/// All variants are terminal for the operation that raised them: no partial
/// buffer is ever returned alongside an error. `Clone` lets a failed
/// streaming reader repeat its terminal error on later reads.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The path did not resolve to a readable file.
    #[error("media file not found: {0}")]
    NotFound(String),

    /// The container was not recognized, or holds no decodable audio track.
    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),

    /// The stream is corrupt beyond frame-level recovery.
    #[error("decoding failed: {0}")]
    DecodeFailure(String),
}

// ---------------------------------------------------------------------------
// decode_file
// ---------------------------------------------------------------------------

/// Decode an entire media file into one normalized PCM buffer.
///
/// Opens the container at `path`, selects the first audio track (video
/// containers are fine), decodes it, and converts everything onto the output
/// contract: [`TARGET_SAMPLE_RATE`] Hz, `mode` channel layout, `f32` samples.
/// Blocks the calling thread for the duration of the decode and reads nothing
/// but the file.
///
/// # Errors
///
/// [`DecodeError::NotFound`] when the path does not resolve,
/// [`DecodeError::UnsupportedFormat`] when no decodable audio track exists,
/// [`DecodeError::DecodeFailure`] for corrupt streams.
///
/// # Example
///
/// ```rust,no_run
/// use audio_intake::{decode_file, ChannelMode};
///
/// # fn main() -> Result<(), audio_intake::DecodeError> {
/// let clip = decode_file("interview.mp4", ChannelMode::Mono)?;
/// println!("{:.1}s ready for transcription", clip.duration_secs());
/// # Ok(())
/// # }
/// ```
pub fn decode_file<P: AsRef<Path>>(path: P, mode: ChannelMode) -> Result<AudioBuffer, DecodeError> {
    let path = path.as_ref();
    let mut pipeline = MediaPipeline::open(path, mode)?;

    let mut samples = Vec::new();
    while let Some(block) = pipeline.next_block()? {
        samples.extend_from_slice(&block);
    }

    let buffer = AudioBuffer::new(samples, mode, TARGET_SAMPLE_RATE);
    log::debug!(
        "decoded {}: {} Hz x {} ch source -> {} samples ({:.2}s)",
        path.display(),
        pipeline.source_rate(),
        pipeline.source_channels(),
        buffer.len(),
        buffer.duration_secs()
    );
    Ok(buffer)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
