//! Audio intake layer for speech transcription: file decode, streaming
//! reads, device enumeration and live capture, all normalised to one PCM
//! contract of f32 samples in [-1.0, 1.0] at 16 kHz, mono or interleaved
//! stereo.
//!
//! # Pipeline
//!
//! ```text
//! media file → decode_file ───────────────→ AudioBuffer ─→ recognizer
//! media file → StreamingReader::read_chunk → ReadChunk  ─→ recognizer
//! microphone → CaptureSession::start ─────→ CaptureEvent → recognizer
//! ```
//!
//! All three sources funnel through the same channel-conversion and
//! resampling path, so a file decoded at once, the same file streamed in
//! chunks, and a capture of the same signal all deliver identical PCM.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use audio_intake::{decode_file, ChannelMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let audio = decode_file("recording.mp3", ChannelMode::Mono)?;
//! println!(
//!     "{} samples, {:.1} s at {} Hz",
//!     audio.len(),
//!     audio.duration_secs(),
//!     audio.sample_rate()
//! );
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod capture;
pub mod config;
pub mod decode;
pub mod devices;
mod pipeline;
pub mod resample;
pub mod session;
pub mod stream;

pub use buffer::{AudioBuffer, ChannelMode, TARGET_SAMPLE_RATE};
pub use capture::{
    CancelToken, CaptureError, CaptureEvent, CaptureParams, CaptureStatus, SessionState,
};
pub use decode::{decode_file, DecodeError};
pub use devices::{list_capture_devices, CaptureDevice};
pub use session::CaptureSession;
pub use stream::{ReadChunk, StreamingReader};
