//! Internal media decode pipeline shared by whole-file and streaming decode.
//!
//! One [`MediaPipeline`] owns the demuxer, the codec decoder, and a
//! [`FrameConverter`] for a single source. Callers pull converted blocks with
//! [`next_block`](MediaPipeline::next_block) until it returns `None`. Both
//! [`decode_file`](crate::decode::decode_file) and
//! [`StreamingReader`](crate::stream::StreamingReader) drain the same block
//! sequence, which is why chunked reads concatenate to exactly the whole-file
//! result.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::ChannelMode;
use crate::decode::DecodeError;
use crate::resample::FrameConverter;

// ---------------------------------------------------------------------------
// MediaPipeline
// ---------------------------------------------------------------------------

/// Demux + decode + convert pipeline over one media source.
///
/// The source format (rate, channel count) is read from the first decoded
/// frame, so sources whose codec parameters omit it still decode.
pub(crate) struct MediaPipeline {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    mode: ChannelMode,
    converter: Option<FrameConverter>,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: usize,
    source_rate: u32,
    source_channels: usize,
    duration_secs: Option<f64>,
    done: bool,
}

/// Duration the container declares for a track, when it declares one.
///
/// Raw streams carry no frame count and map to `None`.
fn declared_duration(params: &CodecParameters) -> Option<f64> {
    let frames = params.n_frames?;
    if let Some(tb) = params.time_base {
        let time = tb.calc_time(frames);
        return Some(time.seconds as f64 + time.frac);
    }
    params.sample_rate.map(|rate| frames as f64 / f64::from(rate))
}

impl MediaPipeline {
    /// Open a media source and select its first audio track.
    ///
    /// Video containers work: tracks without an audio codec are skipped, so
    /// the first decodable audio track wins.
    pub(crate) fn open(path: &Path, mode: ChannelMode) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DecodeError::NotFound(path.display().to_string()),
            _ => DecodeError::DecodeFailure(format!("cannot read {}: {e}", path.display())),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => {
                    DecodeError::UnsupportedFormat(format!("unrecognized container: {what}"))
                }
                other => DecodeError::DecodeFailure(other.to_string()),
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                DecodeError::UnsupportedFormat("no decodable audio track".to_string())
            })?;
        let track_id = track.id;
        let duration_secs = declared_duration(&track.codec_params);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(format!("no decoder for track: {e}")))?;

        log::debug!(
            "opened {} (track {track_id}, {:?} output)",
            path.display(),
            mode
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            mode,
            converter: None,
            sample_buf: None,
            sample_buf_frames: 0,
            source_rate: 0,
            source_channels: 0,
            duration_secs,
            done: false,
        })
    }

    /// Pull the next block of contract-format samples.
    ///
    /// Returns `Ok(None)` at end of stream, idempotently. Corrupt frames
    /// inside a readable stream are skipped; corrupt container structure
    /// aborts with `DecodeFailure`.
    pub(crate) fn next_block(&mut self) -> Result<Option<Vec<f32>>, DecodeError> {
        loop {
            if self.done {
                return Ok(None);
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.done = true;
                    let tail = match self.converter.as_mut() {
                        Some(conv) => conv
                            .finish()
                            .map_err(|e| DecodeError::DecodeFailure(e.to_string()))?,
                        None => Vec::new(),
                    };
                    return if tail.is_empty() { Ok(None) } else { Ok(Some(tail)) };
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(DecodeError::DecodeFailure(
                        "track list changed mid-stream".to_string(),
                    ));
                }
                Err(other) => return Err(DecodeError::DecodeFailure(other.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("skipping corrupt frame: {e}");
                    continue;
                }
                Err(other) => return Err(DecodeError::DecodeFailure(other.to_string())),
            };

            let spec = *decoded.spec();
            if self.converter.is_none() {
                self.source_rate = spec.rate;
                self.source_channels = spec.channels.count();
                log::debug!(
                    "source format: {} Hz, {} channel(s)",
                    self.source_rate,
                    self.source_channels
                );
                let conv = FrameConverter::new(self.source_rate, self.source_channels, self.mode)
                    .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
                self.converter = Some(conv);
            }

            if self.sample_buf.is_none() || decoded.capacity() > self.sample_buf_frames {
                self.sample_buf_frames = decoded.capacity();
                self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }

            if let (Some(sbuf), Some(conv)) = (self.sample_buf.as_mut(), self.converter.as_mut())
            {
                sbuf.copy_interleaved_ref(decoded);
                if sbuf.samples().is_empty() {
                    continue;
                }
                let block = conv
                    .push(sbuf.samples())
                    .map_err(|e| DecodeError::DecodeFailure(e.to_string()))?;
                if block.is_empty() {
                    continue;
                }
                return Ok(Some(block));
            }
        }
    }

    /// True once the source is exhausted and the converter tail flushed.
    pub(crate) fn is_finished(&self) -> bool {
        self.done
    }

    /// Native sample rate of the source, 0 until the first frame decodes.
    pub(crate) fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Native channel count of the source, 0 until the first frame decodes.
    pub(crate) fn source_channels(&self) -> usize {
        self.source_channels
    }

    /// Duration in seconds declared by the container, known at open.
    pub(crate) fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }
}
