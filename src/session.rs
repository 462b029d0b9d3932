//! Live capture sessions over OS audio endpoints.
//!
//! ```text
//! CaptureSession::open(endpoint, params)      validate + negotiate + claim
//!         |
//!         |  start(cancel_token)
//!         v
//! [capture-worker thread]  cpal stream -> raw samples -> FrameConverter
//!         |
//!         v
//! mpsc::Receiver<CaptureEvent>                chunks + one terminal status
//! ```
//!
//! The cpal stream is not `Send`, so it is built and held on a dedicated
//! worker thread; hardware callbacks only widen samples to `f32` and forward
//! them. The caller drains the event channel from any thread. `close` (also
//! run by `Drop`) signals the worker, waits for it to go quiescent, and
//! releases the endpoint claim exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};
use once_cell::sync::Lazy;

use crate::buffer::ChannelMode;
use crate::capture::{
    AtomicSessionState, CancelToken, CaptureError, CaptureEvent, CaptureParams, CaptureStatus,
    SessionState,
};
use crate::devices;
use crate::resample::FrameConverter;

// ---------------------------------------------------------------------------
// Endpoint registry
// ---------------------------------------------------------------------------

/// Endpoints currently held by live sessions, process-wide. Guarantees that
/// two sessions never open the same endpoint concurrently.
static OPEN_ENDPOINTS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn claim_endpoint(endpoint_id: &str) -> bool {
    OPEN_ENDPOINTS
        .lock()
        .unwrap()
        .insert(endpoint_id.to_string())
}

fn release_endpoint(endpoint_id: &str) {
    OPEN_ENDPOINTS.lock().unwrap().remove(endpoint_id);
}

// ---------------------------------------------------------------------------
// Parameter negotiation
// ---------------------------------------------------------------------------

/// Device-side stream setup produced by `open`'s negotiation.
#[derive(Debug, Clone)]
struct Negotiated {
    config: StreamConfig,
    sample_format: SampleFormat,
}

fn negotiate(
    device: &cpal::Device,
    name: &str,
    endpoint_id: &str,
    params: &CaptureParams,
) -> Result<Negotiated, CaptureError> {
    let default = device.default_input_config().map_err(|e| {
        log::warn!("no default input config for '{name}': {e}");
        CaptureError::DeviceUnavailable(endpoint_id.to_string())
    })?;

    let (rate_ranges, channel_counts) = match device.supported_input_configs() {
        Ok(configs) => {
            let ranges: Vec<_> = configs.collect();
            (
                ranges
                    .iter()
                    .map(|r| (r.min_sample_rate().0, r.max_sample_rate().0))
                    .collect::<Vec<_>>(),
                ranges.iter().map(|r| r.channels()).collect::<Vec<_>>(),
            )
        }
        Err(e) => {
            log::warn!("cannot query supported configs for '{name}': {e}");
            (Vec::new(), Vec::new())
        }
    };

    let rate = pick_rate(&rate_ranges, params.sample_rate, default.sample_rate().0);
    let channels = pick_channels(&channel_counts, params.device_channels, default.channels());
    let buffer_size = pick_buffer_size(buffer_range(default.buffer_size()), params.buffer_ms, rate);

    Ok(Negotiated {
        config: StreamConfig {
            channels,
            sample_rate: SampleRate(rate),
            buffer_size,
        },
        sample_format: default.sample_format(),
    })
}

/// Accept the requested rate when the device supports it (or when support is
/// unknown); otherwise fall back to the device default.
fn pick_rate(supported: &[(u32, u32)], requested: Option<u32>, default: u32) -> u32 {
    match requested {
        None => default,
        Some(rate)
            if supported.is_empty()
                || supported.iter().any(|&(lo, hi)| (lo..=hi).contains(&rate)) =>
        {
            rate
        }
        Some(rate) => {
            log::warn!("requested {rate} Hz unsupported, using device default {default} Hz");
            default
        }
    }
}

fn pick_channels(supported: &[u16], requested: Option<u16>, default: u16) -> u16 {
    match requested {
        None => default,
        Some(ch) if supported.is_empty() || supported.contains(&ch) => ch,
        Some(ch) => {
            log::warn!(
                "requested {ch} capture channel(s) unsupported, using device default {default}"
            );
            default
        }
    }
}

/// Map the latency hint to a fixed buffer size, clamped to the supported
/// range when the backend reports one.
fn pick_buffer_size(range: Option<(u32, u32)>, requested_ms: Option<u32>, rate: u32) -> BufferSize {
    let Some(ms) = requested_ms else {
        return BufferSize::Default;
    };
    let frames = (u64::from(rate) * u64::from(ms) / 1_000)
        .max(1)
        .min(u64::from(u32::MAX));
    let mut frames = frames as u32;
    if let Some((min, max)) = range {
        frames = frames.clamp(min, max);
    }
    BufferSize::Fixed(frames)
}

fn buffer_range(size: &SupportedBufferSize) -> Option<(u32, u32)> {
    match size {
        SupportedBufferSize::Range { min, max } => Some((*min, *max)),
        SupportedBufferSize::Unknown => None,
    }
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

/// What the cpal callbacks push to the worker loop.
enum RawFeed {
    /// Interleaved device-format samples, already widened to `f32`.
    Samples(Vec<f32>),
    /// The stream reported an error; carries the terminal status to use.
    StreamError(CaptureStatus),
}

/// A live capture endpoint delivering normalized PCM over a channel.
///
/// Lifecycle: `open` validates the endpoint and negotiates the device
/// format, `start` spawns the worker and returns the event channel, `close`
/// (or drop) tears everything down. Asynchronous failures such as device
/// loss arrive as terminal [`CaptureStatus`] events, never as panics or
/// `Err` returns from `start`.
///
/// # Example
///
/// ```rust,no_run
/// use audio_intake::{CancelToken, CaptureEvent, CaptureParams, CaptureSession};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let listing = audio_intake::list_capture_devices()?;
/// let mut session = CaptureSession::open(&listing[0].id, CaptureParams::default())?;
///
/// let token = CancelToken::new();
/// let events = session.start(token.clone())?;
/// for event in events.iter() {
///     match event {
///         CaptureEvent::Chunk(pcm) => println!("{} samples", pcm.len()),
///         CaptureEvent::Status(status) if status.is_terminal() => break,
///         CaptureEvent::Status(_) => {}
///     }
/// }
/// session.close();
/// # Ok(())
/// # }
/// ```
pub struct CaptureSession {
    endpoint_id: String,
    device_name: String,
    device: Option<cpal::Device>,
    negotiated: Negotiated,
    mode: ChannelMode,
    state: Arc<AtomicSessionState>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Open a capture endpoint by the id `list_capture_devices` assigned.
    ///
    /// Validates that the endpoint still exists, negotiates the device-side
    /// format (unset or unsupported requests fall back to device defaults),
    /// and claims the endpoint for this session.
    ///
    /// # Errors
    ///
    /// [`CaptureError::DeviceUnavailable`] when the endpoint is gone or
    /// cannot be opened, [`CaptureError::DeviceBusy`] when another live
    /// session holds it, [`CaptureError::Enumeration`] when the backend
    /// cannot be queried at all.
    pub fn open(endpoint_id: &str, params: CaptureParams) -> Result<Self, CaptureError> {
        let device = devices::find_device(endpoint_id)?;
        let device_name = device.name().unwrap_or_else(|_| endpoint_id.to_string());

        if !claim_endpoint(endpoint_id) {
            return Err(CaptureError::DeviceBusy(endpoint_id.to_string()));
        }

        let negotiated = match negotiate(&device, &device_name, endpoint_id, &params) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                release_endpoint(endpoint_id);
                return Err(e);
            }
        };

        log::debug!(
            "opened '{device_name}': device {} Hz x {} ch, {:?} output",
            negotiated.config.sample_rate.0,
            negotiated.config.channels,
            params.channels
        );

        Ok(Self {
            endpoint_id: endpoint_id.to_string(),
            device_name,
            device: Some(device),
            negotiated,
            mode: params.channels,
            state: Arc::new(AtomicSessionState::new(SessionState::Created)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Begin capturing on the background worker thread.
    ///
    /// Returns the event channel: PCM chunks interleaved with status
    /// notifications, ending in exactly one terminal status. Dropping the
    /// receiver is a stop request. Stream setup failures after this call
    /// returns arrive as a terminal `Failed` status on the channel.
    ///
    /// # Errors
    ///
    /// [`CaptureError::AlreadyStarted`] unless the session is freshly
    /// opened, [`CaptureError::SessionClosed`] after `close`.
    pub fn start(&mut self, cancel: CancelToken) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError> {
        match self
            .state
            .compare_exchange(SessionState::Created, SessionState::Running)
        {
            Ok(_) => {}
            Err(SessionState::Closed) => return Err(CaptureError::SessionClosed),
            Err(_) => return Err(CaptureError::AlreadyStarted),
        }

        let device = match self.device.take() {
            Some(device) => device,
            None => return Err(CaptureError::AlreadyStarted),
        };

        let (events_tx, events_rx) = mpsc::channel();
        let negotiated = self.negotiated.clone();
        let mode = self.mode;
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);

        let worker = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || capture_worker(device, negotiated, mode, events_tx, cancel, stop, state))
            .map_err(|e| {
                self.state.store(SessionState::Failed);
                CaptureError::WorkerSpawn(e.to_string())
            })?;

        self.worker = Some(worker);
        log::info!("capture started on '{}'", self.device_name);
        Ok(events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// The endpoint id this session was opened with.
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Display name of the underlying device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop capturing and release the endpoint.
    ///
    /// Idempotent: closing a closed session is a no-op, never a fault.
    /// Blocks until the worker has gone quiescent, so no event is delivered
    /// after this returns and the device resource is released exactly once.
    pub fn close(&mut self) {
        if self.state.load() == SessionState::Closed {
            return;
        }

        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("capture worker panicked");
            }
        }
        release_endpoint(&self.endpoint_id);
        self.state.store(SessionState::Closed);
        log::debug!("capture session on '{}' closed", self.device_name);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Capture worker
// ---------------------------------------------------------------------------

/// Body of the dedicated capture thread.
///
/// Builds and plays the stream here because cpal streams are not `Send`.
/// Every exit path leaves the session in a terminal state with exactly one
/// terminal status sent.
fn capture_worker(
    device: cpal::Device,
    negotiated: Negotiated,
    mode: ChannelMode,
    events: mpsc::Sender<CaptureEvent>,
    cancel: CancelToken,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicSessionState>,
) {
    let converter = match FrameConverter::new(
        negotiated.config.sample_rate.0,
        usize::from(negotiated.config.channels),
        mode,
    ) {
        Ok(converter) => converter,
        Err(e) => {
            fail(&state, &events, e.to_string());
            return;
        }
    };

    let (raw_tx, raw_rx) = mpsc::channel();
    let stream = match build_input_stream(&device, &negotiated, raw_tx) {
        Ok(stream) => stream,
        Err(reason) => {
            fail(&state, &events, reason);
            return;
        }
    };
    if let Err(e) = stream.play() {
        fail(&state, &events, e.to_string());
        return;
    }

    if events
        .send(CaptureEvent::Status(CaptureStatus::Started))
        .is_err()
    {
        // Consumer vanished before the first event; record a quiet stop.
        state.store(SessionState::Stopped);
        return;
    }

    run_capture_loop(
        raw_rx,
        converter,
        events,
        cancel,
        stop,
        state,
        poll_interval(&negotiated),
    );

    // The loop is done; stop the hardware before the stream drops.
    let _ = stream.pause();
}

/// Record a failed capture: state first, then the one terminal status.
fn fail(state: &AtomicSessionState, events: &mpsc::Sender<CaptureEvent>, reason: String) {
    log::error!("capture failed: {reason}");
    state.store(SessionState::Failed);
    let _ = events.send(CaptureEvent::Status(CaptureStatus::Failed(reason)));
}

/// Build the cpal input stream, widening device samples to `f32` and
/// forwarding them to the worker loop. The callbacks run on OS audio threads
/// and must stay cheap: they only copy and send.
fn build_input_stream(
    device: &cpal::Device,
    negotiated: &Negotiated,
    raw_tx: mpsc::Sender<RawFeed>,
) -> Result<cpal::Stream, String> {
    let config = &negotiated.config;
    let err_tx = raw_tx.clone();
    let err_fn = move |err: cpal::StreamError| {
        log::error!("capture stream error: {err}");
        let status = match err {
            cpal::StreamError::DeviceNotAvailable => CaptureStatus::DeviceLost,
            other => CaptureStatus::Failed(other.to_string()),
        };
        let _ = err_tx.send(RawFeed::StreamError(status));
    };

    let built = match negotiated.sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = raw_tx.send(RawFeed::Samples(data.to_vec()));
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let widened: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                let _ = raw_tx.send(RawFeed::Samples(widened));
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let widened: Vec<f32> = data
                    .iter()
                    .map(|&s| (f32::from(s) - 32_768.0) / 32_768.0)
                    .collect();
                let _ = raw_tx.send(RawFeed::Samples(widened));
            },
            err_fn,
            None,
        ),
        other => return Err(format!("unsupported device sample format {other:?}")),
    };
    built.map_err(|e| e.to_string())
}

/// Receive timeout for the worker loop, sized to one buffer period so
/// cancellation latency tracks the negotiated capture latency.
fn poll_interval(negotiated: &Negotiated) -> Duration {
    let rate = negotiated.config.sample_rate.0.max(1);
    let frames = match negotiated.config.buffer_size {
        BufferSize::Fixed(frames) => frames,
        BufferSize::Default => rate / 50,
    };
    let ms = (u64::from(frames) * 1_000 / u64::from(rate)).clamp(5, 100);
    Duration::from_millis(ms)
}

/// Worker loop: drain raw samples, convert, forward events.
///
/// Exactly one terminal status leaves this loop on every path, and nothing
/// is sent after it. The cancellation token is polled at each iteration
/// boundary; cancel wins over a close request observed in the same
/// iteration.
fn run_capture_loop(
    raw_rx: mpsc::Receiver<RawFeed>,
    mut converter: FrameConverter,
    events: mpsc::Sender<CaptureEvent>,
    cancel: CancelToken,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicSessionState>,
    poll: Duration,
) {
    let terminal = loop {
        if cancel.is_cancelled() {
            break CaptureStatus::Cancelled;
        }
        if stop.load(Ordering::Acquire) {
            break CaptureStatus::Stopped;
        }

        match raw_rx.recv_timeout(poll) {
            Ok(RawFeed::Samples(raw)) => match converter.push(&raw) {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if events.send(CaptureEvent::Chunk(chunk)).is_err() {
                        // Consumer went away; treat it as a stop request.
                        break CaptureStatus::Stopped;
                    }
                }
                Err(e) => break CaptureStatus::Failed(e.to_string()),
            },
            Ok(RawFeed::StreamError(status)) => break status,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break CaptureStatus::Stopped,
        }
    };

    let next = match &terminal {
        CaptureStatus::Stopped => SessionState::Stopped,
        CaptureStatus::Cancelled => SessionState::Cancelled,
        CaptureStatus::DeviceLost | CaptureStatus::Failed(_) => SessionState::Failed,
        CaptureStatus::Started => SessionState::Running,
    };
    state.store(next);
    log::info!("capture finished: {}", terminal.label());
    let _ = events.send(CaptureEvent::Status(terminal));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TARGET_SAMPLE_RATE;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn test_negotiated() -> Negotiated {
        Negotiated {
            config: StreamConfig {
                channels: 1,
                sample_rate: SampleRate(TARGET_SAMPLE_RATE),
                buffer_size: BufferSize::Default,
            },
            sample_format: SampleFormat::F32,
        }
    }

    fn mono_converter() -> FrameConverter {
        FrameConverter::new(TARGET_SAMPLE_RATE, 1, ChannelMode::Mono).unwrap()
    }

    /// Spawn the worker loop over a synthetic feed, no hardware involved.
    fn spawn_loop(
        raw_rx: mpsc::Receiver<RawFeed>,
        cancel: CancelToken,
        stop: Arc<AtomicBool>,
        state: Arc<AtomicSessionState>,
    ) -> (thread::JoinHandle<()>, mpsc::Receiver<CaptureEvent>) {
        init_logs();
        let (events_tx, events_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            run_capture_loop(
                raw_rx,
                mono_converter(),
                events_tx,
                cancel,
                stop,
                state,
                Duration::from_millis(5),
            )
        });
        (handle, events_rx)
    }

    /// A full session whose worker runs over a synthetic feed.
    fn session_over_feed(
        endpoint_id: &str,
    ) -> (CaptureSession, mpsc::Sender<RawFeed>, mpsc::Receiver<CaptureEvent>) {
        init_logs();
        assert!(claim_endpoint(endpoint_id));
        let (raw_tx, raw_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let state = Arc::new(AtomicSessionState::new(SessionState::Running));
        let stop = Arc::new(AtomicBool::new(false));
        let loop_state = Arc::clone(&state);
        let loop_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || {
                run_capture_loop(
                    raw_rx,
                    mono_converter(),
                    events_tx,
                    CancelToken::new(),
                    loop_stop,
                    loop_state,
                    Duration::from_millis(5),
                )
            })
            .unwrap();

        let session = CaptureSession {
            endpoint_id: endpoint_id.to_string(),
            device_name: endpoint_id.to_string(),
            device: None,
            negotiated: test_negotiated(),
            mode: ChannelMode::Mono,
            state,
            stop,
            worker: Some(worker),
        };
        (session, raw_tx, events_rx)
    }

    fn recv_chunk(events: &mpsc::Receiver<CaptureEvent>) -> Vec<f32> {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            CaptureEvent::Chunk(chunk) => chunk,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    // ---- negotiation ----

    #[test]
    fn pick_rate_accepts_supported_request() {
        assert_eq!(pick_rate(&[(8_000, 48_000)], Some(44_100), 48_000), 44_100);
    }

    #[test]
    fn pick_rate_falls_back_when_unsupported() {
        assert_eq!(pick_rate(&[(8_000, 48_000)], Some(96_000), 48_000), 48_000);
    }

    #[test]
    fn pick_rate_defaults_when_unset() {
        assert_eq!(pick_rate(&[(8_000, 48_000)], None, 48_000), 48_000);
    }

    #[test]
    fn pick_rate_trusts_request_when_support_unknown() {
        assert_eq!(pick_rate(&[], Some(22_050), 48_000), 22_050);
    }

    #[test]
    fn pick_channels_validates_against_device() {
        assert_eq!(pick_channels(&[1, 2], Some(1), 2), 1);
        assert_eq!(pick_channels(&[1, 2], Some(6), 2), 2);
        assert_eq!(pick_channels(&[1, 2], None, 2), 2);
    }

    #[test]
    fn buffer_hint_maps_to_clamped_frames() {
        assert!(matches!(pick_buffer_size(None, None, 48_000), BufferSize::Default));
        assert!(matches!(
            pick_buffer_size(None, Some(20), 48_000),
            BufferSize::Fixed(960)
        ));
        assert!(matches!(
            pick_buffer_size(Some((1_024, 4_096)), Some(1), 48_000),
            BufferSize::Fixed(1_024)
        ));
        assert!(matches!(
            pick_buffer_size(Some((64, 256)), Some(1_000), 16_000),
            BufferSize::Fixed(256)
        ));
    }

    #[test]
    fn poll_interval_tracks_buffer_period() {
        let mut negotiated = test_negotiated();
        negotiated.config.buffer_size = BufferSize::Fixed(1_600);
        assert_eq!(poll_interval(&negotiated), Duration::from_millis(100));
        negotiated.config.buffer_size = BufferSize::Fixed(16);
        assert_eq!(poll_interval(&negotiated), Duration::from_millis(5));
    }

    // ---- endpoint registry ----

    #[test]
    fn endpoint_claims_are_exclusive() {
        let id = "registry-test-endpoint";
        assert!(claim_endpoint(id));
        assert!(!claim_endpoint(id));
        release_endpoint(id);
        assert!(claim_endpoint(id));
        release_endpoint(id);
    }

    // ---- worker loop ----

    #[test]
    fn chunks_flow_through_untouched_at_target_rate() {
        let (raw_tx, raw_rx) = mpsc::channel();
        let state = Arc::new(AtomicSessionState::new(SessionState::Running));
        let (handle, events_rx) = spawn_loop(
            raw_rx,
            CancelToken::new(),
            Arc::new(AtomicBool::new(false)),
            Arc::clone(&state),
        );

        raw_tx.send(RawFeed::Samples(vec![0.1, 0.2])).unwrap();
        assert_eq!(recv_chunk(&events_rx), vec![0.1, 0.2]);

        drop(raw_tx); // simulated stream end
        handle.join().unwrap();
        assert_eq!(state.load(), SessionState::Stopped);

        let rest: Vec<CaptureEvent> = events_rx.iter().collect();
        assert!(matches!(
            rest.as_slice(),
            [CaptureEvent::Status(CaptureStatus::Stopped)]
        ));
    }

    #[test]
    fn cancel_ends_with_exactly_one_terminal_status() {
        let (raw_tx, raw_rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let state = Arc::new(AtomicSessionState::new(SessionState::Running));
        let (handle, events_rx) = spawn_loop(
            raw_rx,
            cancel.clone(),
            Arc::new(AtomicBool::new(false)),
            Arc::clone(&state),
        );

        for _ in 0..3 {
            raw_tx.send(RawFeed::Samples(vec![0.5; 64])).unwrap();
        }
        for _ in 0..3 {
            let _ = recv_chunk(&events_rx);
        }

        cancel.cancel();
        handle.join().unwrap();
        assert_eq!(state.load(), SessionState::Cancelled);

        // One status, terminal, nothing after it.
        let rest: Vec<CaptureEvent> = events_rx.iter().collect();
        assert_eq!(rest.len(), 1);
        assert!(matches!(
            &rest[0],
            CaptureEvent::Status(CaptureStatus::Cancelled)
        ));
    }

    #[test]
    fn stop_flag_ends_with_stopped_status() {
        let (_raw_tx, raw_rx) = mpsc::channel::<RawFeed>();
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicSessionState::new(SessionState::Running));
        let (handle, events_rx) = spawn_loop(
            raw_rx,
            CancelToken::new(),
            Arc::clone(&stop),
            Arc::clone(&state),
        );

        stop.store(true, Ordering::Release);
        handle.join().unwrap();

        assert_eq!(state.load(), SessionState::Stopped);
        let rest: Vec<CaptureEvent> = events_rx.iter().collect();
        assert!(matches!(
            rest.as_slice(),
            [CaptureEvent::Status(CaptureStatus::Stopped)]
        ));
    }

    #[test]
    fn stream_error_surfaces_as_device_lost() {
        let (raw_tx, raw_rx) = mpsc::channel();
        let state = Arc::new(AtomicSessionState::new(SessionState::Running));
        let (handle, events_rx) = spawn_loop(
            raw_rx,
            CancelToken::new(),
            Arc::new(AtomicBool::new(false)),
            Arc::clone(&state),
        );

        raw_tx.send(RawFeed::Samples(vec![0.3; 16])).unwrap();
        raw_tx
            .send(RawFeed::StreamError(CaptureStatus::DeviceLost))
            .unwrap();
        handle.join().unwrap();

        assert_eq!(state.load(), SessionState::Failed);
        let events: Vec<CaptureEvent> = events_rx.iter().collect();
        assert!(matches!(
            events.last(),
            Some(CaptureEvent::Status(CaptureStatus::DeviceLost))
        ));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, CaptureEvent::Status(_)))
                .count(),
            1
        );
    }

    #[test]
    fn loop_converts_device_format_to_contract() {
        let (raw_tx, raw_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let state = Arc::new(AtomicSessionState::new(SessionState::Running));
        let loop_state = Arc::clone(&state);
        let converter = FrameConverter::new(48_000, 2, ChannelMode::Mono).unwrap();
        let handle = thread::spawn(move || {
            run_capture_loop(
                raw_rx,
                converter,
                events_tx,
                CancelToken::new(),
                Arc::new(AtomicBool::new(false)),
                loop_state,
                Duration::from_millis(5),
            )
        });

        // Three device buffers of 1024 stereo frames at 48 kHz.
        for _ in 0..3 {
            let frames: Vec<f32> = (0..1_024).flat_map(|_| [0.4, 0.2]).collect();
            raw_tx.send(RawFeed::Samples(frames)).unwrap();
        }
        drop(raw_tx);
        handle.join().unwrap();

        let mut samples = Vec::new();
        for event in events_rx.iter() {
            if let CaptureEvent::Chunk(chunk) = event {
                samples.extend_from_slice(&chunk);
            }
        }
        // 3072 source frames convert to roughly a third as many. The live
        // path never flushes, so the converter withholds about half a sinc
        // window of output on top of any sub-chunk tail.
        assert!((950..=1_060).contains(&samples.len()));
        // Steady state settles on the frame average of 0.3.
        let tail = &samples[samples.len() / 2..];
        assert!(tail.iter().all(|s| (0.25..=0.35).contains(s)));
    }

    // ---- session lifecycle ----

    #[test]
    fn close_is_idempotent_and_silent_afterwards() {
        let (mut session, raw_tx, events_rx) = session_over_feed("close-test-endpoint");
        assert_eq!(session.endpoint_id(), "close-test-endpoint");
        assert_eq!(session.state(), SessionState::Running);

        raw_tx.send(RawFeed::Samples(vec![0.1; 32])).unwrap();
        let _ = recv_chunk(&events_rx);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        // The worker quiesced before close returned: its terminal status is
        // already queued and nothing arrives afterwards.
        let drained: Vec<CaptureEvent> = events_rx.try_iter().collect();
        assert!(matches!(
            drained.last(),
            Some(CaptureEvent::Status(CaptureStatus::Stopped))
        ));
        assert_eq!(
            drained
                .iter()
                .filter(|e| matches!(e, CaptureEvent::Status(_)))
                .count(),
            1
        );
        assert!(events_rx.try_recv().is_err());

        // Second close is a no-op.
        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        // The endpoint claim was released exactly once.
        assert!(claim_endpoint("close-test-endpoint"));
        release_endpoint("close-test-endpoint");
    }

    #[test]
    fn dropping_a_session_releases_its_endpoint() {
        let id = "drop-test-endpoint";
        {
            let (_session, _raw_tx, _events_rx) = session_over_feed(id);
            assert!(!claim_endpoint(id));
        }
        assert!(claim_endpoint(id));
        release_endpoint(id);
    }

    // ---- device path ----

    #[test]
    fn open_unknown_endpoint_is_unavailable() {
        match CaptureSession::open("no-such-endpoint-id", CaptureParams::default()) {
            Err(CaptureError::DeviceUnavailable(id)) => assert_eq!(id, "no-such-endpoint-id"),
            Err(CaptureError::Enumeration(_)) => {} // host without an audio backend
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening an unknown endpoint must fail"),
        }
    }

    /// Best-effort check against the real host: a second open of the same
    /// endpoint must report it busy. Returns early on machines without a
    /// usable capture device.
    #[test]
    fn second_open_of_live_endpoint_is_busy() {
        let listing = match crate::devices::list_capture_devices() {
            Ok(listing) if !listing.is_empty() => listing,
            _ => return,
        };
        let id = &listing[0].id;
        let first = match CaptureSession::open(id, CaptureParams::default()) {
            Ok(session) => session,
            Err(_) => return, // backend refused the endpoint
        };

        match CaptureSession::open(id, CaptureParams::default()) {
            Err(CaptureError::DeviceBusy(busy)) => assert_eq!(&busy, id),
            Ok(_) => panic!("second open of '{id}' must fail"),
            Err(other) => panic!("expected DeviceBusy, got {other}"),
        }
        drop(first);
    }
}
