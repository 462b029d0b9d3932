//! Capture building blocks: parameters, events, session state, cancellation.
//!
//! The live-capture side of the crate is split in two: this module holds the
//! value types and the lock-free state machine, `session` holds the device
//! plumbing and the worker loop that produces [`CaptureEvent`]s.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::ChannelMode;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Synchronous errors from device enumeration and session setup.
///
/// Failures that happen after capture is running (device loss, stream
/// errors) are not errors here; they arrive as terminal [`CaptureStatus`]
/// events on the session's channel.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// The host backend could not list its capture endpoints.
    #[error("failed to enumerate capture devices: {0}")]
    Enumeration(String),

    /// The endpoint does not exist or cannot be opened right now.
    #[error("capture endpoint '{0}' is unavailable")]
    DeviceUnavailable(String),

    /// Another live session already holds this endpoint.
    #[error("capture endpoint '{0}' is already open in another session")]
    DeviceBusy(String),

    /// `start` was called on a session that is not freshly opened.
    #[error("capture was already started for this session")]
    AlreadyStarted,

    /// `start` was called on a closed session.
    #[error("capture session is closed")]
    SessionClosed,

    /// The background worker thread could not be spawned.
    #[error("failed to start capture worker: {0}")]
    WorkerSpawn(String),
}

// ---------------------------------------------------------------------------
// CaptureParams
// ---------------------------------------------------------------------------

/// Capture configuration passed to `CaptureSession::open`.
///
/// The device-side fields are requests, not demands: anything unset (or
/// unsupported by the device) falls back to the device default during
/// negotiation. Output is always the contract format regardless; `channels`
/// only picks its layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    /// Output channel layout for delivered chunks.
    pub channels: ChannelMode,
    /// Requested device sample rate in hertz.
    pub sample_rate: Option<u32>,
    /// Requested device channel count.
    pub device_channels: Option<u16>,
    /// Requested capture buffer length in milliseconds (latency hint).
    pub buffer_ms: Option<u32>,
}

// ---------------------------------------------------------------------------
// Status and events
// ---------------------------------------------------------------------------

/// Session lifecycle notification.
///
/// Every started capture delivers exactly one terminal status; nothing
/// follows it on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStatus {
    /// The capture stream is live; chunks follow.
    Started,
    /// Capture ended on request (close, or the consumer went away).
    Stopped,
    /// The cancellation token was observed set. Not a failure.
    Cancelled,
    /// The device disappeared mid-capture.
    DeviceLost,
    /// The capture pipeline failed; the reason is best-effort diagnostic.
    Failed(String),
}

impl CaptureStatus {
    /// True for statuses after which no further events are sent.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaptureStatus::Started)
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            CaptureStatus::Started => "started",
            CaptureStatus::Stopped => "stopped",
            CaptureStatus::Cancelled => "cancelled",
            CaptureStatus::DeviceLost => "device lost",
            CaptureStatus::Failed(_) => "failed",
        }
    }
}

/// What a running session delivers on its event channel.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Contract-format PCM samples, interleaved when stereo.
    Chunk(Vec<f32>),
    /// Lifecycle notification.
    Status(CaptureStatus),
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Capture session lifecycle.
///
/// ```text
/// Created -> Running -> { Stopped, Cancelled, Failed } -> Closed
/// ```
///
/// Transitions happen only through session operations; the worker moves a
/// running session to its terminal state, `close` moves any state to Closed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created = 0,
    Running = 1,
    Stopped = 2,
    Cancelled = 3,
    Failed = 4,
    Closed = 5,
}

impl SessionState {
    /// True for states a running capture can end in before close.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Running,
            2 => SessionState::Stopped,
            3 => SessionState::Cancelled,
            4 => SessionState::Failed,
            _ => SessionState::Closed,
        }
    }
}

/// Atomic cell for [`SessionState`], shared between caller and worker.
#[derive(Debug)]
pub(crate) struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Set `new` only when the current state is `current`; returns the state
    /// that was actually observed on failure.
    pub(crate) fn compare_exchange(
        &self,
        current: SessionState,
        new: SessionState,
    ) -> Result<SessionState, SessionState> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(SessionState::from)
            .map_err(SessionState::from)
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Shared cancellation signal for a capture loop.
///
/// Clone it, hand one clone to `CaptureSession::start`, keep the other, and
/// call [`cancel`](Self::cancel) to request a cooperative stop. The worker
/// polls the token at each loop iteration, so cancellation latency is
/// bounded by one capture-buffer period. Cancelling is irreversible for the
/// session it was handed to.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
