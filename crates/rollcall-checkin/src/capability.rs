//! Device and model capabilities consumed by the check-in pipeline.
//!
//! The pipeline never talks to hardware or inference runtimes directly. The
//! host application (browser shell, mobile app, kiosk daemon) implements
//! these traits. Sessions are driven on a single thread, so the returned
//! futures are not required to be `Send`.

use std::time::Duration;

use rollcall_core::{FaceDescriptor, FaceLandmarks, GeoPoint};
use thiserror::Error;

// ── Camera ────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Raw video frame. `data` is packed RGB, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Playback state of an acquired stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Playing,
    Paused,
    Ended,
}

pub trait VideoStream {
    fn state(&self) -> StreamState;

    /// Latest decoded frame, or `None` if nothing has been decoded yet.
    fn current_frame(&mut self) -> Option<Frame>;

    /// Stop every track of the stream and release the device.
    fn stop(&mut self);
}

#[allow(async_fn_in_trait)]
pub trait Camera {
    type Stream: VideoStream;

    /// Request a video stream at the given target resolution. This is where
    /// the user is prompted for camera permission.
    async fn open(&mut self, width: u32, height: u32) -> Result<Self::Stream, CameraError>;
}

// ── Face analysis ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("face models could not be loaded: {0}")]
    ModelLoad(String),
    #[error("face analysis failed: {0}")]
    Inference(String),
}

/// Opaque single-face detector with landmark and descriptor extraction.
#[allow(async_fn_in_trait)]
pub trait FaceAnalyzer {
    async fn load_models(&mut self) -> Result<(), AnalyzerError>;

    /// Detect the most prominent face and return its landmarks.
    async fn detect_landmarks(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<FaceLandmarks>, AnalyzerError>;

    /// Detect the most prominent face and return landmarks plus descriptor.
    async fn detect_with_embedding(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<FaceDescriptor>, AnalyzerError>;
}

// ── Geolocation ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("geolocation is not supported on this device")]
    Unsupported,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("timed out waiting for a location fix")]
    Timeout,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Options for a one-shot position request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the provider may return. Zero forces a fresh fix.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// High-accuracy fresh fix bounded by `timeout`.
    pub fn fresh(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait LocationProvider {
    async fn current_position(&mut self, options: &PositionOptions)
        -> Result<GeoPoint, LocationError>;
}
