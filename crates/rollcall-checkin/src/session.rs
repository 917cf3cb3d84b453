//! Verification session: the liveness → geofence → identity → record pipeline.
//!
//! A [`CheckInSession`] is one check-in attempt. It owns the camera stream
//! and the sampling timer for its whole lifetime and moves through
//! [`SessionState`] strictly in order. Every gate is a one-way latch, and a
//! terminal failure at any gate ends the attempt with the failure's status
//! line. Nothing is retried automatically; the subject starts a new session.
//!
//! Navigating away is modelled by [`TeardownHandle::teardown`] (or by simply
//! dropping the `run` future). Either way the in-flight stage is dropped,
//! which cancels the sampler and stops the camera through its guard.
//!
//! Once the identity gate has passed the attendance write is no longer
//! cancellable: teardown during the write still ends the session as passed.

use std::sync::Arc;

use rollcall_core::{BlinkLatch, EyeOpenness, LivenessSample, TemplateMatcher};
use thiserror::Error;
use tokio::sync::watch;

use crate::capability::{
    Camera, CameraError, FaceAnalyzer, LocationError, LocationProvider, PositionOptions,
    StreamState, VideoStream,
};
use crate::capture::{self, FrameSampler};
use crate::config::Config;
use crate::recorder::{AttendanceEvent, SessionRecorder};
use crate::store::{IdentityRecord, RecordStore};

const STATUS_LOADING_MODELS: &str = "Please wait, loading face models...";
const STATUS_REQUESTING_CAMERA: &str = "Requesting camera access...";
const STATUS_POSITION_FACE: &str = "Position your face in the frame.";
const STATUS_PLEASE_BLINK: &str = "Face detected. Now, please blink to verify.";
const STATUS_VERIFYING_LOCATION: &str = "Liveness check passed! Verifying location...";
const STATUS_VERIFYING_IDENTITY: &str = "Verifying identity...";
const STATUS_PASSED: &str = "Verification successful! You have been marked present.";

/// Terminal outcome of a failed check-in. The `Display` text is the status
/// line shown to the subject.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckInError {
    #[error("Attendance is not open for this subject.")]
    SessionClosed,
    #[error("Face models could not be loaded: {0}")]
    ModelsUnavailable(String),
    #[error("Camera access denied. Please enable permissions.")]
    CameraDenied,
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("No blink detected in time. Please start again.")]
    LivenessTimeout,
    #[error("Geolocation is not supported by your device.")]
    LocationUnsupported,
    #[error("Location Error: permission denied.")]
    LocationDenied,
    #[error("Location Error: timed out waiting for a position fix.")]
    LocationTimeout,
    #[error("Location Error: {0}")]
    LocationUnavailable(String),
    #[error("Verification failed. You are {distance_m} meters away from campus.")]
    OutsideGeofence { distance_m: u64 },
    #[error("Error: User data not found.")]
    UnknownIdentity,
    #[error("Error: No registered face found for your profile.")]
    NoEnrolledTemplate,
    #[error("Error: Registered face template is invalid ({0}).")]
    InvalidTemplate(String),
    #[error("Could not detect your face. Please try again.")]
    FaceNotDetected,
    #[error("Face does not match registered profile. Please try again.")]
    IdentityMismatch { distance: f32 },
    #[error("Face analysis failed: {0}")]
    Analyzer(String),
    #[error("Could not load your records: {0}")]
    Store(String),
    #[error("Failed to mark attendance. Please try again.")]
    RecordFailed,
    #[error("Check-in cancelled.")]
    Aborted,
}

impl From<CameraError> for CheckInError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::PermissionDenied => Self::CameraDenied,
            CameraError::Unavailable(msg) => Self::CameraUnavailable(msg),
        }
    }
}

impl From<LocationError> for CheckInError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::Unsupported => Self::LocationUnsupported,
            LocationError::PermissionDenied => Self::LocationDenied,
            LocationError::Timeout => Self::LocationTimeout,
            LocationError::Unavailable(msg) => Self::LocationUnavailable(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    AwaitingCamera,
    AwaitingLiveness,
    AwaitingGeofence,
    AwaitingIdentity,
    Passed,
    Failed(CheckInError),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed(_))
    }
}

/// What a UI renders: the current state and its single status line.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInRequest {
    pub identity_id: String,
    pub subject_id: String,
}

/// Cancels a running session, as when the subject navigates away.
#[derive(Clone)]
pub struct TeardownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl TeardownHandle {
    pub fn teardown(&self) {
        self.tx.send_replace(true);
    }
}

pub struct CheckInSession<C, A, L, S> {
    config: Config,
    request: CheckInRequest,
    camera: C,
    analyzer: A,
    location: L,
    store: S,
    snapshot: watch::Sender<SessionSnapshot>,
    teardown_tx: Arc<watch::Sender<bool>>,
    teardown_rx: watch::Receiver<bool>,
}

impl<C, A, L, S> CheckInSession<C, A, L, S>
where
    C: Camera,
    A: FaceAnalyzer,
    L: LocationProvider,
    S: RecordStore,
{
    pub fn new(
        config: Config,
        request: CheckInRequest,
        camera: C,
        analyzer: A,
        location: L,
        store: S,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            state: SessionState::Idle,
            status: STATUS_LOADING_MODELS.to_string(),
        });
        let (teardown_tx, teardown_rx) = watch::channel(false);
        Self {
            config,
            request,
            camera,
            analyzer,
            location,
            store,
            snapshot,
            teardown_tx: Arc::new(teardown_tx),
            teardown_rx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn teardown_handle(&self) -> TeardownHandle {
        TeardownHandle {
            tx: self.teardown_tx.clone(),
        }
    }

    /// Run the whole check-in.
    ///
    /// On success the attendance event has been written and the session has
    /// held the success status for `success_delay`; the caller should
    /// navigate away once this resolves.
    pub async fn run(mut self) -> Result<AttendanceEvent, CheckInError> {
        tracing::info!(
            identity = %self.request.identity_id,
            subject = %self.request.subject_id,
            "check-in started"
        );

        let mut teardown = self.teardown_rx.clone();
        let verified = tokio::select! {
            biased;
            _ = teardown.wait_for(|torn_down| *torn_down) => Err(CheckInError::Aborted),
            verified = self.verify_gates() => verified,
        };
        let identity = match verified {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(e)),
        };

        // Not raced against teardown: ends as Passed or RecordFailed.
        let event = match SessionRecorder::new(&self.store)
            .record(&identity.id, &identity.display_name, &self.request.subject_id)
            .await
        {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "record: attendance write failed");
                return Err(self.fail(CheckInError::RecordFailed));
            }
        };

        self.transition(SessionState::Passed, STATUS_PASSED);
        let mut teardown = self.teardown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.config.success_delay()) => {}
            _ = teardown.wait_for(|torn_down| *torn_down) => {}
        }
        Ok(event)
    }

    fn fail(&self, e: CheckInError) -> CheckInError {
        if e == CheckInError::Aborted {
            tracing::info!(identity = %self.request.identity_id, "check-in torn down");
        } else {
            tracing::warn!(identity = %self.request.identity_id, error = %e, "check-in failed");
        }
        let status = e.to_string();
        self.transition(SessionState::Failed(e.clone()), status);
        e
    }

    /// Run every gate in order. The camera guard lives only in this frame,
    /// so the stream is stopped as soon as the gates finish or are torn down.
    async fn verify_gates(&mut self) -> Result<IdentityRecord, CheckInError> {
        self.ensure_subject_open().await?;

        self.analyzer
            .load_models()
            .await
            .map_err(|e| CheckInError::ModelsUnavailable(e.to_string()))?;

        self.transition(SessionState::AwaitingCamera, STATUS_REQUESTING_CAMERA);
        let mut guard = capture::acquire(
            &mut self.camera,
            self.config.capture_width,
            self.config.capture_height,
        )
        .await?;

        self.transition(SessionState::AwaitingLiveness, STATUS_POSITION_FACE);
        self.await_liveness(guard.stream_mut()).await?;

        self.transition(SessionState::AwaitingGeofence, STATUS_VERIFYING_LOCATION);
        self.verify_location().await?;

        self.transition(SessionState::AwaitingIdentity, STATUS_VERIFYING_IDENTITY);
        let identity = self.verify_identity(guard.stream_mut()).await?;

        guard.release();
        Ok(identity)
    }

    async fn ensure_subject_open(&self) -> Result<(), CheckInError> {
        let subject = self
            .store
            .get_subject(&self.request.subject_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "subject lookup failed");
                CheckInError::Store(e.to_string())
            })?;
        match subject {
            Some(subject) if subject.session_active => Ok(()),
            _ => Err(CheckInError::SessionClosed),
        }
    }

    // ── Liveness gate ─────────────────────────────────────────────────────────

    async fn await_liveness(
        &mut self,
        stream: &mut C::Stream,
    ) -> Result<EyeOpenness, CheckInError> {
        match self.config.liveness_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.sample_until_blink(stream))
                .await
                .map_err(|_| CheckInError::LivenessTimeout),
            None => Ok(self.sample_until_blink(stream).await),
        }
    }

    /// Sample frames until the blink latch fires. The sampler lives only in
    /// this frame, so returning stops the timer.
    async fn sample_until_blink(&mut self, stream: &mut C::Stream) -> EyeOpenness {
        let mut latch = BlinkLatch::new(self.config.ear_threshold);
        let mut sampler = FrameSampler::start(self.config.sample_interval());

        loop {
            let Some(frame) = sampler.sample(stream).await else {
                continue;
            };

            let landmarks = match self.analyzer.detect_landmarks(&frame).await {
                Ok(landmarks) => landmarks,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        tick = sampler.ticks(),
                        "liveness: detection failed, skipping frame"
                    );
                    continue;
                }
            };

            match latch.observe(landmarks.as_ref()) {
                LivenessSample::Blink(openness) => {
                    tracing::info!(
                        ear = openness.avg_ear,
                        threshold = latch.threshold(),
                        frames = latch.frames_observed(),
                        "liveness: blink detected"
                    );
                    return openness;
                }
                LivenessSample::EyesOpen(openness) => {
                    tracing::trace!(ear = openness.avg_ear, "liveness: eyes open");
                    self.set_status(STATUS_PLEASE_BLINK);
                }
                LivenessSample::Unmeasurable => self.set_status(STATUS_PLEASE_BLINK),
                LivenessSample::NoFace => self.set_status(STATUS_POSITION_FACE),
            }
        }
    }

    // ── Geofence gate ─────────────────────────────────────────────────────────

    async fn verify_location(&mut self) -> Result<(), CheckInError> {
        let options = PositionOptions::fresh(self.config.location_timeout());
        let position = tokio::time::timeout(
            options.timeout,
            self.location.current_position(&options),
        )
        .await
        .unwrap_or(Err(LocationError::Timeout))
        .map_err(|e| {
            tracing::warn!(error = %e, "geofence: no location fix");
            CheckInError::from(e)
        })?;

        if !position.is_valid() {
            tracing::warn!(?position, "geofence: device reported out-of-range coordinates");
            return Err(CheckInError::LocationUnavailable(
                "invalid coordinates reported".to_string(),
            ));
        }

        let fence = self.config.geofence();
        let result = fence.check(position);
        if !result.inside {
            tracing::warn!(
                distance_m = result.distance_m,
                radius_m = fence.radius_m,
                "geofence: outside allowed radius"
            );
            return Err(CheckInError::OutsideGeofence {
                distance_m: result.rounded_distance_m(),
            });
        }

        tracing::info!(distance_m = result.distance_m, "geofence: inside allowed radius");
        Ok(())
    }

    // ── Identity gate ─────────────────────────────────────────────────────────

    async fn verify_identity(
        &mut self,
        stream: &mut C::Stream,
    ) -> Result<IdentityRecord, CheckInError> {
        let identity = self
            .store
            .get_identity(&self.request.identity_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "identity: record lookup failed");
                CheckInError::Store(e.to_string())
            })?
            .ok_or(CheckInError::UnknownIdentity)?;

        // TODO: move template matching behind a server-side verify call so the
        // enrolled template never leaves the data service.
        let template = identity
            .face_template
            .clone()
            .ok_or(CheckInError::NoEnrolledTemplate)?;
        let matcher = TemplateMatcher::new(template, self.config.match_threshold)
            .map_err(|e| CheckInError::InvalidTemplate(e.to_string()))?;

        let frame = match stream.state() {
            StreamState::Playing => stream.current_frame(),
            _ => None,
        }
        .ok_or(CheckInError::FaceNotDetected)?;

        let detection = self
            .analyzer
            .detect_with_embedding(&frame)
            .await
            .map_err(|e| CheckInError::Analyzer(e.to_string()))?
            .ok_or(CheckInError::FaceNotDetected)?;

        let result = matcher
            .find_best_match(&detection.embedding)
            .map_err(|e| CheckInError::Analyzer(e.to_string()))?;

        if !result.matched {
            tracing::warn!(
                distance = result.distance,
                threshold = matcher.threshold(),
                "identity: face does not match template"
            );
            return Err(CheckInError::IdentityMismatch {
                distance: result.distance,
            });
        }

        tracing::info!(distance = result.distance, "identity: face matches template");
        Ok(identity)
    }

    // ── Status publishing ─────────────────────────────────────────────────────

    fn transition(&self, state: SessionState, status: impl Into<String>) {
        let status = status.into();
        tracing::debug!(?state, status = %status, "session state changed");
        self.snapshot.send_replace(SessionSnapshot { state, status });
    }

    /// Update the status line without changing state. Receivers are only
    /// woken when the text actually changes.
    fn set_status(&self, status: &str) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.status == status {
                return false;
            }
            snapshot.status = status.to_string();
            true
        });
    }
}
