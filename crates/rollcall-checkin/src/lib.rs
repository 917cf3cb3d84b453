//! Rollcall check-in pipeline.
//!
//! A check-in runs three gates in a fixed order on one camera session:
//! blink liveness, campus geofence, and face-template identity. Only when all
//! three pass is a single attendance event appended to the store.

pub mod capability;
pub mod capture;
pub mod config;
pub mod recorder;
pub mod session;
pub mod store;

pub use capability::{
    AnalyzerError, Camera, CameraError, FaceAnalyzer, Frame, LocationError, LocationProvider,
    PositionOptions, StreamState, VideoStream,
};
pub use config::{Config, ConfigError};
pub use recorder::{AttendanceEvent, SessionRecorder};
pub use session::{
    CheckInError, CheckInRequest, CheckInSession, SessionSnapshot, SessionState, TeardownHandle,
};
pub use store::{AttendanceStore, IdentityRecord, RecordStore, StoreError, SubjectRecord};
