//! Verification primitives for the Rollcall check-in pipeline.
//!
//! Everything in this crate is synchronous and free of I/O: the pipeline in
//! `rollcall-checkin` owns cameras, timers and storage, and calls into these
//! functions once per sampled frame or per gate evaluation.

pub mod face;
pub mod geofence;
pub mod liveness;
pub mod matcher;

pub use face::{Embedding, FaceDescriptor, FaceError, FaceLandmarks, Point, EMBEDDING_DIM};
pub use geofence::{haversine_distance_m, GeoPoint, Geofence, GeofenceResult, EARTH_RADIUS_M};
pub use liveness::{
    eye_aspect_ratio, eye_openness, BlinkLatch, EyeOpenness, LivenessSample, DEFAULT_EAR_THRESHOLD,
};
pub use matcher::{
    euclidean_distance, EuclideanMatcher, MatchError, MatchResult, Matcher, TemplateMatcher,
    DEFAULT_MATCH_THRESHOLD,
};
