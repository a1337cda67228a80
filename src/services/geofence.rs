//! Geofence classification against a subject's reference point

use crate::domain::types::{GeofenceStatus, PresenceSample, Subject};
use crate::services::geo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceResult {
    pub status: GeofenceStatus,
    pub distance_m: Option<f64>,
}

impl GeofenceResult {
    const UNKNOWN: GeofenceResult = GeofenceResult { status: GeofenceStatus::Unknown, distance_m: None };
}

/// Classify a sample as inside/outside the subject's radius.
///
/// No fix or no assigned reference point yields `Unknown` with no distance.
/// The boundary is inclusive: `distance == radius` is `Inside`.
pub fn evaluate(subject: &Subject, sample: &PresenceSample) -> GeofenceResult {
    let (Some(position), Some(reference)) = (sample.coords, subject.reference) else {
        return GeofenceResult::UNKNOWN;
    };

    let distance = geo::distance_m(reference, position);
    let status = if distance <= subject.radius_m {
        GeofenceStatus::Inside
    } else {
        GeofenceStatus::Outside
    };

    GeofenceResult { status, distance_m: Some(distance) }
}
