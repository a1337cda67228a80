//! Domain models - core business types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Subject` - a tracked field employee and its geofence/shift assignment
//! - `PresenceSample` - latest observation pushed by a device
//! - `PresenceView` - derived roster row served to consoles
//! - `HistoryPoint` - one position on a subject's trail
//! - `Incident` - security event awaiting operator resolution

pub mod incident;
pub mod types;

// Re-export commonly used types at module level
pub use incident::{AlertEvent, Incident, IncidentId, IncidentType, ResolveAction};
pub use types::{Coordinates, PresenceSample, PresenceView, Subject, SubjectId};
