//! Shared types for subjects, presence samples and derived views

use crate::infra::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for subject identifiers (employee NIK)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WGS-84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Validated constructor, rejects NaN and out-of-range values
    pub fn new(lat: f64, lon: f64) -> EngineResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::validation(format!("latitude out of range: {lat}")));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(EngineError::validation(format!("longitude out of range: {lon}")));
        }
        Ok(Self { lat, lon })
    }

    /// Both halves or neither; a lone latitude or longitude is malformed
    pub fn from_pair(lat: Option<f64>, lon: Option<f64>) -> EngineResult<Option<Self>> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Self::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(EngineError::validation("latitude and longitude must be sent together")),
        }
    }
}

/// Daily work window in branch-local time. `end < start` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ShiftWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse "HH:MM" (or "HH:MM:SS") bounds
    pub fn parse(start: &str, end: &str) -> EngineResult<Self> {
        Ok(Self { start: parse_clock(start)?, end: parse_clock(end)? })
    }

    #[inline]
    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Half-open containment `[start, end)`, wrapping when needed.
    /// `start == end` covers the whole day.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.wraps_midnight() {
            t >= self.start || t < self.end
        } else {
            t >= self.start && t < self.end
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

fn parse_clock(s: &str) -> EngineResult<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| EngineError::validation(format!("invalid time of day: {s:?}")))
}

/// A tracked field employee. Owned by the external HR system.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub branch_code: String,
    pub reference: Option<Coordinates>,
    pub radius_m: f64,
    pub shift: Option<ShiftWindow>,
}

/// Wire/config form of a subject, as pushed by the HR system or listed in TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "branch_code")]
    pub branch_code: String,
    #[serde(default, alias = "reference_lat")]
    pub reference_lat: Option<f64>,
    #[serde(default, alias = "reference_lon")]
    pub reference_lon: Option<f64>,
    #[serde(default, alias = "radius_m")]
    pub radius_m: Option<f64>,
    #[serde(default, alias = "shift_start")]
    pub shift_start: Option<String>,
    #[serde(default, alias = "shift_end")]
    pub shift_end: Option<String>,
}

impl SubjectRecord {
    /// Convert into a validated subject, using `default_radius_m` when unset
    pub fn into_subject(self, default_radius_m: f64) -> EngineResult<Subject> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::validation("subject id must not be empty"));
        }
        let reference = Coordinates::from_pair(self.reference_lat, self.reference_lon)?;
        let radius_m = self.radius_m.unwrap_or(default_radius_m);
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(EngineError::validation(format!("invalid radius for {id}: {radius_m}")));
        }
        let shift = match (self.shift_start.as_deref(), self.shift_end.as_deref()) {
            (Some(start), Some(end)) => Some(ShiftWindow::parse(start, end)?),
            (None, None) => None,
            _ => {
                return Err(EngineError::validation(format!(
                    "shift for {id} needs both start and end"
                )))
            }
        };
        Ok(Subject {
            id: SubjectId(id),
            name: self.name,
            branch_code: self.branch_code,
            reference,
            radius_m,
            shift,
        })
    }
}

/// Attendance mark reported by the device, as a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceMark {
    Present,
    Sick,
    Permit,
    Leave,
    Absent,
}

/// Device status codes. Matching is exact after lowercasing, never by prefix.
const ATTENDANCE_CODES: &[(&str, AttendanceMark)] = &[
    ("h", AttendanceMark::Present),
    ("hadir", AttendanceMark::Present),
    ("s", AttendanceMark::Sick),
    ("sakit", AttendanceMark::Sick),
    ("i", AttendanceMark::Permit),
    ("izin", AttendanceMark::Permit),
    ("c", AttendanceMark::Leave),
    ("cuti", AttendanceMark::Leave),
    ("a", AttendanceMark::Absent),
    ("alpa", AttendanceMark::Absent),
];

impl std::str::FromStr for AttendanceMark {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_lowercase();
        ATTENDANCE_CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, mark)| *mark)
            .ok_or_else(|| EngineError::validation(format!("unknown attendance code: {s:?}")))
    }
}

/// Latest observation for a subject
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSample {
    pub coords: Option<Coordinates>,
    pub battery_pct: Option<u8>,
    pub charging: bool,
    pub attendance: Option<AttendanceMark>,
    pub captured_at: DateTime<Utc>,
}

impl PresenceSample {
    pub fn new(coords: Option<Coordinates>, captured_at: DateTime<Utc>) -> Self {
        Self { coords, battery_pct: None, charging: false, attendance: None, captured_at }
    }

    pub fn with_battery(mut self, pct: u8, charging: bool) -> Self {
        self.battery_pct = Some(pct);
        self.charging = charging;
        self
    }
}

/// Inbound `POST /presence-sample` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleReport {
    pub subject_id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub battery: Option<i64>,
    #[serde(default)]
    pub charging: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SampleReport {
    /// Validate the report. Timestamps further than `max_future_skew` ahead of
    /// `now` are rejected.
    pub fn into_sample(
        self,
        now: DateTime<Utc>,
        max_future_skew: chrono::Duration,
    ) -> EngineResult<(SubjectId, PresenceSample)> {
        let subject_id = self.subject_id.trim();
        if subject_id.is_empty() {
            return Err(EngineError::validation("subjectId must not be empty"));
        }
        let coords = Coordinates::from_pair(self.lat, self.lon)?;
        let battery_pct = match self.battery {
            Some(b) if (0..=100).contains(&b) => Some(b as u8),
            Some(b) => return Err(EngineError::validation(format!("battery out of range: {b}"))),
            None => None,
        };
        if self.timestamp > now + max_future_skew {
            return Err(EngineError::validation(format!(
                "timestamp {} is ahead of server time",
                self.timestamp.to_rfc3339()
            )));
        }
        let attendance = self.status.as_deref().map(str::parse).transpose()?;

        Ok((
            SubjectId::new(subject_id),
            PresenceSample {
                coords,
                battery_pct,
                charging: self.charging.unwrap_or(false),
                attendance,
                captured_at: self.timestamp,
            },
        ))
    }
}

/// One recorded position on a subject's trail
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceStatus {
    Inside,
    Outside,
    Unknown,
}

impl GeofenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceStatus::Inside => "inside",
            GeofenceStatus::Outside => "outside",
            GeofenceStatus::Unknown => "unknown",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GeofenceStatus::Inside => "Inside radius",
            GeofenceStatus::Outside => "Outside radius",
            GeofenceStatus::Unknown => "Location unknown",
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            GeofenceStatus::Inside => Tone::Success,
            GeofenceStatus::Outside => Tone::Danger,
            GeofenceStatus::Unknown => Tone::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    OnTime,
    Late,
    OffShift,
    NoSchedule,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::OnTime => "on_time",
            ShiftStatus::Late => "late",
            ShiftStatus::OffShift => "off_shift",
            ShiftStatus::NoSchedule => "no_schedule",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShiftStatus::OnTime => "On shift",
            ShiftStatus::Late => "Late",
            ShiftStatus::OffShift => "Off shift",
            ShiftStatus::NoSchedule => "No schedule",
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            ShiftStatus::OnTime => Tone::Success,
            ShiftStatus::Late => Tone::Warning,
            ShiftStatus::OffShift | ShiftStatus::NoSchedule => Tone::Neutral,
        }
    }
}

/// Display hint for console badges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Success,
    Warning,
    Danger,
    Neutral,
}

/// Read model for one roster row, recomputed on every read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceView {
    pub subject_id: SubjectId,
    pub name: String,
    pub branch_code: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub battery_pct: Option<u8>,
    pub is_charging: bool,
    pub attendance: Option<AttendanceMark>,
    pub last_seen: Option<DateTime<Utc>>,
    pub minutes_since_seen: Option<i64>,
    pub is_online: bool,
    pub distance_to_reference_meters: Option<f64>,
    pub geofence_status: GeofenceStatus,
    pub geofence_label: &'static str,
    pub geofence_tone: Tone,
    pub shift_status: ShiftStatus,
    pub shift_label: String,
    pub shift_status_label: &'static str,
    pub shift_status_tone: Tone,
}
