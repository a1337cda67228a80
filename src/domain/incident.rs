//! Security incident model and the side-effect events resolution produces

use crate::domain::types::SubjectId;
use crate::infra::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-sortable incident identifier (UUIDv7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IncidentId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(IncidentId)
            .map_err(|_| EngineError::validation(format!("invalid incident id: {s:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    #[serde(alias = "FAKE_GPS_ALERT")]
    FakeGps,
    AppForceClose,
    FaceVerifyFail,
    RadiusBypassRequest,
}

impl IncidentType {
    pub const ALL: [IncidentType; 4] = [
        IncidentType::FakeGps,
        IncidentType::AppForceClose,
        IncidentType::FaceVerifyFail,
        IncidentType::RadiusBypassRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::FakeGps => "FAKE_GPS",
            IncidentType::AppForceClose => "APP_FORCE_CLOSE",
            IncidentType::FaceVerifyFail => "FACE_VERIFY_FAIL",
            IncidentType::RadiusBypassRequest => "RADIUS_BYPASS_REQUEST",
        }
    }

    /// The action an operator's "confirm" maps to for this type
    pub fn confirm_action(&self) -> ResolveAction {
        match self {
            IncidentType::RadiusBypassRequest => ResolveAction::Approve,
            _ => ResolveAction::Acknowledge,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IncidentType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "FAKE_GPS" | "FAKE_GPS_ALERT" => IncidentType::FakeGps,
            "APP_FORCE_CLOSE" => IncidentType::AppForceClose,
            "FACE_VERIFY_FAIL" => IncidentType::FaceVerifyFail,
            "RADIUS_BYPASS_REQUEST" => IncidentType::RadiusBypassRequest,
            other => {
                return Err(EngineError::validation(format!("unknown incident type: {other}")))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Approve,
    Acknowledge,
}

impl ResolveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveAction::Approve => "approve",
            ResolveAction::Acknowledge => "acknowledge",
        }
    }
}

impl std::str::FromStr for ResolveAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ResolveAction::Approve),
            "acknowledge" | "ack" => Ok(ResolveAction::Acknowledge),
            other => Err(EngineError::validation(format!("unknown resolve action: {other}"))),
        }
    }
}

/// A security event as served to consoles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: IncidentId,
    #[serde(rename = "type")]
    pub kind: IncidentType,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: ResolutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolveAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

impl Incident {
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state == ResolutionState::Pending
    }
}

/// Inbound `POST /incidents` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    #[serde(rename = "type")]
    pub kind: String,
    pub subject_id: String,
    #[serde(default)]
    pub detail: Option<String>,
    /// Identifier assigned by the reporting surface, used for de-duplication
    #[serde(default)]
    pub source_ref: Option<String>,
}

/// Result of an incident create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreateOutcome {
    pub id: IncidentId,
    pub deduplicated: bool,
}

/// Side-effect emitted exactly once per successful resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    /// Consumed by the authorization collaborator to let the subject check in off-site
    BypassGranted {
        incident_id: IncidentId,
        subject_id: SubjectId,
        at: DateTime<Utc>,
    },
    MarkRead {
        incident_id: IncidentId,
        subject_id: SubjectId,
        kind: IncidentType,
        at: DateTime<Utc>,
    },
}

impl AlertEvent {
    pub fn incident_id(&self) -> IncidentId {
        match self {
            AlertEvent::BypassGranted { incident_id, .. } => *incident_id,
            AlertEvent::MarkRead { incident_id, .. } => *incident_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertEvent::BypassGranted { .. } => "bypass_granted",
            AlertEvent::MarkRead { .. } => "mark_read",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_type_from_str() {
        assert_eq!("FAKE_GPS_ALERT".parse::<IncidentType>().unwrap(), IncidentType::FakeGps);
        assert_eq!("fake_gps".parse::<IncidentType>().unwrap(), IncidentType::FakeGps);
        assert_eq!(
            "RADIUS_BYPASS_REQUEST".parse::<IncidentType>().unwrap(),
            IncidentType::RadiusBypassRequest
        );
        assert!("DEVICE_LOCK".parse::<IncidentType>().is_err());
    }

    #[test]
    fn test_incident_type_serde_alias() {
        let kind: IncidentType = serde_json::from_str("\"FAKE_GPS_ALERT\"").unwrap();
        assert_eq!(kind, IncidentType::FakeGps);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"FAKE_GPS\"");
    }

    #[test]
    fn test_confirm_action_per_type() {
        assert_eq!(IncidentType::RadiusBypassRequest.confirm_action(), ResolveAction::Approve);
        assert_eq!(IncidentType::FakeGps.confirm_action(), ResolveAction::Acknowledge);
        assert_eq!(IncidentType::FaceVerifyFail.confirm_action(), ResolveAction::Acknowledge);
    }

    #[test]
    fn test_alert_event_serialization() {
        let event = AlertEvent::BypassGranted {
            incident_id: IncidentId::new(),
            subject_id: SubjectId::new("1001"),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bypass_granted");
        assert_eq!(json["subject_id"], "1001");
        assert_eq!(event.name(), "bypass_granted");
    }
}
