//! Resolution audit trail - appends alert events to a JSONL file
//!
//! One JSON object per line, written as events leave the channel.

use crate::domain::incident::AlertEvent;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

pub struct AuditLog {
    file_path: String,
}

impl AuditLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "audit_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Append one event. Returns true if it reached the file.
    pub fn write_event(&self, event: &AlertEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(incident_id = %event.incident_id(), error = %e, "audit_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(incident_id = %event.incident_id(), event = %event.name(), "audit_written");
                true
            }
            Err(e) => {
                error!(
                    incident_id = %event.incident_id(),
                    file = %self.file_path,
                    error = %e,
                    "audit_write_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::incident::{IncidentId, IncidentType};
    use crate::domain::types::SubjectId;
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    fn mark_read() -> AlertEvent {
        AlertEvent::MarkRead {
            incident_id: IncidentId::new(),
            subject_id: SubjectId::new("1001"),
            kind: IncidentType::FaceVerifyFail,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_write_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = AuditLog::new(path.to_str().unwrap());

        let event = mark_read();
        assert!(log.write_event(&event));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["event"], "mark_read");
        assert_eq!(parsed["kind"], "FACE_VERIFY_FAIL");
        assert_eq!(parsed["incident_id"], event.incident_id().to_string());
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("audit").join("events.jsonl");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{\"existing\":true}\n").unwrap();

        let log = AuditLog::new(path.to_str().unwrap());
        assert!(log.write_event(&mark_read()));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("existing"));
    }

    #[test]
    fn test_missing_parent_is_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("events.jsonl");
        let log = AuditLog::new(path.to_str().unwrap());
        assert!(log.write_event(&mark_read()));
        assert!(path.exists());
    }
}
