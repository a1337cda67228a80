//! Trail reconstruction over a trailing time window

use crate::domain::types::{HistoryPoint, SubjectId};
use crate::infra::error::{EngineError, EngineResult};
use crate::services::presence_store::PresenceStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Window applied when the caller does not pass one
pub const DEFAULT_WINDOW_SECS: i64 = 8 * 3600;

pub struct HistoryReconstructor {
    store: Arc<PresenceStore>,
    retention: Duration,
}

impl HistoryReconstructor {
    pub fn new(store: Arc<PresenceStore>) -> Self {
        let retention = store.settings().retention;
        Self { store, retention }
    }

    /// Points in `[now - window, now]`, ascending. Windows longer than the
    /// retention period are clamped; unknown subjects yield an empty trail.
    pub fn history_at(
        &self,
        subject_id: &SubjectId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<HistoryPoint>> {
        if window <= Duration::zero() {
            return Err(EngineError::validation("history window must be positive"));
        }
        let window = window.min(self.retention);
        Ok(self.store.history_between(subject_id, now - window, now))
    }

    pub fn history(&self, subject_id: &SubjectId, window: Duration) -> EngineResult<Vec<HistoryPoint>> {
        self.history_at(subject_id, window, Utc::now())
    }
}

/// Parse a window such as `90` (seconds), `30s`, `15m`, `2h` or `1d`
pub fn parse_window(raw: &str) -> EngineResult<Duration> {
    let raw = raw.trim();
    let invalid = || EngineError::validation(format!("invalid history window: {raw:?}"));

    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    let window = match unit {
        "" | "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        _ => None,
    }
    .ok_or_else(invalid)?;

    if window <= Duration::zero() {
        return Err(invalid());
    }
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Coordinates, PresenceSample};
    use crate::services::presence_store::StoreSettings;
    use chrono::TimeZone;

    fn t(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap() + Duration::minutes(mins)
    }

    fn setup() -> (HistoryReconstructor, Arc<PresenceStore>) {
        let settings = StoreSettings { retention: Duration::hours(2), ..StoreSettings::default() };
        let store = Arc::new(PresenceStore::new(settings));
        (HistoryReconstructor::new(store.clone()), store)
    }

    #[test]
    fn test_window_bounds_and_order() {
        let (history, store) = setup();
        let id = SubjectId::new("1001");
        // delivered out of order, one without coordinates
        for (mins, coords) in [
            (50, Some(Coordinates { lat: -6.3, lon: 106.8 })),
            (10, Some(Coordinates { lat: -6.1, lon: 106.8 })),
            (30, None),
            (40, Some(Coordinates { lat: -6.2, lon: 106.8 })),
        ] {
            store.upsert(&id, PresenceSample::new(coords, t(mins)), t(mins));
        }

        let points = history.history_at(&id, Duration::minutes(30), t(60)).unwrap();
        let stamps: Vec<_> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![t(40), t(50)]);

        let all = history.history_at(&id, Duration::hours(1), t(60)).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_unknown_subject_is_empty() {
        let (history, _) = setup();
        let points = history.history_at(&SubjectId::new("ghost"), Duration::hours(1), t(0)).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_non_positive_window_rejected() {
        let (history, _) = setup();
        assert!(history.history_at(&SubjectId::new("1001"), Duration::zero(), t(0)).is_err());
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("90").unwrap(), Duration::seconds(90));
        assert_eq!(parse_window("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_window(" 2h ").unwrap(), Duration::hours(2));
        assert_eq!(parse_window("1d").unwrap(), Duration::days(1));
        assert!(parse_window("0").is_err());
        assert!(parse_window("h").is_err());
        assert!(parse_window("5w").is_err());
        assert!(parse_window("-5m").is_err());
    }
}
