//! Presence aggregation into roster views
//!
//! Pure computation over the directory and the store: one pass per subject,
//! no I/O. Views are rebuilt on every read and never cached.

use crate::domain::types::{GeofenceStatus, PresenceSample, PresenceView, Subject};
use crate::services::directory::SubjectDirectory;
use crate::services::geofence;
use crate::services::presence_store::PresenceStore;
use crate::services::shift::ShiftEvaluator;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnlineFilter {
    #[default]
    All,
    Online,
    Offline,
}

impl std::str::FromStr for OnlineFilter {
    type Err = crate::infra::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(OnlineFilter::All),
            "online" => Ok(OnlineFilter::Online),
            "offline" => Ok(OnlineFilter::Offline),
            other => Err(crate::infra::error::EngineError::validation(format!(
                "online filter must be all|online|offline, got {other:?}"
            ))),
        }
    }
}

/// Console-side roster filters. The default matches everyone.
#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
    /// Case-insensitive substring of name or id
    pub query: Option<String>,
    pub online: OnlineFilter,
    /// Exact branch code, case-insensitive
    pub branch: Option<String>,
}

impl RosterFilter {
    fn matches_subject(&self, subject: &Subject) -> bool {
        if let Some(branch) = self.branch.as_deref() {
            if !subject.branch_code.eq_ignore_ascii_case(branch) {
                return false;
            }
        }
        match self.query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                subject.name.to_lowercase().contains(&q) || subject.id.as_str().to_lowercase().contains(&q)
            }
            _ => true,
        }
    }

    fn matches_view(&self, view: &PresenceView) -> bool {
        match self.online {
            OnlineFilter::All => true,
            OnlineFilter::Online => view.is_online,
            OnlineFilter::Offline => !view.is_online,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub inside: usize,
    pub outside: usize,
    pub unknown: usize,
}

pub struct PresenceAggregator {
    directory: Arc<SubjectDirectory>,
    store: Arc<PresenceStore>,
    shift: ShiftEvaluator,
    staleness: Duration,
}

impl PresenceAggregator {
    pub fn new(
        directory: Arc<SubjectDirectory>,
        store: Arc<PresenceStore>,
        shift: ShiftEvaluator,
        staleness: Duration,
    ) -> Self {
        Self { directory, store, shift, staleness }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Roster as of now, unfiltered
    pub fn snapshot(&self) -> Vec<PresenceView> {
        self.snapshot_at(Utc::now(), &RosterFilter::default())
    }

    /// Roster as of `now`, ordered by subject id
    pub fn snapshot_at(&self, now: DateTime<Utc>, filter: &RosterFilter) -> Vec<PresenceView> {
        self.directory
            .list()
            .iter()
            .filter(|subject| filter.matches_subject(subject))
            .map(|subject| {
                let sample = self.store.get(&subject.id);
                self.view_for(subject, sample.as_ref(), now)
            })
            .filter(|view| filter.matches_view(view))
            .collect()
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> RosterSummary {
        let mut summary = RosterSummary::default();
        for view in self.snapshot_at(now, &RosterFilter::default()) {
            summary.total += 1;
            if view.is_online {
                summary.online += 1;
            } else {
                summary.offline += 1;
            }
            match view.geofence_status {
                GeofenceStatus::Inside => summary.inside += 1,
                GeofenceStatus::Outside => summary.outside += 1,
                GeofenceStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    /// Build one row. A missing sample is offline with unknown location.
    pub fn view_for(
        &self,
        subject: &Subject,
        sample: Option<&PresenceSample>,
        now: DateTime<Utc>,
    ) -> PresenceView {
        let fence = match sample {
            Some(s) => geofence::evaluate(subject, s),
            None => geofence::GeofenceResult {
                status: GeofenceStatus::Unknown,
                distance_m: None,
            },
        };
        let last_seen = sample.map(|s| s.captured_at);
        let shift = self.shift.evaluate(subject, now, last_seen);
        // clock skew can put a sample slightly ahead of now
        let age = last_seen.map(|ts| (now - ts).max(Duration::zero()));

        PresenceView {
            subject_id: subject.id.clone(),
            name: subject.name.clone(),
            branch_code: subject.branch_code.clone(),
            lat: sample.and_then(|s| s.coords).map(|c| c.lat),
            lon: sample.and_then(|s| s.coords).map(|c| c.lon),
            battery_pct: sample.and_then(|s| s.battery_pct),
            is_charging: sample.is_some_and(|s| s.charging),
            attendance: sample.and_then(|s| s.attendance),
            last_seen,
            minutes_since_seen: age.map(|a| a.num_minutes()),
            is_online: age.is_some_and(|a| a <= self.staleness),
            distance_to_reference_meters: fence.distance_m,
            geofence_status: fence.status,
            geofence_label: fence.status.label(),
            geofence_tone: fence.status.tone(),
            shift_status: shift.status,
            shift_label: shift.label,
            shift_status_label: shift.status.label(),
            shift_status_tone: shift.status.tone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Coordinates, ShiftStatus, SubjectId, Tone};
    use crate::services::geo;
    use crate::services::presence_store::StoreSettings;
    use chrono::{FixedOffset, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn subject(id: &str, name: &str, branch: &str) -> Subject {
        Subject {
            id: SubjectId::new(id),
            name: name.to_string(),
            branch_code: branch.to_string(),
            reference: Some(Coordinates { lat: 0.0, lon: 0.0 }),
            radius_m: 100.0,
            shift: None,
        }
    }

    fn aggregator(subjects: Vec<Subject>) -> (PresenceAggregator, Arc<PresenceStore>) {
        let store = Arc::new(PresenceStore::new(StoreSettings::default()));
        let agg = PresenceAggregator::new(
            Arc::new(SubjectDirectory::new(subjects)),
            store.clone(),
            ShiftEvaluator::new(Duration::minutes(15), FixedOffset::east_opt(0).unwrap()),
            Duration::minutes(5),
        );
        (agg, store)
    }

    fn north(meters: f64) -> Option<Coordinates> {
        Some(Coordinates { lat: meters / geo::meters_per_degree_lat(), lon: 0.0 })
    }

    #[test]
    fn test_absent_sample_is_offline_unknown() {
        let (agg, _) = aggregator(vec![subject("1001", "Budi", "JKT")]);
        let views = agg.snapshot_at(t(0), &RosterFilter::default());
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert!(!view.is_online);
        assert_eq!(view.geofence_status, GeofenceStatus::Unknown);
        assert_eq!(view.last_seen, None);
        assert_eq!(view.minutes_since_seen, None);
        assert_eq!(view.shift_status, ShiftStatus::NoSchedule);
        assert_eq!(view.shift_label, "-");
    }

    #[test]
    fn test_outside_then_null_coordinates() {
        let (agg, store) = aggregator(vec![subject("1001", "Budi", "JKT")]);
        let id = SubjectId::new("1001");

        store.upsert(&id, PresenceSample::new(north(150.0), t(0)), t(0));
        let view = &agg.snapshot_at(t(10), &RosterFilter::default())[0];
        assert_eq!(view.geofence_status, GeofenceStatus::Outside);
        assert_eq!(view.geofence_tone, Tone::Danger);
        assert!(view.is_online);

        store.upsert(&id, PresenceSample::new(None, t(20)), t(20));
        let view = &agg.snapshot_at(t(30), &RosterFilter::default())[0];
        assert_eq!(view.geofence_status, GeofenceStatus::Unknown);
        assert_eq!(view.distance_to_reference_meters, None);
        assert!(view.is_online);
    }

    #[test]
    fn test_staleness_threshold() {
        let (agg, store) = aggregator(vec![subject("1001", "Budi", "JKT")]);
        store.upsert(&SubjectId::new("1001"), PresenceSample::new(north(10.0), t(0)), t(0));

        let at_threshold = &agg.snapshot_at(t(300), &RosterFilter::default())[0];
        assert!(at_threshold.is_online);
        assert_eq!(at_threshold.minutes_since_seen, Some(5));

        let past = &agg.snapshot_at(t(301), &RosterFilter::default())[0];
        assert!(!past.is_online);
    }

    #[test]
    fn test_filters_and_summary() {
        let (agg, store) = aggregator(vec![
            subject("1001", "Budi Santoso", "JKT"),
            subject("1002", "Sari", "BDG"),
            subject("2001", "Andi", "JKT"),
        ]);
        store.upsert(&SubjectId::new("1001"), PresenceSample::new(north(10.0), t(0)), t(0));

        let by_name = RosterFilter { query: Some("budi".to_string()), ..Default::default() };
        assert_eq!(agg.snapshot_at(t(0), &by_name).len(), 1);

        let by_id = RosterFilter { query: Some("100".to_string()), ..Default::default() };
        assert_eq!(agg.snapshot_at(t(0), &by_id).len(), 2);

        let jkt_offline = RosterFilter {
            branch: Some("jkt".to_string()),
            online: OnlineFilter::Offline,
            ..Default::default()
        };
        let views = agg.snapshot_at(t(0), &jkt_offline);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].subject_id.as_str(), "2001");

        let summary = agg.summary_at(t(0));
        assert_eq!(
            summary,
            RosterSummary { total: 3, online: 1, offline: 2, inside: 1, outside: 0, unknown: 2 }
        );
    }

    #[test]
    fn test_query_matches_id_regardless_of_case() {
        let (agg, _store) = aggregator(vec![
            subject("EMP-01", "Budi", "JKT"),
            subject("emp-02", "Sari", "BDG"),
            subject("1003", "Agus", "JKT"),
        ]);

        for query in ["EMP", "emp", "Emp-0"] {
            let filter = RosterFilter { query: Some(query.to_string()), ..Default::default() };
            let ids: Vec<String> =
                agg.snapshot_at(t(0), &filter).iter().map(|v| v.subject_id.as_str().to_string()).collect();
            assert_eq!(ids, vec!["EMP-01", "emp-02"], "query {query:?}");
        }
    }

    #[test]
    fn test_online_filter_parse() {
        assert_eq!("Online".parse::<OnlineFilter>().unwrap(), OnlineFilter::Online);
        assert_eq!("".parse::<OnlineFilter>().unwrap(), OnlineFilter::All);
        assert!("maybe".parse::<OnlineFilter>().is_err());
    }
}
