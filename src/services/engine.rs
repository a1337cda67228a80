//! Presence and incident engine
//!
//! The Engine is the single entry point the HTTP layer talks to. It owns:
//! - the subject directory and presence store
//! - roster aggregation and history reconstruction
//! - the incident ledger and its side-effect channel
//! - request-level metrics

use crate::domain::incident::{CreateOutcome, Incident, IncidentId, NewIncident, ResolveAction};
use crate::domain::types::{HistoryPoint, PresenceView, SampleReport, SubjectId, SubjectRecord};
use crate::infra::config::Config;
use crate::infra::error::{EngineError, EngineResult};
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::io::event_channel::EventSender;
use crate::services::alerts::{AlertAggregator, AlertSettings, IncidentFilter, IncidentSummary};
use crate::services::directory::SubjectDirectory;
use crate::services::history::HistoryReconstructor;
use crate::services::presence_store::{PresenceStore, StoreSettings, UpsertOutcome};
use crate::services::roster::{PresenceAggregator, RosterFilter, RosterSummary};
use crate::services::shift::ShiftEvaluator;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub struct Engine {
    directory: Arc<SubjectDirectory>,
    store: Arc<PresenceStore>,
    roster: PresenceAggregator,
    history: HistoryReconstructor,
    alerts: Arc<AlertAggregator>,
    metrics: Arc<Metrics>,
    default_radius_m: f64,
    max_future_skew: Duration,
    incident_retention: Duration,
}

impl Engine {
    pub fn new(config: &Config, metrics: Arc<Metrics>, events: Option<EventSender>) -> Self {
        let directory = Arc::new(SubjectDirectory::new(config.subjects().to_vec()));
        let store = Arc::new(PresenceStore::new(StoreSettings {
            reorder_tolerance: config.reorder_tolerance(),
            retention: config.history_retention(),
            max_points: config.history_max_points(),
        }));
        let roster = PresenceAggregator::new(
            directory.clone(),
            store.clone(),
            ShiftEvaluator::new(config.shift_grace(), config.shift_utc_offset()),
            config.staleness(),
        );
        let history = HistoryReconstructor::new(store.clone());
        let alerts = Arc::new(AlertAggregator::new(
            directory.clone(),
            AlertSettings {
                priority: config.alert_priority().to_vec(),
                dedup_window: config.dedup_window(),
            },
            metrics.clone(),
            events,
        ));

        info!(
            subjects = %directory.len(),
            staleness_secs = %config.staleness().num_seconds(),
            priority = ?config.alert_priority(),
            "engine_initialized"
        );

        Self {
            directory,
            store,
            roster,
            history,
            alerts,
            metrics,
            default_radius_m: config.default_radius_m(),
            max_future_skew: config.max_future_skew(),
            incident_retention: config.history_retention(),
        }
    }

    /// Incident ledger, shared with in-process escalation sessions
    pub fn alerts(&self) -> Arc<AlertAggregator> {
        self.alerts.clone()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn ingest(&self, report: SampleReport) -> EngineResult<UpsertOutcome> {
        self.ingest_at(report, Utc::now())
    }

    /// Validate and store a pushed sample. Rejections leave state untouched.
    pub fn ingest_at(&self, report: SampleReport, now: DateTime<Utc>) -> EngineResult<UpsertOutcome> {
        let result = report.into_sample(now, self.max_future_skew).and_then(|(subject_id, sample)| {
            if !self.directory.contains(&subject_id) {
                return Err(EngineError::validation(format!("unknown subject: {subject_id}")));
            }
            Ok((subject_id, sample))
        });

        let (subject_id, sample) = match result {
            Ok(ok) => ok,
            Err(e) => {
                self.metrics.record_sample_rejected();
                debug!(error = %e, "sample_rejected");
                return Err(e);
            }
        };

        let outcome = self.store.upsert(&subject_id, sample, now);
        self.metrics.record_sample_ingested();
        if outcome == UpsertOutcome::Superseded {
            self.metrics.record_sample_superseded();
        }
        debug!(subject_id = %subject_id, outcome = ?outcome, "sample_ingested");
        Ok(outcome)
    }

    pub fn snapshot(&self, filter: &RosterFilter) -> Vec<PresenceView> {
        self.snapshot_at(Utc::now(), filter)
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>, filter: &RosterFilter) -> Vec<PresenceView> {
        let start = Instant::now();
        let views = self.roster.snapshot_at(now, filter);
        self.metrics.record_snapshot(start.elapsed().as_micros() as u64);
        views
    }

    pub fn summary(&self) -> RosterSummary {
        self.roster.summary_at(Utc::now())
    }

    pub fn history(&self, subject_id: &SubjectId, window: Duration) -> EngineResult<Vec<HistoryPoint>> {
        self.metrics.record_history_query();
        self.history.history(subject_id, window)
    }

    pub fn create_incident(&self, request: NewIncident) -> EngineResult<CreateOutcome> {
        self.alerts.create(request, Utc::now())
    }

    pub fn pending_alerts(&self) -> Vec<Incident> {
        self.alerts.pending_alerts()
    }

    pub fn list_incidents(&self, filter: &IncidentFilter) -> Vec<Incident> {
        self.alerts.list(filter)
    }

    pub fn incident_summary(&self) -> IncidentSummary {
        self.alerts.summary()
    }

    pub fn resolve(&self, id: IncidentId, action: ResolveAction) -> EngineResult<Incident> {
        self.alerts.resolve(id, action, Utc::now())
    }

    /// Replace the roster. All records are validated before anything changes;
    /// samples of dropped subjects are forgotten.
    pub fn sync_subjects(&self, records: Vec<SubjectRecord>) -> EngineResult<usize> {
        let subjects = records
            .into_iter()
            .map(|r| r.into_subject(self.default_radius_m))
            .collect::<EngineResult<Vec<_>>>()?;
        let count = self.directory.replace_all(subjects);
        let dropped = self.store.retain_subjects(|id| self.directory.contains(id));
        info!(subjects = %count, dropped_tracks = %dropped, "subjects_synced");
        Ok(count)
    }

    /// Drop history and resolved incidents older than the retention window
    pub fn prune(&self, now: DateTime<Utc>) -> (usize, usize) {
        let points = self.store.prune(now);
        let incidents = self.alerts.prune_resolved(now - self.incident_retention);
        self.metrics.record_history_pruned(points as u64);
        (points, incidents)
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.report(self.directory.len(), self.alerts.pending_count())
    }

    pub fn subject_count(&self) -> usize {
        self.directory.len()
    }
}

/// Periodic retention sweep until shutdown
pub async fn run_retention_sweeper(
    engine: Arc<Engine>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick is immediate; nothing to prune at startup
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("retention_sweeper_shutdown");
                    return;
                }
            }
            _ = ticker.tick() => {
                let (points, incidents) = engine.prune(Utc::now());
                if points > 0 || incidents > 0 {
                    info!(points = %points, incidents = %incidents, "retention_swept");
                }
            }
        }
    }
}
