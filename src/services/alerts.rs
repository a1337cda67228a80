//! Incident ledger with prioritized pending view and exactly-once resolution
//!
//! Resolution state is an atomic compare-and-set per incident, so two
//! concurrent resolves of the same incident cannot both win. Only the winner
//! emits a side-effect event.

use crate::domain::incident::{
    AlertEvent, CreateOutcome, Incident, IncidentId, IncidentType, NewIncident, ResolutionState,
    ResolveAction,
};
use crate::domain::types::SubjectId;
use crate::infra::error::{EngineError, EngineResult};
use crate::infra::metrics::Metrics;
use crate::io::event_channel::EventSender;
use crate::services::directory::SubjectDirectory;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const STATE_PENDING: u8 = 0;
const STATE_RESOLVED: u8 = 1;

const MAX_DETAIL_CHARS: usize = 2000;
pub const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// Highest priority first; unlisted types sort after all listed ones
    pub priority: Vec<IncidentType>,
    pub dedup_window: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self { priority: IncidentType::ALL.to_vec(), dedup_window: Duration::minutes(10) }
    }
}

struct IncidentRecord {
    /// Immutable creation data; its `state` field is not consulted
    base: Incident,
    state: AtomicU8,
    resolution: Mutex<Option<(ResolveAction, DateTime<Utc>)>>,
}

impl IncidentRecord {
    fn new(base: Incident) -> Self {
        Self { base, state: AtomicU8::new(STATE_PENDING), resolution: Mutex::new(None) }
    }

    #[inline]
    fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_PENDING
    }

    fn snapshot(&self) -> Incident {
        let resolution = *self.resolution.lock();
        let mut incident = self.base.clone();
        if !self.is_pending() {
            incident.state = ResolutionState::Resolved;
            incident.resolution = resolution.map(|(action, _)| action);
            incident.resolved_at = resolution.map(|(_, at)| at);
        }
        incident
    }
}

#[derive(Default)]
struct Ledger {
    incidents: FxHashMap<IncidentId, Arc<IncidentRecord>>,
    by_source_ref: FxHashMap<String, IncidentId>,
    /// Source refs of pruned incidents, with their resolution time. Kept for
    /// one dedup window past the retention cutoff so re-pushed reports fold in.
    retired_refs: FxHashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Resolved,
}

impl std::str::FromStr for StatusFilter {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(StatusFilter::All),
            "pending" => Ok(StatusFilter::Pending),
            "resolved" => Ok(StatusFilter::Resolved),
            other => Err(EngineError::validation(format!(
                "status must be pending|resolved|all, got {other:?}"
            ))),
        }
    }
}

/// Security report query
#[derive(Debug, Clone)]
pub struct IncidentFilter {
    pub subject: Option<SubjectId>,
    pub kind: Option<IncidentType>,
    pub status: StatusFilter,
    pub limit: usize,
}

impl Default for IncidentFilter {
    fn default() -> Self {
        Self { subject: None, kind: None, status: StatusFilter::All, limit: DEFAULT_LIST_LIMIT }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    pub pending: usize,
    pub by_type: BTreeMap<&'static str, usize>,
}

pub struct AlertAggregator {
    ledger: RwLock<Ledger>,
    directory: Arc<SubjectDirectory>,
    settings: AlertSettings,
    metrics: Arc<Metrics>,
    events: Option<EventSender>,
}

impl AlertAggregator {
    pub fn new(
        directory: Arc<SubjectDirectory>,
        settings: AlertSettings,
        metrics: Arc<Metrics>,
        events: Option<EventSender>,
    ) -> Self {
        Self { ledger: RwLock::new(Ledger::default()), directory, settings, metrics, events }
    }

    fn priority_rank(&self, kind: IncidentType) -> usize {
        self.settings
            .priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.settings.priority.len())
    }

    /// Record a new incident, or return the pending duplicate it matches
    pub fn create(&self, request: NewIncident, now: DateTime<Utc>) -> EngineResult<CreateOutcome> {
        let kind: IncidentType = request.kind.parse()?;
        let subject_id = SubjectId::new(request.subject_id.trim());
        if !self.directory.contains(&subject_id) {
            return Err(EngineError::validation(format!("unknown subject: {subject_id}")));
        }
        let detail = request
            .detail
            .map(|d| d.trim().chars().take(MAX_DETAIL_CHARS).collect::<String>())
            .filter(|d| !d.is_empty());
        let source_ref = request.source_ref.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

        let mut ledger = self.ledger.write();

        if let Some(existing) = self.find_duplicate(&ledger, kind, &subject_id, source_ref.as_deref(), now) {
            self.metrics.record_incident_created(true);
            debug!(incident_id = %existing, kind = %kind, subject_id = %subject_id, "incident_deduplicated");
            return Ok(CreateOutcome { id: existing, deduplicated: true });
        }

        let incident = Incident {
            id: IncidentId::new(),
            kind,
            subject_id,
            detail,
            created_at: now,
            state: ResolutionState::Pending,
            resolved_at: None,
            resolution: None,
            source_ref,
        };
        let id = incident.id;
        if let Some(source_ref) = &incident.source_ref {
            ledger.by_source_ref.insert(source_ref.clone(), id);
        }
        info!(
            incident_id = %id,
            kind = %incident.kind,
            subject_id = %incident.subject_id,
            "incident_created"
        );
        ledger.incidents.insert(id, Arc::new(IncidentRecord::new(incident)));
        self.metrics.record_incident_created(false);

        Ok(CreateOutcome { id, deduplicated: false })
    }

    fn find_duplicate(
        &self,
        ledger: &Ledger,
        kind: IncidentType,
        subject_id: &SubjectId,
        source_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<IncidentId> {
        if let Some(id) = source_ref.and_then(|r| ledger.by_source_ref.get(r)) {
            return Some(*id);
        }
        let since = now - self.settings.dedup_window;
        ledger
            .incidents
            .values()
            .filter(|r| {
                r.is_pending()
                    && r.base.kind == kind
                    && r.base.subject_id == *subject_id
                    && r.base.created_at >= since
            })
            .min_by_key(|r| (r.base.created_at, r.base.id))
            .map(|r| r.base.id)
    }

    /// Unresolved incidents by category priority, then oldest first
    pub fn pending_alerts(&self) -> Vec<Incident> {
        let mut pending: Vec<Incident> = self
            .ledger
            .read()
            .incidents
            .values()
            .filter(|r| r.is_pending())
            .map(|r| r.base.clone())
            .collect();
        pending.sort_by_key(|i| (self.priority_rank(i.kind), i.created_at, i.id));
        pending
    }

    pub fn get(&self, id: IncidentId) -> Option<Incident> {
        self.ledger.read().incidents.get(&id).map(|r| r.snapshot())
    }

    /// Resolve an incident. Exactly one concurrent caller succeeds; the rest
    /// see `AlreadyResolved`.
    pub fn resolve(
        &self,
        id: IncidentId,
        action: ResolveAction,
        now: DateTime<Utc>,
    ) -> EngineResult<Incident> {
        let record = self
            .ledger
            .read()
            .incidents
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("incident {id}")))?;

        if !record.is_pending() {
            return Err(self.already_resolved(id, action));
        }
        if action == ResolveAction::Approve && record.base.kind != IncidentType::RadiusBypassRequest {
            return Err(EngineError::validation(format!(
                "approve is only valid for {}, incident {id} is {}",
                IncidentType::RadiusBypassRequest,
                record.base.kind
            )));
        }

        // hold the detail lock across the CAS so readers never see a
        // resolved state without its action and time
        let mut resolution = record.resolution.lock();
        if record
            .state
            .compare_exchange(STATE_PENDING, STATE_RESOLVED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            drop(resolution);
            return Err(self.already_resolved(id, action));
        }
        *resolution = Some((action, now));
        drop(resolution);

        self.metrics.record_incident_resolved();
        info!(
            incident_id = %id,
            kind = %record.base.kind,
            subject_id = %record.base.subject_id,
            action = %action.as_str(),
            "incident_resolved"
        );

        let event = match (record.base.kind, action) {
            (IncidentType::RadiusBypassRequest, ResolveAction::Approve) => AlertEvent::BypassGranted {
                incident_id: id,
                subject_id: record.base.subject_id.clone(),
                at: now,
            },
            (kind, _) => AlertEvent::MarkRead {
                incident_id: id,
                subject_id: record.base.subject_id.clone(),
                kind,
                at: now,
            },
        };
        if let Some(events) = &self.events {
            events.send(event);
        }

        Ok(record.snapshot())
    }

    fn already_resolved(&self, id: IncidentId, action: ResolveAction) -> EngineError {
        self.metrics.record_resolve_conflict();
        info!(incident_id = %id, action = %action.as_str(), "incident_already_resolved");
        EngineError::AlreadyResolved(id)
    }

    /// Newest first, for the security report
    pub fn list(&self, filter: &IncidentFilter) -> Vec<Incident> {
        let limit = filter.limit.clamp(1, MAX_LIST_LIMIT);
        let mut matched: Vec<Incident> = self
            .ledger
            .read()
            .incidents
            .values()
            .filter(|r| filter.subject.as_ref().map_or(true, |s| r.base.subject_id == *s))
            .filter(|r| filter.kind.map_or(true, |k| r.base.kind == k))
            .filter(|r| match filter.status {
                StatusFilter::All => true,
                StatusFilter::Pending => r.is_pending(),
                StatusFilter::Resolved => !r.is_pending(),
            })
            .map(|r| r.snapshot())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matched.truncate(limit);
        matched
    }

    /// Pending count per type; every type appears, zero or not
    pub fn summary(&self) -> IncidentSummary {
        let mut by_type: BTreeMap<&'static str, usize> =
            IncidentType::ALL.iter().map(|k| (k.as_str(), 0)).collect();
        let mut pending = 0;
        for record in self.ledger.read().incidents.values().filter(|r| r.is_pending()) {
            pending += 1;
            *by_type.entry(record.base.kind.as_str()).or_default() += 1;
        }
        IncidentSummary { pending, by_type }
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.read().incidents.values().filter(|r| r.is_pending()).count()
    }

    /// Forget incidents resolved before `cutoff`. Pending incidents are kept.
    /// Their source refs outlive them by one dedup window.
    pub fn prune_resolved(&self, cutoff: DateTime<Utc>) -> usize {
        let ref_cutoff = cutoff - self.settings.dedup_window;
        let mut ledger = self.ledger.write();
        let stale: Vec<(IncidentId, DateTime<Utc>)> = ledger
            .incidents
            .values()
            .filter_map(|r| match *r.resolution.lock() {
                Some((_, at)) if at < cutoff => Some((r.base.id, at)),
                _ => None,
            })
            .collect();
        for (id, resolved_at) in &stale {
            if let Some(record) = ledger.incidents.remove(id) {
                if let Some(source_ref) = &record.base.source_ref {
                    ledger.retired_refs.insert(source_ref.clone(), *resolved_at);
                }
            }
        }

        let expired: Vec<String> = ledger
            .retired_refs
            .iter()
            .filter(|(_, at)| **at < ref_cutoff)
            .map(|(source_ref, _)| source_ref.clone())
            .collect();
        for source_ref in &expired {
            ledger.retired_refs.remove(source_ref);
            ledger.by_source_ref.remove(source_ref);
        }
        stale.len()
    }
}
