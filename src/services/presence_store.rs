//! Latest-sample store with bounded per-subject history
//!
//! Writers for the same subject are serialized on that subject's mutex;
//! different subjects only share the outer map's read lock.

use crate::domain::types::{HistoryPoint, PresenceSample, SubjectId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Store tuning, derived from `[presence]` config
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub reorder_tolerance: Duration,
    pub retention: Duration,
    pub max_points: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            reorder_tolerance: Duration::seconds(5),
            retention: Duration::hours(24),
            max_points: 5000,
        }
    }
}

/// What an upsert did to the current sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Became the current sample
    Replaced,
    /// Older than the current sample beyond tolerance; history only
    Superseded,
}

#[derive(Debug, Default)]
struct SubjectTrack {
    current: Option<PresenceSample>,
    /// Sorted by timestamp ascending
    history: VecDeque<HistoryPoint>,
}

impl SubjectTrack {
    fn record_point(&mut self, point: HistoryPoint, max_points: usize) {
        // fast path: in-order arrival
        let in_order = self.history.back().map_or(true, |last| last.timestamp <= point.timestamp);
        if in_order {
            if self.history.back() == Some(&point) {
                return;
            }
            self.history.push_back(point);
        } else {
            let idx = self.history.partition_point(|p| p.timestamp <= point.timestamp);
            if idx > 0 && self.history[idx - 1] == point {
                return;
            }
            self.history.insert(idx, point);
        }
        while self.history.len() > max_points {
            self.history.pop_front();
        }
    }

    fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale = self.history.partition_point(|p| p.timestamp < cutoff);
        self.history.drain(..stale);
        stale
    }
}

pub struct PresenceStore {
    tracks: RwLock<FxHashMap<SubjectId, Arc<Mutex<SubjectTrack>>>>,
    settings: StoreSettings,
}

impl PresenceStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self { tracks: RwLock::new(FxHashMap::default()), settings }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn track(&self, subject_id: &SubjectId) -> Arc<Mutex<SubjectTrack>> {
        if let Some(track) = self.tracks.read().get(subject_id) {
            return track.clone();
        }
        self.tracks.write().entry(subject_id.clone()).or_default().clone()
    }

    /// Record a sample. Last arrival wins unless the sample is older than the
    /// current one by more than the reorder tolerance. Samples with coordinates
    /// always land in history when inside the retention window.
    pub fn upsert(
        &self,
        subject_id: &SubjectId,
        sample: PresenceSample,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let track = self.track(subject_id);
        let mut track = track.lock();

        if let Some(coords) = sample.coords {
            if sample.captured_at >= now - self.settings.retention {
                track.record_point(
                    HistoryPoint { lat: coords.lat, lon: coords.lon, timestamp: sample.captured_at },
                    self.settings.max_points,
                );
            }
        }

        let superseded = track.current.as_ref().is_some_and(|current| {
            sample.captured_at < current.captured_at - self.settings.reorder_tolerance
        });
        if superseded {
            debug!(
                subject_id = %subject_id,
                captured_at = %sample.captured_at.to_rfc3339(),
                "sample_superseded"
            );
            return UpsertOutcome::Superseded;
        }

        track.current = Some(sample);
        UpsertOutcome::Replaced
    }

    pub fn get(&self, subject_id: &SubjectId) -> Option<PresenceSample> {
        let track = self.tracks.read().get(subject_id).cloned()?;
        let current = track.lock().current.clone();
        current
    }

    pub fn list_all(&self) -> Vec<(SubjectId, PresenceSample)> {
        let tracks = self.tracks.read();
        tracks
            .iter()
            .filter_map(|(id, track)| track.lock().current.clone().map(|s| (id.clone(), s)))
            .collect()
    }

    /// History points with `from <= timestamp <= to`, ascending
    pub fn history_between(
        &self,
        subject_id: &SubjectId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<HistoryPoint> {
        let Some(track) = self.tracks.read().get(subject_id).cloned() else {
            return Vec::new();
        };
        let track = track.lock();
        let start = track.history.partition_point(|p| p.timestamp < from);
        track.history.iter().skip(start).take_while(|p| p.timestamp <= to).copied().collect()
    }

    /// Drop history older than the retention window. Returns points removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.settings.retention;
        let tracks: Vec<_> = self.tracks.read().values().cloned().collect();
        tracks.iter().map(|track| track.lock().prune_before(cutoff)).sum()
    }

    /// Forget subjects that are no longer on the roster
    pub fn retain_subjects(&self, keep: impl Fn(&SubjectId) -> bool) -> usize {
        let mut tracks = self.tracks.write();
        let before = tracks.len();
        tracks.retain(|id, _| keep(id));
        before - tracks.len()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
