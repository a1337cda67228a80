//! Shift-window classification
//!
//! Shift bounds are branch-local clock times; `now` is converted with the
//! configured UTC offset before comparison. Windows with `end < start` wrap
//! into the next day, so 22:00-06:00 at 02:00 belongs to the shift that
//! started the previous evening.

use crate::domain::types::{ShiftStatus, ShiftWindow, Subject};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ShiftResult {
    pub status: ShiftStatus,
    /// Window as "HH:MM-HH:MM", or "-" when unscheduled
    pub label: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ShiftEvaluator {
    grace: Duration,
    offset: FixedOffset,
}

impl ShiftEvaluator {
    pub fn new(grace: Duration, offset: FixedOffset) -> Self {
        Self { grace, offset }
    }

    /// Classify `now` against the subject's window.
    ///
    /// `last_seen` is the capture time of the subject's latest sample. Inside
    /// the grace period after the shift start, a subject with no sample since
    /// the start is `Late`.
    pub fn evaluate(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
        last_seen: Option<DateTime<Utc>>,
    ) -> ShiftResult {
        let Some(window) = subject.shift else {
            return ShiftResult { status: ShiftStatus::NoSchedule, label: "-".to_string() };
        };

        let local = now.with_timezone(&self.offset).naive_local();
        let status = if window.contains(local.time()) {
            let started = self.shift_start_utc(&window, local);
            let checked_in = last_seen.is_some_and(|seen| seen >= started);
            if now < started + self.grace && !checked_in {
                ShiftStatus::Late
            } else {
                ShiftStatus::OnTime
            }
        } else {
            ShiftStatus::OffShift
        };

        ShiftResult { status, label: window.label() }
    }

    /// Start instant of the shift occurrence that contains `local`
    fn shift_start_utc(&self, window: &ShiftWindow, local: NaiveDateTime) -> DateTime<Utc> {
        let mut start_date = local.date();
        if local.time() < window.start {
            // only reachable for wrapping or full-day windows
            start_date = start_date.pred_opt().unwrap_or(start_date);
        }
        let start_local = start_date.and_time(window.start);
        self.offset
            .from_local_datetime(&start_local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&start_local))
    }
}
