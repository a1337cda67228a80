//! Operator escalation session
//!
//! Surfaces one pending incident at a time:
//!
//! ```text
//! Idle --tick--> Polling --empty--> Idle
//!                   |
//!                   +--head of pending--> Presenting(incident)
//!
//! Presenting --confirm--> resolve, Idle, one immediate re-poll
//! Presenting --defer----> Idle (incident stays pending)
//! ```
//!
//! Ticks are suppressed while an incident is presented, so a newly arrived
//! incident never preempts the one on screen. Each session owns its timer;
//! teardown stops it and cancels any in-flight fetch.

use crate::domain::incident::{Incident, IncidentId, ResolveAction};
use crate::infra::error::{EngineError, EngineResult};
use crate::services::alerts::AlertAggregator;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Where a session reads pending incidents and records resolutions
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn pending_alerts(&self) -> EngineResult<Vec<Incident>>;

    async fn resolve(&self, id: IncidentId, action: ResolveAction) -> EngineResult<()>;
}

#[async_trait]
impl AlertSource for AlertAggregator {
    async fn pending_alerts(&self) -> EngineResult<Vec<Incident>> {
        Ok(AlertAggregator::pending_alerts(self))
    }

    async fn resolve(&self, id: IncidentId, action: ResolveAction) -> EngineResult<()> {
        AlertAggregator::resolve(self, id, action, Utc::now()).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Polling,
    Presenting(Incident),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorDecision {
    /// Resolve with the action the incident type calls for
    Confirm,
    /// Dismiss without resolving; the incident comes back on a later cycle
    Defer,
}

/// Notifications for whatever renders the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Presented(Incident),
    /// Poll returned nothing pending
    Cleared,
    Resolved { incident_id: IncidentId, action: ResolveAction },
    /// Someone else resolved it first, or it is gone
    AlreadyHandled { incident_id: IncidentId },
    ResolveFailed { incident_id: IncidentId, error: String },
    Deferred { incident_id: IncidentId },
    /// Transient "unable to refresh"; retried on the next tick
    RefreshFailed { error: String },
}

pub struct EscalationSession<S: AlertSource> {
    source: Arc<S>,
    state: SessionState,
    /// Bound on each fetch or resolve call
    call_timeout: Duration,
}

impl<S: AlertSource + 'static> EscalationSession<S> {
    pub fn new(source: Arc<S>, call_timeout: Duration) -> Self {
        Self { source, state: SessionState::Idle, call_timeout }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn presented(&self) -> Option<&Incident> {
        match &self.state {
            SessionState::Presenting(incident) => Some(incident),
            _ => None,
        }
    }

    /// Timer fired. Returns `None` when suppressed by a presented incident.
    pub async fn tick(&mut self) -> Option<SessionUpdate> {
        if let SessionState::Presenting(incident) = &self.state {
            debug!(incident_id = %incident.id, "escalation_tick_suppressed");
            return None;
        }
        Some(self.poll().await)
    }

    async fn poll(&mut self) -> SessionUpdate {
        self.state = SessionState::Polling;

        let result = match timeout(self.call_timeout, self.source.pending_alerts()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Unavailable(format!(
                "poll timed out after {:?}",
                self.call_timeout
            ))),
        };

        match result {
            Ok(pending) => match pending.into_iter().next() {
                Some(head) => {
                    info!(incident_id = %head.id, kind = %head.kind, subject_id = %head.subject_id, "escalation_presenting");
                    self.state = SessionState::Presenting(head.clone());
                    SessionUpdate::Presented(head)
                }
                None => {
                    self.state = SessionState::Idle;
                    SessionUpdate::Cleared
                }
            },
            Err(e) => {
                warn!(error = %e, "escalation_poll_failed");
                self.state = SessionState::Idle;
                SessionUpdate::RefreshFailed { error: e.to_string() }
            }
        }
    }

    /// Apply an operator decision to the presented incident. Ignored unless
    /// an incident is presented.
    pub async fn decide(&mut self, decision: OperatorDecision) -> Vec<SessionUpdate> {
        let Some(incident) = self.presented().cloned() else {
            debug!(?decision, "escalation_decision_ignored");
            return Vec::new();
        };

        if decision == OperatorDecision::Defer {
            info!(incident_id = %incident.id, "escalation_deferred");
            self.state = SessionState::Idle;
            return vec![SessionUpdate::Deferred { incident_id: incident.id }];
        }

        let action = incident.kind.confirm_action();
        let result = match timeout(self.call_timeout, self.source.resolve(incident.id, action)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Unavailable("resolve timed out".to_string())),
        };
        self.state = SessionState::Idle;

        let update = match result {
            Ok(()) => SessionUpdate::Resolved { incident_id: incident.id, action },
            Err(EngineError::AlreadyResolved(_)) | Err(EngineError::NotFound(_)) => {
                info!(incident_id = %incident.id, "escalation_already_handled");
                SessionUpdate::AlreadyHandled { incident_id: incident.id }
            }
            Err(e) => {
                // terminal for this cycle; the next tick retries
                warn!(incident_id = %incident.id, error = %e, "escalation_resolve_failed");
                return vec![SessionUpdate::ResolveFailed {
                    incident_id: incident.id,
                    error: e.to_string(),
                }];
            }
        };

        vec![update, self.poll().await]
    }

    /// Drive the session until shutdown. The first tick fires immediately.
    pub async fn run(
        mut self,
        every: Duration,
        mut decisions: mpsc::Receiver<OperatorDecision>,
        updates: mpsc::UnboundedSender<SessionUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = %every.as_secs_f64(), "escalation_session_started");

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        update = self.tick() => {
                            if let Some(update) = update {
                                let _ = updates.send(update);
                            }
                        }
                        _ = stopped(&mut shutdown) => break,
                    }
                }
                decision = decisions.recv() => {
                    let Some(decision) = decision else { break };
                    tokio::select! {
                        batch = self.decide(decision) => {
                            for update in batch {
                                let _ = updates.send(update);
                            }
                        }
                        _ = stopped(&mut shutdown) => break,
                    }
                }
            }
        }

        info!("escalation_session_stopped");
    }

    /// Run on a background task
    pub fn spawn(self, every: Duration, updates: mpsc::UnboundedSender<SessionUpdate>) -> SessionHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (decisions_tx, decisions_rx) = mpsc::channel(16);
        let task = tokio::spawn(self.run(every, decisions_rx, updates, shutdown_rx));
        SessionHandle { shutdown: shutdown_tx, decisions: decisions_tx, task }
    }
}

/// Resolves once shutdown is signalled or its sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Owner of a spawned session
pub struct SessionHandle {
    shutdown: watch::Sender<bool>,
    decisions: mpsc::Sender<OperatorDecision>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a decision. Returns false once the session has stopped.
    pub async fn decide(&self, decision: OperatorDecision) -> bool {
        self.decisions.send(decision).await.is_ok()
    }

    /// Stop the timer and wait for the task. No fetch starts after this returns.
    pub async fn teardown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "escalation_session_join_failed");
        }
    }
}
