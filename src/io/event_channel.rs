//! Bounded channel for resolution side-effect events
//!
//! Resolution never blocks on delivery: a full channel drops the event and
//! counts it. The publisher fans each event out to the audit file and MQTT.

use crate::domain::incident::AlertEvent;
use crate::infra::metrics::Metrics;
use crate::io::audit_log::AuditLog;
use crate::io::mqtt_egress::MqttSink;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Sender handle for alert events. Clone to share across producers.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<AlertEvent>,
    metrics: Arc<Metrics>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<AlertEvent>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Queue an event without blocking. Returns false if it was dropped.
    pub fn send(&self, event: AlertEvent) -> bool {
        let name = event.name();
        let incident_id = event.incident_id();
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!(event = %name, incident_id = %incident_id, "alert_event_queued");
                true
            }
            Err(e) => {
                self.metrics.record_event_dropped();
                warn!(event = %name, incident_id = %incident_id, error = %e, "alert_event_dropped");
                false
            }
        }
    }
}

/// Create a new event channel pair
pub fn create_event_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (EventSender, mpsc::Receiver<AlertEvent>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EventSender::new(tx, metrics), rx)
}

/// Drains the event channel into the configured sinks
pub struct EventPublisher {
    rx: mpsc::Receiver<AlertEvent>,
    audit: Option<AuditLog>,
    mqtt: Option<MqttSink>,
}

impl EventPublisher {
    pub fn new(rx: mpsc::Receiver<AlertEvent>, audit: Option<AuditLog>, mqtt: Option<MqttSink>) -> Self {
        Self { rx, audit, mqtt }
    }

    /// Run until shutdown or until every sender is gone. Queued events are
    /// drained before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            audit = %self.audit.is_some(),
            mqtt = %self.mqtt.is_some(),
            "event_publisher_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while let Ok(event) = self.rx.try_recv() {
                            self.deliver(&event).await;
                        }
                        info!("event_publisher_shutdown");
                        return;
                    }
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.deliver(&event).await,
                        None => {
                            info!("event_publisher_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn deliver(&self, event: &AlertEvent) {
        if let Some(audit) = &self.audit {
            audit.write_event(event);
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::incident::IncidentId;
    use crate::domain::types::SubjectId;
    use chrono::Utc;

    fn event() -> AlertEvent {
        AlertEvent::BypassGranted {
            incident_id: IncidentId::new(),
            subject_id: SubjectId::new("1001"),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (sender, _rx) = create_event_channel(1, metrics.clone());
        assert!(sender.send(event()));
        assert!(!sender.send(event()));
        assert_eq!(metrics.report(0, 0).events_dropped, 1);
    }

    #[tokio::test]
    async fn test_publisher_writes_audit_and_drains_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let metrics = Arc::new(Metrics::new());
        let (sender, rx) = create_event_channel(8, metrics);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        sender.send(event());
        sender.send(event());

        let publisher = EventPublisher::new(rx, Some(AuditLog::new(path.to_str().unwrap())), None);
        let handle = tokio::spawn(publisher.run(shutdown_rx));
        drop(sender);
        let _ = shutdown_tx.send(true);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
