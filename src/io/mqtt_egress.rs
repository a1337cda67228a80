//! MQTT publisher for resolution side-effects
//!
//! - `<prefix>/bypass` - bypass granted, consumed by the attendance service (QoS 1)
//! - `<prefix>/read` - incident marked read (QoS 0)

use crate::domain::incident::AlertEvent;
use crate::infra::config::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct MqttSink {
    client: AsyncClient,
    bypass_topic: String,
    read_topic: String,
}

impl MqttSink {
    /// Connect to the configured broker. Must be called inside a tokio runtime;
    /// the event loop runs on its own task and reconnects on error.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("{}-events-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_events_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_events_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_events_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let (bypass_topic, read_topic) = topics(config.mqtt_topic_prefix());
        info!(bypass = %bypass_topic, read = %read_topic, "mqtt_events_started");
        Self { client, bypass_topic, read_topic }
    }

    pub async fn publish(&self, event: &AlertEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "mqtt_events_serialize_failed");
                return;
            }
        };

        let (topic, qos) = match event {
            AlertEvent::BypassGranted { .. } => (&self.bypass_topic, QoS::AtLeastOnce),
            AlertEvent::MarkRead { .. } => (&self.read_topic, QoS::AtMostOnce),
        };

        if let Err(e) = self.client.publish(topic, qos, false, json.as_bytes()).await {
            error!(
                incident_id = %event.incident_id(),
                topic = %topic,
                error = %e,
                "mqtt_events_publish_failed"
            );
        }
    }
}

fn topics(prefix: &str) -> (String, String) {
    let prefix = prefix.trim_end_matches('/');
    (format!("{prefix}/bypass"), format!("{prefix}/read"))
}
