//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `http` - JSON API server for devices, detectors, HR sync and consoles
//! - `client` - HTTP alert source used by remote operator consoles
//! - `event_channel` - Bounded channel carrying resolution side-effects
//! - `audit_log` - Resolution events appended to a JSONL file
//! - `mqtt_egress` - MQTT publisher for resolution events
//! - `prometheus` - Prometheus text exposition

pub mod audit_log;
pub mod client;
pub mod event_channel;
pub mod http;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use audit_log::AuditLog;
pub use client::HttpAlertSource;
pub use event_channel::{create_event_channel, EventPublisher, EventSender};
pub use http::{start_http_server, Api, ApiResponse};
pub use mqtt_egress::MqttSink;
