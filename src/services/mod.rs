//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Entry point owning every service below
//! - `directory` - Subject roster, replaced wholesale by HR sync
//! - `presence_store` - Latest sample and bounded history per subject
//! - `geo` / `geofence` - Distance and inside/outside classification
//! - `shift` - Shift window and lateness evaluation
//! - `roster` - Derived presence views and summaries
//! - `history` - Trail reconstruction over a time window
//! - `alerts` - Incident ledger with priority ordering and resolution
//! - `escalation` - Operator session surfacing one incident at a time

pub mod alerts;
pub mod directory;
pub mod engine;
pub mod escalation;
pub mod geo;
pub mod geofence;
pub mod history;
pub mod presence_store;
pub mod roster;
pub mod shift;

// Re-export commonly used types
pub use alerts::AlertAggregator;
pub use engine::{run_retention_sweeper, Engine};
pub use escalation::{AlertSource, EscalationSession, OperatorDecision, SessionUpdate};
