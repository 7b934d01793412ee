//! # flow-event
//!
//! Wire protocol for PenguiFlow trace streams: one [`PlannerEvent`] per line of
//! the event log, a fixed set of [`EventKind`]s, and a payload field registry
//! (`kind → required fields`) used to validate records on write and tolerate
//! unknown fields on read.
//!
//! This crate is serde-only: no async, no runtime types. The event bus in the
//! core crate assigns `seq`/`event_id` and owns ordering; adapters and state
//! stores consume the records produced here.

mod event;
mod schema;

pub use event::{EventKind, PlannerEvent};
pub use schema::{payload_fields, validate_payload, MissingPayloadField, PAYLOAD_SCHEMA_VERSION};
