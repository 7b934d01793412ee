//! Streaming adapters: encoders that turn a bus subscription into wire
//! frames for clients.
//!
//! Two encoders ship: server-sent events ([`SseAdapter`]) and a typed
//! run-event stream ([`RunEventAdapter`]). Both preserve bus `seq` order,
//! never inline artifact bytes, and enforce the answer gate: answer-channel
//! chunks are forwarded immediately only when tagged final, otherwise held
//! per `action_seq` until `done` names the gate.

mod agui;
mod gate;
mod sse;

pub use agui::RunEventAdapter;
pub use gate::AnswerGate;
pub use sse::{SseAdapter, SseFrame};
