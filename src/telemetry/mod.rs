//! Admission telemetry.
//!
//! The middleware emits one [`AdmissionEvent`] per decision and one per refund attempt. Events
//! flow through a [`TelemetrySink`], which is a `tower::Service<AdmissionEvent>`, so sinks can be
//! layered like any other service. Emission is best-effort: a failing sink never changes a
//! request's outcome.

pub mod events;
pub mod sinks;

pub use events::AdmissionEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
