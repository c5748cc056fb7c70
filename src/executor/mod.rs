//! Probe execution engine
//!
//! This module contains the pieces a run is assembled from:
//! - Admission control that bounds and adapts in-flight probes per phase
//! - The phase runner for the latency and throughput phases
//! - Index-addressed result buffers shared by both phases
//! - Byte accounting for throughput probes

pub mod admission;
pub mod phase;
pub mod sink;
pub mod traffic;

pub use admission::{
    AdmissionConfig, AdmissionController, AdmissionPermit, AdmissionSnapshot, Adjustment, MetricTrend, PhaseKind,
    SystemResources, LATENCY_HARD_CAP, THROUGHPUT_HARD_CAP,
};
pub use phase::{run_latency_phase, run_throughput_phase, PhaseContext, PhaseReport};
pub use sink::ResultSink;
pub use traffic::{format_bytes, TrafficAccumulator, TrafficOptions, TrafficSnapshot};
