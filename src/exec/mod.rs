//! Execution planning and worker orchestration
//!
//! Capability probing feeds the planner, the planner picks an execution
//! profile, and the orchestrator runs inference according to that profile.

pub mod capability;
pub mod planner;
pub mod worker;

pub use capability::{AcceleratorTier, CapabilityProbe, CapabilitySnapshot, performance_score};
pub use planner::{
    ExecutionChain, ExecutionMode, ExecutionPlanner, ExecutionProfile, LatencyStats, TuningAdvice,
};
pub use worker::{
    DEFAULT_DISPATCH_TIMEOUT, InferenceRequest, InferenceResponse, LONG_DISPATCH_TIMEOUT,
    WorkerHandle, WorkerKind, WorkerOptions, WorkerOrchestrator,
};
