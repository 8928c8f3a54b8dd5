// Suture Sim Library - stitch-site state machines and procedure orchestration
// This exposes the core components for the binary, tests and embedding hosts

pub mod cli;
pub mod config;
pub mod detector;
pub mod driver;
pub mod errors;
pub mod geometry;
pub mod observability;
pub mod procedure;
pub mod site;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{AnimationTimings, ObservabilitySettings, ProcedureSettings, SutureSimConfig};
pub use detector::{ToolBody, ToolCategory, ToolDetection, ToolDetector};
pub use driver::{DetectionScript, DriverOptions, ProcedureDriver, RunReport, ScriptedDetection};
pub use errors::{ScriptError, SetupError, SiteFault};
pub use geometry::{Offset, Pose};
pub use observability::{OperationTimer, ProcedureMetrics, ProcedureStats};
pub use procedure::{
    AttemptGate, CompletionOutcome, EventBus, PacingGate, ProcedureBuilder, ProcedureEvent,
    ProcedureOrchestrator, SiteSource,
};
pub use site::{PointId, Side, SiteId, SiteLayout, SiteSignal, SiteState, StitchSite};
pub use telemetry::{create_procedure_span, generate_correlation_id, init_telemetry};
