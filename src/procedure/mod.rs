//! Procedure-level coordination across stitch sites
//!
//! The orchestrator owns the sites in order, hands them the pacing gate on
//! every call, and turns their close signals into the aggregate events.

pub mod events;
pub mod orchestrator;
pub mod pacing;

pub use events::{EventBus, EventCallback, ProcedureEvent};
pub use orchestrator::{CompletionOutcome, ProcedureBuilder, ProcedureOrchestrator, SiteSource};
pub use pacing::{AttemptGate, PacingGate};
