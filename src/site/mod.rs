//! Stitch sites
//!
//! A site owns two connection points, the skin segments that slide onto
//! them and the strand that joins them. Its lifecycle is a `statig` machine
//! (`Idle -> Activating -> Stitching -> Closed`); the timed animation phases
//! are plain `{ duration, elapsed }` records advanced by the orchestrator's
//! tick.

pub mod lifecycle;
pub mod phase;
pub mod stitch_site;
pub mod types;

pub use lifecycle::{LifecycleEvent, SiteLifecycle};
pub use phase::{Phase, PhaseStep};
pub use stitch_site::{SiteSignal, StitchSite};
pub use types::*;
