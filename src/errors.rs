// Error types for procedure setup, site faults and detection scripts

use thiserror::Error;

use crate::site::Side;

/// Errors that prevent a procedure from being built.
///
/// These are the only errors the core escalates; everything that goes wrong
/// while a procedure is running is absorbed at the site boundary and logged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SetupError {
    #[error("procedure has no stitch sites configured")]
    NoSites,

    #[error("sequential stitching needs a total order, but discovered sites share the name `{name}`")]
    AmbiguousOrder { name: String },

    #[error("invalid {field}: {value} (must be non-negative and fit in a duration)")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("invalid pull strength {value}: must be within 0.0..=1.0")]
    InvalidPullStrength { value: f32 },

    #[error("invalid site spacing {value}: must be finite")]
    InvalidSpacing { value: f32 },

    #[error("stitch site `{site}` accepts no tool categories")]
    NoAllowedTools { site: String },

    #[error("detection script references unknown stitch site `{site}`")]
    UnknownScriptSite { site: String },
}

/// A required sub-object went missing while a site was stitching.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SiteFault {
    #[error("{side} skin segment is missing")]
    MissingSegment { side: Side },

    #[error("thread strand is missing")]
    MissingThread,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read detection script: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse detection script: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("detection at {at_secs}s has an invalid time")]
    InvalidTime { at_secs: f64 },
}
