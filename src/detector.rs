// Tool detection volumes bound to a single connection point

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::site::{PointId, SiteId};

/// Category of a physical body that can enter a detection volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Needle,
    Suture,
    Other,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCategory::Needle => write!(f, "needle"),
            ToolCategory::Suture => write!(f, "suture"),
            ToolCategory::Other => write!(f, "other"),
        }
    }
}

/// A body reported by the input layer as having entered a detection volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBody {
    pub name: String,
    pub category: ToolCategory,
}

impl ToolBody {
    pub fn new(name: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }
}

/// A filtered detection forwarded to the owning site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDetection {
    pub site: SiteId,
    pub point: PointId,
    pub category: ToolCategory,
}

/// Passive sensor for one connection point.
///
/// Holds nothing but its owner, the point it watches and the categories it
/// lets through. The `enabled` switch is flipped by the owning site when it
/// closes or resets.
#[derive(Debug, Clone)]
pub struct ToolDetector {
    site: SiteId,
    point: PointId,
    allowed: BTreeSet<ToolCategory>,
    enabled: bool,
}

impl ToolDetector {
    pub fn new(site: SiteId, point: PointId, allowed: impl IntoIterator<Item = ToolCategory>) -> Self {
        Self {
            site,
            point,
            allowed: allowed.into_iter().collect(),
            enabled: true,
        }
    }

    pub fn point(&self) -> PointId {
        self.point
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn accepts(&self, category: ToolCategory) -> bool {
        self.allowed.contains(&category)
    }

    /// Filter a body entering the volume.
    pub fn on_volume_entered(&self, body: &ToolBody) -> Option<ToolDetection> {
        self.on_category_entered(body.category)
    }

    pub fn on_category_entered(&self, category: ToolCategory) -> Option<ToolDetection> {
        if !self.enabled || !self.accepts(category) {
            tracing::trace!(
                site = %self.site,
                point = %self.point,
                category = %category,
                enabled = self.enabled,
                "Detection filtered out"
            );
            return None;
        }
        Some(ToolDetection {
            site: self.site,
            point: self.point,
            category,
        })
    }
}
