// Core data records for a stitch site: identities, points, segments, layout

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detector::ToolCategory;
use crate::geometry::{midpoint, Offset, Pose};

/// Stable identity of a site: its position in the procedure's ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub usize);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site-{}", self.0)
    }
}

/// One of the two connection points of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointId {
    First,
    Second,
}

impl PointId {
    pub const BOTH: [PointId; 2] = [PointId::First, PointId::Second];

    pub fn index(self) -> usize {
        match self {
            PointId::First => 0,
            PointId::Second => 1,
        }
    }

    /// The skin segment that slides onto this point.
    pub fn side(self) -> Side {
        match self {
            PointId::First => Side::Left,
            PointId::Second => Side::Right,
        }
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointId::First => write!(f, "first"),
            PointId::Second => write!(f, "second"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Externally visible state of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteState {
    /// Neither point has been visited
    Idle,
    /// At least one point is prepared; slides running or waiting on the gate
    Activating,
    /// Growth, deformation and reveal sequence in flight
    Stitching,
    /// Terminal until the site is reset
    Closed,
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SiteState::Idle => "idle",
            SiteState::Activating => "activating",
            SiteState::Stitching => "stitching",
            SiteState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPoint {
    pub id: PointId,
    pub anchor: Pose,
    pub prepared: bool,
}

impl ConnectionPoint {
    pub fn new(id: PointId, anchor: Pose) -> Self {
        Self {
            id,
            anchor,
            prepared: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SkinSegment {
    pub side: Side,
    pub pose: Pose,
    pub visible: bool,
}

/// Slot storage for the visual segments of one site.
///
/// Slots are never reused, so a `SegmentId` keeps pointing at the same
/// segment even after it has been destroyed and restored.
#[derive(Debug, Clone, Default)]
pub struct SegmentArena {
    slots: Vec<Option<SkinSegment>>,
}

impl SegmentArena {
    pub fn insert(&mut self, segment: SkinSegment) -> SegmentId {
        self.slots.push(Some(segment));
        SegmentId(self.slots.len() - 1)
    }

    pub fn get(&self, id: SegmentId) -> Option<&SkinSegment> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut SkinSegment> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<SkinSegment> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub fn replace(&mut self, id: SegmentId, segment: SkinSegment) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = Some(segment);
        }
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.get(id).is_some()
    }
}

/// The connecting strand grown from the first point toward the second.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadStrand {
    pub start: Pose,
    pub end: Pose,
    pub tip: Pose,
}

impl ThreadStrand {
    pub fn new(start: Pose, end: Pose) -> Self {
        Self {
            start,
            end,
            tip: start,
        }
    }

    pub fn is_fully_grown(&self) -> bool {
        self.tip == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RevealVisual {
    pub visible: bool,
    pub opacity: f32,
}

/// Placement and behaviour of one site, fixed at setup time.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteLayout {
    pub name: String,
    pub first_anchor: Pose,
    pub second_anchor: Pose,
    /// Where the left segment waits before its point is prepared, relative to the first anchor
    pub left_start_offset: Offset,
    /// Where the right segment waits before its point is prepared, relative to the second anchor
    pub right_start_offset: Offset,
    /// Slide target relative to each anchor
    pub slide_offset: Offset,
    pub left_rest: Pose,
    pub right_rest: Pose,
    pub thread_height: f32,
    pub has_visualizer: bool,
    pub hide_segments_initially: bool,
    pub cooldown_secs: f64,
    pub allowed_tools: Vec<ToolCategory>,
}

pub const DEFAULT_COOLDOWN_SECS: f64 = 2.0;
const POINT_HALF_SPAN: f32 = 0.02;

impl SiteLayout {
    pub fn new(name: impl Into<String>, first_anchor: Pose, second_anchor: Pose) -> Self {
        let slide_offset = Offset::new(0.0, -0.005, 0.0);
        let center = midpoint(&first_anchor, &second_anchor);
        // Edges come to rest halfway between their anchor and the wound centre
        let left_rest = first_anchor.lerp(&center, 0.5) + slide_offset;
        let right_rest = second_anchor.lerp(&center, 0.5) + slide_offset;

        Self {
            name: name.into(),
            first_anchor,
            second_anchor,
            left_start_offset: Offset::new(-POINT_HALF_SPAN, 0.0, 0.0),
            right_start_offset: Offset::new(POINT_HALF_SPAN, 0.0, 0.0),
            slide_offset,
            left_rest,
            right_rest,
            thread_height: 0.01,
            has_visualizer: true,
            hide_segments_initially: true,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            allowed_tools: vec![ToolCategory::Needle],
        }
    }

    /// Lay `count` sites out along the x axis, named `StitchSite_1..=count`.
    pub fn row(count: usize, spacing: f32) -> Vec<SiteLayout> {
        (0..count)
            .map(|index| {
                let center = Pose::new(index as f32 * spacing, 0.0, 0.0);
                SiteLayout::new(
                    format!("StitchSite_{}", index + 1),
                    center - Offset::new(POINT_HALF_SPAN, 0.0, 0.0),
                    center + Offset::new(POINT_HALF_SPAN, 0.0, 0.0),
                )
            })
            .collect()
    }

    pub fn with_cooldown(mut self, cooldown_secs: f64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_visualizer(mut self, has_visualizer: bool) -> Self {
        self.has_visualizer = has_visualizer;
        self
    }

    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = ToolCategory>) -> Self {
        self.allowed_tools = tools.into_iter().collect();
        self
    }

    pub fn with_hidden_segments(mut self, hidden: bool) -> Self {
        self.hide_segments_initially = hidden;
        self
    }

    pub fn anchor(&self, point: PointId) -> Pose {
        match point {
            PointId::First => self.first_anchor,
            PointId::Second => self.second_anchor,
        }
    }

    pub fn start_pose(&self, side: Side) -> Pose {
        match side {
            Side::Left => self.first_anchor + self.left_start_offset,
            Side::Right => self.second_anchor + self.right_start_offset,
        }
    }

    pub fn slide_target(&self, point: PointId) -> Pose {
        self.anchor(point) + self.slide_offset
    }

    pub fn rest_pose(&self, side: Side) -> Pose {
        match side {
            Side::Left => self.left_rest,
            Side::Right => self.right_rest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_layout_names_and_spacing() {
        let layouts = SiteLayout::row(3, 0.1);
        let names: Vec<_> = layouts.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["StitchSite_1", "StitchSite_2", "StitchSite_3"]);

        let second = &layouts[1];
        assert!((second.first_anchor.x - 0.08).abs() < 1e-6);
        assert!((second.second_anchor.x - 0.12).abs() < 1e-6);
    }

    #[test]
    fn test_segment_arena_keeps_ids_stable_across_removal() {
        let mut arena = SegmentArena::default();
        let left = arena.insert(SkinSegment {
            side: Side::Left,
            pose: Pose::origin(),
            visible: false,
        });
        let right = arena.insert(SkinSegment {
            side: Side::Right,
            pose: Pose::origin(),
            visible: false,
        });

        let removed = arena.remove(left).unwrap();
        assert!(!arena.contains(left));
        assert!(arena.contains(right));
        assert!(arena.remove(left).is_none());

        arena.replace(left, removed);
        assert_eq!(arena.get(left).map(|s| s.side), Some(Side::Left));
    }
}
