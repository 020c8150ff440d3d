//! Constraint model and the per-request plan aggregate.
//!
//! Constraints are typed, optionally parameterized geometric requirements
//! holding entity ids, never references. A `DiagramPlan` owns everything one
//! layout run needs; no phase reads or writes process-wide state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::error::{find_similar, PlanError};
use crate::geometry::{BoundingBox, Point};
use crate::graph::{EntityCategory, KnowledgeGraph};

/// Constraint priority; `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// The closed vocabulary of geometric constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Same y center for all members.
    AlignedH,
    /// Same x center for all members.
    AlignedV,
    /// Euclidean center distance between two members equals the numeric value.
    Distance,
    /// Bounding boxes of the two members must not intersect.
    NoOverlap,
    /// Two members sit next to each other with the configured gap.
    Adjacent,
    /// Members form a left-to-right run with uniform gaps.
    StackedH,
    /// Members form a top-to-bottom run with uniform gaps.
    StackedV,
    /// First member sits at the midpoint of the other two.
    Between,
    /// The legs (a-b) and (c-b) meet at a right angle at the middle member.
    Perpendicular,
    /// Two members mirror each other about a shared vertical axis.
    Symmetric,
    /// Members form a closed ring (circuit loop, cycle).
    ClosedLoop,
    /// Members stay within loose proximity of each other.
    Connected,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::AlignedH => "aligned_h",
            ConstraintKind::AlignedV => "aligned_v",
            ConstraintKind::Distance => "distance",
            ConstraintKind::NoOverlap => "no_overlap",
            ConstraintKind::Adjacent => "adjacent",
            ConstraintKind::StackedH => "stacked_h",
            ConstraintKind::StackedV => "stacked_v",
            ConstraintKind::Between => "between",
            ConstraintKind::Perpendicular => "perpendicular",
            ConstraintKind::Symmetric => "symmetric",
            ConstraintKind::ClosedLoop => "closed_loop",
            ConstraintKind::Connected => "connected",
        };
        write!(f, "{}", name)
    }
}

/// A typed geometric requirement over one or more entities.
///
/// Immutable within one layout pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub kind: ConstraintKind,
    /// Ordered member ids; order matters for Between, Perpendicular, and stacks.
    pub object_ids: Vec<String>,
    pub numeric_value: Option<f64>,
    pub priority: Priority,
}

impl Constraint {
    pub fn new(
        id: impl Into<String>,
        kind: ConstraintKind,
        object_ids: Vec<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            object_ids,
            numeric_value: None,
            priority,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.numeric_value = Some(value);
        self
    }

    /// The two endpoints of a binary constraint, if it has exactly two members.
    pub fn pair(&self) -> Option<(&str, &str)> {
        match self.object_ids.as_slice() {
            [a, b] => Some((a, b)),
            _ => None,
        }
    }

    /// Short human-readable form, used in logs and fallback issues.
    pub fn describe(&self) -> String {
        match self.numeric_value {
            Some(v) => format!("{}({}) = {}", self.kind, self.object_ids.join(", "), v),
            None => format!("{}({})", self.kind, self.object_ids.join(", ")),
        }
    }
}

/// Solving strategies the selector can choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Heuristic,
    ConstraintSolver,
    SymbolicSolver,
    Hybrid,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Heuristic => "heuristic",
            Strategy::ConstraintSolver => "constraint-solver",
            Strategy::SymbolicSolver => "symbolic-solver",
            Strategy::Hybrid => "hybrid",
        };
        write!(f, "{}", name)
    }
}

/// Dominant flow direction inferred from the relation mix, used for seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowHint {
    /// Dependency/causal chains read left to right.
    LeftToRight,
    /// Part-of/containment structures stack top to bottom.
    TopDown,
    /// No dominant direction; seed on a grid.
    Grid,
}

/// Everything one layout run needs, owned by the pipeline for its duration.
#[derive(Debug, Clone)]
pub struct DiagramPlan {
    pub graph: KnowledgeGraph,
    pub constraints: Vec<Constraint>,
    pub complexity: f64,
    pub strategy: Strategy,
    pub flow: FlowHint,
}

impl DiagramPlan {
    /// Resolved size for an entity: its hint, or the category default.
    pub fn entity_size(&self, id: &str, config: &PlannerConfig) -> (f64, f64) {
        let entity = match self.graph.entity(id) {
            Some(e) => e,
            None => return config.default_object_size,
        };
        if let Some(hint) = entity.size_hint {
            return hint;
        }
        let (w, h) = config.default_object_size;
        match entity.category {
            EntityCategory::Object => (w, h),
            EntityCategory::Structure => (w * 1.5, h * 1.5),
            EntityCategory::Quantity | EntityCategory::Parameter => (w * 0.75, h * 0.6),
        }
    }

    /// Sizes for every entity, keyed by id.
    pub fn sizes(&self, config: &PlannerConfig) -> BTreeMap<String, (f64, f64)> {
        self.graph
            .entities()
            .iter()
            .map(|e| (e.id.clone(), self.entity_size(&e.id, config)))
            .collect()
    }

    /// Verify that every constraint member resolves to a known entity.
    ///
    /// Hard precondition: runs before any solving is attempted.
    pub fn validate_references(&self) -> Result<(), PlanError> {
        for constraint in &self.constraints {
            for id in &constraint.object_ids {
                if !self.graph.contains_entity(id) {
                    let suggestions = find_similar(self.graph.entity_ids(), id, 2);
                    return Err(PlanError::unresolved(
                        id.clone(),
                        format!("constraint '{}'", constraint.id),
                        suggestions,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Constraints sorted by priority (High first), stable within a tier.
    pub fn constraints_by_priority(&self) -> Vec<&Constraint> {
        let mut sorted: Vec<&Constraint> = self.constraints.iter().collect();
        sorted.sort_by_key(|c| c.priority);
        sorted
    }
}

/// Read-only view of an in-progress layout, shared by the heuristic solver,
/// hybrid subset selection, validation, and refinement fixes.
pub struct LayoutView<'a> {
    pub positions: &'a BTreeMap<String, Point>,
    pub sizes: &'a BTreeMap<String, (f64, f64)>,
    pub spacing: f64,
}

impl<'a> LayoutView<'a> {
    pub fn new(
        positions: &'a BTreeMap<String, Point>,
        sizes: &'a BTreeMap<String, (f64, f64)>,
        spacing: f64,
    ) -> Self {
        Self {
            positions,
            sizes,
            spacing,
        }
    }

    pub fn center(&self, id: &str) -> Option<Point> {
        self.positions.get(id).copied()
    }

    pub fn bbox(&self, id: &str) -> Option<BoundingBox> {
        let center = self.center(id)?;
        let &(w, h) = self.sizes.get(id)?;
        Some(BoundingBox::centered(center, w, h))
    }

    /// Center-to-center gap along the dominant axis, minus half extents.
    fn edge_gap(&self, a: &str, b: &str) -> Option<f64> {
        let ca = self.center(a)?;
        let cb = self.center(b)?;
        let &(wa, ha) = self.sizes.get(a)?;
        let &(wb, hb) = self.sizes.get(b)?;
        let dx = (ca.x - cb.x).abs();
        let dy = (ca.y - cb.y).abs();
        if dx >= dy {
            Some(dx - (wa + wb) / 2.0)
        } else {
            Some(dy - (ha + hb) / 2.0)
        }
    }
}

impl Constraint {
    /// How far the current layout is from satisfying this constraint, in
    /// canvas units. Zero means satisfied. Members without a resolved
    /// position contribute nothing.
    pub fn violation(&self, view: &LayoutView<'_>) -> f64 {
        let centers: Vec<Point> = self
            .object_ids
            .iter()
            .filter_map(|id| view.center(id))
            .collect();
        if centers.len() < 2 {
            return 0.0;
        }

        match self.kind {
            ConstraintKind::AlignedH => {
                let mean = centers.iter().map(|p| p.y).sum::<f64>() / centers.len() as f64;
                centers
                    .iter()
                    .map(|p| (p.y - mean).abs())
                    .fold(0.0, f64::max)
            }
            ConstraintKind::AlignedV => {
                let mean = centers.iter().map(|p| p.x).sum::<f64>() / centers.len() as f64;
                centers
                    .iter()
                    .map(|p| (p.x - mean).abs())
                    .fold(0.0, f64::max)
            }
            ConstraintKind::Distance => {
                let target = self.numeric_value.unwrap_or(view.spacing * 3.0);
                (centers[0].distance(centers[1]) - target).abs()
            }
            ConstraintKind::NoOverlap => {
                let (a, b) = match self.pair() {
                    Some(pair) => pair,
                    None => return 0.0,
                };
                match (view.bbox(a), view.bbox(b)) {
                    (Some(ba), Some(bb)) => ba
                        .penetration(&bb)
                        .map(|(w, h)| w.min(h))
                        .unwrap_or(0.0),
                    _ => 0.0,
                }
            }
            ConstraintKind::Adjacent => {
                let (a, b) = match self.pair() {
                    Some(pair) => pair,
                    None => return 0.0,
                };
                let target = self.numeric_value.unwrap_or(view.spacing);
                match view.edge_gap(a, b) {
                    Some(gap) => (gap - target).abs(),
                    None => 0.0,
                }
            }
            ConstraintKind::StackedH => {
                let mut worst: f64 = 0.0;
                for pair in self.object_ids.windows(2) {
                    let (ca, cb) = match (view.center(&pair[0]), view.center(&pair[1])) {
                        (Some(a), Some(b)) => (a, b),
                        _ => continue,
                    };
                    let (wa, _) = *view.sizes.get(&pair[0]).unwrap_or(&(0.0, 0.0));
                    let (wb, _) = *view.sizes.get(&pair[1]).unwrap_or(&(0.0, 0.0));
                    let required = (wa + wb) / 2.0 + view.spacing;
                    let order = (required - (cb.x - ca.x)).max(0.0);
                    worst = worst.max(order).max((ca.y - cb.y).abs());
                }
                worst
            }
            ConstraintKind::StackedV => {
                let mut worst: f64 = 0.0;
                for pair in self.object_ids.windows(2) {
                    let (ca, cb) = match (view.center(&pair[0]), view.center(&pair[1])) {
                        (Some(a), Some(b)) => (a, b),
                        _ => continue,
                    };
                    let (_, ha) = *view.sizes.get(&pair[0]).unwrap_or(&(0.0, 0.0));
                    let (_, hb) = *view.sizes.get(&pair[1]).unwrap_or(&(0.0, 0.0));
                    let required = (ha + hb) / 2.0 + view.spacing;
                    let order = (required - (cb.y - ca.y)).max(0.0);
                    worst = worst.max(order).max((ca.x - cb.x).abs());
                }
                worst
            }
            ConstraintKind::Between => {
                if centers.len() < 3 {
                    return 0.0;
                }
                let mid = Point::new(
                    (centers[1].x + centers[2].x) / 2.0,
                    (centers[1].y + centers[2].y) / 2.0,
                );
                centers[0].distance(mid)
            }
            ConstraintKind::Perpendicular => {
                if centers.len() < 3 {
                    return 0.0;
                }
                let (a, b, c) = (centers[0], centers[1], centers[2]);
                let v1 = (a.x - b.x, a.y - b.y);
                let v2 = (c.x - b.x, c.y - b.y);
                let l1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
                let l2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
                if l1 < f64::EPSILON || l2 < f64::EPSILON {
                    return 0.0;
                }
                let cos = (v1.0 * v2.0 + v1.1 * v2.1) / (l1 * l2);
                // Scale the angular error into canvas units via the shorter leg
                cos.abs() * l1.min(l2)
            }
            ConstraintKind::Symmetric => {
                let (a, b) = (centers[0], centers[1]);
                let axis_x = if centers.len() >= 3 {
                    centers[2].x
                } else {
                    (a.x + b.x) / 2.0
                };
                ((a.x + b.x) / 2.0 - axis_x).abs() + (a.y - b.y).abs()
            }
            ConstraintKind::ClosedLoop => {
                let n = centers.len();
                if n < 3 {
                    return 0.0;
                }
                let chord = ring_chord(n, view.spacing, self.mean_diagonal(view));
                let mut worst: f64 = 0.0;
                for i in 0..n {
                    let d = centers[i].distance(centers[(i + 1) % n]);
                    worst = worst.max((d - chord).abs());
                }
                worst
            }
            ConstraintKind::Connected => {
                let range = self.numeric_value.unwrap_or(view.spacing * 4.0);
                (centers[0].distance(centers[1]) - range).max(0.0)
            }
        }
    }

    fn mean_diagonal(&self, view: &LayoutView<'_>) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for id in &self.object_ids {
            if let Some(&(w, h)) = view.sizes.get(id) {
                total += (w * w + h * h).sqrt();
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}

/// Chord length between neighbors on a ring of `n` objects with the given
/// mean diagonal, spaced `spacing` apart along the circumference.
pub fn ring_chord(n: usize, spacing: f64, mean_diagonal: f64) -> f64 {
    let circumference = n as f64 * (mean_diagonal + spacing);
    let radius = circumference / (2.0 * std::f64::consts::PI);
    2.0 * radius * (std::f64::consts::PI / n as f64).sin()
}
