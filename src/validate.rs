//! Post-layout validation: structural checks, spatial checks, and pluggable
//! domain rules, summarized into a confidence score.
//!
//! Validation never fails the pipeline. Everything it finds becomes an
//! [`Issue`] in the report; the refinement loop decides what to repair and
//! the caller decides what confidence is acceptable.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PlannerConfig;
use crate::geometry::BoundingBox;
use crate::model::{ConstraintKind, DiagramPlan, LayoutView};
use crate::scene::Scene;

/// How bad an issue is. Errors cost confidence five times what warnings do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// Stable machine-readable issue classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCode {
    /// An object has no resolved position.
    Unpositioned,
    /// Two object boxes interpenetrate beyond the configured tolerance.
    Overlap,
    /// A constraint's residual exceeds the violation slack.
    ConstraintViolated,
    /// An object box extends outside the canvas.
    OutOfBounds,
    /// A label box collides with a foreign object.
    LabelCollision,
    /// A solver backend rejected the constraint set during this run.
    SolverUnsatisfiable,
    /// A solver backend exhausted its wall-clock budget.
    SolverTimeout,
    /// A solver backend failed internally.
    SolverInternal,
    /// A domain rule flagged the scene.
    DomainRule,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
    /// Objects involved, if the issue is about specific objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_ids: Vec<String>,
    /// Offending constraint, if the issue is about one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_id: Option<String>,
}

impl Issue {
    pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            object_ids: Vec::new(),
            constraint_id: None,
        }
    }

    pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            object_ids: Vec::new(),
            constraint_id: None,
        }
    }

    pub fn with_objects(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.object_ids = ids.into_iter().collect();
        self
    }

    pub fn with_constraint(mut self, id: impl Into<String>) -> Self {
        self.constraint_id = Some(id.into());
        self
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
    /// `1 - 0.25 per error - 0.05 per warning`, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Repair passes the refinement loop ran before settling on this report.
    pub refinement_iterations: usize,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
        let warnings = issues.len() - errors;
        let confidence =
            (1.0 - 0.25 * errors as f64 - 0.05 * warnings as f64).clamp(0.0, 1.0);
        Self {
            issues,
            confidence,
            refinement_iterations: 0,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "confidence {:.2}, {} errors, {} warnings, {} refinement passes",
            self.confidence,
            self.errors().count(),
            self.warnings().count(),
            self.refinement_iterations
        )
    }
}

/// A pluggable semantic check over the finished scene.
pub trait DomainRule {
    fn name(&self) -> &'static str;
    fn check(&self, plan: &DiagramPlan, scene: &Scene) -> Vec<Issue>;
}

/// Members of a closed loop must actually be connected through relations;
/// a ring of mutually unrelated objects is drawable but meaningless.
pub struct ClosedLoopRule;

impl DomainRule for ClosedLoopRule {
    fn name(&self) -> &'static str {
        "closed-loop-connectivity"
    }

    fn check(&self, plan: &DiagramPlan, _scene: &Scene) -> Vec<Issue> {
        let mut issues = Vec::new();
        for constraint in &plan.constraints {
            if constraint.kind != ConstraintKind::ClosedLoop {
                continue;
            }
            let members: BTreeSet<String> = constraint.object_ids.iter().cloned().collect();
            if !plan.graph.is_connected_within(&members) {
                issues.push(
                    Issue::warning(
                        IssueCode::DomainRule,
                        format!(
                            "closed loop '{}' members are not connected by relations",
                            constraint.id
                        ),
                    )
                    .with_objects(members)
                    .with_constraint(constraint.id.clone()),
                );
            }
        }
        issues
    }
}

/// Circuit-flavored scenes: anything marked as a load should trace back to
/// a power source through the relation graph.
pub struct PowerSourceRule;

impl DomainRule for PowerSourceRule {
    fn name(&self) -> &'static str {
        "power-source-reachability"
    }

    fn check(&self, plan: &DiagramPlan, _scene: &Scene) -> Vec<Issue> {
        let sources: Vec<&str> = plan
            .graph
            .entities()
            .iter()
            .filter(|e| e.role() == Some("power_source"))
            .map(|e| e.id.as_str())
            .collect();
        if sources.is_empty() {
            // Not a circuit scene; nothing to enforce
            return Vec::new();
        }

        let mut issues = Vec::new();
        for entity in plan.graph.entities() {
            if entity.role() != Some("load") {
                continue;
            }
            let reachable = plan.graph.neighborhood(&entity.id, plan.graph.entity_count());
            if !sources.iter().any(|s| reachable.iter().any(|r| r == s)) {
                issues.push(
                    Issue::warning(
                        IssueCode::DomainRule,
                        format!("load '{}' is not connected to any power source", entity.id),
                    )
                    .with_objects([entity.id.clone()]),
                );
            }
        }
        issues
    }
}

/// Runs the structural and spatial checks plus any registered domain rules.
pub struct ValidationEngine {
    rules: Vec<Box<dyn DomainRule>>,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationEngine {
    /// Engine with the built-in domain rules.
    pub fn new() -> Self {
        Self {
            rules: vec![Box::new(ClosedLoopRule), Box::new(PowerSourceRule)],
        }
    }

    /// Engine with no domain rules; spatial checks only.
    pub fn bare() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: Box<dyn DomainRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// One full validation pass over a scene.
    pub fn validate(
        &self,
        plan: &DiagramPlan,
        scene: &Scene,
        config: &PlannerConfig,
    ) -> ValidationReport {
        let mut issues = Vec::new();

        // Unresolved objects
        for object in &scene.objects {
            if !object.position.is_resolved() {
                issues.push(
                    Issue::error(
                        IssueCode::Unpositioned,
                        format!("object '{}' has no resolved position", object.id),
                    )
                    .with_objects([object.id.clone()]),
                );
            }
        }

        // Pairwise overlap beyond tolerance
        let boxes: Vec<(&str, BoundingBox)> = scene
            .objects
            .iter()
            .filter_map(|o| o.bbox().map(|b| (o.id.as_str(), b)))
            .collect();
        for (i, (id_a, box_a)) in boxes.iter().enumerate() {
            for (id_b, box_b) in &boxes[i + 1..] {
                let depth = match box_a.penetration(box_b) {
                    Some((w, h)) => w.min(h),
                    None => continue,
                };
                if depth > config.overlap_tolerance {
                    issues.push(
                        Issue::error(
                            IssueCode::Overlap,
                            format!("objects '{}' and '{}' overlap by {:.1}", id_a, id_b, depth),
                        )
                        .with_objects([id_a.to_string(), id_b.to_string()]),
                    );
                }
            }
        }

        // Constraint residuals; slack of one grid step absorbs snap drift
        let positions = scene.resolved_positions();
        let sizes = plan.sizes(config);
        let view = LayoutView::new(&positions, &sizes, config.spacing);
        for constraint in &plan.constraints {
            if constraint.kind == ConstraintKind::NoOverlap {
                // Covered exactly by the pairwise check above
                continue;
            }
            let residual = constraint.violation(&view);
            if residual > config.grid_size {
                issues.push(
                    Issue::warning(
                        IssueCode::ConstraintViolated,
                        format!("{} off by {:.1}", constraint.describe(), residual),
                    )
                    .with_objects(constraint.object_ids.iter().cloned())
                    .with_constraint(constraint.id.clone()),
                );
            }
        }

        // Canvas bounds
        let canvas = BoundingBox::new(0.0, 0.0, config.canvas_width, config.canvas_height);
        for (id, bbox) in &boxes {
            if !canvas.contains_box(bbox) {
                issues.push(
                    Issue::warning(
                        IssueCode::OutOfBounds,
                        format!("object '{}' extends outside the canvas", id),
                    )
                    .with_objects([id.to_string()]),
                );
            }
        }

        // Labels colliding with foreign objects
        for label in &scene.labels {
            for (id, bbox) in &boxes {
                if *id == label.anchor_id {
                    continue;
                }
                if label.bbox().overlap_area(bbox) > 0.0 {
                    issues.push(
                        Issue::warning(
                            IssueCode::LabelCollision,
                            format!("label for '{}' collides with '{}'", label.anchor_id, id),
                        )
                        .with_objects([label.anchor_id.clone(), id.to_string()]),
                    );
                }
            }
        }

        for rule in &self.rules {
            let found = rule.check(plan, scene);
            if !found.is_empty() {
                debug!(rule = rule.name(), issues = found.len(), "domain rule flagged");
            }
            issues.extend(found);
        }

        ValidationReport::from_issues(issues)
    }
}
