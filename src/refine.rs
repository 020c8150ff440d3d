//! Bounded validate-and-repair loop.
//!
//! After the orchestrator produces a scene, refinement alternates validation
//! passes with targeted repairs until the confidence threshold is met, no
//! fixable issue remains, or the iteration cap is hit. The loop always
//! terminates and always returns a scene; a scene that still has issues is
//! returned with a report saying so.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::PlannerConfig;
use crate::geometry::{Point, Position};
use crate::labels::LabelPlacer;
use crate::model::DiagramPlan;
use crate::scene::Scene;
use crate::solver::heuristic::{relax, HeuristicSolver};
use crate::validate::{Issue, IssueCode, ValidationEngine, ValidationReport};

pub struct RefinementLoop;

impl RefinementLoop {
    /// Refine `scene` in place and return the final report.
    ///
    /// The returned report's `refinement_iterations` counts the repair
    /// passes actually run.
    pub fn run(
        plan: &DiagramPlan,
        config: &PlannerConfig,
        engine: &ValidationEngine,
        scene: &mut Scene,
    ) -> ValidationReport {
        let mut report = engine.validate(plan, scene, config);
        let mut iterations = 0;

        while iterations < config.refinement_max_iterations
            && report.confidence < config.confidence_threshold
            && report.issues.iter().any(is_fixable)
        {
            iterations += 1;
            debug!(
                iteration = iterations,
                confidence = report.confidence,
                issues = report.issues.len(),
                "refinement pass"
            );
            apply_fixes(plan, config, scene, &report);
            scene.labels = LabelPlacer::place(scene);
            report = engine.validate(plan, scene, config);
        }

        report.refinement_iterations = iterations;
        report
    }
}

/// Issues the repair pass knows how to act on. Solver warnings and domain
/// rule findings describe the run, not the geometry; repairs cannot help.
fn is_fixable(issue: &Issue) -> bool {
    matches!(
        issue.code,
        IssueCode::Unpositioned
            | IssueCode::Overlap
            | IssueCode::ConstraintViolated
            | IssueCode::OutOfBounds
            | IssueCode::LabelCollision
    )
}

fn apply_fixes(
    plan: &DiagramPlan,
    config: &PlannerConfig,
    scene: &mut Scene,
    report: &ValidationReport,
) {
    let has = |code: IssueCode| report.issues.iter().any(|i| i.code == code);

    let mut positions: BTreeMap<String, Point> = scene.resolved_positions();

    if has(IssueCode::Unpositioned) {
        // Place the missing objects around the ones already resolved
        positions = HeuristicSolver.complete(plan, config, &positions);
    } else if has(IssueCode::Overlap) || has(IssueCode::ConstraintViolated) {
        // Another relaxation round over the current state
        let pinned = BTreeSet::new();
        positions = relax(plan, config, positions, &pinned, true);
    }

    if has(IssueCode::OutOfBounds) {
        shift_into_canvas(&mut positions, scene, config);
    }

    for object in &mut scene.objects {
        if let Some(&point) = positions.get(&object.id) {
            object.position = Position::Resolved(point);
        }
    }
    // Label collisions need no geometry change; the caller re-places labels
}

/// Translate everything so the content box starts inside the canvas. Content
/// larger than the canvas stays anchored at the top-left corner.
fn shift_into_canvas(
    positions: &mut BTreeMap<String, Point>,
    scene: &Scene,
    config: &PlannerConfig,
) {
    let bounds = match scene.bounds() {
        Some(b) => b,
        None => return,
    };
    let margin = config.grid_size;
    let dx = if bounds.x < margin {
        margin - bounds.x
    } else if bounds.right() > config.canvas_width - margin {
        ((config.canvas_width - margin) - bounds.right()).max(margin - bounds.x)
    } else {
        0.0
    };
    let dy = if bounds.y < margin {
        margin - bounds.y
    } else if bounds.bottom() > config.canvas_height - margin {
        ((config.canvas_height - margin) - bounds.bottom()).max(margin - bounds.y)
    } else {
        0.0
    };
    if dx == 0.0 && dy == 0.0 {
        return;
    }
    for point in positions.values_mut() {
        point.x += dx;
        point.y += dy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityCategory, KnowledgeGraph};
    use crate::model::{Constraint, FlowHint, Strategy};

    fn plan_with(entities: &[&str]) -> DiagramPlan {
        let mut graph = KnowledgeGraph::new();
        for id in entities {
            graph
                .add_entity(Entity::new(*id, EntityCategory::Object))
                .unwrap();
        }
        DiagramPlan {
            graph,
            constraints: Vec::<Constraint>::new(),
            complexity: 0.0,
            strategy: Strategy::Heuristic,
            flow: FlowHint::Grid,
        }
    }

    fn scene_at(plan: &DiagramPlan, coords: &[(&str, f64, f64)]) -> Scene {
        let positions: BTreeMap<String, Position> = coords
            .iter()
            .map(|(id, x, y)| (id.to_string(), Position::Resolved(Point::new(*x, *y))))
            .collect();
        Scene::from_plan(plan, &positions, &PlannerConfig::default())
    }

    #[test]
    fn test_repairs_overlap() {
        let plan = plan_with(&["a", "b"]);
        let config = PlannerConfig::default();
        let mut scene = scene_at(&plan, &[("a", 200.0, 200.0), ("b", 205.0, 200.0)]);
        let report =
            RefinementLoop::run(&plan, &config, &ValidationEngine::new(), &mut scene);
        assert!(report.refinement_iterations >= 1);
        assert!(!report.issues.iter().any(|i| i.code == IssueCode::Overlap));
    }

    #[test]
    fn test_places_unpositioned_objects() {
        let plan = plan_with(&["a", "b", "ghost"]);
        let config = PlannerConfig::default();
        let positions: BTreeMap<String, Position> = [
            ("a".to_string(), Position::Resolved(Point::new(200.0, 200.0))),
            ("b".to_string(), Position::Resolved(Point::new(400.0, 200.0))),
        ]
        .into_iter()
        .collect();
        let mut scene = Scene::from_plan(&plan, &positions, &config);
        let report =
            RefinementLoop::run(&plan, &config, &ValidationEngine::new(), &mut scene);
        assert!(scene.is_fully_resolved());
        assert!(!report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::Unpositioned));
    }

    #[test]
    fn test_respects_iteration_cap() {
        let plan = plan_with(&["a", "b"]);
        // Impossible threshold plus a zero-iteration cap: the loop must not run
        let config = PlannerConfig::default()
            .with_refinement_max_iterations(0)
            .with_confidence_threshold(2.0);
        let mut scene = scene_at(&plan, &[("a", 200.0, 200.0), ("b", 205.0, 200.0)]);
        let report =
            RefinementLoop::run(&plan, &config, &ValidationEngine::new(), &mut scene);
        assert_eq!(report.refinement_iterations, 0);
        assert!(report.issues.iter().any(|i| i.code == IssueCode::Overlap));
    }

    #[test]
    fn test_clean_scene_runs_zero_iterations() {
        let plan = plan_with(&["a", "b"]);
        let config = PlannerConfig::default();
        let mut scene = scene_at(&plan, &[("a", 200.0, 200.0), ("b", 500.0, 200.0)]);
        let report =
            RefinementLoop::run(&plan, &config, &ValidationEngine::new(), &mut scene);
        assert_eq!(report.refinement_iterations, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_shifts_content_into_canvas() {
        let plan = plan_with(&["a"]);
        // A lone out-of-bounds warning keeps confidence high, so demand more
        let config = PlannerConfig::default().with_confidence_threshold(1.0);
        let mut scene = scene_at(&plan, &[("a", -300.0, 400.0)]);
        let report =
            RefinementLoop::run(&plan, &config, &ValidationEngine::new(), &mut scene);
        assert!(!report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::OutOfBounds));
        let bbox = scene.object("a").unwrap().bbox().unwrap();
        assert!(bbox.x >= 0.0);
    }
}
