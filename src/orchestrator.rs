//! Strategy execution with fallback.
//!
//! The orchestrator runs the selected backend and walks a fixed fallback
//! chain when it fails: symbolic falls back to the exact solver, the exact
//! solver and hybrid fall back to the heuristic, and the heuristic always
//! succeeds, so every run ends with a position for every entity unless a
//! backend returned a deliberate partial result that completion then fills.
//! Failed attempts are recorded as warnings, not errors; the final report
//! carries them so callers can see which strategies were tried.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::geometry::{Point, Position};
use crate::model::{Constraint, DiagramPlan, LayoutView, Strategy};
use crate::solver::{
    ExactSolver, HeuristicSolver, LayoutSolver, SolveOutcome, SymbolicSolver,
};
use crate::validate::{Issue, IssueCode};

/// What one orchestrated layout run produced.
#[derive(Debug, Clone)]
pub struct LayoutRun {
    /// Position for every entity; `Unpositioned` only if a backend reported
    /// a partial result that completion could not pin (does not happen with
    /// the built-in backends, which complete through the heuristic).
    pub positions: BTreeMap<String, Position>,
    /// Strategy the selector (or override) asked for.
    pub strategy_requested: Strategy,
    /// Strategy whose output was actually used.
    pub strategy_used: Strategy,
    /// Solver warnings gathered while falling back.
    pub issues: Vec<Issue>,
}

pub struct LayoutOrchestrator;

impl LayoutOrchestrator {
    /// Run the plan's strategy, falling back until a backend succeeds.
    pub fn run(plan: &DiagramPlan, config: &PlannerConfig) -> LayoutRun {
        let requested = plan.strategy;
        let mut issues = Vec::new();
        let mut strategy = requested;

        loop {
            debug!(%strategy, "layout attempt");
            match Self::attempt(strategy, plan, config, &mut issues) {
                Some((positions, used)) => {
                    if used != requested {
                        debug!(requested = %requested, used = %used, "layout used fallback strategy");
                    }
                    return LayoutRun {
                        positions: positions
                            .into_iter()
                            .map(|(id, p)| (id, Position::Resolved(p)))
                            .collect(),
                        strategy_requested: requested,
                        strategy_used: used,
                        issues,
                    };
                }
                None => {
                    let next = fallback_of(strategy);
                    warn!(failed = %strategy, next = %next, "solver failed; falling back");
                    strategy = next;
                }
            }
        }
    }

    /// One strategy attempt. `None` means fall back; the heuristic never
    /// returns `None`.
    fn attempt(
        strategy: Strategy,
        plan: &DiagramPlan,
        config: &PlannerConfig,
        issues: &mut Vec<Issue>,
    ) -> Option<(BTreeMap<String, Point>, Strategy)> {
        match strategy {
            Strategy::Heuristic => HeuristicSolver
                .solve(plan, config)
                .positions()
                .map(|p| (p, Strategy::Heuristic)),
            Strategy::ConstraintSolver => {
                Self::backend(&ExactSolver, plan, config, issues).map(|p| (p, strategy))
            }
            Strategy::SymbolicSolver => {
                Self::backend(&SymbolicSolver, plan, config, issues).map(|p| (p, strategy))
            }
            Strategy::Hybrid => Some(Self::hybrid(plan, config, issues)),
        }
    }

    /// Run one backend, completing partial results through the heuristic and
    /// converting failures into recorded issues.
    fn backend(
        solver: &dyn LayoutSolver,
        plan: &DiagramPlan,
        config: &PlannerConfig,
        issues: &mut Vec<Issue>,
    ) -> Option<BTreeMap<String, Point>> {
        match solver.solve(plan, config) {
            SolveOutcome::Solved(positions) => Some(positions),
            SolveOutcome::Partial(partial) => {
                let pinned: BTreeMap<String, Point> = partial
                    .iter()
                    .filter_map(|(id, p)| p.point().map(|point| (id.clone(), point)))
                    .collect();
                debug!(
                    solver = solver.name(),
                    pinned = pinned.len(),
                    total = partial.len(),
                    "completing partial result"
                );
                Some(HeuristicSolver.complete(plan, config, &pinned))
            }
            SolveOutcome::Unsatisfiable { conflicts } => {
                issues.push(Issue::warning(
                    IssueCode::SolverUnsatisfiable,
                    format!(
                        "{} solver found the constraints unsatisfiable: {}",
                        solver.name(),
                        conflicts.join("; ")
                    ),
                ));
                None
            }
            SolveOutcome::Timeout { elapsed_ms } => {
                issues.push(Issue::warning(
                    IssueCode::SolverTimeout,
                    format!("{} solver timed out after {}ms", solver.name(), elapsed_ms),
                ));
                None
            }
            SolveOutcome::Failed { reason } => {
                issues.push(Issue::warning(
                    IssueCode::SolverInternal,
                    format!("{} solver failed: {}", solver.name(), reason),
                ));
                None
            }
        }
    }

    /// Heuristic pass first; if constraints remain violated, re-solve just
    /// those exactly, seeded from the heuristic result. Never fails: the
    /// heuristic positions are kept when the exact pass cannot improve them.
    fn hybrid(
        plan: &DiagramPlan,
        config: &PlannerConfig,
        issues: &mut Vec<Issue>,
    ) -> (BTreeMap<String, Point>, Strategy) {
        let heuristic = match HeuristicSolver.solve(plan, config).positions() {
            Some(positions) => positions,
            None => return (BTreeMap::new(), Strategy::Heuristic),
        };

        let violated = violated_constraints(plan, config, &heuristic);
        if violated.is_empty() {
            return (heuristic, Strategy::Hybrid);
        }
        debug!(violated = violated.len(), "hybrid: exact pass on residuals");

        match ExactSolver.solve_subset(plan, config, &violated, &heuristic) {
            SolveOutcome::Solved(positions) => (positions, Strategy::Hybrid),
            SolveOutcome::Partial(partial) => {
                let pinned: BTreeMap<String, Point> = partial
                    .iter()
                    .filter_map(|(id, p)| p.point().map(|point| (id.clone(), point)))
                    .collect();
                (
                    HeuristicSolver.complete(plan, config, &pinned),
                    Strategy::Hybrid,
                )
            }
            SolveOutcome::Unsatisfiable { conflicts } => {
                issues.push(Issue::warning(
                    IssueCode::SolverUnsatisfiable,
                    format!(
                        "hybrid exact pass found the residual constraints unsatisfiable: {}",
                        conflicts.join("; ")
                    ),
                ));
                (heuristic, Strategy::Heuristic)
            }
            SolveOutcome::Timeout { elapsed_ms } => {
                issues.push(Issue::warning(
                    IssueCode::SolverTimeout,
                    format!("hybrid exact pass timed out after {}ms", elapsed_ms),
                ));
                (heuristic, Strategy::Heuristic)
            }
            SolveOutcome::Failed { reason } => {
                issues.push(Issue::warning(
                    IssueCode::SolverInternal,
                    format!("hybrid exact pass failed: {}", reason),
                ));
                (heuristic, Strategy::Heuristic)
            }
        }
    }
}

/// Next strategy to try after a failure. The heuristic is terminal.
fn fallback_of(strategy: Strategy) -> Strategy {
    match strategy {
        Strategy::SymbolicSolver => Strategy::ConstraintSolver,
        Strategy::ConstraintSolver | Strategy::Hybrid | Strategy::Heuristic => {
            Strategy::Heuristic
        }
    }
}

/// Constraints whose residual exceeds one grid step under `positions`.
fn violated_constraints(
    plan: &DiagramPlan,
    config: &PlannerConfig,
    positions: &BTreeMap<String, Point>,
) -> Vec<Constraint> {
    let sizes = plan.sizes(config);
    let view = LayoutView::new(positions, &sizes, config.spacing);
    plan.constraints
        .iter()
        .filter(|c| c.violation(&view) > config.grid_size)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityCategory, KnowledgeGraph};
    use crate::model::{ConstraintKind, FlowHint, Priority};

    fn plan_with(
        entities: &[&str],
        constraints: Vec<Constraint>,
        strategy: Strategy,
    ) -> DiagramPlan {
        let mut graph = KnowledgeGraph::new();
        for id in entities {
            graph
                .add_entity(Entity::new(*id, EntityCategory::Object))
                .unwrap();
        }
        DiagramPlan {
            graph,
            constraints,
            complexity: 0.0,
            strategy,
            flow: FlowHint::Grid,
        }
    }

    fn contradictory_constraints() -> Vec<Constraint> {
        let pair = vec!["a".to_string(), "b".to_string()];
        vec![
            Constraint::new("c1", ConstraintKind::Distance, pair.clone(), Priority::High)
                .with_value(100.0),
            Constraint::new("c2", ConstraintKind::Distance, pair, Priority::High)
                .with_value(250.0),
        ]
    }

    #[test]
    fn test_heuristic_always_positions_everything() {
        let plan = plan_with(&["a", "b", "c"], vec![], Strategy::Heuristic);
        let run = LayoutOrchestrator::run(&plan, &PlannerConfig::default());
        assert_eq!(run.positions.len(), 3);
        assert!(run.positions.values().all(|p| p.is_resolved()));
        assert_eq!(run.strategy_used, Strategy::Heuristic);
        assert!(run.issues.is_empty());
    }

    #[test]
    fn test_unsatisfiable_falls_back_to_heuristic() {
        let plan = plan_with(
            &["a", "b"],
            contradictory_constraints(),
            Strategy::ConstraintSolver,
        );
        let run = LayoutOrchestrator::run(&plan, &PlannerConfig::default());
        assert_eq!(run.strategy_requested, Strategy::ConstraintSolver);
        assert_eq!(run.strategy_used, Strategy::Heuristic);
        assert!(run.positions.values().all(|p| p.is_resolved()));
        assert!(run
            .issues
            .iter()
            .any(|i| i.code == IssueCode::SolverUnsatisfiable));
    }

    #[test]
    fn test_symbolic_falls_back_through_exact() {
        let plan = plan_with(
            &["a", "b"],
            contradictory_constraints(),
            Strategy::SymbolicSolver,
        );
        let run = LayoutOrchestrator::run(&plan, &PlannerConfig::default());
        // Both the symbolic and the exact attempt record a warning
        let unsat = run
            .issues
            .iter()
            .filter(|i| i.code == IssueCode::SolverUnsatisfiable)
            .count();
        assert_eq!(unsat, 2);
        assert_eq!(run.strategy_used, Strategy::Heuristic);
    }

    #[test]
    fn test_timeout_recorded_and_layout_still_produced() {
        let plan = plan_with(
            &["a", "b"],
            vec![Constraint::new(
                "c1",
                ConstraintKind::Distance,
                vec!["a".into(), "b".into()],
                Priority::High,
            )
            .with_value(100.0)],
            Strategy::ConstraintSolver,
        );
        let config = PlannerConfig::default().with_exact_solver_timeout_ms(0);
        let run = LayoutOrchestrator::run(&plan, &config);
        assert!(run.issues.iter().any(|i| i.code == IssueCode::SolverTimeout));
        assert!(run.positions.values().all(|p| p.is_resolved()));
    }

    #[test]
    fn test_hybrid_keeps_heuristic_when_nothing_violated() {
        let plan = plan_with(&["a", "b"], vec![], Strategy::Hybrid);
        let run = LayoutOrchestrator::run(&plan, &PlannerConfig::default());
        assert_eq!(run.strategy_used, Strategy::Hybrid);
        assert!(run.issues.is_empty());
    }

    #[test]
    fn test_determinism_across_runs() {
        let plan = plan_with(
            &["a", "b", "c"],
            vec![Constraint::new(
                "c1",
                ConstraintKind::AlignedH,
                vec!["a".into(), "b".into()],
                Priority::Medium,
            )],
            Strategy::Hybrid,
        );
        let config = PlannerConfig::default();
        let first = LayoutOrchestrator::run(&plan, &config);
        let second = LayoutOrchestrator::run(&plan, &config);
        assert_eq!(first.positions, second.positions);
        assert_eq!(first.strategy_used, second.strategy_used);
    }
}
