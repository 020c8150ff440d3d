//! Complexity scoring and strategy selection.
//!
//! Both functions are pure and deterministic: the same plan skeleton always
//! produces the same score and the same strategy, which is what makes the
//! selection reproducible and regression-testable.

use tracing::debug;

use crate::model::{Constraint, ConstraintKind, Strategy};

/// Weighted complexity score over a plan skeleton, clamped to `[0, 1]`.
///
/// Topologically cyclic constraint kinds (closed loops, symmetry) earn a
/// fixed bonus because they are precisely where local relaxation stalls.
pub fn complexity_score(
    entity_count: usize,
    relation_count: usize,
    constraints: &[Constraint],
) -> f64 {
    let mut score = 0.1 * entity_count as f64
        + 0.15 * relation_count as f64
        + 0.2 * constraints.len() as f64;
    if constraints
        .iter()
        .any(|c| matches!(c.kind, ConstraintKind::ClosedLoop | ConstraintKind::Symmetric))
    {
        score += 0.1;
    }
    score.min(1.0)
}

/// Map complexity and constraint shape to a solving strategy.
///
/// Evaluated in order, first match wins:
/// 1. More than 15 constraints: the symbolic solver scales where relaxation
///    becomes unreliable.
/// 2. High complexity, or any closed-loop/symmetry/perpendicularity
///    constraint: the exact solver; these shapes make relaxation oscillate.
/// 3. Moderate complexity: hybrid (heuristic first, exact on the leftovers).
/// 4. Otherwise: plain heuristic.
pub fn select_strategy(complexity: f64, constraints: &[Constraint]) -> Strategy {
    let strategy = if constraints.len() > 15 {
        Strategy::SymbolicSolver
    } else if complexity >= 0.6
        || constraints.iter().any(|c| {
            matches!(
                c.kind,
                ConstraintKind::ClosedLoop
                    | ConstraintKind::Symmetric
                    | ConstraintKind::Perpendicular
            )
        })
    {
        Strategy::ConstraintSolver
    } else if complexity >= 0.3 {
        Strategy::Hybrid
    } else {
        Strategy::Heuristic
    };
    debug!(complexity, constraints = constraints.len(), %strategy, "strategy selected");
    strategy
}
