//! Interchangeable solver backends behind one interface.
//!
//! The orchestrator depends only on [`LayoutSolver`] and [`SolveOutcome`],
//! never on a concrete backend. Backends are instantiated per call; none of
//! them keeps state between requests.

pub mod exact;
pub mod heuristic;
pub mod symbolic;

pub use exact::ExactSolver;
pub use heuristic::HeuristicSolver;
pub use symbolic::SymbolicSolver;

use std::collections::BTreeMap;

use crate::config::PlannerConfig;
use crate::geometry::{Point, Position};
use crate::model::DiagramPlan;

/// Result of one solver invocation.
///
/// Failure variants are data, not errors: the orchestrator converts them
/// into fallback transitions, and nothing propagates past its boundary.
#[derive(Debug, Clone)]
pub enum SolveOutcome {
    /// Every entity received a concrete position.
    Solved(BTreeMap<String, Point>),
    /// Some entities remain `Unpositioned` and need a reseeding pass.
    Partial(BTreeMap<String, Position>),
    /// The constraint set cannot be satisfied; lists the conflicts found.
    Unsatisfiable { conflicts: Vec<String> },
    /// The wall-clock budget was exhausted before a solution was extracted.
    Timeout { elapsed_ms: u64 },
    /// Internal solver failure, caught and reported as data.
    Failed { reason: String },
}

impl SolveOutcome {
    /// The complete position map, if this outcome carries one.
    pub fn positions(self) -> Option<BTreeMap<String, Point>> {
        match self {
            SolveOutcome::Solved(positions) => Some(positions),
            _ => None,
        }
    }
}

/// A layout solving strategy.
pub trait LayoutSolver {
    /// Backend name for logs and fallback issues.
    fn name(&self) -> &'static str;

    /// Attempt to position every entity in the plan.
    fn solve(&self, plan: &DiagramPlan, config: &PlannerConfig) -> SolveOutcome;
}
