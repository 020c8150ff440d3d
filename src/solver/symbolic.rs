//! Algebraic solver: constraints as a sparse linear system over entity
//! coordinates, solved by Gaussian elimination with partial pivoting.
//!
//! Equality-shaped constraints (alignment, stacking, betweenness, symmetry,
//! axis-projected distance) become linear equations. Inequality and cyclic
//! kinds contribute no equations here; validation catches what they would
//! have enforced. Underdetermined directions are grounded from the heuristic
//! seed: a free variable that appears in some equation takes its seed value,
//! while a variable no equation mentions stays `Unpositioned` and is handed
//! back to the caller as a partial result.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::PlannerConfig;
use crate::geometry::{Point, Position};
use crate::model::{Constraint, ConstraintKind, DiagramPlan};

use super::heuristic::seed_positions;
use super::{LayoutSolver, SolveOutcome};

const PIVOT_EPSILON: f64 = 1e-9;

pub struct SymbolicSolver;

impl LayoutSolver for SymbolicSolver {
    fn name(&self) -> &'static str {
        "symbolic"
    }

    fn solve(&self, plan: &DiagramPlan, config: &PlannerConfig) -> SolveOutcome {
        let system = LinearSystem::from_plan(plan, config);
        system.solve()
    }
}

/// One linear equation over the coordinate variables, tagged with the
/// constraint that produced it.
struct Equation {
    coeffs: Vec<f64>,
    rhs: f64,
    label: String,
}

struct LinearSystem {
    /// Entity ids in graph insertion order; variable `2*i` is the x of
    /// entity `i`, `2*i + 1` its y.
    ids: Vec<String>,
    seeds: Vec<Point>,
    equations: Vec<Equation>,
    /// Whether any equation mentions each variable.
    mentioned: Vec<bool>,
}

impl LinearSystem {
    fn from_plan(plan: &DiagramPlan, config: &PlannerConfig) -> Self {
        let seeds_by_id = seed_positions(plan, config);
        let sizes = plan.sizes(config);

        let ids: Vec<String> = plan.graph.entities().iter().map(|e| e.id.clone()).collect();
        let index: BTreeMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let seeds: Vec<Point> = ids
            .iter()
            .map(|id| seeds_by_id.get(id).copied().unwrap_or(Point::new(0.0, 0.0)))
            .collect();
        let n = 2 * ids.len();

        let mut system = Self {
            ids,
            seeds,
            equations: Vec::new(),
            mentioned: vec![false; n],
        };

        for constraint in plan.constraints_by_priority() {
            system.encode(constraint, &index, &sizes, config);
        }
        system
    }

    fn x(&self, entity: usize) -> usize {
        2 * entity
    }

    fn y(&self, entity: usize) -> usize {
        2 * entity + 1
    }

    fn push(&mut self, terms: &[(usize, f64)], rhs: f64, label: &str) {
        let mut coeffs = vec![0.0; self.mentioned.len()];
        for &(var, coeff) in terms {
            coeffs[var] += coeff;
            self.mentioned[var] = true;
        }
        self.equations.push(Equation {
            coeffs,
            rhs,
            label: label.to_string(),
        });
    }

    /// Dominant axis and direction between two seeds: `(horizontal, sign)`.
    fn orientation(&self, a: usize, b: usize) -> (bool, f64) {
        let dx = self.seeds[b].x - self.seeds[a].x;
        let dy = self.seeds[b].y - self.seeds[a].y;
        if dx.abs() >= dy.abs() {
            (true, if dx >= 0.0 { 1.0 } else { -1.0 })
        } else {
            (false, if dy >= 0.0 { 1.0 } else { -1.0 })
        }
    }

    /// `b = a + sign * offset` along the dominant axis, cross axis collapsed.
    fn push_offset(&mut self, a: usize, b: usize, offset: f64, label: &str) {
        let (horizontal, sign) = self.orientation(a, b);
        let (main_a, main_b, cross_a, cross_b) = if horizontal {
            (self.x(a), self.x(b), self.y(a), self.y(b))
        } else {
            (self.y(a), self.y(b), self.x(a), self.x(b))
        };
        self.push(&[(main_b, 1.0), (main_a, -1.0)], sign * offset, label);
        self.push(&[(cross_b, 1.0), (cross_a, -1.0)], 0.0, label);
    }

    fn encode(
        &mut self,
        constraint: &Constraint,
        index: &BTreeMap<String, usize>,
        sizes: &BTreeMap<String, (f64, f64)>,
        config: &PlannerConfig,
    ) {
        let label = constraint.describe();
        let resolve = |id: &String| index.get(id.as_str()).copied();
        let members: Vec<usize> = match constraint.object_ids.iter().map(resolve).collect() {
            Some(members) => members,
            None => return,
        };
        // Sizes resolved up front, indexed like `members`
        let member_sizes: Vec<(f64, f64)> = members
            .iter()
            .map(|&i| {
                sizes
                    .get(&self.ids[i])
                    .copied()
                    .unwrap_or(config.default_object_size)
            })
            .collect();

        match constraint.kind {
            ConstraintKind::AlignedH => {
                for pair in members.windows(2) {
                    self.push(&[(self.y(pair[0]), 1.0), (self.y(pair[1]), -1.0)], 0.0, &label);
                }
            }
            ConstraintKind::AlignedV => {
                for pair in members.windows(2) {
                    self.push(&[(self.x(pair[0]), 1.0), (self.x(pair[1]), -1.0)], 0.0, &label);
                }
            }
            ConstraintKind::Distance => {
                if let [a, b] = members[..] {
                    let d = constraint.numeric_value.unwrap_or(config.spacing * 3.0);
                    self.push_offset(a, b, d, &label);
                }
            }
            ConstraintKind::Adjacent => {
                if let [a, b] = members[..] {
                    let gap = constraint.numeric_value.unwrap_or(config.spacing);
                    let (horizontal, _) = self.orientation(a, b);
                    let ((wa, ha), (wb, hb)) = (member_sizes[0], member_sizes[1]);
                    let extent = if horizontal {
                        (wa + wb) / 2.0
                    } else {
                        (ha + hb) / 2.0
                    };
                    self.push_offset(a, b, extent + gap, &label);
                }
            }
            ConstraintKind::StackedH | ConstraintKind::StackedV => {
                let horizontal = constraint.kind == ConstraintKind::StackedH;
                for w in 0..members.len().saturating_sub(1) {
                    let (a, b) = (members[w], members[w + 1]);
                    let ((wa, ha), (wb, hb)) = (member_sizes[w], member_sizes[w + 1]);
                    let step = if horizontal {
                        (wa + wb) / 2.0 + config.spacing
                    } else {
                        (ha + hb) / 2.0 + config.spacing
                    };
                    let (main_a, main_b, cross_a, cross_b) = if horizontal {
                        (self.x(a), self.x(b), self.y(a), self.y(b))
                    } else {
                        (self.y(a), self.y(b), self.x(a), self.x(b))
                    };
                    self.push(&[(main_b, 1.0), (main_a, -1.0)], step, &label);
                    self.push(&[(cross_b, 1.0), (cross_a, -1.0)], 0.0, &label);
                }
            }
            ConstraintKind::Between => {
                if let [s, l, r] = members[..] {
                    self.push(
                        &[(self.x(s), 2.0), (self.x(l), -1.0), (self.x(r), -1.0)],
                        0.0,
                        &label,
                    );
                    self.push(
                        &[(self.y(s), 2.0), (self.y(l), -1.0), (self.y(r), -1.0)],
                        0.0,
                        &label,
                    );
                }
            }
            ConstraintKind::Perpendicular => {
                if let [a, b, c] = members[..] {
                    let (ab_horizontal, _) = self.orientation(a, b);
                    if ab_horizontal {
                        self.push(&[(self.y(a), 1.0), (self.y(b), -1.0)], 0.0, &label);
                        self.push(&[(self.x(c), 1.0), (self.x(b), -1.0)], 0.0, &label);
                    } else {
                        self.push(&[(self.x(a), 1.0), (self.x(b), -1.0)], 0.0, &label);
                        self.push(&[(self.y(c), 1.0), (self.y(b), -1.0)], 0.0, &label);
                    }
                }
            }
            ConstraintKind::Symmetric => {
                match members[..] {
                    [a, b] => {
                        self.push(
                            &[(self.x(a), 1.0), (self.x(b), 1.0)],
                            config.canvas_width,
                            &label,
                        );
                        self.push(&[(self.y(a), 1.0), (self.y(b), -1.0)], 0.0, &label);
                    }
                    [a, b, axis] => {
                        self.push(
                            &[(self.x(a), 1.0), (self.x(b), 1.0), (self.x(axis), -2.0)],
                            0.0,
                            &label,
                        );
                        self.push(&[(self.y(a), 1.0), (self.y(b), -1.0)], 0.0, &label);
                    }
                    _ => {}
                }
            }
            // Inequality and cyclic kinds have no linear-equality form; the
            // seeded free variables and the validation pass cover them
            ConstraintKind::NoOverlap
            | ConstraintKind::ClosedLoop
            | ConstraintKind::Connected => {}
        }
    }

    fn solve(mut self) -> SolveOutcome {
        let n = self.mentioned.len();
        let m = self.equations.len();

        // Forward elimination with partial pivoting
        let mut pivot_of_row: Vec<Option<usize>> = vec![None; m];
        let mut row = 0;
        for col in 0..n {
            if row >= m {
                break;
            }
            let mut best = row;
            for r in row..m {
                if self.equations[r].coeffs[col].abs() > self.equations[best].coeffs[col].abs() {
                    best = r;
                }
            }
            if self.equations[best].coeffs[col].abs() < PIVOT_EPSILON {
                continue;
            }
            self.equations.swap(row, best);
            for r in (row + 1)..m {
                let factor = self.equations[r].coeffs[col] / self.equations[row].coeffs[col];
                if factor == 0.0 {
                    continue;
                }
                for c in col..n {
                    let head = self.equations[row].coeffs[c];
                    self.equations[r].coeffs[c] -= factor * head;
                }
                let head_rhs = self.equations[row].rhs;
                self.equations[r].rhs -= factor * head_rhs;
            }
            pivot_of_row[row] = Some(col);
            row += 1;
        }

        // A zero row with a nonzero right-hand side is a contradiction
        let mut conflicts = Vec::new();
        for eq in &self.equations {
            let degenerate = eq.coeffs.iter().all(|c| c.abs() < PIVOT_EPSILON);
            if degenerate && eq.rhs.abs() > 1e-6 && !conflicts.contains(&eq.label) {
                conflicts.push(eq.label.clone());
            }
        }
        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "linear system inconsistent");
            return SolveOutcome::Unsatisfiable { conflicts };
        }

        // Back substitution; free variables that equations mention fall back
        // to their seed coordinate
        let mut values: Vec<Option<f64>> = vec![None; n];
        let seed_value = |this: &Self, var: usize| {
            let point = this.seeds[var / 2];
            if var % 2 == 0 {
                point.x
            } else {
                point.y
            }
        };
        for r in (0..row).rev() {
            let pivot = match pivot_of_row[r] {
                Some(pivot) => pivot,
                None => continue,
            };
            let mut acc = self.equations[r].rhs;
            for c in (pivot + 1)..n {
                let coeff = self.equations[r].coeffs[c];
                if coeff.abs() < PIVOT_EPSILON {
                    continue;
                }
                let value = match values[c] {
                    Some(v) => v,
                    None => {
                        let v = seed_value(&self, c);
                        values[c] = Some(v);
                        v
                    }
                };
                acc -= coeff * value;
            }
            values[pivot] = Some(acc / self.equations[r].coeffs[pivot]);
        }
        for var in 0..n {
            if values[var].is_none() && self.mentioned[var] {
                values[var] = Some(seed_value(&self, var));
            }
        }

        // Variables no equation touches stay unpositioned
        let mut resolved = 0usize;
        let mut positions: BTreeMap<String, Position> = BTreeMap::new();
        for (i, id) in self.ids.iter().enumerate() {
            let position = match (values[2 * i], values[2 * i + 1]) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
                    resolved += 1;
                    Position::Resolved(Point::new(x, y))
                }
                _ => Position::Unpositioned,
            };
            positions.insert(id.clone(), position);
        }
        debug!(
            entities = self.ids.len(),
            resolved,
            equations = m,
            "linear system solved"
        );

        if resolved == self.ids.len() {
            let complete = positions
                .into_iter()
                .filter_map(|(id, position)| position.point().map(|p| (id, p)))
                .collect();
            SolveOutcome::Solved(complete)
        } else {
            SolveOutcome::Partial(positions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityCategory, KnowledgeGraph};
    use crate::model::{FlowHint, Priority, Strategy};

    fn plan_with(entities: &[&str], constraints: Vec<Constraint>) -> DiagramPlan {
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
            strategy: Strategy::SymbolicSolver,
            flow: FlowHint::Grid,
        }
    }

    #[test]
    fn test_alignment_and_distance_solved_exactly() {
        let plan = plan_with(
            &["a", "b", "c"],
            vec![
                Constraint::new(
                    "c1",
                    ConstraintKind::AlignedH,
                    vec!["a".into(), "b".into()],
                    Priority::High,
                ),
                Constraint::new(
                    "c2",
                    ConstraintKind::Distance,
                    vec!["b".into(), "c".into()],
                    Priority::Medium,
                )
                .with_value(100.0),
            ],
        );
        let config = PlannerConfig::default();
        let positions = SymbolicSolver.solve(&plan, &config).positions().unwrap();
        assert!((positions["a"].y - positions["b"].y).abs() < 1e-6);
        let dist = positions["b"].distance(positions["c"]);
        assert!((dist - 100.0).abs() < 1e-6, "distance was {}", dist);
    }

    #[test]
    fn test_contradictory_distances_unsatisfiable() {
        let pair = vec!["a".to_string(), "b".to_string()];
        let plan = plan_with(
            &["a", "b"],
            vec![
                Constraint::new("c1", ConstraintKind::Distance, pair.clone(), Priority::High)
                    .with_value(100.0),
                Constraint::new("c2", ConstraintKind::Distance, pair, Priority::High)
                    .with_value(250.0),
            ],
        );
        let config = PlannerConfig::default();
        match SymbolicSolver.solve(&plan, &config) {
            SolveOutcome::Unsatisfiable { conflicts } => assert!(!conflicts.is_empty()),
            other => panic!("expected Unsatisfiable, got {:?}", other),
        }
    }

    #[test]
    fn test_unmentioned_entity_is_unpositioned() {
        let plan = plan_with(
            &["a", "b", "loner"],
            vec![Constraint::new(
                "c1",
                ConstraintKind::AlignedH,
                vec!["a".into(), "b".into()],
                Priority::High,
            )],
        );
        let config = PlannerConfig::default();
        match SymbolicSolver.solve(&plan, &config) {
            SolveOutcome::Partial(positions) => {
                assert_eq!(positions["loner"], Position::Unpositioned);
                assert!(positions["a"].is_resolved());
                assert!(positions["b"].is_resolved());
            }
            other => panic!("expected Partial, got {:?}", other),
        }
    }

    #[test]
    fn test_between_places_subject_at_midpoint() {
        let plan = plan_with(
            &["mid", "l", "r"],
            vec![Constraint::new(
                "c1",
                ConstraintKind::Between,
                vec!["mid".into(), "l".into(), "r".into()],
                Priority::High,
            )],
        );
        let config = PlannerConfig::default();
        let positions = SymbolicSolver.solve(&plan, &config).positions().unwrap();
        let expected_x = (positions["l"].x + positions["r"].x) / 2.0;
        let expected_y = (positions["l"].y + positions["r"].y) / 2.0;
        assert!((positions["mid"].x - expected_x).abs() < 1e-6);
        assert!((positions["mid"].y - expected_y).abs() < 1e-6);
    }

    #[test]
    fn test_chain_of_offsets_scales() {
        // A long stacked chain stays exact, the regime this backend is
        // selected for
        let ids: Vec<String> = (0..20).map(|i| format!("e{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let constraints: Vec<Constraint> = ids
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                Constraint::new(
                    format!("c{}", i),
                    ConstraintKind::Distance,
                    vec![pair[0].clone(), pair[1].clone()],
                    Priority::Medium,
                )
                .with_value(60.0)
            })
            .collect();
        let plan = plan_with(&refs, constraints);
        let config = PlannerConfig::default();
        let positions = SymbolicSolver.solve(&plan, &config).positions().unwrap();
        for pair in ids.windows(2) {
            let dist = positions[&pair[0]].distance(positions[&pair[1]]);
            assert!((dist - 60.0).abs() < 1e-6, "distance was {}", dist);
        }
    }

    #[test]
    fn test_determinism() {
        let plan = plan_with(
            &["a", "b", "c"],
            vec![
                Constraint::new(
                    "c1",
                    ConstraintKind::AlignedV,
                    vec!["a".into(), "b".into()],
                    Priority::High,
                ),
                Constraint::new(
                    "c2",
                    ConstraintKind::Between,
                    vec!["b".into(), "a".into(), "c".into()],
                    Priority::Medium,
                ),
            ],
        );
        let config = PlannerConfig::default();
        let first = SymbolicSolver.solve(&plan, &config).positions().unwrap();
        let second = SymbolicSolver.solve(&plan, &config).positions().unwrap();
        assert_eq!(first, second);
    }
}
