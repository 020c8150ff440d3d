//! Exact constraint solver backed by the kasuari Cassowary implementation.
//!
//! Each entity contributes two continuous decision variables (x and y of its
//! center). Constraint priorities map to solver strengths; nonlinear
//! requirements (distance, adjacency, non-overlap, the perpendicular branch
//! choice) are linearized along the dominant axis of a heuristic seed, which
//! also grounds the system through weak suggested values. The whole
//! invocation runs under a hard wall-clock deadline: on timeout the partial
//! solver state is discarded and a `Timeout` outcome is returned. All
//! kasuari errors are converted to outcomes; nothing panics or propagates.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use kasuari::{
    AddConstraintError, Solver as KasuariSolver, Strength, Variable as KasuariVariable,
    WeightedRelation::*,
};
use tracing::debug;

use crate::config::PlannerConfig;
use crate::geometry::Point;
use crate::model::{ring_chord, Constraint, ConstraintKind, DiagramPlan, Priority};

use super::heuristic::seed_positions;
use super::{LayoutSolver, SolveOutcome};

/// Which coordinate of an entity a solver variable stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Axis {
    X,
    Y,
}

/// The kasuari-backed backend. Instantiated per call; holds no state.
pub struct ExactSolver;

impl LayoutSolver for ExactSolver {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn solve(&self, plan: &DiagramPlan, config: &PlannerConfig) -> SolveOutcome {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(config.exact_solver_timeout_ms);
        let mut encoder = Encoder::new(plan, config);
        match encoder.run(deadline) {
            Ok(outcome) => outcome,
            Err(stop) => stop.into_outcome(started),
        }
    }
}

impl ExactSolver {
    /// Solve only the given constraint subset, seeded from `seeds`.
    ///
    /// Used by the hybrid strategy: the heuristic result supplies the seeds
    /// and the unsatisfied constraints form the subset.
    pub fn solve_subset(
        &self,
        plan: &DiagramPlan,
        config: &PlannerConfig,
        subset: &[Constraint],
        seeds: &BTreeMap<String, Point>,
    ) -> SolveOutcome {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(config.exact_solver_timeout_ms);
        let mut encoder = Encoder::with_seeds(plan, config, subset.to_vec(), seeds.clone());
        match encoder.run(deadline) {
            Ok(outcome) => outcome,
            Err(stop) => stop.into_outcome(started),
        }
    }
}

/// Why an encoding run stopped before producing a solution.
enum Stop {
    Unsatisfiable { conflicts: Vec<String> },
    Timeout,
    Internal(String),
}

impl Stop {
    fn into_outcome(self, started: Instant) -> SolveOutcome {
        match self {
            Stop::Unsatisfiable { conflicts } => SolveOutcome::Unsatisfiable { conflicts },
            Stop::Timeout => SolveOutcome::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Stop::Internal(reason) => SolveOutcome::Failed { reason },
        }
    }
}

struct Encoder<'a> {
    plan: &'a DiagramPlan,
    config: &'a PlannerConfig,
    constraints: Vec<Constraint>,
    seeds: BTreeMap<String, Point>,
    sizes: BTreeMap<String, (f64, f64)>,
    solver: KasuariSolver,
    variables: BTreeMap<(String, Axis), KasuariVariable>,
    reverse: HashMap<KasuariVariable, (String, Axis)>,
}

impl<'a> Encoder<'a> {
    fn new(plan: &'a DiagramPlan, config: &'a PlannerConfig) -> Self {
        let seeds = ring_adjusted_seeds(plan, config);
        Self::with_seeds(plan, config, plan.constraints.clone(), seeds)
    }

    fn with_seeds(
        plan: &'a DiagramPlan,
        config: &'a PlannerConfig,
        constraints: Vec<Constraint>,
        seeds: BTreeMap<String, Point>,
    ) -> Self {
        Self {
            plan,
            config,
            constraints,
            sizes: plan.sizes(config),
            seeds,
            solver: KasuariSolver::new(),
            variables: BTreeMap::new(),
            reverse: HashMap::new(),
        }
    }

    fn run(&mut self, deadline: Instant) -> Result<SolveOutcome, Stop> {
        self.ground_variables(deadline)?;

        let mut sorted = self.constraints.clone();
        sorted.sort_by_key(|c| c.priority);
        for constraint in &sorted {
            if Instant::now() > deadline {
                return Err(Stop::Timeout);
            }
            self.encode(constraint)?;
        }

        if Instant::now() > deadline {
            return Err(Stop::Timeout);
        }
        Ok(SolveOutcome::Solved(self.extract()))
    }

    fn var(&mut self, id: &str, axis: Axis) -> KasuariVariable {
        let key = (id.to_string(), axis);
        if let Some(&v) = self.variables.get(&key) {
            return v;
        }
        let v = KasuariVariable::new();
        self.variables.insert(key.clone(), v);
        self.reverse.insert(v, key);
        v
    }

    /// Create both variables for every entity and anchor them weakly to the
    /// heuristic seed so underconstrained directions stay grounded.
    fn ground_variables(&mut self, deadline: Instant) -> Result<(), Stop> {
        let ids: Vec<String> = self
            .plan
            .graph
            .entities()
            .iter()
            .map(|e| e.id.clone())
            .collect();
        for id in ids {
            if Instant::now() > deadline {
                return Err(Stop::Timeout);
            }
            let seed = self.seeds.get(&id).copied().unwrap_or(Point::new(
                self.config.canvas_width / 2.0,
                self.config.canvas_height / 2.0,
            ));
            for (axis, value) in [(Axis::X, seed.x), (Axis::Y, seed.y)] {
                let v = self.var(&id, axis);
                self.solver
                    .add_edit_variable(v, Strength::WEAK)
                    .map_err(|e| Stop::Internal(format!("edit variable: {}", e)))?;
                self.solver
                    .suggest_value(v, value)
                    .map_err(|e| Stop::Internal(format!("suggest value: {}", e)))?;
            }
        }
        Ok(())
    }

    fn strength(priority: Priority) -> Strength {
        match priority {
            Priority::High => Strength::REQUIRED,
            Priority::Medium => Strength::STRONG,
            Priority::Low => Strength::MEDIUM,
        }
    }

    /// One tier weaker, for the secondary axis of a linearized constraint.
    fn secondary(priority: Priority) -> Strength {
        match priority {
            Priority::High => Strength::STRONG,
            Priority::Medium => Strength::MEDIUM,
            Priority::Low => Strength::WEAK,
        }
    }

    fn add(
        &mut self,
        constraint: kasuari::Constraint,
        describe: &str,
    ) -> Result<(), Stop> {
        match self.solver.add_constraint(constraint) {
            Ok(()) => Ok(()),
            Err(AddConstraintError::UnsatisfiableConstraint) => Err(Stop::Unsatisfiable {
                conflicts: vec![describe.to_string()],
            }),
            // A duplicate assertion is harmless here
            Err(AddConstraintError::DuplicateConstraint) => Ok(()),
            Err(AddConstraintError::InternalSolverError(msg)) => {
                Err(Stop::Internal(format!("{} ({})", msg, describe)))
            }
        }
    }

    fn size(&self, id: &str) -> (f64, f64) {
        self.sizes
            .get(id)
            .copied()
            .unwrap_or(self.config.default_object_size)
    }

    fn seed(&self, id: &str) -> Point {
        self.seeds.get(id).copied().unwrap_or(Point::new(0.0, 0.0))
    }

    /// Dominant axis and direction between two seeds: `(horizontal, sign)`.
    fn orientation(&self, a: &str, b: &str) -> (bool, f64) {
        let (pa, pb) = (self.seed(a), self.seed(b));
        let dx = pb.x - pa.x;
        let dy = pb.y - pa.y;
        if dx.abs() >= dy.abs() {
            (true, if dx >= 0.0 { 1.0 } else { -1.0 })
        } else {
            (false, if dy >= 0.0 { 1.0 } else { -1.0 })
        }
    }

    fn encode(&mut self, constraint: &Constraint) -> Result<(), Stop> {
        let strength = Self::strength(constraint.priority);
        let weaker = Self::secondary(constraint.priority);
        let desc = constraint.describe();
        let ids = constraint.object_ids.clone();

        match constraint.kind {
            ConstraintKind::AlignedH => {
                for pair in ids.windows(2) {
                    let ya = self.var(&pair[0], Axis::Y);
                    let yb = self.var(&pair[1], Axis::Y);
                    self.add(ya | EQ(strength) | yb, &desc)?;
                }
            }
            ConstraintKind::AlignedV => {
                for pair in ids.windows(2) {
                    let xa = self.var(&pair[0], Axis::X);
                    let xb = self.var(&pair[1], Axis::X);
                    self.add(xa | EQ(strength) | xb, &desc)?;
                }
            }
            ConstraintKind::Distance => {
                let (a, b) = match constraint.pair() {
                    Some(pair) => pair,
                    None => return Ok(()),
                };
                let (a, b) = (a.to_string(), b.to_string());
                let d = constraint
                    .numeric_value
                    .unwrap_or(self.config.spacing * 3.0);
                self.encode_offset(&a, &b, d, strength, weaker, &desc)?;
            }
            ConstraintKind::Adjacent => {
                let (a, b) = match constraint.pair() {
                    Some(pair) => pair,
                    None => return Ok(()),
                };
                let (a, b) = (a.to_string(), b.to_string());
                let gap = constraint.numeric_value.unwrap_or(self.config.spacing);
                let (horizontal, _) = self.orientation(&a, &b);
                let ((wa, ha), (wb, hb)) = (self.size(&a), self.size(&b));
                let extent = if horizontal {
                    (wa + wb) / 2.0
                } else {
                    (ha + hb) / 2.0
                };
                self.encode_offset(&a, &b, extent + gap, strength, weaker, &desc)?;
            }
            ConstraintKind::StackedH | ConstraintKind::StackedV => {
                let horizontal = constraint.kind == ConstraintKind::StackedH;
                for pair in ids.windows(2) {
                    let (a, b) = (pair[0].clone(), pair[1].clone());
                    let ((wa, ha), (wb, hb)) = (self.size(&a), self.size(&b));
                    let step = if horizontal {
                        (wa + wb) / 2.0 + self.config.spacing
                    } else {
                        (ha + hb) / 2.0 + self.config.spacing
                    };
                    let (main, cross) = if horizontal {
                        (Axis::X, Axis::Y)
                    } else {
                        (Axis::Y, Axis::X)
                    };
                    let ma = self.var(&a, main);
                    let mb = self.var(&b, main);
                    let ca = self.var(&a, cross);
                    let cb = self.var(&b, cross);
                    self.add(mb | EQ(strength) | ma + step, &desc)?;
                    self.add(cb | EQ(strength) | ca, &desc)?;
                }
            }
            ConstraintKind::Between => {
                if ids.len() < 3 {
                    return Ok(());
                }
                let (s, l, r) = (ids[0].clone(), ids[1].clone(), ids[2].clone());
                for axis in [Axis::X, Axis::Y] {
                    let vs: kasuari::Expression = self.var(&s, axis).into();
                    let vl = self.var(&l, axis);
                    let vr = self.var(&r, axis);
                    // subject = (left + right) / 2, written without division
                    self.add(2.0 * vs | EQ(strength) | vl + vr, &desc)?;
                }
            }
            ConstraintKind::Perpendicular => {
                if ids.len() < 3 {
                    return Ok(());
                }
                let (a, b, c) = (ids[0].clone(), ids[1].clone(), ids[2].clone());
                // Branch choice from the seed: the straighter leg stays
                // straight, the other leg turns
                let (ab_horizontal, _) = self.orientation(&a, &b);
                if ab_horizontal {
                    let ya = self.var(&a, Axis::Y);
                    let yb = self.var(&b, Axis::Y);
                    let xb = self.var(&b, Axis::X);
                    let xc = self.var(&c, Axis::X);
                    self.add(ya | EQ(strength) | yb, &desc)?;
                    self.add(xc | EQ(strength) | xb, &desc)?;
                } else {
                    let xa = self.var(&a, Axis::X);
                    let xb = self.var(&b, Axis::X);
                    let yb = self.var(&b, Axis::Y);
                    let yc = self.var(&c, Axis::Y);
                    self.add(xa | EQ(strength) | xb, &desc)?;
                    self.add(yc | EQ(strength) | yb, &desc)?;
                }
            }
            ConstraintKind::Symmetric => {
                let (a, b) = match ids.as_slice() {
                    [a, b] | [a, b, _] => (a.clone(), b.clone()),
                    _ => return Ok(()),
                };
                let xa = self.var(&a, Axis::X);
                let xb = self.var(&b, Axis::X);
                let ya = self.var(&a, Axis::Y);
                let yb = self.var(&b, Axis::Y);
                if ids.len() >= 3 {
                    let axis_id = ids[2].clone();
                    let v: kasuari::Expression = self.var(&axis_id, Axis::X).into();
                    self.add(xa + xb | EQ(strength) | 2.0 * v, &desc)?;
                } else {
                    // Mirror about the vertical canvas midline
                    self.add(xa + xb | EQ(strength) | self.config.canvas_width, &desc)?;
                }
                self.add(ya | EQ(weaker) | yb, &desc)?;
            }
            ConstraintKind::NoOverlap => {
                let (a, b) = match constraint.pair() {
                    Some(pair) => pair,
                    None => return Ok(()),
                };
                let (a, b) = (a.to_string(), b.to_string());
                // Disjunction of four half-plane separations, resolved by
                // keeping the side the seed already chose
                let (horizontal, sign) = self.orientation(&a, &b);
                let ((wa, ha), (wb, hb)) = (self.size(&a), self.size(&b));
                let (axis, extent) = if horizontal {
                    (Axis::X, (wa + wb) / 2.0)
                } else {
                    (Axis::Y, (ha + hb) / 2.0)
                };
                let va = self.var(&a, axis);
                let vb = self.var(&b, axis);
                let clearance = extent + self.config.overlap_tolerance;
                if sign >= 0.0 {
                    self.add(vb | GE(strength) | va + clearance, &desc)?;
                } else {
                    self.add(va | GE(strength) | vb + clearance, &desc)?;
                }
            }
            ConstraintKind::ClosedLoop | ConstraintKind::Connected => {
                // Carried by the ring-adjusted seeds; no linear encoding
            }
        }
        Ok(())
    }

    /// `b = a + sign * offset` along the dominant seed axis, with the cross
    /// axis collapsed one strength tier weaker.
    fn encode_offset(
        &mut self,
        a: &str,
        b: &str,
        offset: f64,
        strength: Strength,
        weaker: Strength,
        desc: &str,
    ) -> Result<(), Stop> {
        let (horizontal, sign) = self.orientation(a, b);
        let (main, cross) = if horizontal {
            (Axis::X, Axis::Y)
        } else {
            (Axis::Y, Axis::X)
        };
        let ma = self.var(a, main);
        let mb = self.var(b, main);
        let ca = self.var(a, cross);
        let cb = self.var(b, cross);
        self.add(mb | EQ(strength) | ma + sign * offset, desc)?;
        self.add(cb | EQ(weaker) | ca, desc)
    }

    /// Read variable assignments back into positions. Variables the solver
    /// never reported keep their seed value.
    fn extract(&mut self) -> BTreeMap<String, Point> {
        let mut positions: BTreeMap<String, Point> = self.seeds.clone();
        for entity in self.plan.graph.entities() {
            positions
                .entry(entity.id.clone())
                .or_insert(Point::new(0.0, 0.0));
        }
        let changes: Vec<(KasuariVariable, f64)> = self
            .solver
            .fetch_changes()
            .iter()
            .copied()
            .collect();
        for (kvar, value) in changes {
            if let Some((id, axis)) = self.reverse.get(&kvar) {
                if let Some(point) = positions.get_mut(id) {
                    match axis {
                        Axis::X => point.x = value,
                        Axis::Y => point.y = value,
                    }
                }
            }
        }
        debug!(entities = positions.len(), "exact solve extracted");
        positions
    }
}

/// Heuristic seeds, with closed-loop members rearranged onto a ring around
/// their seed centroid so the loop shape survives the linear encoding.
fn ring_adjusted_seeds(plan: &DiagramPlan, config: &PlannerConfig) -> BTreeMap<String, Point> {
    let mut seeds = seed_positions(plan, config);
    let sizes = plan.sizes(config);

    for constraint in &plan.constraints {
        if constraint.kind != ConstraintKind::ClosedLoop || constraint.object_ids.len() < 3 {
            continue;
        }
        let ids = &constraint.object_ids;
        let n = ids.len();
        let centroid = {
            let pts: Vec<Point> = ids.iter().filter_map(|id| seeds.get(id).copied()).collect();
            if pts.len() < n {
                continue;
            }
            Point::new(
                pts.iter().map(|p| p.x).sum::<f64>() / n as f64,
                pts.iter().map(|p| p.y).sum::<f64>() / n as f64,
            )
        };
        let mean_diag = ids
            .iter()
            .filter_map(|id| sizes.get(id))
            .map(|(w, h)| (w * w + h * h).sqrt())
            .sum::<f64>()
            / n as f64;
        let chord = ring_chord(n, config.spacing, mean_diag);
        let radius = chord / (2.0 * (std::f64::consts::PI / n as f64).sin());
        for (i, id) in ids.iter().enumerate() {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            seeds.insert(
                id.clone(),
                Point::new(
                    centroid.x + radius * angle.cos(),
                    centroid.y + radius * angle.sin(),
                ),
            );
        }
    }
    seeds
}
