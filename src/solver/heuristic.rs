//! Iterative relaxation solver with domain-aware seeding.
//!
//! The always-available fallback: terminates in bounded time and always
//! produces a complete position map, trading constraint satisfaction for
//! robustness. Seeding follows the plan's flow hint (left-to-right for
//! dependency chains, vertical stacking for part-of structures, grid
//! otherwise); relaxation applies every constraint once per iteration in
//! priority order, stopping early once the largest nudge drops below one
//! unit; a pairwise pass then resolves residual overlaps, and an aesthetic
//! pass snaps to the grid and recenters the scene on the canvas.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::config::PlannerConfig;
use crate::geometry::{BoundingBox, Point};
use crate::model::{
    ring_chord, Constraint, ConstraintKind, DiagramPlan, FlowHint, LayoutView,
};

use super::{LayoutSolver, SolveOutcome};

/// Relaxation stops early once no object moved farther than this.
const CONVERGENCE_EPSILON: f64 = 1.0;

/// The relaxation backend. Stateless; one instance per call.
pub struct HeuristicSolver;

impl LayoutSolver for HeuristicSolver {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn solve(&self, plan: &DiagramPlan, config: &PlannerConfig) -> SolveOutcome {
        let positions = seed_positions(plan, config);
        let pinned = BTreeSet::new();
        let positions = relax(plan, config, positions, &pinned, true);
        SolveOutcome::Solved(positions)
    }
}

impl HeuristicSolver {
    /// Complete a partial result: keep `pinned` entities exactly where a
    /// previous backend put them and place the rest around them.
    pub fn complete(
        &self,
        plan: &DiagramPlan,
        config: &PlannerConfig,
        pinned: &BTreeMap<String, Point>,
    ) -> BTreeMap<String, Point> {
        let mut positions = seed_positions(plan, config);
        for (id, point) in pinned {
            positions.insert(id.clone(), *point);
        }
        let pinned_ids: BTreeSet<String> = pinned.keys().cloned().collect();
        // No recentering: it would move the pinned objects
        relax(plan, config, positions, &pinned_ids, false)
    }
}

/// Domain-aware initial placement.
pub fn seed_positions(plan: &DiagramPlan, config: &PlannerConfig) -> BTreeMap<String, Point> {
    match plan.flow {
        FlowHint::LeftToRight => seed_layered(plan, config, true),
        FlowHint::TopDown => seed_layered(plan, config, false),
        FlowHint::Grid => seed_grid(plan, config),
    }
}

/// BFS layering over the flow-carrying relations; each layer becomes a
/// column (left-to-right) or a row (top-down).
fn seed_layered(
    plan: &DiagramPlan,
    config: &PlannerConfig,
    horizontal: bool,
) -> BTreeMap<String, Point> {
    let graph = &plan.graph;
    let flow_kinds: &[crate::graph::RelationKind] = if horizontal {
        &[
            crate::graph::RelationKind::Dependency,
            crate::graph::RelationKind::Causes,
        ]
    } else {
        &[
            crate::graph::RelationKind::PartOf,
            crate::graph::RelationKind::Contains,
        ]
    };

    // Entities that are never a flow target start in layer 0
    let mut targets: BTreeSet<&str> = BTreeSet::new();
    for relation in graph.relations() {
        if flow_kinds.contains(&relation.kind) {
            let downstream = if relation.kind == crate::graph::RelationKind::PartOf {
                // part-of points upward; the part sits below the whole
                relation.source_id.as_str()
            } else {
                relation.target_id.as_str()
            };
            targets.insert(downstream);
        }
    }

    let mut layer_of: BTreeMap<String, usize> = BTreeMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for entity in graph.entities() {
        if !targets.contains(entity.id.as_str()) {
            layer_of.insert(entity.id.clone(), 0);
            queue.push_back(entity.id.clone());
        }
    }
    // Fully cyclic flow graphs have no roots; fall back to the first entity
    if queue.is_empty() {
        if let Some(first) = graph.entities().first() {
            layer_of.insert(first.id.clone(), 0);
            queue.push_back(first.id.clone());
        }
    }

    while let Some(id) = queue.pop_front() {
        let layer = layer_of[&id];
        for relation in graph.relations_touching(&id) {
            if !flow_kinds.contains(&relation.kind) {
                continue;
            }
            let (upstream, downstream) = if relation.kind == crate::graph::RelationKind::PartOf {
                (relation.target_id.as_str(), relation.source_id.as_str())
            } else {
                (relation.source_id.as_str(), relation.target_id.as_str())
            };
            if upstream == id && !layer_of.contains_key(downstream) {
                layer_of.insert(downstream.to_string(), layer + 1);
                queue.push_back(downstream.to_string());
            }
        }
    }

    // Anything untouched by flow relations goes into layer 0
    for entity in graph.entities() {
        layer_of.entry(entity.id.clone()).or_insert(0);
    }

    let mut layers: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for entity in graph.entities() {
        layers
            .entry(layer_of[&entity.id])
            .or_default()
            .push(entity.id.clone());
    }

    let (default_w, default_h) = config.default_object_size;
    let step_main = if horizontal {
        default_w + config.spacing * 2.0
    } else {
        default_h + config.spacing * 2.0
    };
    let step_cross = if horizontal {
        default_h + config.spacing
    } else {
        default_w + config.spacing
    };

    let mut positions = BTreeMap::new();
    for (layer, members) in &layers {
        let main = config.spacing + default_w / 2.0 + *layer as f64 * step_main;
        let span = (members.len().saturating_sub(1)) as f64 * step_cross;
        let cross_mid = if horizontal {
            config.canvas_height / 2.0
        } else {
            config.canvas_width / 2.0
        };
        for (i, id) in members.iter().enumerate() {
            let cross = cross_mid - span / 2.0 + i as f64 * step_cross;
            let point = if horizontal {
                Point::new(main, cross)
            } else {
                Point::new(cross, main)
            };
            positions.insert(id.clone(), point);
        }
    }
    positions
}

/// Square-ish grid in entity insertion order.
fn seed_grid(plan: &DiagramPlan, config: &PlannerConfig) -> BTreeMap<String, Point> {
    let entities = plan.graph.entities();
    let count = entities.len().max(1);
    let columns = (count as f64).sqrt().ceil() as usize;
    let (default_w, default_h) = config.default_object_size;
    let step_x = default_w + config.spacing * 2.0;
    let step_y = default_h + config.spacing * 2.0;

    let mut positions = BTreeMap::new();
    for (i, entity) in entities.iter().enumerate() {
        let col = i % columns;
        let row = i / columns;
        positions.insert(
            entity.id.clone(),
            Point::new(
                config.spacing + default_w / 2.0 + col as f64 * step_x,
                config.spacing + default_h / 2.0 + row as f64 * step_y,
            ),
        );
    }
    positions
}

/// Relaxation plus overlap resolution plus (optionally) the aesthetic pass.
pub fn relax(
    plan: &DiagramPlan,
    config: &PlannerConfig,
    mut positions: BTreeMap<String, Point>,
    pinned: &BTreeSet<String>,
    aesthetics: bool,
) -> BTreeMap<String, Point> {
    let sizes = plan.sizes(config);
    let sorted = plan.constraints_by_priority();

    for iteration in 0..config.max_relaxation_iterations {
        let mut max_displacement: f64 = 0.0;
        for constraint in &sorted {
            let moved = apply_constraint(constraint, &mut positions, &sizes, config, pinned);
            max_displacement = max_displacement.max(moved);
        }
        if max_displacement < CONVERGENCE_EPSILON {
            debug!(iteration, "relaxation converged");
            break;
        }
    }

    resolve_overlaps(plan, &mut positions, &sizes, config, pinned);

    if aesthetics {
        snap_to_grid(&mut positions, config.grid_size, pinned);
        recenter(&mut positions, &sizes, config);
    } else {
        snap_to_grid(&mut positions, config.grid_size, pinned);
    }

    positions
}

/// Apply a single constraint once, nudging violating members toward
/// satisfaction. Returns the largest displacement applied.
fn apply_constraint(
    constraint: &Constraint,
    positions: &mut BTreeMap<String, Point>,
    sizes: &BTreeMap<String, (f64, f64)>,
    config: &PlannerConfig,
    pinned: &BTreeSet<String>,
) -> f64 {
    let ids = &constraint.object_ids;
    let movable = |id: &str| !pinned.contains(id);
    let mut max_moved: f64 = 0.0;

    match constraint.kind {
        ConstraintKind::AlignedH => {
            let ys: Vec<f64> = ids.iter().filter_map(|id| positions.get(id).map(|p| p.y)).collect();
            if ys.len() < 2 {
                return 0.0;
            }
            let mean = ys.iter().sum::<f64>() / ys.len() as f64;
            for id in ids {
                if let Some(p) = positions.get(id).copied() {
                    move_entity(positions, pinned, id, Point::new(p.x, mean), &mut max_moved);
                }
            }
        }
        ConstraintKind::AlignedV => {
            let xs: Vec<f64> = ids.iter().filter_map(|id| positions.get(id).map(|p| p.x)).collect();
            if xs.len() < 2 {
                return 0.0;
            }
            let mean = xs.iter().sum::<f64>() / xs.len() as f64;
            for id in ids {
                if let Some(p) = positions.get(id).copied() {
                    move_entity(positions, pinned, id, Point::new(mean, p.y), &mut max_moved);
                }
            }
        }
        ConstraintKind::Distance => {
            let (a, b) = match constraint.pair() {
                Some(pair) => pair,
                None => return 0.0,
            };
            let target = constraint.numeric_value.unwrap_or(config.spacing * 3.0);
            nudge_to_distance(a, b, target, positions, pinned, &mut max_moved);
        }
        ConstraintKind::Connected => {
            let (a, b) = match constraint.pair() {
                Some(pair) => pair,
                None => return 0.0,
            };
            let range = constraint.numeric_value.unwrap_or(config.spacing * 4.0);
            let (pa, pb) = match (positions.get(a).copied(), positions.get(b).copied()) {
                (Some(pa), Some(pb)) => (pa, pb),
                _ => return 0.0,
            };
            if pa.distance(pb) > range {
                nudge_to_distance(a, b, range, positions, pinned, &mut max_moved);
            }
        }
        ConstraintKind::Adjacent => {
            let (a, b) = match constraint.pair() {
                Some(pair) => pair,
                None => return 0.0,
            };
            let (pa, pb) = match (positions.get(a).copied(), positions.get(b).copied()) {
                (Some(pa), Some(pb)) => (pa, pb),
                _ => return 0.0,
            };
            let (&(wa, ha), &(wb, hb)) = match (sizes.get(a), sizes.get(b)) {
                (Some(sa), Some(sb)) => (sa, sb),
                _ => return 0.0,
            };
            let gap = constraint.numeric_value.unwrap_or(config.spacing);
            let dx = (pa.x - pb.x).abs();
            let dy = (pa.y - pb.y).abs();
            let target = if dx >= dy {
                (wa + wb) / 2.0 + gap
            } else {
                (ha + hb) / 2.0 + gap
            };
            // Center distance along the dominant axis only
            let center_target = target.hypot(if dx >= dy { pa.y - pb.y } else { pa.x - pb.x });
            nudge_to_distance(a, b, center_target, positions, pinned, &mut max_moved);
        }
        ConstraintKind::StackedH | ConstraintKind::StackedV => {
            let horizontal = constraint.kind == ConstraintKind::StackedH;
            for pair in ids.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let (pa, pb) = match (positions.get(a).copied(), positions.get(b).copied()) {
                    (Some(pa), Some(pb)) => (pa, pb),
                    _ => continue,
                };
                let (&(wa, ha), &(wb, hb)) = match (sizes.get(a), sizes.get(b)) {
                    (Some(sa), Some(sb)) => (sa, sb),
                    _ => continue,
                };
                let target = if horizontal {
                    Point::new(pa.x + (wa + wb) / 2.0 + config.spacing, pa.y)
                } else {
                    Point::new(pa.x, pa.y + (ha + hb) / 2.0 + config.spacing)
                };
                if movable(b) {
                    move_entity(positions, pinned, b, target, &mut max_moved);
                } else if movable(a) {
                    let back = if horizontal {
                        Point::new(pb.x - (wa + wb) / 2.0 - config.spacing, pb.y)
                    } else {
                        Point::new(pb.x, pb.y - (ha + hb) / 2.0 - config.spacing)
                    };
                    move_entity(positions, pinned, a, back, &mut max_moved);
                }
            }
        }
        ConstraintKind::Between => {
            if ids.len() < 3 {
                return 0.0;
            }
            let (subject, left, right) = (&ids[0], &ids[1], &ids[2]);
            let (pl, pr) = match (positions.get(left).copied(), positions.get(right).copied()) {
                (Some(pl), Some(pr)) => (pl, pr),
                _ => return 0.0,
            };
            let mid = Point::new((pl.x + pr.x) / 2.0, (pl.y + pr.y) / 2.0);
            move_entity(positions, pinned, subject, mid, &mut max_moved);
        }
        ConstraintKind::Perpendicular => {
            if ids.len() < 3 {
                return 0.0;
            }
            let (a, b, c) = (&ids[0], &ids[1], &ids[2]);
            let (pa, pb, pc) = match (
                positions.get(a).copied(),
                positions.get(b).copied(),
                positions.get(c).copied(),
            ) {
                (Some(pa), Some(pb), Some(pc)) => (pa, pb, pc),
                _ => return 0.0,
            };
            let v1 = (pa.x - pb.x, pa.y - pb.y);
            let l1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
            let l2 = pc.distance(pb);
            if l1 < f64::EPSILON || l2 < f64::EPSILON {
                return 0.0;
            }
            let u1 = (v1.0 / l1, v1.1 / l1);
            // Two perpendicular directions; keep the one closer to c
            let p1 = Point::new(pb.x - u1.1 * l2, pb.y + u1.0 * l2);
            let p2 = Point::new(pb.x + u1.1 * l2, pb.y - u1.0 * l2);
            let target = if pc.distance(p1) <= pc.distance(p2) { p1 } else { p2 };
            move_entity(positions, pinned, c, target, &mut max_moved);
        }
        ConstraintKind::Symmetric => {
            let (a, b) = match ids.as_slice() {
                [a, b] | [a, b, _] => (a, b),
                _ => return 0.0,
            };
            let (pa, pb) = match (positions.get(a).copied(), positions.get(b).copied()) {
                (Some(pa), Some(pb)) => (pa, pb),
                _ => return 0.0,
            };
            let axis_x = if ids.len() >= 3 {
                positions.get(&ids[2]).map(|p| p.x).unwrap_or((pa.x + pb.x) / 2.0)
            } else {
                (pa.x + pb.x) / 2.0
            };
            let half = ((pa.x - axis_x).abs() + (pb.x - axis_x).abs()) / 2.0;
            let mean_y = (pa.y + pb.y) / 2.0;
            let (left, right) = if pa.x <= pb.x { (a, b) } else { (b, a) };
            move_entity(positions, pinned, left, Point::new(axis_x - half, mean_y), &mut max_moved);
            move_entity(positions, pinned, right, Point::new(axis_x + half, mean_y), &mut max_moved);
        }
        ConstraintKind::ClosedLoop => {
            let n = ids.len();
            if n < 3 {
                return 0.0;
            }
            let centers: Vec<Point> = ids.iter().filter_map(|id| positions.get(id).copied()).collect();
            if centers.len() < n {
                return 0.0;
            }
            let centroid = Point::new(
                centers.iter().map(|p| p.x).sum::<f64>() / n as f64,
                centers.iter().map(|p| p.y).sum::<f64>() / n as f64,
            );
            let mean_diag = {
                let view = LayoutView::new(positions, sizes, config.spacing);
                let mut total = 0.0;
                for id in ids {
                    if let Some(bb) = view.bbox(id) {
                        total += (bb.width * bb.width + bb.height * bb.height).sqrt();
                    }
                }
                total / n as f64
            };
            let chord = ring_chord(n, config.spacing, mean_diag);
            let radius = chord / (2.0 * (std::f64::consts::PI / n as f64).sin());
            let start_angle = (centers[0].y - centroid.y).atan2(centers[0].x - centroid.x);
            for (i, id) in ids.iter().enumerate() {
                let angle = start_angle + 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                let slot = Point::new(
                    centroid.x + radius * angle.cos(),
                    centroid.y + radius * angle.sin(),
                );
                let current = positions[id];
                // Half-step toward the ring slot to avoid oscillation with
                // other constraints on the same members
                let target = Point::new(
                    (current.x + slot.x) / 2.0,
                    (current.y + slot.y) / 2.0,
                );
                move_entity(positions, pinned, id, target, &mut max_moved);
            }
        }
        ConstraintKind::NoOverlap => {
            // Deferred to the dedicated overlap-resolution pass
        }
    }

    max_moved
}

/// Move one entity to `target` unless it is pinned, tracking displacement.
fn move_entity(
    positions: &mut BTreeMap<String, Point>,
    pinned: &BTreeSet<String>,
    id: &str,
    target: Point,
    max_moved: &mut f64,
) {
    if pinned.contains(id) {
        return;
    }
    if let Some(current) = positions.get(id).copied() {
        let moved = current.distance(target);
        positions.insert(id.to_string(), target);
        *max_moved = max_moved.max(moved);
    }
}

/// Move the endpoints of a pair so their center distance matches `target`.
/// A pinned endpoint shifts the whole correction to the other one.
fn nudge_to_distance(
    a: &str,
    b: &str,
    target: f64,
    positions: &mut BTreeMap<String, Point>,
    pinned: &BTreeSet<String>,
    max_moved: &mut f64,
) {
    let (pa, pb) = match (positions.get(a).copied(), positions.get(b).copied()) {
        (Some(pa), Some(pb)) => (pa, pb),
        _ => return,
    };
    let dist = pa.distance(pb);
    let (ux, uy) = if dist < f64::EPSILON {
        (1.0, 0.0)
    } else {
        ((pb.x - pa.x) / dist, (pb.y - pa.y) / dist)
    };
    let error = dist - target;
    let a_movable = !pinned.contains(a);
    let b_movable = !pinned.contains(b);
    let (shift_a, shift_b) = match (a_movable, b_movable) {
        (true, true) => (error / 2.0, -error / 2.0),
        (true, false) => (error, 0.0),
        (false, true) => (0.0, -error),
        (false, false) => return,
    };
    if a_movable {
        positions.insert(
            a.to_string(),
            Point::new(pa.x + ux * shift_a, pa.y + uy * shift_a),
        );
        *max_moved = max_moved.max(shift_a.abs());
    }
    if b_movable {
        positions.insert(
            b.to_string(),
            Point::new(pb.x + ux * shift_b, pb.y + uy * shift_b),
        );
        *max_moved = max_moved.max(shift_b.abs());
    }
}

/// Pairwise bounding-box check; overlaps are resolved by pushing the
/// lower-priority object (the later one in insertion order, pinned objects
/// never move) along the shorter separating axis.
fn resolve_overlaps(
    plan: &DiagramPlan,
    positions: &mut BTreeMap<String, Point>,
    sizes: &BTreeMap<String, (f64, f64)>,
    config: &PlannerConfig,
    pinned: &BTreeSet<String>,
) {
    let ids: Vec<String> = plan.graph.entities().iter().map(|e| e.id.clone()).collect();

    // A few sweeps: pushing one pair apart can create a new overlap
    for _ in 0..4 {
        let mut any = false;
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (&ids[i], &ids[j]);
                let (pa, pb) = match (positions.get(a).copied(), positions.get(b).copied()) {
                    (Some(pa), Some(pb)) => (pa, pb),
                    _ => continue,
                };
                let (&(wa, ha), &(wb, hb)) = match (sizes.get(a), sizes.get(b)) {
                    (Some(sa), Some(sb)) => (sa, sb),
                    _ => continue,
                };
                let ba = BoundingBox::centered(pa, wa, ha);
                let bb = BoundingBox::centered(pb, wb, hb);
                let (pw, ph) = match ba.penetration(&bb) {
                    Some(p) => p,
                    None => continue,
                };

                // Later object moves unless pinned
                let (mover, fixed_point, mover_point) = if !pinned.contains(b) {
                    (b, pa, pb)
                } else if !pinned.contains(a) {
                    (a, pb, pa)
                } else {
                    continue;
                };

                let push = config.spacing.min(8.0);
                let new_point = if pw <= ph {
                    let dir = if mover_point.x >= fixed_point.x { 1.0 } else { -1.0 };
                    Point::new(mover_point.x + dir * (pw + push), mover_point.y)
                } else {
                    let dir = if mover_point.y >= fixed_point.y { 1.0 } else { -1.0 };
                    Point::new(mover_point.x, mover_point.y + dir * (ph + push))
                };
                positions.insert(mover.clone(), new_point);
                any = true;
            }
        }
        if !any {
            break;
        }
    }
}

/// Snap all movable coordinates to the grid.
fn snap_to_grid(positions: &mut BTreeMap<String, Point>, grid: f64, pinned: &BTreeSet<String>) {
    if grid <= 0.0 {
        return;
    }
    let snapped: Vec<(String, Point)> = positions
        .iter()
        .filter(|(id, _)| !pinned.contains(*id))
        .map(|(id, p)| (id.clone(), p.snapped(grid)))
        .collect();
    for (id, p) in snapped {
        positions.insert(id, p);
    }
}

/// Translate the whole scene so its bounding box centers on the canvas,
/// then re-snap so the translation does not break grid alignment.
fn recenter(
    positions: &mut BTreeMap<String, Point>,
    sizes: &BTreeMap<String, (f64, f64)>,
    config: &PlannerConfig,
) {
    let mut bounds: Option<BoundingBox> = None;
    for (id, p) in positions.iter() {
        let &(w, h) = sizes.get(id).unwrap_or(&(0.0, 0.0));
        let bb = BoundingBox::centered(*p, w, h);
        bounds = Some(match bounds {
            Some(acc) => acc.union(&bb),
            None => bb,
        });
    }
    let bounds = match bounds {
        Some(b) => b,
        None => return,
    };

    let dx = config.canvas_width / 2.0 - bounds.center().x;
    let dy = config.canvas_height / 2.0 - bounds.center().y;
    // Keep the translation on the grid so snapped coordinates stay snapped
    let grid = config.grid_size;
    let (dx, dy) = if grid > 0.0 {
        ((dx / grid).round() * grid, (dy / grid).round() * grid)
    } else {
        (dx, dy)
    };

    for p in positions.values_mut() {
        p.x += dx;
        p.y += dy;
    }
}
