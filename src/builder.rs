//! Converts graph relations into a normalized constraint model.
//!
//! Each relation kind maps to one or more typed constraints; numeric values
//! are inferred from relation labels that parse as numbers and from
//! `Parameter` entities that name the pair they constrain. Every spatially
//! related object pair additionally gets a High-priority NoOverlap
//! constraint, deduplicated across rules.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::PlannerConfig;
use crate::graph::{EntityCategory, KnowledgeGraph, PropertyValue, RelationKind};
use crate::model::{Constraint, ConstraintKind, FlowHint, Priority};

/// Builds the constraint list and flow hint for a knowledge graph.
pub struct ConstraintModelBuilder<'a> {
    graph: &'a KnowledgeGraph,
    config: &'a PlannerConfig,
    constraints: Vec<Constraint>,
    no_overlap_pairs: BTreeSet<(String, String)>,
    next_id: usize,
}

impl<'a> ConstraintModelBuilder<'a> {
    pub fn new(graph: &'a KnowledgeGraph, config: &'a PlannerConfig) -> Self {
        Self {
            graph,
            config,
            constraints: Vec::new(),
            no_overlap_pairs: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Run all mapping and inference rules, producing the constraint list
    /// and the seeding flow hint.
    pub fn build(mut self) -> (Vec<Constraint>, FlowHint) {
        for relation in self.graph.relations() {
            self.map_relation(
                relation.kind,
                &relation.source_id,
                &relation.target_id,
                parse_numeric_label(&relation.label),
            );
        }
        self.infer_closed_loops();
        self.infer_symmetry();
        self.apply_parameter_entities();

        let flow = self.flow_hint();
        debug!(
            constraints = self.constraints.len(),
            flow = ?flow,
            "constraint model built"
        );
        (self.constraints, flow)
    }

    fn fresh_id(&mut self, kind: ConstraintKind) -> String {
        let id = format!("c{}-{}", self.next_id, kind);
        self.next_id += 1;
        id
    }

    fn push(&mut self, kind: ConstraintKind, ids: Vec<String>, priority: Priority) -> usize {
        let id = self.fresh_id(kind);
        self.constraints.push(Constraint::new(id, kind, ids, priority));
        self.constraints.len() - 1
    }

    fn push_with_value(
        &mut self,
        kind: ConstraintKind,
        ids: Vec<String>,
        priority: Priority,
        value: f64,
    ) {
        let idx = self.push(kind, ids, priority);
        self.constraints[idx].numeric_value = Some(value);
    }

    /// NoOverlap for the unordered pair, once.
    fn push_no_overlap(&mut self, a: &str, b: &str) {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        if self.no_overlap_pairs.insert(key) {
            self.push(
                ConstraintKind::NoOverlap,
                vec![a.to_string(), b.to_string()],
                Priority::High,
            );
        }
    }

    fn map_relation(&mut self, kind: RelationKind, source: &str, target: &str, value: Option<f64>) {
        let pair = vec![source.to_string(), target.to_string()];
        match kind {
            RelationKind::SpatialAdjacency => {
                let idx = self.push(ConstraintKind::Adjacent, pair, Priority::Medium);
                self.constraints[idx].numeric_value = value;
                self.push_no_overlap(source, target);
            }
            RelationKind::Dependency => {
                let distance = value.unwrap_or(self.config.spacing * 3.0);
                self.push_with_value(ConstraintKind::Distance, pair, Priority::Medium, distance);
                self.push_no_overlap(source, target);
            }
            RelationKind::Causes => {
                self.push(ConstraintKind::AlignedH, pair.clone(), Priority::Medium);
                let distance = value.unwrap_or(self.config.spacing * 3.0);
                self.push_with_value(ConstraintKind::Distance, pair, Priority::Low, distance);
                self.push_no_overlap(source, target);
            }
            RelationKind::PartOf => {
                // Whole above part
                self.push(
                    ConstraintKind::StackedV,
                    vec![target.to_string(), source.to_string()],
                    Priority::Medium,
                );
                self.push(ConstraintKind::AlignedV, pair, Priority::Low);
                self.push_no_overlap(source, target);
            }
            RelationKind::Contains => {
                let idx = self.push(ConstraintKind::Adjacent, pair.clone(), Priority::High);
                self.constraints[idx].numeric_value = value;
                self.push(ConstraintKind::Connected, pair, Priority::Low);
                self.push_no_overlap(source, target);
            }
            RelationKind::RelatedTo => {
                self.push(ConstraintKind::Connected, pair, Priority::Low);
            }
        }
    }

    /// A `Structure` entity flagged `closed_loop` turns the set of entities
    /// related to it (PartOf/Contains) into a ClosedLoop constraint, plus a
    /// Connected chain so the members stay solvable heuristically.
    fn infer_closed_loops(&mut self) {
        let structures: Vec<String> = self
            .graph
            .entities_by_category(EntityCategory::Structure)
            .iter()
            .filter(|e| {
                matches!(
                    e.properties.get("closed_loop"),
                    Some(PropertyValue::Flag(true))
                )
            })
            .map(|e| e.id.clone())
            .collect();

        for structure_id in structures {
            let mut members: Vec<String> = Vec::new();
            for relation in self.graph.relations() {
                let is_membership = matches!(
                    relation.kind,
                    RelationKind::PartOf | RelationKind::Contains
                );
                if !is_membership {
                    continue;
                }
                if relation.target_id == structure_id && !members.contains(&relation.source_id) {
                    members.push(relation.source_id.clone());
                } else if relation.source_id == structure_id
                    && relation.kind == RelationKind::Contains
                    && !members.contains(&relation.target_id)
                {
                    members.push(relation.target_id.clone());
                }
            }
            if members.len() >= 3 {
                self.push(ConstraintKind::ClosedLoop, members, Priority::High);
            }
        }
    }

    /// Entities naming a mirror partner (`symmetric_with` property) form a
    /// Symmetric constraint, once per unordered pair.
    fn infer_symmetry(&mut self) {
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        let pairs: Vec<(String, String)> = self
            .graph
            .entities()
            .iter()
            .filter_map(|e| {
                let partner = e
                    .properties
                    .get("symmetric_with")
                    .and_then(|v| v.as_text())?;
                if !self.graph.contains_entity(partner) {
                    return None;
                }
                Some((e.id.clone(), partner.to_string()))
            })
            .collect();

        for (a, b) in pairs {
            let key = if a <= b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            if seen.insert(key) {
                self.push(ConstraintKind::Symmetric, vec![a, b], Priority::Medium);
            }
        }
    }

    /// `Parameter` entities carrying `applies_to = "a,b"` plus a numeric
    /// `distance` or `spacing` property parameterize the named pair.
    fn apply_parameter_entities(&mut self) {
        let parameters: Vec<(Vec<String>, Option<f64>, Option<f64>)> = self
            .graph
            .entities_by_category(EntityCategory::Parameter)
            .iter()
            .filter_map(|e| {
                let targets: Vec<String> = e
                    .properties
                    .get("applies_to")
                    .and_then(|v| v.as_text())?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                let distance = e.properties.get("distance").and_then(|v| v.as_number());
                let spacing = e.properties.get("spacing").and_then(|v| v.as_number());
                Some((targets, distance, spacing))
            })
            .collect();

        for (targets, distance, spacing) in parameters {
            if targets.len() != 2 {
                continue;
            }
            if !targets.iter().all(|id| self.graph.contains_entity(id)) {
                continue;
            }
            if let Some(d) = distance {
                self.push_with_value(
                    ConstraintKind::Distance,
                    targets.clone(),
                    Priority::High,
                    d,
                );
            }
            if let Some(s) = spacing {
                self.push_with_value(ConstraintKind::Adjacent, targets, Priority::High, s);
            }
        }
    }

    /// Pick a seeding direction from the relation mix: dependency and causal
    /// chains read left to right, part-of structures stack downward.
    fn flow_hint(&self) -> FlowHint {
        let mut flow = 0usize;
        let mut stack = 0usize;
        for relation in self.graph.relations() {
            match relation.kind {
                RelationKind::Dependency | RelationKind::Causes => flow += 1,
                RelationKind::PartOf | RelationKind::Contains => stack += 1,
                _ => {}
            }
        }
        if flow == 0 && stack == 0 {
            FlowHint::Grid
        } else if flow >= stack {
            FlowHint::LeftToRight
        } else {
            FlowHint::TopDown
        }
    }
}

/// Parse a relation label like "100" or "100.0" into a numeric value.
fn parse_numeric_label(label: &str) -> Option<f64> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}
