//! Renderable scene assembled from a plan and a solved layout.
//!
//! The scene is the pipeline's output surface: positioned objects, the edges
//! between them, and placed labels. Entities the solvers could not place stay
//! `Unpositioned` rather than silently landing at the origin, so a renderer
//! can decide how to surface them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::geometry::{BoundingBox, Point, Position};
use crate::graph::{EntityCategory, RelationKind};
use crate::labels::PlacedLabel;
use crate::model::{DiagramPlan, FlowHint, Strategy};

/// One positioned diagram object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: String,
    pub category: EntityCategory,
    pub label: String,
    pub position: Position,
    pub size: (f64, f64),
    /// Renderer hints carried through from entity properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub style_hints: BTreeMap<String, String>,
}

impl SceneObject {
    /// Bounding box, if this object has a resolved position.
    pub fn bbox(&self) -> Option<BoundingBox> {
        let center = self.position.point()?;
        Some(BoundingBox::centered(center, self.size.0, self.size.1))
    }
}

/// A drawable connection between two scene objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

/// The assembled diagram: objects, edges, and (after label placement) labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub edges: Vec<SceneEdge>,
    #[serde(default)]
    pub labels: Vec<PlacedLabel>,
    pub strategy: Strategy,
    pub flow: FlowHint,
}

impl Scene {
    /// Assemble a scene from a plan and the position map a layout run produced.
    ///
    /// Every entity appears exactly once, in graph insertion order; entities
    /// missing from `positions` become `Unpositioned`.
    pub fn from_plan(
        plan: &DiagramPlan,
        positions: &BTreeMap<String, Position>,
        config: &PlannerConfig,
    ) -> Self {
        let objects = plan
            .graph
            .entities()
            .iter()
            .map(|entity| {
                let position = positions
                    .get(&entity.id)
                    .copied()
                    .unwrap_or(Position::Unpositioned);
                let mut style_hints = BTreeMap::new();
                if let Some(role) = entity.role() {
                    style_hints.insert("role".to_string(), role.to_string());
                }
                for (key, value) in &entity.properties {
                    if let Some(hint) = key.strip_prefix("style_") {
                        if let Some(text) = value.as_text() {
                            style_hints.insert(hint.to_string(), text.to_string());
                        }
                    }
                }
                SceneObject {
                    id: entity.id.clone(),
                    category: entity.category,
                    label: entity.label().to_string(),
                    position,
                    size: plan.entity_size(&entity.id, config),
                    style_hints,
                }
            })
            .collect();

        let edges = plan
            .graph
            .relations()
            .iter()
            .map(|relation| SceneEdge {
                id: relation.id.clone(),
                source_id: relation.source_id.clone(),
                target_id: relation.target_id.clone(),
                kind: relation.kind,
                label: relation.label.clone(),
            })
            .collect();

        Self {
            objects,
            edges,
            labels: Vec::new(),
            strategy: plan.strategy,
            flow: plan.flow,
        }
    }

    pub fn object(&self, id: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// Resolved centers only, keyed by object id.
    pub fn resolved_positions(&self) -> BTreeMap<String, Point> {
        self.objects
            .iter()
            .filter_map(|o| o.position.point().map(|p| (o.id.clone(), p)))
            .collect()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.objects.iter().all(|o| o.position.is_resolved())
    }

    /// Union of all resolved object boxes and placed labels.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let mut bounds: Option<BoundingBox> = None;
        for bbox in self
            .objects
            .iter()
            .filter_map(SceneObject::bbox)
            .chain(self.labels.iter().map(PlacedLabel::bbox))
        {
            bounds = Some(match bounds {
                Some(b) => b.union(&bbox),
                None => bbox,
            });
        }
        bounds
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unpositioned = self
            .objects
            .iter()
            .filter(|o| !o.position.is_resolved())
            .count();
        write!(
            f,
            "{} objects ({} unpositioned), {} edges, {} labels via {}",
            self.objects.len(),
            unpositioned,
            self.edges.len(),
            self.labels.len(),
            self.strategy
        )
    }
}
