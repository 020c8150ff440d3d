//! Label placement around positioned objects.
//!
//! Each object's label tries eight compass anchor points around its box and
//! keeps the least-crowded one. Scoring is deterministic: candidates are
//! tried in a fixed order and ties keep the earlier candidate, so the same
//! scene always labels the same way.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::{BoundingBox, Point};
use crate::scene::Scene;

/// Estimated glyph metrics for sizing label boxes.
const CHAR_WIDTH: f64 = 7.0;
const LABEL_HEIGHT: f64 = 14.0;

/// Gap between a label box and its anchor object.
const LABEL_MARGIN: f64 = 4.0;

/// A label with a concrete box, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedLabel {
    pub text: String,
    /// Object this label annotates.
    pub anchor_id: String,
    /// Center of the label box.
    pub position: Point,
    pub width: f64,
    pub height: f64,
}

impl PlacedLabel {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::centered(self.position, self.width, self.height)
    }
}

/// Compass positions tried for each label, in preference order.
const CANDIDATES: [(f64, f64); 8] = [
    (0.0, -1.0),  // above
    (0.0, 1.0),   // below
    (1.0, 0.0),   // right
    (-1.0, 0.0),  // left
    (1.0, -1.0),  // top-right
    (-1.0, -1.0), // top-left
    (1.0, 1.0),   // bottom-right
    (-1.0, 1.0),  // bottom-left
];

pub struct LabelPlacer;

impl LabelPlacer {
    /// Place a label for every resolved object whose label is nonempty.
    ///
    /// Objects are processed in scene order; each label avoids all object
    /// boxes and every label placed before it.
    pub fn place(scene: &Scene) -> Vec<PlacedLabel> {
        let obstacles: Vec<BoundingBox> = scene.objects.iter().filter_map(|o| o.bbox()).collect();
        let mut placed: Vec<PlacedLabel> = Vec::new();

        for object in &scene.objects {
            let anchor = match object.bbox() {
                Some(bbox) => bbox,
                None => continue,
            };
            if object.label.is_empty() {
                continue;
            }
            let width = object.label.chars().count() as f64 * CHAR_WIDTH;
            let height = LABEL_HEIGHT;

            let mut best: Option<(f64, Point)> = None;
            for (dx, dy) in CANDIDATES {
                let center = Point::new(
                    anchor.center().x + dx * (anchor.width + width) / 2.0 + dx * LABEL_MARGIN,
                    anchor.center().y + dy * (anchor.height + height) / 2.0 + dy * LABEL_MARGIN,
                );
                let bbox = BoundingBox::centered(center, width, height);
                let score = crowding(&bbox, &anchor, &obstacles, &placed);
                match best {
                    Some((best_score, _)) if best_score <= score => {}
                    _ => best = Some((score, center)),
                }
                // A completely clear candidate cannot be beaten
                if score == 0.0 {
                    break;
                }
            }
            if let Some((score, center)) = best {
                trace!(object = %object.id, score, "label placed");
                placed.push(PlacedLabel {
                    text: object.label.clone(),
                    anchor_id: object.id.clone(),
                    position: center,
                    width,
                    height,
                });
            }
        }
        placed
    }
}

/// Total area this candidate shares with obstacles and earlier labels. The
/// anchor's own box is exempt.
fn crowding(
    candidate: &BoundingBox,
    own: &BoundingBox,
    obstacles: &[BoundingBox],
    placed: &[PlacedLabel],
) -> f64 {
    let mut score = 0.0;
    for obstacle in obstacles {
        if obstacle == own {
            continue;
        }
        score += candidate.overlap_area(obstacle);
    }
    for label in placed {
        score += candidate.overlap_area(&label.bbox());
    }
    score
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::PlannerConfig;
    use crate::geometry::Position;
    use crate::graph::{Entity, EntityCategory, KnowledgeGraph, PropertyValue};
    use crate::model::{Constraint, DiagramPlan, FlowHint, Strategy};

    fn scene_with(entities: Vec<(&str, Point)>) -> Scene {
        let mut graph = KnowledgeGraph::new();
        let mut positions = BTreeMap::new();
        for (id, point) in &entities {
            graph
                .add_entity(
                    Entity::new(*id, EntityCategory::Object)
                        .with_property("label", PropertyValue::Text(id.to_uppercase())),
                )
                .unwrap();
            positions.insert(id.to_string(), Position::Resolved(*point));
        }
        let plan = DiagramPlan {
            graph,
            constraints: Vec::<Constraint>::new(),
            complexity: 0.0,
            strategy: Strategy::Heuristic,
            flow: FlowHint::Grid,
        };
        Scene::from_plan(&plan, &positions, &PlannerConfig::default())
    }

    #[test]
    fn test_isolated_object_labeled_above() {
        let scene = scene_with(vec![("a", Point::new(200.0, 200.0))]);
        let labels = LabelPlacer::place(&scene);
        assert_eq!(labels.len(), 1);
        assert!(labels[0].position.y < 200.0, "first candidate is above");
        assert_eq!(labels[0].anchor_id, "a");
    }

    #[test]
    fn test_labels_avoid_other_objects() {
        // An object directly above forces the label elsewhere
        let scene = scene_with(vec![
            ("a", Point::new(200.0, 200.0)),
            ("b", Point::new(200.0, 150.0)),
        ]);
        let labels = LabelPlacer::place(&scene);
        let label_a = labels.iter().find(|l| l.anchor_id == "a").unwrap();
        let b_box = scene.object("b").unwrap().bbox().unwrap();
        assert_eq!(label_a.bbox().overlap_area(&b_box), 0.0);
    }

    #[test]
    fn test_labels_avoid_each_other() {
        let scene = scene_with(vec![
            ("a", Point::new(200.0, 200.0)),
            ("b", Point::new(290.0, 200.0)),
        ]);
        let labels = LabelPlacer::place(&scene);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].bbox().overlap_area(&labels[1].bbox()), 0.0);
    }

    #[test]
    fn test_unpositioned_objects_get_no_label() {
        let mut graph = KnowledgeGraph::new();
        graph
            .add_entity(Entity::new("ghost", EntityCategory::Object))
            .unwrap();
        let plan = DiagramPlan {
            graph,
            constraints: Vec::<Constraint>::new(),
            complexity: 0.0,
            strategy: Strategy::Heuristic,
            flow: FlowHint::Grid,
        };
        let scene = Scene::from_plan(&plan, &BTreeMap::new(), &PlannerConfig::default());
        assert!(LabelPlacer::place(&scene).is_empty());
    }

    #[test]
    fn test_determinism() {
        let entities = vec![
            ("a", Point::new(100.0, 100.0)),
            ("b", Point::new(180.0, 100.0)),
            ("c", Point::new(140.0, 160.0)),
        ];
        let first = LabelPlacer::place(&scene_with(entities.clone()));
        let second = LabelPlacer::place(&scene_with(entities));
        assert_eq!(first, second);
    }
}
