//! Typed knowledge graph of extracted diagram entities and relations.
//!
//! The graph is the input contract of the planner: an ordered arena of
//! entities indexed by stable string id, plus a list of typed relations
//! holding ids (never references, so cyclic relationships and self-loops
//! carry no ownership implications). Pure data and queries; no solving.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{find_similar, PlanError};

/// Closed set of entity categories.
///
/// Unrecognized categories are rejected at construction rather than accepted
/// as arbitrary shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityCategory {
    /// A drawable object (battery, resistor, block, actor).
    Object,
    /// A measured or stated quantity (voltage, mass, count).
    Quantity,
    /// A named parameter constraining the layout (spacing, distance).
    Parameter,
    /// A composite or container structure (circuit, assembly, region).
    Structure,
}

impl EntityCategory {
    /// Parse a category name as produced by the extraction collaborator.
    pub fn parse(id: &str, category: &str) -> Result<Self, PlanError> {
        match category {
            "object" | "Object" => Ok(Self::Object),
            "quantity" | "Quantity" => Ok(Self::Quantity),
            "parameter" | "Parameter" => Ok(Self::Parameter),
            "structure" | "Structure" => Ok(Self::Structure),
            other => Err(PlanError::InvalidCategory {
                id: id.to_string(),
                category: other.to_string(),
            }),
        }
    }
}

/// A typed property value on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// An extracted diagram entity.
///
/// Immutable after construction; the resolved position lives on the scene
/// object, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub category: EntityCategory,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Extraction-provided size, if the source stated one.
    #[serde(default)]
    pub size_hint: Option<(f64, f64)>,
}

impl Entity {
    pub fn new(id: impl Into<String>, category: EntityCategory) -> Self {
        Self {
            id: id.into(),
            category,
            properties: BTreeMap::new(),
            size_hint: None,
        }
    }

    /// Attach a property (builder style).
    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Attach a size hint (builder style).
    pub fn with_size_hint(mut self, width: f64, height: f64) -> Self {
        self.size_hint = Some((width, height));
        self
    }

    /// The display label: explicit `label` property, or the id itself.
    pub fn label(&self) -> &str {
        self.properties
            .get("label")
            .and_then(|v| v.as_text())
            .unwrap_or(&self.id)
    }

    /// The declared role, if any (`role` property).
    pub fn role(&self) -> Option<&str> {
        self.properties.get("role").and_then(|v| v.as_text())
    }
}

/// Kinds of typed relations between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// The endpoints sit next to each other in the diagram.
    SpatialAdjacency,
    /// Source is a component of target.
    PartOf,
    /// Source encloses target.
    Contains,
    /// Source drives or produces target.
    Causes,
    /// Loose association with no spatial meaning.
    RelatedTo,
    /// Source requires target; implies flow ordering.
    Dependency,
}

/// A typed edge between two entities. Immutable once added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub label: String,
    /// Free-text origin of the extraction (sentence, rule name).
    #[serde(default)]
    pub provenance: String,
}

impl Relation {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: RelationKind,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            label: String::new(),
            provenance: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = provenance.into();
        self
    }

    /// True if the relation touches the given entity on either side.
    pub fn touches(&self, entity_id: &str) -> bool {
        self.source_id == entity_id || self.target_id == entity_id
    }

    /// The other endpoint relative to `entity_id`, if this relation touches it.
    pub fn other_endpoint(&self, entity_id: &str) -> Option<&str> {
        if self.source_id == entity_id {
            Some(&self.target_id)
        } else if self.target_id == entity_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// The typed node/edge store the planner consumes.
///
/// Entities keep insertion order; lookups go through an id index. Relation
/// endpoints are validated at insertion time, so a well-formed graph can
/// never hold a dangling edge.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    entities: Vec<Entity>,
    index: BTreeMap<String, usize>,
    relations: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity. Ids must be unique.
    pub fn add_entity(&mut self, entity: Entity) -> Result<(), PlanError> {
        if self.index.contains_key(&entity.id) {
            return Err(PlanError::DuplicateEntity {
                id: entity.id.clone(),
            });
        }
        self.index.insert(entity.id.clone(), self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    /// Add a relation; both endpoints must already exist.
    pub fn add_relation(&mut self, relation: Relation) -> Result<(), PlanError> {
        for endpoint in [&relation.source_id, &relation.target_id] {
            if !self.index.contains_key(endpoint) {
                let suggestions = find_similar(self.index.keys(), endpoint, 2);
                return Err(PlanError::unresolved(
                    endpoint.clone(),
                    format!("relation '{}'", relation.id),
                    suggestions,
                ));
            }
        }
        self.relations.push(relation);
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn contains_entity(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).map(|&i| &self.entities[i])
    }

    /// All entities in insertion order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// All relations in insertion order.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// All entity ids, sorted.
    pub fn entity_ids(&self) -> impl Iterator<Item = &String> {
        self.index.keys()
    }

    /// Entities of a given category, in insertion order.
    pub fn entities_by_category(&self, category: EntityCategory) -> Vec<&Entity> {
        self.entities
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Relations of a given kind, in insertion order.
    pub fn relations_of_kind(&self, kind: RelationKind) -> Vec<&Relation> {
        self.relations.iter().filter(|r| r.kind == kind).collect()
    }

    /// Relations touching the given entity on either side.
    pub fn relations_touching(&self, entity_id: &str) -> Vec<&Relation> {
        self.relations
            .iter()
            .filter(|r| r.touches(entity_id))
            .collect()
    }

    /// Direct neighbors of an entity across all relation kinds, sorted.
    pub fn neighbors(&self, entity_id: &str) -> Vec<&str> {
        let mut out: BTreeSet<&str> = BTreeSet::new();
        for relation in &self.relations {
            if let Some(other) = relation.other_endpoint(entity_id) {
                out.insert(other);
            }
        }
        out.into_iter().collect()
    }

    /// All entity ids reachable from `start` within `max_depth` hops (BFS),
    /// excluding `start` itself. Sorted for determinism.
    pub fn neighborhood(&self, start: &str, max_depth: usize) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for neighbor in self.neighbors(&id) {
                if neighbor != start && seen.insert(neighbor.to_string()) {
                    queue.push_back((neighbor.to_string(), depth + 1));
                }
            }
        }

        seen.into_iter().collect()
    }

    /// Whether every member of `ids` can reach every other using only
    /// relations whose endpoints both lie in `ids`.
    pub fn is_connected_within(&self, ids: &BTreeSet<String>) -> bool {
        let mut members = ids.iter();
        let start = match members.next() {
            Some(s) => s.clone(),
            None => return true,
        };

        let mut seen: BTreeSet<String> = BTreeSet::new();
        seen.insert(start.clone());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start);

        while let Some(id) = queue.pop_front() {
            for relation in &self.relations {
                if !ids.contains(&relation.source_id) || !ids.contains(&relation.target_id) {
                    continue;
                }
                if let Some(other) = relation.other_endpoint(&id) {
                    if seen.insert(other.to_string()) {
                        queue.push_back(other.to_string());
                    }
                }
            }
        }

        seen.len() == ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph
            .add_entity(Entity::new("battery", EntityCategory::Object))
            .unwrap();
        graph
            .add_entity(Entity::new("resistor", EntityCategory::Object))
            .unwrap();
        graph
            .add_entity(Entity::new("switch", EntityCategory::Object))
            .unwrap();
        graph
            .add_entity(Entity::new("circuit", EntityCategory::Structure))
            .unwrap();
        graph
            .add_relation(Relation::new(
                "r1",
                "battery",
                "resistor",
                RelationKind::SpatialAdjacency,
            ))
            .unwrap();
        graph
            .add_relation(Relation::new(
                "r2",
                "resistor",
                "switch",
                RelationKind::Dependency,
            ))
            .unwrap();
        graph
            .add_relation(Relation::new(
                "r3",
                "battery",
                "circuit",
                RelationKind::PartOf,
            ))
            .unwrap();
        graph
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            EntityCategory::parse("a", "object").unwrap(),
            EntityCategory::Object
        );
        assert_eq!(
            EntityCategory::parse("a", "Structure").unwrap(),
            EntityCategory::Structure
        );
        assert!(matches!(
            EntityCategory::parse("a", "widget"),
            Err(PlanError::InvalidCategory { .. })
        ));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let mut graph = KnowledgeGraph::new();
        graph
            .add_entity(Entity::new("a", EntityCategory::Object))
            .unwrap();
        let result = graph.add_entity(Entity::new("a", EntityCategory::Object));
        assert!(matches!(result, Err(PlanError::DuplicateEntity { .. })));
    }

    #[test]
    fn test_dangling_relation_rejected_with_suggestion() {
        let mut graph = KnowledgeGraph::new();
        graph
            .add_entity(Entity::new("battery", EntityCategory::Object))
            .unwrap();
        let result = graph.add_relation(Relation::new(
            "r1",
            "battery",
            "batery",
            RelationKind::RelatedTo,
        ));
        let err = result.unwrap_err();
        assert!(matches!(err, PlanError::UnresolvedReference { .. }));
        assert_eq!(err.suggestions().unwrap(), &["battery".to_string()]);
    }

    #[test]
    fn test_queries_by_type_and_endpoint() {
        let graph = sample_graph();
        assert_eq!(graph.entity_count(), 4);
        assert_eq!(graph.relation_count(), 3);
        assert_eq!(
            graph.entities_by_category(EntityCategory::Object).len(),
            3
        );
        assert_eq!(
            graph.relations_of_kind(RelationKind::Dependency).len(),
            1
        );
        assert_eq!(graph.relations_touching("battery").len(), 2);
        assert_eq!(graph.neighbors("battery"), vec!["circuit", "resistor"]);
    }

    #[test]
    fn test_neighborhood_bounded_depth() {
        let graph = sample_graph();
        assert_eq!(
            graph.neighborhood("battery", 1),
            vec!["circuit".to_string(), "resistor".to_string()]
        );
        let two_hops = graph.neighborhood("battery", 2);
        assert!(two_hops.contains(&"switch".to_string()));
    }

    #[test]
    fn test_connected_within_subset() {
        let graph = sample_graph();
        let loop_set: BTreeSet<String> = ["battery", "resistor", "switch"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(graph.is_connected_within(&loop_set));

        let disjoint: BTreeSet<String> = ["battery", "switch"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // battery-switch has no direct relation inside the subset
        assert!(!graph.is_connected_within(&disjoint));
    }

    #[test]
    fn test_entity_label_and_role() {
        let entity = Entity::new("battery", EntityCategory::Object)
            .with_property("label", PropertyValue::Text("9V Battery".into()))
            .with_property("role", PropertyValue::Text("power_source".into()));
        assert_eq!(entity.label(), "9V Battery");
        assert_eq!(entity.role(), Some("power_source"));
        let bare = Entity::new("wire", EntityCategory::Object);
        assert_eq!(bare.label(), "wire");
        assert_eq!(bare.role(), None);
    }
}
