//! Diagram planner - constraint-based layout for knowledge-graph diagrams.
//!
//! The pipeline turns a typed knowledge graph into a positioned scene:
//! relations become geometric constraints, a complexity score picks a
//! solving strategy, the orchestrator runs that strategy with fallback, and
//! a bounded validate-and-repair loop polishes the result. Every phase is
//! deterministic; the same graph and config always produce the same scene.
//!
//! # Example
//!
//! ```rust
//! use diagram_planner::{plan, Entity, EntityCategory, KnowledgeGraph, Relation, RelationKind};
//!
//! let mut graph = KnowledgeGraph::new();
//! graph.add_entity(Entity::new("battery", EntityCategory::Object)).unwrap();
//! graph.add_entity(Entity::new("bulb", EntityCategory::Object)).unwrap();
//! graph
//!     .add_relation(Relation::new("r1", "battery", "bulb", RelationKind::SpatialAdjacency))
//!     .unwrap();
//!
//! let outcome = plan(graph).unwrap();
//! assert!(outcome.scene.is_fully_resolved());
//! assert!(outcome.report.confidence > 0.0);
//! ```

pub mod assess;
pub mod builder;
pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod graph;
pub mod labels;
pub mod model;
pub mod orchestrator;
pub mod refine;
pub mod scene;
pub mod solver;
pub mod validate;

pub use builder::ConstraintModelBuilder;
pub use config::PlannerConfig;
pub use error::PlanError;
pub use geometry::{BoundingBox, Point, Position};
pub use graph::{Entity, EntityCategory, KnowledgeGraph, PropertyValue, Relation, RelationKind};
pub use model::{Constraint, ConstraintKind, DiagramPlan, FlowHint, Priority, Strategy};
pub use orchestrator::LayoutOrchestrator;
pub use scene::{Scene, SceneEdge, SceneObject};
pub use validate::{
    DomainRule, Issue, IssueCode, Severity, ValidationEngine, ValidationReport,
};

use tracing::info;

use labels::LabelPlacer;
use refine::RefinementLoop;

/// Everything one planning run produces.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// The derived plan: constraints, complexity, selected strategy.
    pub plan: DiagramPlan,
    /// The positioned scene. `strategy` reflects the backend actually used.
    pub scene: Scene,
    /// Validation findings, solver warnings, and the confidence score.
    pub report: ValidationReport,
}

/// Plan a diagram with the default configuration.
///
/// This is the main entry point. It derives constraints from the graph,
/// selects and runs a solving strategy, places labels, and refines the
/// result. The only fatal failure is a constraint referencing an entity the
/// graph does not contain; everything else degrades into report issues.
pub fn plan(graph: KnowledgeGraph) -> Result<PlanOutcome, PlanError> {
    plan_with_config(graph, PlannerConfig::default())
}

/// Plan a diagram with a custom configuration.
///
/// # Example
///
/// ```rust
/// use diagram_planner::{
///     plan_with_config, Entity, EntityCategory, KnowledgeGraph, PlannerConfig,
/// };
///
/// let mut graph = KnowledgeGraph::new();
/// graph.add_entity(Entity::new("a", EntityCategory::Object)).unwrap();
///
/// let config = PlannerConfig::new().with_canvas(640.0, 480.0).with_grid_size(5.0);
/// let outcome = plan_with_config(graph, config).unwrap();
/// assert!(outcome.scene.is_fully_resolved());
/// ```
pub fn plan_with_config(
    graph: KnowledgeGraph,
    config: PlannerConfig,
) -> Result<PlanOutcome, PlanError> {
    let (constraints, flow) = ConstraintModelBuilder::new(&graph, &config).build();
    let complexity =
        assess::complexity_score(graph.entity_count(), graph.relation_count(), &constraints);
    let strategy = config
        .strategy_override
        .unwrap_or_else(|| assess::select_strategy(complexity, &constraints));

    let plan = DiagramPlan {
        graph,
        constraints,
        complexity,
        strategy,
        flow,
    };
    plan.validate_references()?;

    let run = LayoutOrchestrator::run(&plan, &config);
    let mut scene = Scene::from_plan(&plan, &run.positions, &config);
    scene.strategy = run.strategy_used;
    scene.labels = LabelPlacer::place(&scene);

    let engine = ValidationEngine::new();
    let refined = RefinementLoop::run(&plan, &config, &engine, &mut scene);

    // Solver warnings from the fallback chain join the validation findings
    let iterations = refined.refinement_iterations;
    let mut issues = refined.issues;
    issues.extend(run.issues);
    let mut report = ValidationReport::from_issues(issues);
    report.refinement_iterations = iterations;

    info!(
        entities = plan.graph.entity_count(),
        constraints = plan.constraints.len(),
        strategy = %run.strategy_used,
        confidence = report.confidence,
        "plan complete"
    );
    Ok(PlanOutcome {
        plan,
        scene,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_object_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph
            .add_entity(Entity::new("a", EntityCategory::Object))
            .unwrap();
        graph
            .add_entity(Entity::new("b", EntityCategory::Object))
            .unwrap();
        graph
            .add_relation(Relation::new("r1", "a", "b", RelationKind::SpatialAdjacency))
            .unwrap();
        graph
    }

    #[test]
    fn test_plan_simple_graph() {
        let outcome = plan(two_object_graph()).unwrap();
        assert!(outcome.scene.is_fully_resolved());
        assert_eq!(outcome.scene.objects.len(), 2);
        assert_eq!(outcome.scene.edges.len(), 1);
        assert!(!outcome.plan.constraints.is_empty());
    }

    #[test]
    fn test_plan_empty_graph() {
        let outcome = plan(KnowledgeGraph::new()).unwrap();
        assert!(outcome.scene.objects.is_empty());
        assert_eq!(outcome.report.confidence, 1.0);
    }

    #[test]
    fn test_strategy_override_is_honored() {
        let config = PlannerConfig::new().with_strategy_override(Strategy::ConstraintSolver);
        let outcome = plan_with_config(two_object_graph(), config).unwrap();
        assert_eq!(outcome.plan.strategy, Strategy::ConstraintSolver);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let first = plan(two_object_graph()).unwrap();
        let second = plan(two_object_graph()).unwrap();
        assert_eq!(first.scene, second.scene);
        assert_eq!(first.report, second.report);
    }

    #[test]
    fn test_labels_are_placed() {
        let outcome = plan(two_object_graph()).unwrap();
        assert_eq!(outcome.scene.labels.len(), 2);
    }
}
