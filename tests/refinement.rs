//! Refinement loop guarantees: the loop is bounded, repairs improve the
//! report, and the pipeline result always carries the iteration count.

use diagram_planner::{
    plan_with_config, Entity, EntityCategory, IssueCode, KnowledgeGraph, PlannerConfig,
    Relation, RelationKind,
};

/// A deliberately crowded graph: a hub with many adjacent spokes.
fn crowded_graph(spokes: usize) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new();
    graph
        .add_entity(Entity::new("hub", EntityCategory::Object))
        .unwrap();
    for i in 0..spokes {
        let id = format!("spoke{}", i);
        graph
            .add_entity(Entity::new(&id, EntityCategory::Object))
            .unwrap();
        graph
            .add_relation(Relation::new(
                format!("r{}", i),
                "hub",
                &id,
                RelationKind::SpatialAdjacency,
            ))
            .unwrap();
    }
    graph
}

#[test]
fn test_iteration_count_never_exceeds_cap() {
    for cap in [0, 1, 3] {
        let config = PlannerConfig::new()
            .with_refinement_max_iterations(cap)
            .with_confidence_threshold(1.0);
        let outcome = plan_with_config(crowded_graph(8), config).unwrap();
        assert!(
            outcome.report.refinement_iterations <= cap,
            "cap {} exceeded: {}",
            cap,
            outcome.report.refinement_iterations
        );
    }
}

#[test]
fn test_pipeline_always_returns_a_scene() {
    // Even with refinement disabled entirely, a scene comes back
    let config = PlannerConfig::new().with_refinement_max_iterations(0);
    let outcome = plan_with_config(crowded_graph(10), config).unwrap();
    assert_eq!(outcome.scene.objects.len(), 11);
    assert!(outcome.scene.is_fully_resolved());
}

#[test]
fn test_refined_scene_has_no_overlaps() {
    let outcome = plan_with_config(crowded_graph(6), PlannerConfig::default()).unwrap();
    assert!(
        !outcome
            .report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::Overlap),
        "refinement should clear overlaps: {:?}",
        outcome.report.issues
    );
}

#[test]
fn test_confidence_reflects_issue_count() {
    let outcome = plan_with_config(crowded_graph(4), PlannerConfig::default()).unwrap();
    let errors = outcome
        .report
        .issues
        .iter()
        .filter(|i| i.severity == diagram_planner::Severity::Error)
        .count();
    let warnings = outcome.report.issues.len() - errors;
    let expected =
        (1.0 - 0.25 * errors as f64 - 0.05 * warnings as f64).clamp(0.0, 1.0);
    assert!((outcome.report.confidence - expected).abs() < 1e-9);
}

#[test]
fn test_refinement_is_deterministic() {
    let first = plan_with_config(crowded_graph(7), PlannerConfig::default()).unwrap();
    let second = plan_with_config(crowded_graph(7), PlannerConfig::default()).unwrap();
    assert_eq!(first.scene, second.scene);
    assert_eq!(
        first.report.refinement_iterations,
        second.report.refinement_iterations
    );
}
