//! Fallback-chain behavior: contradictory constraint sets never abort the
//! pipeline, the heuristic terminates every chain, and failed attempts are
//! surfaced as warnings in the report.

use diagram_planner::{
    plan_with_config, Entity, EntityCategory, IssueCode, KnowledgeGraph, PlannerConfig,
    PropertyValue, Severity, Strategy,
};

/// Two parameter entities demanding different exact distances for the same
/// pair. No placement can satisfy both.
fn contradictory_graph() -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new();
    graph
        .add_entity(Entity::new("a", EntityCategory::Object))
        .unwrap();
    graph
        .add_entity(Entity::new("b", EntityCategory::Object))
        .unwrap();
    graph
        .add_entity(
            Entity::new("near", EntityCategory::Parameter)
                .with_property("applies_to", PropertyValue::Text("a,b".into()))
                .with_property("distance", PropertyValue::Number(100.0)),
        )
        .unwrap();
    graph
        .add_entity(
            Entity::new("far", EntityCategory::Parameter)
                .with_property("applies_to", PropertyValue::Text("a,b".into()))
                .with_property("distance", PropertyValue::Number(250.0)),
        )
        .unwrap();
    graph
}

#[test]
fn test_exact_solver_falls_back_to_heuristic() {
    let config = PlannerConfig::new().with_strategy_override(Strategy::ConstraintSolver);
    let outcome = plan_with_config(contradictory_graph(), config).unwrap();

    assert!(outcome.scene.is_fully_resolved(), "fallback still lays out");
    assert_eq!(outcome.scene.strategy, Strategy::Heuristic);
    assert!(outcome
        .report
        .issues
        .iter()
        .any(|i| i.code == IssueCode::SolverUnsatisfiable));
}

#[test]
fn test_symbolic_chain_records_every_attempt() {
    let config = PlannerConfig::new().with_strategy_override(Strategy::SymbolicSolver);
    let outcome = plan_with_config(contradictory_graph(), config).unwrap();

    assert!(outcome.scene.is_fully_resolved());
    assert_eq!(outcome.scene.strategy, Strategy::Heuristic);
    // Symbolic and exact both rejected the set before the heuristic took over
    let unsat = outcome
        .report
        .issues
        .iter()
        .filter(|i| i.code == IssueCode::SolverUnsatisfiable)
        .count();
    assert_eq!(unsat, 2);
}

#[test]
fn test_solver_failures_are_warnings_not_errors() {
    let config = PlannerConfig::new().with_strategy_override(Strategy::ConstraintSolver);
    let outcome = plan_with_config(contradictory_graph(), config).unwrap();

    for issue in outcome
        .report
        .issues
        .iter()
        .filter(|i| i.code == IssueCode::SolverUnsatisfiable)
    {
        assert_eq!(issue.severity, Severity::Warning);
    }
}

#[test]
fn test_timeout_falls_back_and_is_reported() {
    let config = PlannerConfig::new()
        .with_strategy_override(Strategy::ConstraintSolver)
        .with_exact_solver_timeout_ms(0);
    let mut graph = KnowledgeGraph::new();
    graph
        .add_entity(Entity::new("a", EntityCategory::Object))
        .unwrap();
    graph
        .add_entity(Entity::new("b", EntityCategory::Object))
        .unwrap();
    graph
        .add_relation(diagram_planner::Relation::new(
            "r1",
            "a",
            "b",
            diagram_planner::RelationKind::Dependency,
        ))
        .unwrap();

    let outcome = plan_with_config(graph, config).unwrap();
    assert!(outcome.scene.is_fully_resolved());
    assert!(outcome
        .report
        .issues
        .iter()
        .any(|i| i.code == IssueCode::SolverTimeout));
}

#[test]
fn test_unresolved_reference_is_the_only_fatal_error() {
    // A parameter naming a missing entity is skipped, not fatal; the graph
    // itself rejects dangling relations at insertion time. The fatal path is
    // exercised through document import in the roundtrip tests.
    let mut graph = contradictory_graph();
    graph
        .add_entity(
            Entity::new("dangling", EntityCategory::Parameter)
                .with_property("applies_to", PropertyValue::Text("a,ghost".into()))
                .with_property("distance", PropertyValue::Number(10.0)),
        )
        .unwrap();
    let outcome = plan_with_config(
        graph,
        PlannerConfig::new().with_strategy_override(Strategy::Heuristic),
    )
    .unwrap();
    assert!(outcome.scene.is_fully_resolved());
}
