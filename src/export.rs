//! JSON import and export of plans, scenes, and reports.
//!
//! The plan document is the handoff format between planning runs: exporting
//! a plan and importing it back yields an equivalent plan, so a layout can
//! be reproduced elsewhere without re-deriving constraints. Import rebuilds
//! the knowledge graph through the normal insertion path, so duplicate ids
//! and dangling relation endpoints are rejected exactly as they are when a
//! graph is built by hand.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PlanError;
use crate::graph::{Entity, KnowledgeGraph, Relation};
use crate::model::{Constraint, DiagramPlan, FlowHint, Strategy};
use crate::scene::Scene;
use crate::validate::ValidationReport;

/// Serialized form of a [`DiagramPlan`].
#[derive(Debug, Serialize, Deserialize)]
pub struct PlanDocument {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub constraints: Vec<Constraint>,
    pub complexity: f64,
    pub strategy: Strategy,
    pub flow: FlowHint,
}

impl PlanDocument {
    pub fn from_plan(plan: &DiagramPlan) -> Self {
        Self {
            entities: plan.graph.entities().to_vec(),
            relations: plan.graph.relations().to_vec(),
            constraints: plan.constraints.clone(),
            complexity: plan.complexity,
            strategy: plan.strategy,
            flow: plan.flow,
        }
    }

    /// Rebuild the plan, re-running the graph's structural checks.
    pub fn into_plan(self) -> Result<DiagramPlan, PlanError> {
        let mut graph = KnowledgeGraph::new();
        for entity in self.entities {
            graph.add_entity(entity)?;
        }
        for relation in self.relations {
            graph.add_relation(relation)?;
        }
        let plan = DiagramPlan {
            graph,
            constraints: self.constraints,
            complexity: self.complexity,
            strategy: self.strategy,
            flow: self.flow,
        };
        plan.validate_references()?;
        Ok(plan)
    }
}

/// Serialize a plan to pretty-printed JSON.
pub fn plan_to_json(plan: &DiagramPlan) -> Result<String, PlanError> {
    let document = PlanDocument::from_plan(plan);
    let json = serde_json::to_string_pretty(&document)?;
    debug!(bytes = json.len(), "plan exported");
    Ok(json)
}

/// Parse a plan document back into a validated plan.
pub fn plan_from_json(json: &str) -> Result<DiagramPlan, PlanError> {
    let document: PlanDocument = serde_json::from_str(json)?;
    document.into_plan()
}

/// Serialize a finished scene to pretty-printed JSON.
pub fn scene_to_json(scene: &Scene) -> Result<String, PlanError> {
    Ok(serde_json::to_string_pretty(scene)?)
}

/// Parse a scene previously produced by [`scene_to_json`].
pub fn scene_from_json(json: &str) -> Result<Scene, PlanError> {
    Ok(serde_json::from_str(json)?)
}

/// Serialize a validation report to pretty-printed JSON.
pub fn report_to_json(report: &ValidationReport) -> Result<String, PlanError> {
    Ok(serde_json::to_string_pretty(report)?)
}
