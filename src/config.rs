//! Configuration surface for the planning pipeline.

use serde::Deserialize;

use crate::error::PlanError;
use crate::model::Strategy;

/// Configuration options recognized by the planner.
///
/// All fields have defaults; a config can be built programmatically with the
/// `with_*` methods or loaded from a TOML document where every key is
/// optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Iteration cap for the heuristic relaxation loop.
    pub max_relaxation_iterations: usize,

    /// Wall-clock budget for one exact solver invocation, in milliseconds.
    pub exact_solver_timeout_ms: u64,

    /// Maximum validate-and-repair passes after initial layout.
    pub refinement_max_iterations: usize,

    /// Refinement stops early once the report confidence reaches this value.
    pub confidence_threshold: f64,

    /// Snap grid for the aesthetic pass.
    pub grid_size: f64,

    /// Canvas extent; the scene is recentered within it.
    pub canvas_width: f64,
    pub canvas_height: f64,

    /// Default bounding box for entities that carry no size hint.
    pub default_object_size: (f64, f64),

    /// Target gap for adjacency constraints and flow seeding.
    pub spacing: f64,

    /// Boxes may interpenetrate up to this depth before validation flags them.
    pub overlap_tolerance: f64,

    /// Force a specific solving strategy, bypassing the selector.
    ///
    /// Test hook: lets the fallback chain and per-strategy behavior be
    /// exercised deterministically. Not part of the TOML surface.
    #[serde(skip)]
    pub strategy_override: Option<Strategy>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_relaxation_iterations: 50,
            exact_solver_timeout_ms: 5000,
            refinement_max_iterations: 3,
            confidence_threshold: 0.8,
            grid_size: 10.0,
            canvas_width: 1000.0,
            canvas_height: 800.0,
            default_object_size: (80.0, 40.0),
            spacing: 40.0,
            overlap_tolerance: 0.5,
            strategy_override: None,
        }
    }
}

impl PlannerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a TOML document; missing keys keep defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, PlanError> {
        Ok(toml::from_str(source)?)
    }

    /// Set the relaxation iteration cap.
    pub fn with_max_relaxation_iterations(mut self, iterations: usize) -> Self {
        self.max_relaxation_iterations = iterations;
        self
    }

    /// Set the exact solver timeout in milliseconds.
    pub fn with_exact_solver_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.exact_solver_timeout_ms = timeout_ms;
        self
    }

    /// Set the refinement iteration cap.
    pub fn with_refinement_max_iterations(mut self, iterations: usize) -> Self {
        self.refinement_max_iterations = iterations;
        self
    }

    /// Set the confidence threshold at which refinement stops.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the snap grid size.
    pub fn with_grid_size(mut self, grid: f64) -> Self {
        self.grid_size = grid;
        self
    }

    /// Set the canvas extent.
    pub fn with_canvas(mut self, width: f64, height: f64) -> Self {
        self.canvas_width = width;
        self.canvas_height = height;
        self
    }

    /// Set the default object size used when an entity has no size hint.
    pub fn with_default_object_size(mut self, width: f64, height: f64) -> Self {
        self.default_object_size = (width, height);
        self
    }

    /// Set the target spacing between adjacent objects.
    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    /// Force a specific solving strategy.
    pub fn with_strategy_override(mut self, strategy: Strategy) -> Self {
        self.strategy_override = Some(strategy);
        self
    }
}
