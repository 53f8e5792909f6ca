//! Prefetch priority from interaction, context and history

use crate::AnalyticsRecord;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Context tag marking an element as high priority
pub const HIGH_PRIORITY_TAG: &str = "high-priority";

/// Context tag for elements inside the navigation region
pub const NAVIGATION_TAG: &str = "navigation";

/// Context tag for elements inside the primary content region
pub const PRIMARY_CONTENT_TAG: &str = "primary-content";

/// Interaction that triggered a prefetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Pointer click or mouse down
    Click,
    /// Touch start
    Touch,
    /// Pointer hover
    Hover,
    /// Element scrolled into view
    Visible,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Click => "click",
            Trigger::Touch => "touch",
            Trigger::Hover => "hover",
            Trigger::Visible => "visible",
        };
        f.write_str(name)
    }
}

/// Base weight per trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub click: u32,
    pub hover: u32,
    pub touch: u32,
    pub visible: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            click: 10,
            hover: 5,
            touch: 7,
            visible: 3,
        }
    }
}

impl PriorityWeights {
    /// Weight of a trigger
    pub fn weight(&self, trigger: Trigger) -> u32 {
        match trigger {
            Trigger::Click => self.click,
            Trigger::Touch => self.touch,
            Trigger::Hover => self.hover,
            Trigger::Visible => self.visible,
        }
    }
}

/// Tags describing where the triggering element sits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSignals {
    pub tags: SmallVec<[String; 4]>,
}

impl ContextSignals {
    /// No context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check for a tag
    pub fn has(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Pure priority function over trigger, context and visit history
#[derive(Debug, Clone, Default)]
pub struct PriorityCalculator {
    weights: PriorityWeights,
}

impl PriorityCalculator {
    /// Create a calculator with the given weights
    pub fn new(weights: PriorityWeights) -> Self {
        Self { weights }
    }

    /// Weights in use
    pub fn weights(&self) -> &PriorityWeights {
        &self.weights
    }

    /// Compute the priority of a request.
    ///
    /// Base trigger weight, ×2 for high priority, ×1.5 inside navigation,
    /// ×1.3 inside primary content and ×(1 + visits × 0.1), rounded.
    pub fn calculate(
        &self,
        trigger: Trigger,
        context: &ContextSignals,
        analytics: Option<&AnalyticsRecord>,
    ) -> u32 {
        let mut priority = self.weights.weight(trigger) as f64;

        if context.has(HIGH_PRIORITY_TAG) {
            priority *= 2.0;
        }
        if context.has(NAVIGATION_TAG) {
            priority *= 1.5;
        }
        if context.has(PRIMARY_CONTENT_TAG) {
            priority *= 1.3;
        }

        let visits = analytics.map_or(0, |r| r.visit_count);
        priority *= 1.0 + visits as f64 * 0.1;

        priority.round() as u32
    }
}
