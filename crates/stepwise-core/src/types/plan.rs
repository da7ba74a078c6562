//! Plan type definitions

use serde::{Deserialize, Serialize};

use super::{Step, StepId};

/// Planner's estimate of how hard the goal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanComplexity {
    Simple,
    #[default]
    Medium,
    Complex,
    /// The goal cannot be met with the available capabilities.
    Impossible,
}

/// Declarative step graph produced by an external planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// What the plan is meant to accomplish
    pub goal: String,
    /// Steps in planner order
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub complexity: PlanComplexity,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            complexity: PlanComplexity::default(),
        }
    }

    pub fn with_complexity(mut self, complexity: PlanComplexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Parse an untrusted plan document.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id.as_str() == id)
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Position of a step in planner order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id.as_str() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_json_defaults_complexity() {
        let plan = Plan::from_json(
            r#"{"goal":"say hi","steps":[{"id":1,"action":"fetch","deps":[]}]}"#,
        )
        .expect("plan");
        assert_eq!(plan.complexity, PlanComplexity::Medium);
        assert_eq!(plan.step_ids(), vec![StepId::from("1")]);
        assert_eq!(plan.position("1"), Some(0));
    }
}
