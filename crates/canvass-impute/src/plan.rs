//! Imputation plans.
//!
//! The plan is declarative configuration: which table, which variables,
//! which method per variable, and the knobs the orchestrator honors.
//! Everything here deserializes from the run configuration file.

use std::collections::BTreeMap;

use canvass_model::{CanvassError, Result};
use serde::{Deserialize, Serialize};

use crate::method::Method;

/// Seed used when the plan does not set one.
pub const DEFAULT_SEED: u64 = 35;

/// Draw attempts per record and draw index before the draw is abandoned.
pub const MAX_DRAW_ATTEMPTS: u32 = 1000;

/// Raking margin: target shares per declared value of a field. Empty
/// shares mean the observed weighted margin is the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub field: String,
    #[serde(default)]
    pub shares: BTreeMap<String, f64>,
}

/// One variable to impute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub target: String,
    pub method: Method,
    /// Cell partition key, coarsest field first; shrinking drops from
    /// the back.
    #[serde(default)]
    pub category_key: Vec<String>,
    /// Predictor columns handed to the provider alongside the target.
    #[serde(default)]
    pub predictors: Vec<String>,
    /// Down-weight near-miss rows by inverse distance when raking
    /// narrows on this variable's record, instead of zeroing them.
    #[serde(default)]
    pub near_misses: bool,
    /// Raking margins. Only read for [`Method::Raking`].
    #[serde(default)]
    pub margins: Vec<Margin>,
}

/// Run-level imputation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputePlan {
    /// Table holding the records to fill.
    pub table: String,
    /// Column identifying records in the output relation.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Output relation receiving accepted draws.
    #[serde(default = "default_output_table")]
    pub output_table: String,
    /// RNG seed; a fixed default keeps runs reproducible.
    pub seed: Option<u64>,
    /// Draws requested per missing value.
    #[serde(default = "default_draw_count")]
    pub draw_count: u32,
    /// Smallest observed population a cell may be fitted on.
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    /// Row-weight column used in fitting and raking.
    pub weight_column: Option<String>,
    pub variables: Vec<VariableSpec>,
}

fn default_id_column() -> String {
    "rowid".into()
}

fn default_output_table() -> String {
    "filled".into()
}

fn default_draw_count() -> u32 {
    1
}

fn default_min_group_size() -> usize {
    1
}

impl ImputePlan {
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(CanvassError::Config("plan names no input table".into()));
        }
        if self.variables.is_empty() {
            return Err(CanvassError::Config("plan imputes no variables".into()));
        }
        if self.draw_count == 0 {
            return Err(CanvassError::Config("draw count must be at least 1".into()));
        }
        if self.min_group_size == 0 {
            return Err(CanvassError::Config(
                "minimum group size must be at least 1".into(),
            ));
        }
        for (position, variable) in self.variables.iter().enumerate() {
            if variable.target.trim().is_empty() {
                return Err(CanvassError::Config(format!(
                    "variable #{position} names no target"
                )));
            }
            if self.variables[..position]
                .iter()
                .any(|prior| prior.target.eq_ignore_ascii_case(&variable.target))
            {
                return Err(CanvassError::Config(format!(
                    "target {} is imputed twice",
                    variable.target
                )));
            }
            for margin in &variable.margins {
                if margin.shares.values().any(|share| *share < 0.0) {
                    return Err(CanvassError::Config(format!(
                        "margin on {} has a negative share",
                        margin.field
                    )));
                }
                if !margin.shares.is_empty()
                    && margin.shares.values().sum::<f64>() <= 0.0
                {
                    return Err(CanvassError::Config(format!(
                        "margin on {} sums to zero",
                        margin.field
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_plan() -> ImputePlan {
        serde_json::from_str(
            r#"{
                "table": "people",
                "variables": [
                    { "target": "EARNINGS", "method": "hot_deck", "category_key": ["SEX", "SCHOOLING"] }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_in() {
        let plan = minimal_plan();
        assert_eq!(plan.id_column, "rowid");
        assert_eq!(plan.output_table, "filled");
        assert_eq!(plan.draw_count, 1);
        assert_eq!(plan.min_group_size, 1);
        assert_eq!(plan.seed(), DEFAULT_SEED);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let mut plan = minimal_plan();
        plan.variables.push(plan.variables[0].clone());
        assert!(plan.validate().is_err());
    }

    #[test]
    fn zero_draws_are_rejected() {
        let mut plan = minimal_plan();
        plan.draw_count = 0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn negative_margin_share_is_rejected() {
        let mut plan = minimal_plan();
        plan.variables[0].margins.push(Margin {
            field: "SEX".into(),
            shares: BTreeMap::from([("m".to_string(), -0.2)]),
        });
        assert!(plan.validate().is_err());
    }
}
