//! Per-variable imputation drive.
//!
//! Each variable walks the same path: pick a representative record
//! that still misses the target, partition the dataset around it by
//! the category key, fit the configured model on the cell's observed
//! rows, then draw for each missing record until the candidate clears
//! the edit rules. Cells below the minimum size wait for the key to
//! shrink; once the key is empty a single global cell is the last
//! resort. Draws are appended to the output relation one cell at a
//! time, inside a transaction, so a cell's draws land all or nothing.

use std::collections::BTreeSet;

use canvass_edits::{CheckMode, EditEngine};
use canvass_model::{CanvassError, FieldDef, Result, RuleSet};
use canvass_store::RelationalStore;
use polars::prelude::{DataFrame, DataType, NamedFrom, Series};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cell::{self, Dataset};
use crate::method::ProviderRegistry;
use crate::plan::{ImputePlan, MAX_DRAW_ATTEMPTS, VariableSpec};
use crate::provider::CellData;
use crate::rake;

/// One accepted value headed for the output relation.
#[derive(Debug, Clone)]
pub(crate) struct Fill {
    pub(crate) draw: u32,
    pub(crate) value: String,
    pub(crate) id: String,
    pub(crate) field: String,
}

/// Per-variable accounting for the run report.
#[derive(Debug, Default, Clone, Serialize)]
pub struct VariableReport {
    pub target: String,
    pub cells_fitted: u32,
    pub draws_written: u64,
    pub records_imputed: u64,
    /// Records that exhausted the draw retry ceiling or lost all donor
    /// weight.
    pub failed: Vec<String>,
    /// Records no cell at any key size could cover.
    pub unresolved: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub variables: Vec<VariableReport>,
}

impl RunReport {
    pub fn total_draws(&self) -> u64 {
        self.variables.iter().map(|v| v.draws_written).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.variables
            .iter()
            .any(|v| !v.failed.is_empty() || !v.unresolved.is_empty())
    }
}

/// Runs an imputation plan against one store.
pub struct Imputer<'a> {
    rules: &'a RuleSet,
    plan: &'a ImputePlan,
    engine: EditEngine,
    registry: ProviderRegistry,
}

impl<'a> Imputer<'a> {
    pub fn new(rules: &'a RuleSet, plan: &'a ImputePlan) -> Result<Self> {
        plan.validate()?;
        Ok(Self {
            rules,
            plan,
            engine: EditEngine::new(rules)?,
            registry: ProviderRegistry::default(),
        })
    }

    /// Swaps in a registry carrying externally supplied providers.
    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// One full pass over the plan's variables. A fixed seed yields a
    /// byte-identical output table: the single RNG stream advances in
    /// variable order, then cell order, then record order, then draw
    /// index.
    pub fn run(&mut self, store: &dyn RelationalStore) -> Result<RunReport> {
        let plan = self.plan;
        let dataset = Dataset::load(
            store,
            &plan.table,
            &plan.id_column,
            plan.weight_column.as_deref(),
        )?;
        info!(
            table = %plan.table,
            records = dataset.len(),
            variables = plan.variables.len(),
            seed = plan.seed(),
            "imputation run started"
        );
        if !store.exists(&plan.output_table) {
            store.create_table(&plan.output_table, &empty_output()?)?;
        }

        let mut rng = StdRng::seed_from_u64(plan.seed());
        let mut report = RunReport::default();
        for spec in &plan.variables {
            let variable = if spec.method.is_raking() {
                self.rake_variable(store, &dataset, spec, &mut rng)?
            } else {
                self.impute_variable(store, &dataset, spec, &mut rng)?
            };
            info!(
                target = %variable.target,
                cells = variable.cells_fitted,
                draws = variable.draws_written,
                failed = variable.failed.len(),
                unresolved = variable.unresolved.len(),
                "variable finished"
            );
            report.variables.push(variable);
        }
        Ok(report)
    }

    fn rake_variable(
        &self,
        store: &dyn RelationalStore,
        dataset: &Dataset,
        spec: &VariableSpec,
        rng: &mut StdRng,
    ) -> Result<VariableReport> {
        let mut report = VariableReport {
            target: spec.target.clone(),
            ..VariableReport::default()
        };
        let outcome = rake::run_raking(dataset, self.rules, spec, self.plan.draw_count, rng)?;
        report.failed = outcome.failed;
        report.warnings = outcome.warnings;
        report.draws_written = outcome.fills.len() as u64;
        report.records_imputed = outcome
            .fills
            .iter()
            .map(|fill| fill.id.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u64;
        if !outcome.fills.is_empty() {
            store.begin()?;
            store.append(&self.plan.output_table, &fills_frame(&outcome.fills)?)?;
            store.commit()?;
        }
        Ok(report)
    }

    fn impute_variable(
        &mut self,
        store: &dyn RelationalStore,
        dataset: &Dataset,
        spec: &VariableSpec,
        rng: &mut StdRng,
    ) -> Result<VariableReport> {
        let plan = self.plan;
        let rules = self.rules;
        let mut report = VariableReport {
            target: spec.target.clone(),
            ..VariableReport::default()
        };
        let Some(target) = dataset.canonical_field(&spec.target).map(ToString::to_string) else {
            return Err(CanvassError::Config(format!(
                "imputation target {} not found in {}",
                spec.target, plan.table
            )));
        };
        for field in &spec.category_key {
            if !dataset.has_field(field) {
                return Err(CanvassError::Config(format!(
                    "category key field {field} not found in {}",
                    plan.table
                )));
            }
        }
        let provider = self.registry.resolve(&spec.method)?;
        let declared = rules.field(&target);

        let mut pending = dataset.missing_rows(&target);
        if pending.is_empty() {
            debug!(%target, "nothing to impute");
            return Ok(report);
        }
        debug!(%target, missing = pending.len(), "variable started");

        for key_len in (0..=spec.category_key.len()).rev() {
            if pending.is_empty() {
                break;
            }
            let key = &spec.category_key[..key_len];
            let mut visited: BTreeSet<Vec<String>> = BTreeSet::new();
            while let Some(representative) = pending
                .iter()
                .copied()
                .find(|&row| !visited.contains(&key_values(dataset, row, key)))
            {
                visited.insert(key_values(dataset, representative, key));
                let split = cell::partition(dataset, &target, representative, &pending, key);
                if split.observed.len() < plan.min_group_size {
                    debug!(
                        %target,
                        key_len,
                        observed = split.observed.len(),
                        "cell below the minimum size; waiting for a coarser key"
                    );
                    continue;
                }

                let (factors, observed) =
                    cell::encode_target(dataset, &target, &split.observed, provider.is_categorical());
                let predictors = cell::encode_predictors(dataset, &spec.predictors, &split.observed);
                let weights = cell::cell_weights(dataset, &split.observed);
                let data = CellData {
                    target: &target,
                    values: &observed,
                    weights: weights.as_deref(),
                    factors: factors.as_deref(),
                    predictors: &predictors,
                };
                let model = match provider.fit(&data) {
                    Ok(model) => model,
                    Err(err) => {
                        warn!(%target, error = %err, "model fit failed; cell skipped");
                        report
                            .warnings
                            .push(format!("fit failed for a cell of {target}: {err}"));
                        continue;
                    }
                };
                report.cells_fitted += 1;
                debug!(
                    %target,
                    observed = split.observed.len(),
                    missing = split.missing.len(),
                    "cell fitted"
                );

                let mut fills: Vec<Fill> = Vec::new();
                let mut resolved: BTreeSet<usize> = BTreeSet::new();
                for &row in &split.missing {
                    let id = dataset.ids[row].clone();
                    let before = fills.len();
                    let mut gave_up = false;
                    'draws: for draw in 0..plan.draw_count {
                        let mut attempts = 0u32;
                        loop {
                            attempts += 1;
                            let raw = model.draw(rng);
                            let candidate = render_draw(raw, factors.as_deref(), declared);
                            if let Some(value) = candidate
                                && self.record_passes(store, dataset, row, &target, &value)?
                            {
                                fills.push(Fill {
                                    draw,
                                    value,
                                    id: id.clone(),
                                    field: target.clone(),
                                });
                                break;
                            }
                            if attempts >= MAX_DRAW_ATTEMPTS {
                                warn!(record = %id, %target, attempts, "no admissible draw found");
                                report.failed.push(id.clone());
                                // All or nothing per record: drop any
                                // draws already accepted for it.
                                fills.truncate(before);
                                gave_up = true;
                                break 'draws;
                            }
                        }
                    }
                    resolved.insert(row);
                    if !gave_up {
                        report.records_imputed += 1;
                    }
                }
                if !fills.is_empty() {
                    store.begin()?;
                    store.append(&plan.output_table, &fills_frame(&fills)?)?;
                    store.commit()?;
                    report.draws_written += fills.len() as u64;
                }
                pending.retain(|row| !resolved.contains(row));
            }
        }

        if !pending.is_empty() {
            let ids: Vec<String> = pending.iter().map(|&row| dataset.ids[row].clone()).collect();
            warn!(%target, unresolved = ids.len(), "not enough observed data to cover every record");
            report.warnings.push(format!(
                "{} record(s) of {target} left unimputed for lack of observed data",
                ids.len()
            ));
            report.unresolved = ids;
        }
        Ok(report)
    }

    /// Splices the candidate into the record and asks the edit engine
    /// for an up or down verdict.
    fn record_passes(
        &mut self,
        store: &dyn RelationalStore,
        dataset: &Dataset,
        row: usize,
        target: &str,
        value: &str,
    ) -> Result<bool> {
        let Some(position) = dataset
            .fields
            .iter()
            .position(|field| field.eq_ignore_ascii_case(target))
        else {
            return Err(CanvassError::UnknownField(target.to_string()));
        };
        let mut values = dataset.row_values(row);
        values[position] = value.to_string();
        let outcome =
            self.engine
                .encode_and_check(&dataset.fields, &values, CheckMode::PassFail, store)?;
        Ok(!outcome.fails_edits)
    }
}

fn key_values(dataset: &Dataset, row: usize, key: &[String]) -> Vec<String> {
    key.iter()
        .map(|field| dataset.value(row, field).unwrap_or("").to_string())
        .collect()
}

/// Renders one raw draw as a candidate value. Categorical draws map
/// through the factor table; numeric draws for a discrete-declared
/// field snap to the nearest admissible value. `None` means the draw
/// is unusable and costs one attempt.
fn render_draw(raw: f64, factors: Option<&[String]>, declared: Option<&FieldDef>) -> Option<String> {
    if let Some(factors) = factors {
        if !raw.is_finite() || raw < 0.0 {
            return None;
        }
        return factors.get(raw as usize).cloned();
    }
    if !raw.is_finite() {
        return None;
    }
    if let Some(field) = declared
        && field.is_discrete()
    {
        return field.nearest_value(raw).map(ToString::to_string);
    }
    Some(format_number(raw))
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{number:.0}")
    } else {
        number.to_string()
    }
}

fn empty_output() -> Result<DataFrame> {
    DataFrame::new(vec![
        Series::new_empty("draw_index".into(), &DataType::Int64).into(),
        Series::new_empty("value".into(), &DataType::String).into(),
        Series::new_empty("record_id".into(), &DataType::String).into(),
        Series::new_empty("field_name".into(), &DataType::String).into(),
    ])
    .map_err(|err| CanvassError::Message(err.to_string()))
}

fn fills_frame(fills: &[Fill]) -> Result<DataFrame> {
    let draws: Vec<i64> = fills.iter().map(|fill| i64::from(fill.draw)).collect();
    let values: Vec<&str> = fills.iter().map(|fill| fill.value.as_str()).collect();
    let ids: Vec<&str> = fills.iter().map(|fill| fill.id.as_str()).collect();
    let fields: Vec<&str> = fills.iter().map(|fill| fill.field.as_str()).collect();
    DataFrame::new(vec![
        Series::new("draw_index".into(), draws).into(),
        Series::new("value".into(), values).into(),
        Series::new("record_id".into(), ids).into(),
        Series::new("field_name".into(), fields).into(),
    ])
    .map_err(|err| CanvassError::Message(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(draw: u32, value: &str, id: &str) -> Fill {
        Fill {
            draw,
            value: value.to_string(),
            id: id.to_string(),
            field: "AGE".to_string(),
        }
    }

    #[test]
    fn fills_frame_matches_the_output_schema() {
        let frame = fills_frame(&[fill(0, "7", "r1"), fill(1, "9", "r1")]).unwrap();
        let names: Vec<&str> = frame
            .get_columns()
            .iter()
            .map(|column| column.name().as_str())
            .collect();
        assert_eq!(names, vec!["draw_index", "value", "record_id", "field_name"]);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn categorical_draws_map_through_the_factor_table() {
        let factors = vec!["a".to_string(), "b".to_string()];
        assert_eq!(render_draw(1.0, Some(&factors), None), Some("b".to_string()));
        assert_eq!(render_draw(5.0, Some(&factors), None), None);
        assert_eq!(render_draw(f64::NAN, Some(&factors), None), None);
    }

    #[test]
    fn numeric_draws_snap_to_a_discrete_domain() {
        let field = FieldDef::discrete("AGE", vec!["10".to_string(), "20".to_string()]);
        assert_eq!(render_draw(13.2, None, Some(&field)), Some("10".to_string()));
        assert_eq!(render_draw(16.0, None, Some(&field)), Some("20".to_string()));
        let open = FieldDef::continuous("EARNINGS");
        assert_eq!(render_draw(16.25, None, Some(&open)), Some("16.25".to_string()));
        assert_eq!(render_draw(16.0, None, Some(&open)), Some("16".to_string()));
    }
}
