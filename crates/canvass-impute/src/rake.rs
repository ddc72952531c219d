//! Margin-constrained joint imputation.
//!
//! The raking path fits one weighted joint distribution over the
//! target, its predictors and the margin fields, adjusts it by
//! iterative proportional fitting until the declared margins hold, and
//! then draws whole donor rows per record after narrowing out rows
//! that contradict the record's known values.

use std::collections::BTreeMap;

use canvass_model::{CanvassError, Result, RuleSet, is_missing_value};
use rand::RngCore;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use tracing::{debug, warn};

use crate::cell::Dataset;
use crate::orchestrator::Fill;
use crate::plan::{Margin, VariableSpec};

/// Convergence bound on the per-category adjustment factors.
const RAKE_TOLERANCE: f64 = 1e-3;
/// Hard cap on fitting passes.
const RAKE_MAX_ITERATIONS: u32 = 1000;
/// Numeric distance below which two values count as the same.
const MATCH_EPSILON: f64 = 1e-5;

/// Outcome of one raked variable.
#[derive(Debug, Default)]
pub(crate) struct RakeResult {
    pub(crate) fills: Vec<Fill>,
    /// Record ids narrowing left without any donor weight.
    pub(crate) failed: Vec<String>,
    pub(crate) warnings: Vec<String>,
}

/// Distinct complete-case rows over the joint fields, weight-summed.
#[derive(Debug)]
struct JointTable {
    fields: Vec<String>,
    rows: Vec<Vec<String>>,
    weights: Vec<f64>,
}

pub(crate) fn run_raking(
    dataset: &Dataset,
    rules: &RuleSet,
    spec: &VariableSpec,
    draw_count: u32,
    rng: &mut dyn RngCore,
) -> Result<RakeResult> {
    let mut fields = Vec::new();
    for name in joint_fields(spec) {
        let Some(canonical) = dataset.canonical_field(&name) else {
            return Err(CanvassError::Config(format!(
                "raking field {name} not found in the input table"
            )));
        };
        fields.push(canonical.to_string());
    }

    let mut result = RakeResult::default();
    // A record is pending if any joint field is missing; one donor row
    // fills all of its holes at once.
    let pending: Vec<usize> = (0..dataset.len())
        .filter(|&row| {
            fields
                .iter()
                .any(|field| is_missing_value(dataset.value(row, field).unwrap_or("")))
        })
        .collect();
    if pending.is_empty() {
        return Ok(result);
    }

    let mut table = build_joint(dataset, &fields);
    if table.rows.is_empty() {
        warn!(target = %spec.target, "no complete rows to rake from");
        result.failed = pending.iter().map(|&row| dataset.ids[row].clone()).collect();
        return Ok(result);
    }
    result.warnings = rake_to_margins(&mut table, &spec.margins, &spec.target)?;

    let near_typed: Vec<bool> = table
        .fields
        .iter()
        .map(|field| {
            spec.near_misses && rules.field(field).is_none_or(|decl| !decl.is_discrete())
        })
        .collect();

    for &row in &pending {
        let id = dataset.ids[row].clone();
        let mut known = Vec::new();
        let mut holes = Vec::new();
        for (position, field) in table.fields.iter().enumerate() {
            let value = dataset.value(row, field).unwrap_or("");
            if is_missing_value(value) {
                holes.push(position);
            } else {
                known.push((position, value));
            }
        }
        let narrowed = narrow(&table, &known, &near_typed);
        let Ok(dist) = WeightedIndex::new(narrowed) else {
            warn!(record = %id, target = %spec.target, "no donor weight after narrowing");
            result.failed.push(id);
            continue;
        };
        for draw in 0..draw_count {
            let donor = &table.rows[dist.sample(rng)];
            for &position in &holes {
                result.fills.push(Fill {
                    draw,
                    value: donor[position].clone(),
                    id: id.clone(),
                    field: table.fields[position].clone(),
                });
            }
        }
    }
    Ok(result)
}

/// Target first, then predictors and margin fields, deduplicated.
fn joint_fields(spec: &VariableSpec) -> Vec<String> {
    let mut fields = vec![spec.target.clone()];
    let declared = spec
        .predictors
        .iter()
        .chain(spec.margins.iter().map(|margin| &margin.field));
    for name in declared {
        if !fields.iter().any(|have| have.eq_ignore_ascii_case(name)) {
            fields.push(name.clone());
        }
    }
    fields
}

fn build_joint(dataset: &Dataset, fields: &[String]) -> JointTable {
    let mut combos: BTreeMap<Vec<String>, f64> = BTreeMap::new();
    for row in 0..dataset.len() {
        let values: Vec<String> = fields
            .iter()
            .map(|field| dataset.value(row, field).unwrap_or("").to_string())
            .collect();
        if values.iter().any(|value| is_missing_value(value)) {
            continue;
        }
        *combos.entry(values).or_insert(0.0) += dataset.weight(row);
    }
    let (rows, weights) = combos.into_iter().unzip();
    JointTable {
        fields: fields.to_vec(),
        rows,
        weights,
    }
}

/// Iterative proportional fitting. Each pass rescales the table so one
/// margin matches its target shares; passes repeat until the largest
/// adjustment factor is within tolerance of 1.
fn rake_to_margins(
    table: &mut JointTable,
    margins: &[Margin],
    target: &str,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    if margins.is_empty() {
        return Ok(warnings);
    }
    let total: f64 = table.weights.iter().sum();
    if total <= 0.0 {
        return Err(CanvassError::Config(format!(
            "joint table for {target} carries no weight"
        )));
    }

    // Resolve every margin to normalized shares up front. Empty
    // declared shares mean the observed weighted margin.
    let mut plans: Vec<(usize, BTreeMap<String, f64>)> = Vec::with_capacity(margins.len());
    for margin in margins {
        let position = table
            .fields
            .iter()
            .position(|have| have.eq_ignore_ascii_case(&margin.field))
            .ok_or_else(|| {
                CanvassError::Config(format!(
                    "margin field {} is not part of the joint table",
                    margin.field
                ))
            })?;
        let shares: BTreeMap<String, f64> = if margin.shares.is_empty() {
            category_mass(table, position)
                .into_iter()
                .map(|(value, mass)| (value, mass / total))
                .collect()
        } else {
            let declared: f64 = margin.shares.values().sum();
            margin
                .shares
                .iter()
                .map(|(value, share)| (value.clone(), share / declared))
                .collect()
        };
        for value in shares.keys() {
            if !table.rows.iter().any(|row| &row[position] == value) {
                warnings.push(format!(
                    "margin category {value} of {} has no observed support",
                    margin.field
                ));
            }
        }
        plans.push((position, shares));
    }

    let mut converged = false;
    for iteration in 1..=RAKE_MAX_ITERATIONS {
        let mut worst = 0.0_f64;
        for (position, shares) in &plans {
            let mut factors: BTreeMap<String, f64> = BTreeMap::new();
            for (value, current) in category_mass(table, *position) {
                if current <= 0.0 {
                    continue;
                }
                let share = shares.get(&value).copied().unwrap_or(0.0);
                let factor = share * total / current;
                worst = worst.max((factor - 1.0).abs());
                factors.insert(value, factor);
            }
            for (row, weight) in table.rows.iter().zip(table.weights.iter_mut()) {
                if let Some(factor) = factors.get(row[*position].as_str()) {
                    *weight *= factor;
                }
            }
        }
        if worst < RAKE_TOLERANCE {
            debug!(iteration, %target, "raking converged");
            converged = true;
            break;
        }
    }
    if !converged {
        warnings.push(format!("raking for {target} stopped at the iteration cap"));
    }
    Ok(warnings)
}

fn category_mass(table: &JointTable, position: usize) -> BTreeMap<String, f64> {
    let mut mass = BTreeMap::new();
    for (row, weight) in table.rows.iter().zip(&table.weights) {
        *mass.entry(row[position].clone()).or_insert(0.0) += *weight;
    }
    mass
}

/// Copy of the fitted weights with rows contradicting the record's
/// known values zeroed out. Mismatches on a near-miss-typed field
/// down-weight by inverse distance instead of zeroing.
fn narrow(table: &JointTable, known: &[(usize, &str)], near_typed: &[bool]) -> Vec<f64> {
    let mut weights = table.weights.clone();
    for (row, weight) in table.rows.iter().zip(weights.iter_mut()) {
        for &(position, want) in known {
            let have = row[position].as_str();
            if have == want {
                continue;
            }
            if let (Ok(a), Ok(b)) = (have.parse::<f64>(), want.parse::<f64>()) {
                let distance = (a - b).abs();
                if distance < MATCH_EPSILON {
                    continue;
                }
                if near_typed[position] {
                    *weight /= 1.0 + distance;
                    continue;
                }
            }
            *weight = 0.0;
            break;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use canvass_store::MemoryStore;
    use polars::prelude::{DataFrame, NamedFrom, Series};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn table() -> JointTable {
        JointTable {
            fields: vec!["AGE".to_string(), "GRADE".to_string()],
            rows: vec![
                vec!["10".to_string(), "a".to_string()],
                vec!["20".to_string(), "b".to_string()],
                vec!["40".to_string(), "c".to_string()],
            ],
            weights: vec![1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn near_miss_weights_fall_with_distance() {
        let narrowed = narrow(&table(), &[(0, "12")], &[true, true]);
        assert!(narrowed.iter().all(|weight| *weight > 0.0));
        assert!(narrowed[0] > narrowed[1]);
        assert!(narrowed[1] > narrowed[2]);
    }

    #[test]
    fn narrowing_without_near_miss_typing_zeroes_mismatches() {
        let nothing = narrow(&table(), &[(0, "12")], &[false, false]);
        assert!(nothing.iter().all(|weight| *weight == 0.0));
        let exact = narrow(&table(), &[(0, "20")], &[false, false]);
        assert_eq!(exact, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn raking_pulls_the_joint_to_declared_margins() {
        let mut table = JointTable {
            fields: vec!["SEX".to_string(), "REGION".to_string()],
            rows: vec![
                vec!["f".to_string(), "n".to_string()],
                vec!["f".to_string(), "s".to_string()],
                vec!["m".to_string(), "n".to_string()],
                vec!["m".to_string(), "s".to_string()],
            ],
            weights: vec![1.0; 4],
        };
        let margins = vec![
            Margin {
                field: "SEX".to_string(),
                shares: BTreeMap::from([("m".to_string(), 7.0), ("f".to_string(), 3.0)]),
            },
            Margin {
                field: "REGION".to_string(),
                shares: BTreeMap::new(),
            },
        ];
        let warnings = rake_to_margins(&mut table, &margins, "SEX").unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        let sex = category_mass(&table, 0);
        assert!((sex["m"] - 2.8).abs() < 1e-6);
        assert!((sex["f"] - 1.2).abs() < 1e-6);
        let region = category_mass(&table, 1);
        assert!((region["n"] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn unsupported_margin_category_is_warned() {
        let mut table = JointTable {
            fields: vec!["SEX".to_string()],
            rows: vec![vec!["m".to_string()]],
            weights: vec![2.0],
        };
        let margins = vec![Margin {
            field: "SEX".to_string(),
            shares: BTreeMap::from([("m".to_string(), 1.0), ("x".to_string(), 1.0)]),
        }];
        let warnings = rake_to_margins(&mut table, &margins, "SEX").unwrap();
        assert!(warnings.iter().any(|warning| warning.contains("x")));
    }

    fn spec(near_misses: bool) -> VariableSpec {
        VariableSpec {
            target: "earnings".to_string(),
            method: Method::Raking,
            category_key: Vec::new(),
            predictors: vec!["AGE".to_string()],
            near_misses,
            margins: Vec::new(),
        }
    }

    fn people() -> Dataset {
        let frame = DataFrame::new(vec![
            Series::new("rowid".into(), ["r1", "r2", "r3", "r4"]).into(),
            Series::new("AGE".into(), ["10", "20", "30", ""]).into(),
            Series::new("EARNINGS".into(), ["1", "2", "", "2"]).into(),
        ])
        .unwrap();
        let store = MemoryStore::new().with_table("people", frame);
        Dataset::load(&store, "people", "rowid", None).unwrap()
    }

    #[test]
    fn raked_draws_fill_only_the_missing_fields() {
        let dataset = people();
        let rules = RuleSet::default();
        let mut rng = StdRng::seed_from_u64(35);
        let result = run_raking(&dataset, &rules, &spec(false), 2, &mut rng).unwrap();
        // r3 has AGE 30, which no complete row carries.
        assert_eq!(result.failed, vec!["r3".to_string()]);
        assert_eq!(result.fills.len(), 2);
        for (index, fill) in result.fills.iter().enumerate() {
            assert_eq!(fill.draw, index as u32);
            assert_eq!(fill.id, "r4");
            assert_eq!(fill.field, "AGE");
            assert_eq!(fill.value, "20");
        }
    }

    #[test]
    fn near_miss_typing_rescues_an_unmatched_record() {
        let dataset = people();
        let rules = RuleSet::default();
        let mut rng = StdRng::seed_from_u64(35);
        let result = run_raking(&dataset, &rules, &spec(true), 1, &mut rng).unwrap();
        assert!(result.failed.is_empty());
        let r3: Vec<_> = result.fills.iter().filter(|fill| fill.id == "r3").collect();
        assert_eq!(r3.len(), 1);
        assert_eq!(r3[0].field, "EARNINGS");
        assert!(r3[0].value == "1" || r3[0].value == "2");
    }
}
