//! The check and impute commands.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use polars::prelude::{Column, DataFrame};
use serde::Deserialize;
use tracing::{info, info_span, warn};

use canvass_edits::{
    CheckMode, EditEngine, ExplicitBound, cell_to_string, check_dataset, derive_ratio_bounds,
};
use canvass_impute::{ImputePlan, Imputer};
use canvass_model::RuleSet;
use canvass_store::{MemoryStore, RelationalStore};

use crate::cli::{CheckArgs, ImputeArgs};
use crate::ingest::{load_csv, write_csv};
use crate::types::{AlternativeSummary, CheckRunResult, FailureSummary, ImputeRunResult};

/// Reassignments kept per failing record in reports. The search itself
/// is not capped.
const ALTERNATIVE_LIMIT: usize = 20;

/// On-disk rules file: field declarations and edits, plus optional ratio
/// bounds that compile into further continuous edits.
#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(flatten)]
    rules: RuleSet,
    #[serde(default)]
    ratio_bounds: Vec<RatioBoundSpec>,
}

/// Declared bound on the ratio numerator/denominator.
#[derive(Debug, Deserialize)]
struct RatioBoundSpec {
    numerator: String,
    denominator: String,
    #[serde(default)]
    lower: f64,
    #[serde(default = "unbounded")]
    upper: f64,
}

fn unbounded() -> f64 {
    f64::INFINITY
}

/// Loads a rules file. Declared ratio bounds are closed under
/// transitivity and appended as continuous edits.
pub fn load_rules(path: &Path) -> Result<RuleSet> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read rules file: {}", path.display()))?;
    let file: RulesFile = serde_json::from_str(&text)
        .with_context(|| format!("parse rules file: {}", path.display()))?;
    let mut rules = file.rules;
    if !file.ratio_bounds.is_empty() {
        let declared: Vec<ExplicitBound> = file
            .ratio_bounds
            .iter()
            .map(|bound| {
                ExplicitBound::new(&bound.numerator, &bound.denominator, bound.lower, bound.upper)
            })
            .collect();
        let implied = derive_ratio_bounds(&declared).context("derive ratio bounds")?;
        let derived = implied.to_rules();
        info!(
            declared = declared.len(),
            derived = derived.len(),
            "ratio bounds compiled"
        );
        rules.edits.extend(derived);
    }
    Ok(rules)
}

/// Loads an imputation plan file.
pub fn load_plan(path: &Path) -> Result<ImputePlan> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read plan file: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse plan file: {}", path.display()))
}

pub fn run_check(args: &CheckArgs) -> Result<CheckRunResult> {
    let span = info_span!("check", data = %args.data.display());
    let _guard = span.enter();
    let start = Instant::now();

    let rules = load_rules(&args.rules)?;
    let mut engine = EditEngine::new(&rules).context("compile edits")?;
    if args.search_budget_ms > 0 {
        engine = engine.with_search_budget(Duration::from_millis(args.search_budget_ms));
    }
    let frame = load_csv(&args.data)?;
    let store = MemoryStore::new();

    let checked = check_dataset(&mut engine, &frame, args.id_column.as_deref(), &store)
        .context("check dataset")?;

    let mut failures = Vec::with_capacity(checked.failures.len());
    for failure in &checked.failures {
        let alternatives = if args.alternatives {
            search_alternatives_for(
                &mut engine,
                &frame,
                args.id_column.as_deref(),
                failure.row,
                &store,
            )
            .with_context(|| format!("search alternatives for record {}", failure.id))?
        } else {
            None
        };
        if let Some(summary) = &alternatives
            && summary.partial
        {
            warn!(row = failure.row, id = %failure.id, "alternative search hit its budget");
        }
        failures.push(FailureSummary {
            row: failure.row,
            id: failure.id.clone(),
            by_field: failure.by_field.clone(),
            alternatives,
        });
    }

    info!(
        checked = checked.checked,
        failing = failures.len(),
        duration_ms = start.elapsed().as_millis(),
        "check complete"
    );

    let result = CheckRunResult {
        data: args.data.display().to_string(),
        checked: checked.checked,
        field_tally: checked.field_tally(),
        has_failures: !failures.is_empty(),
        failures,
    };
    if let Some(path) = &args.report {
        write_report(path, &result)?;
    }
    Ok(result)
}

pub fn run_impute(args: &ImputeArgs) -> Result<ImputeRunResult> {
    let span = info_span!("impute", data = %args.data.display());
    let _guard = span.enter();
    let start = Instant::now();

    let rules = load_rules(&args.rules)?;
    let plan = load_plan(&args.plan)?;
    let frame = load_csv(&args.data)?;

    let store = MemoryStore::new();
    store
        .create_table(&plan.table, &frame)
        .with_context(|| format!("stage table {}", plan.table))?;

    let mut imputer = Imputer::new(&rules, &plan).context("build imputer")?;
    let report = imputer.run(&store).context("run imputation")?;

    let filled = store
        .table(&plan.output_table)
        .ok_or_else(|| anyhow!("output table {} was not written", plan.output_table))?;
    if let Some(path) = &args.output {
        write_csv(&filled, path)?;
        info!(path = %path.display(), rows = filled.height(), "output written");
    }

    info!(
        variables = report.variables.len(),
        draws = report.total_draws(),
        duration_ms = start.elapsed().as_millis(),
        "imputation complete"
    );

    let result = ImputeRunResult {
        data: args.data.display().to_string(),
        output_rows: filled.height(),
        has_failures: report.has_failures(),
        report,
    };
    if let Some(path) = &args.report {
        write_report(path, &result)?;
    }
    Ok(result)
}

/// Re-checks one failing row in find-alternatives mode. Every data
/// column must be declared for the search to run; the bulk check is more
/// forgiving.
fn search_alternatives_for(
    engine: &mut EditEngine,
    frame: &DataFrame,
    id_column: Option<&str>,
    row: usize,
    store: &dyn RelationalStore,
) -> Result<Option<AlternativeSummary>> {
    let mut fields = Vec::new();
    let mut columns: Vec<&Column> = Vec::new();
    for column in frame.get_columns() {
        let name = column.name().as_str();
        if id_column.is_some_and(|id| id.eq_ignore_ascii_case(name)) {
            continue;
        }
        fields.push(name.to_string());
        columns.push(column);
    }
    let mut values = Vec::with_capacity(fields.len());
    for column in &columns {
        let cell = column.get(row).map_err(|err| anyhow!("{err}"))?;
        values.push(cell_to_string(&cell));
    }

    let outcome = engine.encode_and_check(&fields, &values, CheckMode::FindAlternatives, store)?;
    let Some(found) = outcome.alternatives else {
        return Ok(None);
    };
    let total = found.rows.len();
    let mut rows = found.rows;
    rows.truncate(ALTERNATIVE_LIMIT);
    Ok(Some(AlternativeSummary {
        fields: found.fields,
        rows,
        found: total,
        partial: found.partial,
    }))
}

fn write_report<T: serde::Serialize>(path: &Path, result: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(result).context("render report")?;
    fs::write(path, text).with_context(|| format!("write report: {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}
