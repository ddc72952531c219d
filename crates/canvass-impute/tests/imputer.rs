//! End-to-end imputation runs against an in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use canvass_impute::{
    CellData, FitError, FittedModel, ImputePlan, Imputer, Margin, Method, ModelProvider,
    ProviderRegistry, VariableSpec,
};
use canvass_model::{EditRule, EditTerm, FieldDef, RuleSet};
use canvass_store::MemoryStore;
use polars::prelude::{AnyValue, DataFrame, IntoColumn, NamedFrom, Series};
use rand::RngCore;

fn frame(columns: &[(&str, &[&str])]) -> DataFrame {
    let columns = columns
        .iter()
        .map(|(name, values)| Series::new((*name).into(), *values).into_column())
        .collect();
    DataFrame::new(columns).unwrap()
}

fn column_strings(frame: &DataFrame, name: &str) -> Vec<String> {
    let column = frame.column(name).unwrap();
    (0..frame.height())
        .map(|row| match column.get(row).unwrap() {
            AnyValue::String(s) => s.to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// A on {1, 2, 3}, B on {x, y}, with A=2 and B=x jointly forbidden.
fn ab_rules() -> RuleSet {
    RuleSet::new(
        vec![
            FieldDef::discrete("A", vec!["1".into(), "2".into(), "3".into()]),
            FieldDef::discrete("B", vec!["x".into(), "y".into()]),
        ],
        vec![EditRule::Discrete {
            label: Some("A2 excludes Bx".into()),
            terms: vec![
                EditTerm::new("A", vec!["2".into()]),
                EditTerm::new("B", vec!["x".into()]),
            ],
        }],
    )
}

fn plan(variables: Vec<VariableSpec>) -> ImputePlan {
    ImputePlan {
        table: "people".to_string(),
        id_column: "rowid".to_string(),
        output_table: "filled".to_string(),
        seed: Some(35),
        draw_count: 2,
        min_group_size: 1,
        weight_column: None,
        variables,
    }
}

fn variable(target: &str, method: Method) -> VariableSpec {
    VariableSpec {
        target: target.to_string(),
        method,
        category_key: Vec::new(),
        predictors: Vec::new(),
        near_misses: false,
        margins: Vec::new(),
    }
}

#[test]
fn hot_deck_draws_respect_the_edits() {
    let store = MemoryStore::new().with_table(
        "people",
        frame(&[
            ("rowid", &["r1", "r2", "r3", "r4"]),
            ("A", &["1", "2", "", "3"]),
            ("B", &["x", "y", "x", "y"]),
        ]),
    );
    let rules = ab_rules();
    let plan = plan(vec![variable("A", Method::HotDeck)]);
    let mut imputer = Imputer::new(&rules, &plan).unwrap();
    let report = imputer.run(&store).unwrap();

    assert_eq!(report.variables.len(), 1);
    let var = &report.variables[0];
    assert!(var.failed.is_empty(), "{:?}", var.failed);
    assert!(var.unresolved.is_empty());
    assert_eq!(var.cells_fitted, 1);
    assert_eq!(var.records_imputed, 1);
    assert_eq!(var.draws_written, 2);

    let filled = store.table("filled").unwrap();
    assert_eq!(filled.height(), 2);
    assert!(column_strings(&filled, "record_id").iter().all(|id| id == "r3"));
    assert!(column_strings(&filled, "field_name").iter().all(|f| f == "A"));
    // r3 holds B=x, so the donor value 2 can never be accepted.
    for value in column_strings(&filled, "value") {
        assert!(value == "1" || value == "3", "drew {value} for a record holding B=x");
    }
}

#[derive(Debug)]
struct Stuck {
    calls: Arc<AtomicU32>,
}

impl ModelProvider for Stuck {
    fn is_categorical(&self) -> bool {
        false
    }

    fn fit(&self, _cell: &CellData<'_>) -> Result<Box<dyn FittedModel>, FitError> {
        Ok(Box::new(StuckModel {
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct StuckModel {
    calls: Arc<AtomicU32>,
}

impl FittedModel for StuckModel {
    fn draw(&self, _rng: &mut dyn RngCore) -> f64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        0.0
    }
}

#[test]
fn retry_ceiling_fails_one_record_and_spares_the_rest() {
    let store = MemoryStore::new().with_table(
        "people",
        frame(&[
            ("rowid", &["r1", "r2", "r3"]),
            ("A", &["1", "2", "1"]),
            ("B", &["5", "", ""]),
        ]),
    );
    let rules = RuleSet::new(
        vec![
            FieldDef::discrete("A", vec!["1".into(), "2".into()]),
            FieldDef::discrete("B", vec!["0".into(), "5".into()]),
        ],
        vec![EditRule::Discrete {
            label: Some("A2 excludes B0".into()),
            terms: vec![
                EditTerm::new("A", vec!["2".into()]),
                EditTerm::new("B", vec!["0".into()]),
            ],
        }],
    );
    // The provider always draws 0.0, which snaps to B=0. That value is
    // inadmissible for r2 (A=2) and fine for r3 (A=1).
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = ProviderRegistry::default();
    registry.register(
        "stuck",
        Arc::new(Stuck {
            calls: Arc::clone(&calls),
        }),
    );
    let mut plan = plan(vec![variable("B", Method::External("stuck".to_string()))]);
    plan.draw_count = 1;
    let mut imputer = Imputer::new(&rules, &plan).unwrap().with_registry(registry);
    let report = imputer.run(&store).unwrap();

    let var = &report.variables[0];
    assert_eq!(var.failed, vec!["r2".to_string()]);
    assert_eq!(var.records_imputed, 1);
    // 1000 attempts for r2, then a first-try success for r3.
    assert_eq!(calls.load(Ordering::Relaxed), 1001);

    let filled = store.table("filled").unwrap();
    assert_eq!(filled.height(), 1);
    assert_eq!(column_strings(&filled, "record_id"), vec!["r3".to_string()]);
    assert_eq!(column_strings(&filled, "value"), vec!["0".to_string()]);
}

#[test]
fn a_fixed_seed_reproduces_the_output_table() {
    let rules = ab_rules();
    let mut plan = plan(vec![variable("A", Method::HotDeck)]);
    plan.draw_count = 3;
    let run = || {
        let store = MemoryStore::new().with_table(
            "people",
            frame(&[
                ("rowid", &["r1", "r2", "r3", "r4", "r5", "r6"]),
                ("A", &["1", "2", "", "3", "", "1"]),
                ("B", &["x", "y", "x", "y", "y", "y"]),
            ]),
        );
        let mut imputer = Imputer::new(&rules, &plan).unwrap();
        imputer.run(&store).unwrap();
        store.table("filled").unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.height(), 6);
    assert!(first.equals(&second));
}

#[test]
fn a_thin_cell_waits_for_the_category_key_to_shrink() {
    let store = MemoryStore::new().with_table(
        "people",
        frame(&[
            ("rowid", &["r1", "r2"]),
            ("REGION", &["n", "s"]),
            ("A", &["1", ""]),
            ("B", &["y", "y"]),
        ]),
    );
    let rules = ab_rules();
    let mut spec = variable("A", Method::HotDeck);
    spec.category_key = vec!["REGION".to_string()];
    let mut plan = plan(vec![spec]);
    plan.draw_count = 1;
    let mut imputer = Imputer::new(&rules, &plan).unwrap();
    let report = imputer.run(&store).unwrap();

    // No observed donor shares r2's region; the global cell covers it.
    let var = &report.variables[0];
    assert_eq!(var.cells_fitted, 1);
    assert_eq!(var.records_imputed, 1);
    assert!(var.unresolved.is_empty());
    let filled = store.table("filled").unwrap();
    assert_eq!(column_strings(&filled, "value"), vec!["1".to_string()]);
}

#[test]
fn no_observed_data_leaves_records_unresolved() {
    let store = MemoryStore::new().with_table(
        "people",
        frame(&[
            ("rowid", &["r1", "r2"]),
            ("A", &["", ""]),
            ("B", &["x", "y"]),
        ]),
    );
    let rules = ab_rules();
    let mut plan = plan(vec![variable("A", Method::HotDeck)]);
    plan.draw_count = 1;
    let mut imputer = Imputer::new(&rules, &plan).unwrap();
    let report = imputer.run(&store).unwrap();

    let var = &report.variables[0];
    assert_eq!(var.cells_fitted, 0);
    assert_eq!(var.unresolved, vec!["r1".to_string(), "r2".to_string()]);
    assert!(!var.warnings.is_empty());
    assert_eq!(store.table("filled").unwrap().height(), 0);
}

#[test]
fn raking_fills_every_missing_joint_field() {
    let store = MemoryStore::new().with_table(
        "people",
        frame(&[
            ("rowid", &["r1", "r2", "r3", "r4"]),
            ("AGE", &["10", "20", "30", ""]),
            ("EARNINGS", &["1", "2", "", "2"]),
        ]),
    );
    let rules = RuleSet::default();
    let mut spec = variable("EARNINGS", Method::Raking);
    spec.predictors = vec!["AGE".to_string()];
    spec.near_misses = true;
    spec.margins = vec![Margin {
        field: "AGE".to_string(),
        shares: BTreeMap::new(),
    }];
    let mut plan = plan(vec![spec]);
    plan.draw_count = 1;
    let mut imputer = Imputer::new(&rules, &plan).unwrap();
    let report = imputer.run(&store).unwrap();

    let var = &report.variables[0];
    assert!(var.failed.is_empty(), "{:?}", var.failed);
    assert_eq!(var.records_imputed, 2);
    assert_eq!(var.draws_written, 2);

    let filled = store.table("filled").unwrap();
    let by_record: Vec<(String, String)> = column_strings(&filled, "record_id")
        .into_iter()
        .zip(column_strings(&filled, "field_name"))
        .collect();
    assert!(by_record.contains(&("r3".to_string(), "EARNINGS".to_string())));
    assert!(by_record.contains(&("r4".to_string(), "AGE".to_string())));
}
