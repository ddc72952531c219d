//! Edit compilation and record checking.
//!
//! A declared [`RuleSet`] compiles into an [`EditGrid`]; the engine then
//! answers, per record, whether any edit fires, which fields are charged,
//! and which reassignments of the failing fields would repair the
//! record. Continuous edits are evaluated by the store; everything else
//! is decided in memory.

pub mod alternatives;
pub mod bounds;
mod check;
mod dataset;
mod encode;
pub mod grid;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use canvass_model::{CanvassError, FieldIndex, Result, RuleSet};
use canvass_store::RelationalStore;
use tracing::{debug, error};

pub use crate::alternatives::Alternatives;
pub use crate::bounds::{ExplicitBound, ImplicitBounds, derive_ratio_bounds};
pub use crate::dataset::{DatasetCheck, RecordFailures, cell_to_string, check_dataset};
pub use crate::encode::{IndicatorRecord, Mark, RecordEncoder};
pub use crate::grid::EditGrid;

use crate::alternatives::search_alternatives;
use crate::check::{RowCheck, build_deferred_batch, check_discrete_row};
use crate::encode::encode_with;
use crate::grid::CompiledEdit;

/// How much the caller wants to know about one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Stop at the first failing edit.
    #[default]
    PassFail,
    /// Charge every failing edit to its entering fields.
    FailedFields,
    /// As `FailedFields`, then search for passing reassignments.
    FindAlternatives,
}

/// Result of checking one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// At least one edit fired.
    pub fails_edits: bool,
    /// Per charged field, how many edits charged it. Absent in
    /// pass/fail mode.
    pub failed_fields: Option<BTreeMap<String, u32>>,
    /// Passing reassignments of the failing discrete fields. Absent
    /// outside find-alternatives mode and for passing records.
    pub alternatives: Option<Alternatives>,
    /// The alternative search hit its deadline.
    pub partial: bool,
}

impl CheckOutcome {
    fn pass_fail(fails_edits: bool) -> Self {
        Self {
            fails_edits,
            failed_fields: None,
            alternatives: None,
            partial: false,
        }
    }
}

/// Compiled rules plus the per-engine encoder cache.
///
/// One engine owns one grid; callers hand records in and out by value.
/// The engine is single-threaded by design: the encoder cache mutates on
/// field-list changes.
#[derive(Debug)]
pub struct EditEngine {
    grid: EditGrid,
    declared: FieldIndex,
    encoder: RecordEncoder,
    search_budget: Option<Duration>,
}

impl EditEngine {
    /// Compiles the rule set. Declaration problems are fatal here, never
    /// later.
    pub fn new(rules: &RuleSet) -> Result<Self> {
        let grid = EditGrid::compile(rules)?;
        let mut declared = FieldIndex::default();
        for (position, field) in rules.fields.iter().enumerate() {
            declared.insert(&field.name, position);
        }
        Ok(Self {
            grid,
            declared,
            encoder: RecordEncoder::new(),
            search_budget: None,
        })
    }

    /// Wall-clock budget for the alternative search. Zero means
    /// unbounded.
    pub fn with_search_budget(mut self, budget: Duration) -> Self {
        self.search_budget = (!budget.is_zero()).then_some(budget);
        self
    }

    pub fn grid(&self) -> &EditGrid {
        &self.grid
    }

    /// Encodes one record and checks it against every edit.
    ///
    /// `fields` and `values` pair up positionally; order is the
    /// caller's. Fields no edit references are ignored, except that
    /// find-alternatives mode rejects fields missing from the
    /// declaration outright. Undeclared values are always fatal.
    pub fn encode_and_check(
        &mut self,
        fields: &[String],
        values: &[String],
        mode: CheckMode,
        store: &dyn RelationalStore,
    ) -> Result<CheckOutcome> {
        if fields.len() != values.len() {
            return Err(CanvassError::Message(format!(
                "record has {} fields but {} values",
                fields.len(),
                values.len()
            )));
        }
        if mode == CheckMode::FindAlternatives
            && let Some(name) = fields.iter().find(|name| !self.declared.contains(name.as_str()))
        {
            return Err(CanvassError::UnknownField(name.clone()));
        }

        let index = self.encoder.cross_index(&self.grid, fields);
        let record = encode_with(&self.grid, index, values)?;

        let mut fails_edits = false;
        let mut by_field: BTreeMap<String, u32> = BTreeMap::new();
        let mut failing_positions: BTreeSet<usize> = BTreeSet::new();

        for edit in self.grid.edits() {
            let CompiledEdit::Discrete(row) = edit else {
                continue;
            };
            match check_discrete_row(&self.grid, row, &record) {
                RowCheck::Pass | RowCheck::NotEvaluable => {}
                RowCheck::Fails(positions) => {
                    fails_edits = true;
                    debug!(edit = %row.label, "edit fired");
                    if mode == CheckMode::PassFail {
                        return Ok(CheckOutcome::pass_fail(true));
                    }
                    for pos in positions {
                        let name = self.grid.field(pos).name.clone();
                        *by_field.entry(name).or_insert(0) += 1;
                        failing_positions.insert(pos);
                    }
                }
            }
        }

        // Continuous edits are worth a store round trip only when no
        // discrete edit has already settled a pass/fail question.
        if let Some(batch) = build_deferred_batch(&self.grid, fields, values)? {
            let fired = batch.execute(store)?;
            for (&member, hit) in batch.members.iter().zip(fired) {
                if !hit {
                    continue;
                }
                fails_edits = true;
                let CompiledEdit::Continuous(row) = &self.grid.edits()[member] else {
                    continue;
                };
                debug!(edit = %row.label, "edit fired");
                if mode == CheckMode::PassFail {
                    return Ok(CheckOutcome::pass_fail(true));
                }
                for name in &row.fields {
                    *by_field.entry(name.clone()).or_insert(0) += 1;
                }
            }
        }

        if mode == CheckMode::PassFail {
            return Ok(CheckOutcome::pass_fail(false));
        }

        if fails_edits == by_field.is_empty() {
            let context = record_context(fields, values);
            error!(record = %context, fails_edits, "failure accounting disagrees");
            return Err(CanvassError::InternalInconsistency {
                detail: format!(
                    "fails_edits is {fails_edits} but {} fields are charged",
                    by_field.len()
                ),
                record: context,
            });
        }

        let mut outcome = CheckOutcome {
            fails_edits,
            failed_fields: Some(by_field),
            alternatives: None,
            partial: false,
        };
        if mode == CheckMode::FindAlternatives && fails_edits {
            let failing: Vec<usize> = failing_positions.into_iter().collect();
            if failing.is_empty() {
                // Only continuous edits fired; no reassignment of grid
                // values can repair those.
                outcome.alternatives = Some(Alternatives {
                    fields: Vec::new(),
                    rows: Vec::new(),
                    partial: false,
                });
            } else {
                let deadline = self.search_budget.map(|budget| Instant::now() + budget);
                let found = search_alternatives(&self.grid, &record, &failing, deadline);
                outcome.partial = found.partial;
                outcome.alternatives = Some(found);
            }
        }
        Ok(outcome)
    }
}

/// Record rendered for inconsistency reports, `A=2, B=x` style.
fn record_context(fields: &[String], values: &[String]) -> String {
    fields
        .iter()
        .zip(values)
        .map(|(field, value)| format!("{field}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
