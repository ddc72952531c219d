//! Consistency checking.
//!
//! Discrete edits are decided in memory against the indicator record.
//! Continuous edits are deferred: their expressions are batched into one
//! SQL statement over a single-row probe table so the store evaluates
//! them all in one round trip.

use canvass_model::{Result, StoreError, is_missing_value};
use canvass_store::RelationalStore;
use polars::prelude::{AnyValue, Column, DataFrame, NamedFrom, Series};
use tracing::debug;

use crate::encode::IndicatorRecord;
use crate::grid::{Cell, CompiledEdit, DiscreteRow, EditGrid};

/// Scratch table the deferred batch queries against.
pub(crate) const PROBE_TABLE: &str = "edit_probe";

/// Outcome of one discrete edit against one record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RowCheck {
    Pass,
    /// Some involved field is unknown; the edit cannot fire.
    NotEvaluable,
    /// Entering field positions charged with the failure.
    Fails(Vec<usize>),
}

/// Walks the row's involved fields in grid order, stopping at the first
/// cell that clears the record.
pub(crate) fn check_discrete_row(
    grid: &EditGrid,
    row: &DiscreteRow,
    record: &IndicatorRecord,
) -> RowCheck {
    let mut failing = Vec::new();
    for (pos, field) in grid.fields().iter().enumerate() {
        if !row.involves(pos) {
            continue;
        }
        let Some(code) = record.value_code(field.span) else {
            return RowCheck::NotEvaluable;
        };
        match row.cell(field.span.column(code)) {
            // Involved spans hold no Irrelevant cells; the arm keeps the
            // match total.
            Cell::False | Cell::Irrelevant => return RowCheck::Pass,
            Cell::True => {
                if row.is_entering(pos) {
                    failing.push(pos);
                }
            }
        }
    }
    RowCheck::Fails(failing)
}

/// Continuous edits evaluable for one record, batched into a single
/// statement.
pub(crate) struct DeferredBatch {
    /// Grid edit positions of the batched rows, in select-column order.
    pub(crate) members: Vec<usize>,
    probe: DataFrame,
    query: String,
}

/// Collects the continuous edits whose referenced fields are all present
/// and non-missing in the caller's record. Returns `None` when nothing
/// can be evaluated.
pub(crate) fn build_deferred_batch(
    grid: &EditGrid,
    fields: &[String],
    values: &[String],
) -> Result<Option<DeferredBatch>> {
    let mut members = Vec::new();
    let mut selects = Vec::new();
    for (edit_pos, edit) in grid.edits().iter().enumerate() {
        let CompiledEdit::Continuous(row) = edit else {
            continue;
        };
        let usable = row.fields.iter().all(|name| {
            fields
                .iter()
                .zip(values)
                .any(|(have, value)| have.eq_ignore_ascii_case(name) && !is_missing_value(value))
        });
        if usable {
            selects.push(format!("({}) AS f{}", row.expression, members.len()));
            members.push(edit_pos);
        }
    }
    if members.is_empty() {
        return Ok(None);
    }

    let mut columns: Vec<Column> = Vec::with_capacity(fields.len());
    for (name, value) in fields.iter().zip(values) {
        let column: Column = if is_missing_value(value) {
            Series::new(name.as_str().into(), [None::<f64>]).into()
        } else if let Ok(number) = value.parse::<f64>() {
            Series::new(name.as_str().into(), [number]).into()
        } else {
            Series::new(name.as_str().into(), [value.as_str()]).into()
        };
        columns.push(column);
    }
    let probe =
        DataFrame::new(columns).map_err(|err| StoreError::Message(err.to_string()))?;
    let query = format!("SELECT {} FROM {PROBE_TABLE}", selects.join(", "));
    Ok(Some(DeferredBatch {
        members,
        probe,
        query,
    }))
}

impl DeferredBatch {
    /// Stages the probe row, runs the batched expressions, and reports
    /// per member whether the edit fired. The probe table is dropped
    /// again even when the query fails.
    pub(crate) fn execute(&self, store: &dyn RelationalStore) -> Result<Vec<bool>> {
        if store.exists(PROBE_TABLE) {
            store.drop_table(PROBE_TABLE)?;
        }
        store.create_table(PROBE_TABLE, &self.probe)?;
        let outcome = store.query(&self.query);
        store.drop_table(PROBE_TABLE)?;
        let frame = outcome?;

        let mut fired = Vec::with_capacity(self.members.len());
        for idx in 0..self.members.len() {
            let name = format!("f{idx}");
            let value = frame
                .column(&name)
                .and_then(|column| column.get(0))
                .map_err(|err| StoreError::query(&self.query, err.to_string()))?;
            let hit = truthy(&value);
            if hit {
                debug!(column = %name, query = %self.query, "continuous edit fired");
            }
            fired.push(hit);
        }
        Ok(fired)
    }
}

/// SQL predicates come back as booleans; arithmetic expressions count as
/// fired when non-zero. Null never fires.
fn truthy(value: &AnyValue) -> bool {
    match value {
        AnyValue::Boolean(flag) => *flag,
        AnyValue::Null => false,
        other => other.try_extract::<f64>().is_ok_and(|number| number != 0.0),
    }
}
