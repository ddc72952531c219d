//! Whole-dataset checking.
//!
//! Runs every row of a frame through the engine in failed-fields mode.
//! The field list is fixed across rows, so the encoder's cross-index is
//! built once and reused for the whole frame.

use std::collections::BTreeMap;

use canvass_model::{CanvassError, Result};
use canvass_store::RelationalStore;
use polars::prelude::{AnyValue, Column, DataFrame};
use tracing::{error, info};

use crate::{CheckMode, EditEngine};

/// Charged fields of one failing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailures {
    /// Zero-based row position in the checked frame.
    pub row: usize,
    /// Value of the id column, or the row position rendered as text.
    pub id: String,
    /// Per charged field, how many edits charged it.
    pub by_field: BTreeMap<String, u32>,
}

/// Failures across a whole frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetCheck {
    pub checked: usize,
    pub failures: Vec<RecordFailures>,
}

impl DatasetCheck {
    pub fn failing_records(&self) -> usize {
        self.failures.len()
    }

    /// Charge counts summed over all failing records.
    pub fn field_tally(&self) -> BTreeMap<String, u32> {
        let mut tally = BTreeMap::new();
        for failure in &self.failures {
            for (field, count) in &failure.by_field {
                *tally.entry(field.clone()).or_insert(0) += count;
            }
        }
        tally
    }
}

/// Checks every row of `frame`. The id column, when named, is excluded
/// from checking and used to label failures. An undeclared value in any
/// row aborts the whole pass.
pub fn check_dataset(
    engine: &mut EditEngine,
    frame: &DataFrame,
    id_column: Option<&str>,
    store: &dyn RelationalStore,
) -> Result<DatasetCheck> {
    let ids: Option<&Column> = match id_column {
        Some(name) => Some(frame.column(name).map_err(|_| {
            CanvassError::Message(format!("id column {name} not found in dataset"))
        })?),
        None => None,
    };

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

    let mut result = DatasetCheck {
        checked: frame.height(),
        failures: Vec::new(),
    };
    let mut values = vec![String::new(); fields.len()];
    for row in 0..frame.height() {
        for (slot, column) in values.iter_mut().zip(&columns) {
            let cell = column
                .get(row)
                .map_err(|err| CanvassError::Message(err.to_string()))?;
            *slot = cell_to_string(&cell);
        }
        let id = match ids {
            Some(column) => {
                let cell = column
                    .get(row)
                    .map_err(|err| CanvassError::Message(err.to_string()))?;
                cell_to_string(&cell)
            }
            None => row.to_string(),
        };

        let outcome = engine
            .encode_and_check(&fields, &values, CheckMode::FailedFields, store)
            .inspect_err(|_| error!(row, %id, "record could not be checked"))?;
        if outcome.fails_edits {
            result.failures.push(RecordFailures {
                row,
                id,
                by_field: outcome.failed_fields.unwrap_or_default(),
            });
        }
    }

    info!(
        checked = result.checked,
        failing = result.failures.len(),
        "dataset checked"
    );
    Ok(result)
}

/// Renders a frame cell the way records are declared: null and NaN as
/// the missing value, whole floats without a fraction.
pub fn cell_to_string(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(text) => (*text).to_string(),
        AnyValue::StringOwned(text) => text.to_string(),
        AnyValue::Float64(number) => format_float(*number),
        AnyValue::Float32(number) => format_float(f64::from(*number)),
        other => other.to_string(),
    }
}

fn format_float(number: f64) -> String {
    if number.is_nan() {
        String::new()
    } else if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{number:.0}")
    } else {
        number.to_string()
    }
}
