//! Dataset snapshots and cell partitioning.
//!
//! The orchestrator works from one immutable snapshot of the input
//! table, taken before any fitting. Row order is the table's order and
//! fixes the RNG advancement order for the whole run.

use std::collections::{BTreeMap, BTreeSet};

use canvass_edits::cell_to_string;
use canvass_model::{CanvassError, Result, is_missing_value};
use canvass_store::RelationalStore;

/// In-memory copy of the table being imputed.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Record ids, one per row.
    pub ids: Vec<String>,
    /// Field names, excluding the id and weight columns, in table
    /// order.
    pub fields: Vec<String>,
    columns: BTreeMap<String, Vec<String>>,
    weights: Option<Vec<f64>>,
    rows: usize,
}

impl Dataset {
    /// Loads the table through the store. The id column must exist; a
    /// declared weight column must exist and parse numerically, with
    /// blanks counting as weight 1.
    pub fn load(
        store: &dyn RelationalStore,
        table: &str,
        id_column: &str,
        weight_column: Option<&str>,
    ) -> Result<Self> {
        let frame = store.query(&format!("SELECT * FROM {table}"))?;
        let rows = frame.height();

        let mut ids = None;
        let mut weights = None;
        let mut fields = Vec::new();
        let mut columns = BTreeMap::new();
        for column in frame.get_columns() {
            let name = column.name().as_str();
            let mut cells = Vec::with_capacity(rows);
            for row in 0..rows {
                let cell = column
                    .get(row)
                    .map_err(|err| CanvassError::Message(err.to_string()))?;
                cells.push(cell_to_string(&cell));
            }
            if name.eq_ignore_ascii_case(id_column) {
                ids = Some(cells);
            } else if weight_column.is_some_and(|w| w.eq_ignore_ascii_case(name)) {
                let parsed = cells
                    .iter()
                    .map(|cell| {
                        if is_missing_value(cell) {
                            Ok(1.0)
                        } else {
                            cell.parse::<f64>().map_err(|_| {
                                CanvassError::Config(format!(
                                    "weight column {name} holds non-numeric value {cell:?}"
                                ))
                            })
                        }
                    })
                    .collect::<Result<Vec<f64>>>()?;
                weights = Some(parsed);
            } else {
                fields.push(name.to_string());
                columns.insert(name.to_string(), cells);
            }
        }

        let Some(ids) = ids else {
            return Err(CanvassError::Config(format!(
                "id column {id_column} not found in {table}"
            )));
        };
        if let Some(name) = weight_column
            && weights.is_none()
        {
            return Err(CanvassError::Config(format!(
                "weight column {name} not found in {table}"
            )));
        }
        Ok(Self {
            ids,
            fields,
            columns,
            weights,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.canonical_field(name).is_some()
    }

    /// Stored spelling of a field name, matched case-insensitively.
    pub fn canonical_field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|have| have.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    pub fn value(&self, row: usize, field: &str) -> Option<&str> {
        let column = self
            .columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))?;
        column.1.get(row).map(String::as_str)
    }

    /// All field values of one row, aligned with `fields`.
    pub fn row_values(&self, row: usize) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| {
                self.value(row, field)
                    .map_or_else(String::new, ToString::to_string)
            })
            .collect()
    }

    pub fn weight(&self, row: usize) -> f64 {
        self.weights
            .as_ref()
            .and_then(|weights| weights.get(row))
            .copied()
            .unwrap_or(1.0)
    }

    /// Rows whose target value is missing, in row order.
    pub fn missing_rows(&self, target: &str) -> Vec<usize> {
        (0..self.rows)
            .filter(|&row| is_missing_value(self.value(row, target).unwrap_or("")))
            .collect()
    }
}

/// One cell around a representative record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSplit {
    /// Rows with the target present, the fitting population.
    pub observed: Vec<usize>,
    /// Pending rows in the cell, the draw population.
    pub missing: Vec<usize>,
}

/// Partitions the dataset around `representative`: every row agreeing
/// with it on all `key` fields joins the cell. A missing key value
/// matches only rows where that key is missing too. An empty key is the
/// global partition.
pub fn partition(
    dataset: &Dataset,
    target: &str,
    representative: usize,
    pending: &[usize],
    key: &[String],
) -> CellSplit {
    let wanted: Vec<&str> = key
        .iter()
        .map(|field| dataset.value(representative, field).unwrap_or(""))
        .collect();
    let in_cell = |row: usize| {
        key.iter()
            .zip(&wanted)
            .all(|(field, want)| dataset.value(row, field).unwrap_or("") == *want)
    };

    let observed = (0..dataset.len())
        .filter(|&row| in_cell(row))
        .filter(|&row| !is_missing_value(dataset.value(row, target).unwrap_or("")))
        .collect();
    let missing = pending.iter().copied().filter(|&row| in_cell(row)).collect();
    CellSplit { observed, missing }
}

/// Factor table and numeric target encoding for the observed rows.
/// Categorical targets get the sorted distinct observed values as the
/// factor table and each row's factor index as its value; numeric
/// targets parse directly, NaN where they do not parse.
pub fn encode_target(
    dataset: &Dataset,
    target: &str,
    observed: &[usize],
    categorical: bool,
) -> (Option<Vec<String>>, Vec<f64>) {
    if categorical {
        let distinct: BTreeSet<String> = observed
            .iter()
            .map(|&row| dataset.value(row, target).unwrap_or("").to_string())
            .collect();
        let factors: Vec<String> = distinct.into_iter().collect();
        let values = observed
            .iter()
            .map(|&row| {
                let value = dataset.value(row, target).unwrap_or("");
                factors
                    .iter()
                    .position(|factor| factor == value)
                    .map_or(f64::NAN, |index| index as f64)
            })
            .collect();
        (Some(factors), values)
    } else {
        let values = observed
            .iter()
            .map(|&row| {
                dataset
                    .value(row, target)
                    .and_then(|value| value.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            })
            .collect();
        (None, values)
    }
}

/// Numeric encoding of the predictor columns over the observed rows.
pub fn encode_predictors(
    dataset: &Dataset,
    predictors: &[String],
    observed: &[usize],
) -> Vec<(String, Vec<f64>)> {
    predictors
        .iter()
        .map(|field| {
            let values = observed
                .iter()
                .map(|&row| {
                    dataset
                        .value(row, field)
                        .and_then(|value| value.parse::<f64>().ok())
                        .unwrap_or(f64::NAN)
                })
                .collect();
            (field.clone(), values)
        })
        .collect()
}

/// Per-row weights over the observed rows, when the dataset carries
/// weights at all.
pub fn cell_weights(dataset: &Dataset, observed: &[usize]) -> Option<Vec<f64>> {
    dataset.weights.as_ref()?;
    Some(observed.iter().map(|&row| dataset.weight(row)).collect())
}
