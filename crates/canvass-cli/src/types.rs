//! Command results shared by the summary tables and the JSON reports.

use std::collections::BTreeMap;

use serde::Serialize;

use canvass_impute::RunReport;

/// Outcome of the check command.
#[derive(Debug, Serialize)]
pub struct CheckRunResult {
    /// Path of the checked CSV file.
    pub data: String,
    /// Rows checked.
    pub checked: usize,
    /// Per charged field, edits charged across all failing records.
    pub field_tally: BTreeMap<String, u32>,
    pub failures: Vec<FailureSummary>,
    pub has_failures: bool,
}

/// One failing record.
#[derive(Debug, Serialize)]
pub struct FailureSummary {
    /// Zero-based row position in the checked file.
    pub row: usize,
    /// Value of the id column, or the row position rendered as text.
    pub id: String,
    /// Per charged field, how many edits charged it.
    pub by_field: BTreeMap<String, u32>,
    /// Passing reassignments, present when the search was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<AlternativeSummary>,
}

/// Passing reassignments of one record's failing fields, capped for
/// reporting.
#[derive(Debug, Serialize)]
pub struct AlternativeSummary {
    /// The failing fields, in grid order.
    pub fields: Vec<String>,
    /// Reassignments kept in the report, aligned with `fields`.
    pub rows: Vec<Vec<String>>,
    /// Reassignments the search found before the cap.
    pub found: usize,
    /// The search hit its deadline before exhausting the space.
    pub partial: bool,
}

/// Outcome of the impute command.
#[derive(Debug, Serialize)]
pub struct ImputeRunResult {
    /// Path of the input CSV file.
    pub data: String,
    /// Rows in the output relation after the run.
    pub output_rows: usize,
    pub report: RunReport,
    pub has_failures: bool,
}
