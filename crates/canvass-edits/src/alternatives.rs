//! Alternative-value search.
//!
//! For a failing record, enumerates every reassignment of exactly the
//! failing fields that makes the record pass all discrete edits. All
//! other fields keep their original values. The walk is depth-first over
//! the failing fields in grid order and intentionally exponential in the
//! number of simultaneously failing fields; the deadline is the only
//! mitigation.

use std::time::Instant;

use tracing::debug;

use crate::check::{RowCheck, check_discrete_row};
use crate::encode::IndicatorRecord;
use crate::grid::{CompiledEdit, EditGrid};

/// Consistent reassignments of a record's failing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternatives {
    /// The failing fields, canonical names, in grid order.
    pub fields: Vec<String>,
    /// One row per passing combination, values aligned with `fields`.
    pub rows: Vec<Vec<String>>,
    /// The deadline expired before the space was exhausted.
    pub partial: bool,
}

impl Alternatives {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Walks the value space of `failing` (grid field positions, ascending)
/// and collects the combinations under which `record` passes every
/// discrete edit. The deadline is consulted only at leaves, so the call
/// returns within one leaf evaluation of expiry.
pub(crate) fn search_alternatives(
    grid: &EditGrid,
    record: &IndicatorRecord,
    failing: &[usize],
    deadline: Option<Instant>,
) -> Alternatives {
    // Preallocation guess; the exact row count is unknowable before the
    // walk.
    let estimate = failing
        .iter()
        .try_fold(1_usize, |acc, &pos| {
            acc.checked_mul(grid.field(pos).cardinality())
        })
        .unwrap_or(usize::MAX)
        .min(4096);
    let mut search = Search {
        grid,
        failing,
        deadline,
        codes: Vec::with_capacity(failing.len()),
        rows: Vec::with_capacity(estimate),
        expired: false,
    };
    search.descend(0, record.clone());
    if search.expired {
        debug!(
            collected = search.rows.len(),
            "alternative search hit its deadline"
        );
    }
    Alternatives {
        fields: failing
            .iter()
            .map(|&pos| grid.field(pos).name.clone())
            .collect(),
        rows: search.rows,
        partial: search.expired,
    }
}

struct Search<'a> {
    grid: &'a EditGrid,
    failing: &'a [usize],
    deadline: Option<Instant>,
    /// Value codes chosen on the path to the current node.
    codes: Vec<usize>,
    rows: Vec<Vec<String>>,
    expired: bool,
}

impl Search<'_> {
    /// Branches expand on private copies, so sibling subtrees never see
    /// each other's assignments.
    fn descend(&mut self, depth: usize, record: IndicatorRecord) {
        if self.expired {
            return;
        }
        if depth == self.failing.len() {
            self.leaf(&record);
            return;
        }
        let field = self.grid.field(self.failing[depth]);
        for code in 1..=field.cardinality() {
            self.codes.push(code);
            self.descend(depth + 1, record.with_value(field.span, code));
            self.codes.pop();
        }
    }

    fn leaf(&mut self, record: &IndicatorRecord) {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.expired = true;
            return;
        }
        for edit in self.grid.edits() {
            let CompiledEdit::Discrete(row) = edit else {
                continue;
            };
            match check_discrete_row(self.grid, row, record) {
                RowCheck::Pass | RowCheck::NotEvaluable => {}
                RowCheck::Fails(_) => return,
            }
        }
        let row = self
            .failing
            .iter()
            .zip(&self.codes)
            .map(|(&pos, &code)| {
                // Codes on the path are 1..=cardinality, so the lookup
                // cannot miss.
                self.grid
                    .field(pos)
                    .value_at(code)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        self.rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::RecordEncoder;
    use canvass_model::{EditRule, EditTerm, FieldDef, RuleSet};
    use std::time::Duration;

    fn grid() -> EditGrid {
        let rules = RuleSet::new(
            vec![
                FieldDef::discrete("A", vec!["1".into(), "2".into(), "3".into()]),
                FieldDef::discrete("B", vec!["x".into(), "y".into()]),
            ],
            vec![EditRule::Discrete {
                label: None,
                terms: vec![
                    EditTerm::new("A", vec!["2".into()]),
                    EditTerm::new("B", vec!["x".into()]),
                ],
            }],
        );
        EditGrid::compile(&rules).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn failing_record(grid: &EditGrid) -> IndicatorRecord {
        let mut encoder = RecordEncoder::new();
        encoder
            .encode(grid, &strings(&["A", "B"]), &strings(&["2", "x"]))
            .unwrap()
    }

    #[test]
    fn holding_one_field_enumerates_the_other() {
        let grid = grid();
        let record = failing_record(&grid);
        // B stays at x; only A is reassigned.
        let found = search_alternatives(&grid, &record, &[0], None);
        assert_eq!(found.fields, vec!["A".to_string()]);
        assert_eq!(found.rows, vec![vec!["1".to_string()], vec!["3".to_string()]]);
        assert!(!found.partial);
    }

    #[test]
    fn both_fields_free_yields_every_passing_pair() {
        let grid = grid();
        let record = failing_record(&grid);
        let found = search_alternatives(&grid, &record, &[0, 1], None);
        let rows: Vec<(String, String)> = found
            .rows
            .into_iter()
            .map(|mut row| {
                let b = row.pop().unwrap();
                let a = row.pop().unwrap();
                (a, b)
            })
            .collect();
        assert_eq!(rows.len(), 5);
        assert!(!rows.contains(&("2".to_string(), "x".to_string())));
    }

    #[test]
    fn expired_deadline_returns_partial_not_error() {
        let grid = grid();
        let record = failing_record(&grid);
        let past = Instant::now() - Duration::from_secs(1);
        let found = search_alternatives(&grid, &record, &[0, 1], Some(past));
        assert!(found.partial);
        assert!(found.is_empty());
    }

    #[test]
    fn unknown_uninvolved_field_does_not_block_alternatives() {
        let mut rules = RuleSet::new(
            vec![
                FieldDef::discrete("A", vec!["1".into(), "2".into(), "3".into()]),
                FieldDef::discrete("B", vec!["x".into(), "y".into()]),
                FieldDef::discrete("C", vec!["p".into(), "q".into()]),
            ],
            vec![EditRule::Discrete {
                label: None,
                terms: vec![
                    EditTerm::new("A", vec!["2".into()]),
                    EditTerm::new("B", vec!["x".into()]),
                ],
            }],
        );
        rules.edits.push(EditRule::Discrete {
            label: None,
            terms: vec![
                EditTerm::new("C", vec!["q".into()]),
                EditTerm::new("B", vec!["x".into()]),
            ],
        });
        let grid = EditGrid::compile(&rules).unwrap();
        let mut encoder = RecordEncoder::new();
        // C is unknown, so the C/B edit is never triggered.
        let record = encoder
            .encode(
                &grid,
                &strings(&["A", "B", "C"]),
                &strings(&["2", "x", ""]),
            )
            .unwrap();
        let found = search_alternatives(&grid, &record, &[0], None);
        assert_eq!(found.rows, vec![vec!["1".to_string()], vec!["3".to_string()]]);
    }
}
