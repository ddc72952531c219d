//! Compiled edit grid.
//!
//! Declared edits are compiled once into a ternary matrix over a
//! flattened field×value column space. Every discrete field that appears
//! in at least one discrete edit owns a contiguous span of columns, one
//! per admissible value. A discrete edit is one row: within a
//! participating field's span, `True` cells mark the values in the edit's
//! failing set and `False` cells the rest; fields the edit does not
//! involve are `Irrelevant` across their whole span. Continuous edits
//! carry no cells, only the expression forwarded to the store.
//!
//! A field whose span holds at least one `False` cell is an *entering*
//! field of that edit: its value decides whether the edit fires. A term
//! that lists every admissible value is a placeholder; it can never be
//! the cause of a failure.
//!
//! The grid is immutable after compilation.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use canvass_model::{CanvassError, EditRule, FieldDomain, FieldIndex, Result, RuleSet};

/// One cell of a compiled discrete edit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// The edit's failing set contains this value.
    True,
    /// The edit involves this field but not this value.
    False,
    /// The edit does not involve this column's field.
    Irrelevant,
}

/// Contiguous column range owned by one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub start: usize,
    pub len: usize,
}

impl FieldSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    /// Absolute column for a 1-based value code.
    pub fn column(&self, code: usize) -> usize {
        self.start + code - 1
    }
}

/// A discrete field that owns columns in the grid.
#[derive(Debug, Clone)]
pub struct GridField {
    pub name: String,
    values: Vec<String>,
    pub span: FieldSpan,
}

impl GridField {
    /// 1-based value code for an external value.
    pub fn code_of(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value).map(|i| i + 1)
    }

    /// External value for a 1-based value code.
    pub fn value_at(&self, code: usize) -> Option<&str> {
        code.checked_sub(1)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn cardinality(&self) -> usize {
        self.values.len()
    }
}

/// A compiled discrete edit.
#[derive(Debug, Clone)]
pub struct DiscreteRow {
    pub label: String,
    cells: Vec<Cell>,
    /// Per grid field: span is not wholly irrelevant.
    involved: Vec<bool>,
    /// Per grid field: at least one `False` cell in the span.
    entering: Vec<bool>,
}

impl DiscreteRow {
    pub fn cell(&self, column: usize) -> Cell {
        self.cells[column]
    }

    pub fn involves(&self, field_pos: usize) -> bool {
        self.involved[field_pos]
    }

    pub fn is_entering(&self, field_pos: usize) -> bool {
        self.entering[field_pos]
    }
}

/// A compiled continuous edit: the expression goes to the store verbatim.
#[derive(Debug, Clone)]
pub struct ContinuousRow {
    pub label: String,
    pub expression: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum CompiledEdit {
    Discrete(DiscreteRow),
    Continuous(ContinuousRow),
}

/// The compiled, immutable rule representation.
#[derive(Debug, Clone)]
pub struct EditGrid {
    fields: Vec<GridField>,
    index: FieldIndex,
    width: usize,
    edits: Vec<CompiledEdit>,
}

impl EditGrid {
    /// Compiles a declared rule set. Every declaration problem is fatal
    /// here; nothing downstream re-validates.
    pub fn compile(rules: &RuleSet) -> Result<Self> {
        rules.validate()?;

        // Discrete fields referenced by at least one discrete edit own
        // columns, in declaration order.
        let mut used: BTreeSet<String> = BTreeSet::new();
        for edit in &rules.edits {
            if let EditRule::Discrete { terms, .. } = edit {
                for term in terms {
                    used.insert(term.field.to_ascii_uppercase());
                }
            }
        }

        let mut fields = Vec::new();
        let mut column = 0usize;
        for decl in &rules.fields {
            if !used.contains(&decl.name.to_ascii_uppercase()) {
                continue;
            }
            let FieldDomain::Discrete { values } = &decl.domain else {
                continue;
            };
            let span = FieldSpan {
                start: column,
                len: values.len(),
            };
            column += values.len();
            fields.push(GridField {
                name: decl.name.clone(),
                values: values.clone(),
                span,
            });
        }
        let width = column;
        let index = FieldIndex::new(fields.iter().map(|f| f.name.as_str()));

        let mut edits = Vec::new();
        for (edit_no, edit) in rules.edits.iter().enumerate() {
            let label = edit
                .label()
                .map_or_else(|| edit.describe(), ToString::to_string);
            match edit {
                EditRule::Discrete { terms, .. } => {
                    // Conjoined terms on the same field intersect their
                    // value sets.
                    let mut marked: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
                    for term in terms {
                        let field_pos = index.get(&term.field).ok_or_else(|| {
                            CanvassError::UnknownField(term.field.clone())
                        })?;
                        let field = &fields[field_pos];
                        let codes: BTreeSet<usize> = term
                            .values
                            .iter()
                            .filter_map(|v| field.code_of(v))
                            .collect();
                        match marked.get_mut(&field_pos) {
                            Some(existing) => {
                                existing.retain(|code| codes.contains(code));
                                if existing.is_empty() {
                                    return Err(CanvassError::Config(format!(
                                        "edit #{edit_no} terms on field {} are contradictory",
                                        field.name
                                    )));
                                }
                            }
                            None => {
                                marked.insert(field_pos, codes);
                            }
                        }
                    }

                    let mut cells = vec![Cell::Irrelevant; width];
                    for (&field_pos, codes) in &marked {
                        let span = fields[field_pos].span;
                        for cell in &mut cells[span.range()] {
                            *cell = Cell::False;
                        }
                        for &code in codes {
                            cells[span.column(code)] = Cell::True;
                        }
                    }
                    let involved: Vec<bool> = (0..fields.len())
                        .map(|pos| marked.contains_key(&pos))
                        .collect();
                    let entering: Vec<bool> = fields
                        .iter()
                        .enumerate()
                        .map(|(pos, field)| {
                            cells[field.span.range()].contains(&Cell::False)
                                && involved[pos]
                        })
                        .collect();
                    if !entering.contains(&true) {
                        return Err(CanvassError::Config(format!(
                            "edit {label} marks every value of every field it names; \
                             it would fail all complete records"
                        )));
                    }
                    edits.push(CompiledEdit::Discrete(DiscreteRow {
                        label,
                        cells,
                        involved,
                        entering,
                    }));
                }
                EditRule::Continuous {
                    expression,
                    fields: named,
                    ..
                } => {
                    // Store referenced fields under their declared names
                    // so failure maps key consistently.
                    let named = named
                        .iter()
                        .filter_map(|name| rules.field(name))
                        .map(|field| field.name.clone())
                        .collect();
                    edits.push(CompiledEdit::Continuous(ContinuousRow {
                        label,
                        expression: expression.clone(),
                        fields: named,
                    }));
                }
            }
        }

        Ok(Self {
            fields,
            index,
            width,
            edits,
        })
    }

    /// Total column count of the flattened value space.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Fields owning columns, in grid order.
    pub fn fields(&self) -> &[GridField] {
        &self.fields
    }

    pub fn field(&self, pos: usize) -> &GridField {
        &self.fields[pos]
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.index.get(name)
    }

    pub fn edits(&self) -> &[CompiledEdit] {
        &self.edits
    }

    pub fn has_continuous_edits(&self) -> bool {
        self.edits
            .iter()
            .any(|e| matches!(e, CompiledEdit::Continuous(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvass_model::{EditTerm, FieldDef};

    fn rules() -> RuleSet {
        RuleSet::new(
            vec![
                FieldDef::discrete("A", vec!["1".into(), "2".into(), "3".into()]),
                FieldDef::discrete("B", vec!["x".into(), "y".into()]),
                FieldDef::discrete("UNUSED", vec!["u".into()]),
            ],
            vec![EditRule::Discrete {
                label: Some("a2bx".into()),
                terms: vec![
                    EditTerm::new("A", vec!["2".into()]),
                    EditTerm::new("B", vec!["x".into()]),
                ],
            }],
        )
    }

    #[test]
    fn spans_cover_used_fields_only() {
        let grid = EditGrid::compile(&rules()).unwrap();
        assert_eq!(grid.width(), 5);
        assert_eq!(grid.fields().len(), 2);
        assert_eq!(grid.field(0).span, FieldSpan { start: 0, len: 3 });
        assert_eq!(grid.field(1).span, FieldSpan { start: 3, len: 2 });
        assert!(grid.field_position("unused").is_none());
    }

    #[test]
    fn row_cells_mark_the_failing_set() {
        let grid = EditGrid::compile(&rules()).unwrap();
        let CompiledEdit::Discrete(row) = &grid.edits()[0] else {
            panic!("expected discrete row");
        };
        assert_eq!(row.cell(0), Cell::False); // A=1
        assert_eq!(row.cell(1), Cell::True); // A=2
        assert_eq!(row.cell(2), Cell::False); // A=3
        assert_eq!(row.cell(3), Cell::True); // B=x
        assert_eq!(row.cell(4), Cell::False); // B=y
        assert!(row.is_entering(0));
        assert!(row.is_entering(1));
    }

    #[test]
    fn full_value_term_is_not_entering() {
        let mut declared = rules();
        declared.edits = vec![EditRule::Discrete {
            label: None,
            terms: vec![
                EditTerm::new("A", vec!["2".into()]),
                EditTerm::new("B", vec!["x".into(), "y".into()]),
            ],
        }];
        let grid = EditGrid::compile(&declared).unwrap();
        let CompiledEdit::Discrete(row) = &grid.edits()[0] else {
            panic!("expected discrete row");
        };
        assert!(row.involves(1));
        assert!(!row.is_entering(1));
    }

    #[test]
    fn edit_without_entering_field_is_fatal() {
        let mut declared = rules();
        declared.edits = vec![EditRule::Discrete {
            label: None,
            terms: vec![
                EditTerm::new("A", vec!["1".into(), "2".into(), "3".into()]),
                EditTerm::new("B", vec!["x".into(), "y".into()]),
            ],
        }];
        let err = EditGrid::compile(&declared).unwrap_err();
        assert!(matches!(err, CanvassError::Config(_)));
    }

    #[test]
    fn contradictory_terms_are_fatal() {
        let mut declared = rules();
        declared.edits = vec![EditRule::Discrete {
            label: None,
            terms: vec![
                EditTerm::new("A", vec!["1".into()]),
                EditTerm::new("A", vec!["2".into()]),
            ],
        }];
        assert!(EditGrid::compile(&declared).is_err());
    }

    #[test]
    fn same_field_terms_intersect() {
        let mut declared = rules();
        declared.edits = vec![EditRule::Discrete {
            label: None,
            terms: vec![
                EditTerm::new("A", vec!["1".into(), "2".into()]),
                EditTerm::new("A", vec!["2".into(), "3".into()]),
            ],
        }];
        let grid = EditGrid::compile(&declared).unwrap();
        let CompiledEdit::Discrete(row) = &grid.edits()[0] else {
            panic!("expected discrete row");
        };
        assert_eq!(row.cell(0), Cell::False);
        assert_eq!(row.cell(1), Cell::True);
        assert_eq!(row.cell(2), Cell::False);
    }
}
