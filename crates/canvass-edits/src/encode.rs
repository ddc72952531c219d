//! Record encoding.
//!
//! A caller hands in fields and values in its own order, usually a subset
//! of the declared fields. Encoding translates that into the grid's
//! indicator form through a cross-index between the two orderings. The
//! cross-index is rebuilt only when the caller's field list changes;
//! repeated calls with the same list, the common case when walking a
//! dataset row by row, reuse the cached build.

use canvass_model::{CanvassError, Result, is_missing_value};

use crate::grid::{EditGrid, FieldSpan};

/// One cell of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// The record takes this value.
    Set,
    /// The record is known and does not take this value.
    Clear,
    /// The field's value is unknown.
    Missing,
}

/// A record in the grid's flattened column space. At most one `Set` mark
/// per field span; a field with no `Set` mark is either all `Missing`
/// (unknown) or untouched by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRecord {
    marks: Vec<Mark>,
}

impl IndicatorRecord {
    pub fn unknown(width: usize) -> Self {
        Self {
            marks: vec![Mark::Missing; width],
        }
    }

    pub fn field_slice(&self, span: FieldSpan) -> &[Mark] {
        &self.marks[span.range()]
    }

    /// Sets the field to a 1-based value code, clearing the rest of the
    /// span.
    pub fn set_value(&mut self, span: FieldSpan, code: usize) {
        for mark in &mut self.marks[span.range()] {
            *mark = Mark::Clear;
        }
        self.marks[span.column(code)] = Mark::Set;
    }

    /// Private copy with one field reassigned; the search expands
    /// branches on copies so traversal order cannot matter.
    pub fn with_value(&self, span: FieldSpan, code: usize) -> Self {
        let mut next = self.clone();
        next.set_value(span, code);
        next
    }

    /// 1-based value code of the field's `Set` mark, if the field is
    /// known.
    pub fn value_code(&self, span: FieldSpan) -> Option<usize> {
        self.field_slice(span)
            .iter()
            .position(|mark| *mark == Mark::Set)
            .map(|offset| offset + 1)
    }
}

/// Cached translation between the caller's field ordering and the grid's.
#[derive(Debug, Clone)]
pub struct CrossIndex {
    signature: Vec<String>,
    /// Per caller position: grid field position, or None when no edit
    /// references the field.
    pub(crate) caller_to_grid: Vec<Option<usize>>,
    /// Per grid field position: caller position, if supplied.
    pub(crate) grid_to_caller: Vec<Option<usize>>,
}

impl CrossIndex {
    fn build(grid: &EditGrid, fields: &[String]) -> Self {
        let mut caller_to_grid = vec![None; fields.len()];
        let mut grid_to_caller = vec![None; grid.fields().len()];
        for (caller_pos, name) in fields.iter().enumerate() {
            if let Some(grid_pos) = grid.field_position(name) {
                caller_to_grid[caller_pos] = Some(grid_pos);
                grid_to_caller[grid_pos] = Some(caller_pos);
            }
        }
        Self {
            signature: fields.to_vec(),
            caller_to_grid,
            grid_to_caller,
        }
    }

    /// First caller field no edit references, if any.
    pub(crate) fn unmapped_field(&self) -> Option<&str> {
        self.caller_to_grid
            .iter()
            .position(Option::is_none)
            .map(|pos| self.signature[pos].as_str())
    }

    /// True when every listed field name appears in the caller's list.
    pub(crate) fn covers(&self, names: &[String]) -> bool {
        names.iter().all(|name| {
            self.signature
                .iter()
                .any(|have| have.eq_ignore_ascii_case(name))
        })
    }
}

/// Encoder with the per-engine cross-index cache.
#[derive(Debug, Default)]
pub struct RecordEncoder {
    cache: Option<CrossIndex>,
}

impl RecordEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cross-index for the caller's field list, rebuilding
    /// only when the list differs from the cached signature.
    pub fn cross_index(&mut self, grid: &EditGrid, fields: &[String]) -> &CrossIndex {
        if self
            .cache
            .as_ref()
            .is_none_or(|cached| cached.signature != fields)
        {
            self.cache = None;
        }
        self.cache
            .get_or_insert_with(|| CrossIndex::build(grid, fields))
    }

    /// Encodes a record. Unknown values are fatal; fields no edit
    /// references are accepted and ignored; missing values leave the
    /// field unknown.
    pub fn encode(
        &mut self,
        grid: &EditGrid,
        fields: &[String],
        values: &[String],
    ) -> Result<IndicatorRecord> {
        if fields.len() != values.len() {
            return Err(CanvassError::Message(format!(
                "record has {} fields but {} values",
                fields.len(),
                values.len()
            )));
        }
        let index = self.cross_index(grid, fields);
        encode_with(grid, index, values)
    }
}

pub(crate) fn encode_with(
    grid: &EditGrid,
    index: &CrossIndex,
    values: &[String],
) -> Result<IndicatorRecord> {
    let mut record = IndicatorRecord::unknown(grid.width());
    for (caller_pos, value) in values.iter().enumerate() {
        let Some(grid_pos) = index.caller_to_grid[caller_pos] else {
            continue;
        };
        if is_missing_value(value) {
            continue;
        }
        let field = grid.field(grid_pos);
        let Some(code) = field.code_of(value) else {
            return Err(CanvassError::UnknownValue {
                field: field.name.clone(),
                value: value.clone(),
            });
        };
        record.set_value(field.span, code);
    }
    Ok(record)
}
