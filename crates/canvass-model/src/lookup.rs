//! Case-insensitive field-name lookup.
//!
//! Field names arrive from declarations, CSV headers, and store columns
//! with inconsistent casing; positions are resolved through an
//! uppercase-keyed map so `agecat` and `AGECAT` are the same field.

use std::collections::HashMap;

/// Maps field names to positions, ignoring ASCII case.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    slots: HashMap<String, usize>,
}

impl FieldIndex {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::default();
        for (position, name) in names.into_iter().enumerate() {
            index.insert(name.as_ref(), position);
        }
        index
    }

    /// Returns the previous position if the name was already present.
    pub fn insert(&mut self, name: &str, position: usize) -> Option<usize> {
        self.slots.insert(name.to_ascii_uppercase(), position)
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.slots.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
