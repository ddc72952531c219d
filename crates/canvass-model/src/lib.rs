//! Declarations shared across the edit and imputation engine: fields and
//! their admissible values, edit rules, and the error taxonomy.

pub mod error;
pub mod field;
pub mod lookup;
pub mod rules;

pub use error::{CanvassError, Result, StoreError};
pub use field::{FieldDef, FieldDomain, is_missing_value};
pub use lookup::FieldIndex;
pub use rules::{EditRule, EditTerm, RuleSet};
