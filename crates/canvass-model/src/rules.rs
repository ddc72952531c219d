//! Edit declarations: rules that mark combinations of field values as
//! invalid.
//!
//! A discrete edit is a conjunction of terms; each term names a field and
//! the values that satisfy it. A record fails the edit when every term
//! holds. A continuous edit carries an opaque boolean expression in the
//! store's native syntax, plus the list of fields it reads.

use serde::{Deserialize, Serialize};

use crate::error::{CanvassError, Result};
use crate::field::{FieldDef, FieldDomain};
use crate::lookup::FieldIndex;

/// One conjunct of a discrete edit: the field must take one of the
/// listed values for the term to hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditTerm {
    pub field: String,
    pub values: Vec<String>,
}

impl EditTerm {
    pub fn new(field: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }
}

/// A declared edit rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditRule {
    Discrete {
        #[serde(default)]
        label: Option<String>,
        terms: Vec<EditTerm>,
    },
    Continuous {
        #[serde(default)]
        label: Option<String>,
        expression: String,
        fields: Vec<String>,
    },
}

impl EditRule {
    pub fn label(&self) -> Option<&str> {
        match self {
            EditRule::Discrete { label, .. } | EditRule::Continuous { label, .. } => {
                label.as_deref()
            }
        }
    }

    /// Fallback display form used in tracing when no label is declared.
    pub fn describe(&self) -> String {
        match self {
            EditRule::Discrete { terms, .. } => {
                let parts: Vec<String> = terms
                    .iter()
                    .map(|term| format!("{} in {{{}}}", term.field, term.values.join(", ")))
                    .collect();
                parts.join(" and ")
            }
            EditRule::Continuous { expression, .. } => expression.clone(),
        }
    }
}

/// The full declarative input: fields plus edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub edits: Vec<EditRule>,
}

impl RuleSet {
    pub fn new(fields: Vec<FieldDef>, edits: Vec<EditRule>) -> Self {
        Self { fields, edits }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Checks the declarations for internal consistency. Every problem is
    /// fatal: a grid compiled from a bad declaration would misreport
    /// failures.
    pub fn validate(&self) -> Result<()> {
        let mut index = FieldIndex::default();
        for (position, field) in self.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(CanvassError::Config("field with empty name".into()));
            }
            if index.insert(&field.name, position).is_some() {
                return Err(CanvassError::Config(format!(
                    "field {} declared more than once",
                    field.name
                )));
            }
            if let FieldDomain::Discrete { values } = &field.domain {
                if values.is_empty() {
                    return Err(CanvassError::Config(format!(
                        "discrete field {} declares no values",
                        field.name
                    )));
                }
                for (idx, value) in values.iter().enumerate() {
                    if values[..idx].contains(value) {
                        return Err(CanvassError::Config(format!(
                            "field {} declares value {value:?} more than once",
                            field.name
                        )));
                    }
                }
            }
        }

        for (edit_no, edit) in self.edits.iter().enumerate() {
            match edit {
                EditRule::Discrete { terms, .. } => {
                    if terms.is_empty() {
                        return Err(CanvassError::Config(format!(
                            "edit #{edit_no} has no terms"
                        )));
                    }
                    for term in terms {
                        let Some(position) = index.get(&term.field) else {
                            return Err(CanvassError::Config(format!(
                                "edit #{edit_no} references undeclared field {}",
                                term.field
                            )));
                        };
                        let field = &self.fields[position];
                        if !field.is_discrete() {
                            return Err(CanvassError::Config(format!(
                                "edit #{edit_no} uses continuous field {} in a discrete term",
                                field.name
                            )));
                        }
                        if term.values.is_empty() {
                            return Err(CanvassError::Config(format!(
                                "edit #{edit_no} term on {} lists no values",
                                field.name
                            )));
                        }
                        for value in &term.values {
                            if field.value_code(value).is_none() {
                                return Err(CanvassError::Config(format!(
                                    "edit #{edit_no} expects {} = {value:?}, which is not declared",
                                    field.name
                                )));
                            }
                        }
                    }
                }
                EditRule::Continuous {
                    expression, fields, ..
                } => {
                    if expression.trim().is_empty() {
                        return Err(CanvassError::Config(format!(
                            "edit #{edit_no} has an empty expression"
                        )));
                    }
                    if fields.is_empty() {
                        return Err(CanvassError::Config(format!(
                            "edit #{edit_no} declares no referenced fields"
                        )));
                    }
                    for name in fields {
                        if index.get(name).is_none() {
                            return Err(CanvassError::Config(format!(
                                "edit #{edit_no} references undeclared field {name}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset() -> RuleSet {
        RuleSet::new(
            vec![
                FieldDef::discrete("A", vec!["1".into(), "2".into(), "3".into()]),
                FieldDef::discrete("B", vec!["x".into(), "y".into()]),
                FieldDef::continuous("INCOME"),
            ],
            vec![
                EditRule::Discrete {
                    label: Some("a2bx".into()),
                    terms: vec![
                        EditTerm::new("A", vec!["2".into()]),
                        EditTerm::new("B", vec!["x".into()]),
                    ],
                },
                EditRule::Continuous {
                    label: None,
                    expression: "INCOME < 0".into(),
                    fields: vec!["INCOME".into()],
                },
            ],
        )
    }

    #[test]
    fn valid_ruleset_passes() {
        assert!(ruleset().validate().is_ok());
    }

    #[test]
    fn undeclared_value_is_config_error() {
        let mut rules = ruleset();
        rules.edits.push(EditRule::Discrete {
            label: None,
            terms: vec![EditTerm::new("B", vec!["z".into()])],
        });
        let err = rules.validate().unwrap_err();
        assert!(err.to_string().contains("not declared"), "{err}");
    }

    #[test]
    fn duplicate_field_is_config_error() {
        let mut rules = ruleset();
        rules
            .fields
            .push(FieldDef::discrete("a", vec!["1".into()]));
        assert!(rules.validate().is_err());
    }

    #[test]
    fn continuous_field_in_discrete_term_is_rejected() {
        let mut rules = ruleset();
        rules.edits.push(EditRule::Discrete {
            label: None,
            terms: vec![EditTerm::new("INCOME", vec!["1".into()])],
        });
        assert!(rules.validate().is_err());
    }

    #[test]
    fn rules_round_trip_through_json() {
        let rules = ruleset();
        let json = serde_json::to_string(&rules).unwrap();
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(rules, back);
    }
}
