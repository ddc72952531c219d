//! Field declarations: the admissible-value sets that records are
//! validated and imputed against.

use serde::{Deserialize, Serialize};

/// How a field's admissible values are declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDomain {
    /// Ordered list of admissible category codes. Position in the list is
    /// the field's internal value code (1-based).
    Discrete { values: Vec<String> },
    /// Real-valued; admissible values are not enumerated.
    Continuous,
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub domain: FieldDomain,
}

impl FieldDef {
    pub fn discrete(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domain: FieldDomain::Discrete { values },
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: FieldDomain::Continuous,
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self.domain, FieldDomain::Discrete { .. })
    }

    /// Number of admissible values; zero for continuous fields.
    pub fn cardinality(&self) -> usize {
        match &self.domain {
            FieldDomain::Discrete { values } => values.len(),
            FieldDomain::Continuous => 0,
        }
    }

    /// 1-based value code for an external value, if declared.
    pub fn value_code(&self, value: &str) -> Option<usize> {
        match &self.domain {
            FieldDomain::Discrete { values } => {
                values.iter().position(|v| v == value).map(|idx| idx + 1)
            }
            FieldDomain::Continuous => None,
        }
    }

    /// External value for a 1-based value code.
    pub fn value_at(&self, code: usize) -> Option<&str> {
        match &self.domain {
            FieldDomain::Discrete { values } => {
                code.checked_sub(1).and_then(|idx| values.get(idx)).map(String::as_str)
            }
            FieldDomain::Continuous => None,
        }
    }

    /// Declared value nearest to a raw numeric draw, for fields whose
    /// admissible values parse as numbers. Ties keep the earlier value.
    pub fn nearest_value(&self, raw: f64) -> Option<&str> {
        let FieldDomain::Discrete { values } = &self.domain else {
            return None;
        };
        let mut best: Option<(&str, f64)> = None;
        for value in values {
            let Ok(parsed) = value.parse::<f64>() else {
                continue;
            };
            let dist = (parsed - raw).abs();
            match best {
                Some((_, best_dist)) if best_dist <= dist => {}
                _ => best = Some((value, dist)),
            }
        }
        best.map(|(value, _)| value)
    }
}

/// Whether a raw cell value counts as missing. Empty cells and the NaN
/// marker both do.
pub fn is_missing_value(raw: &str) -> bool {
    raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("nan")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age_category() -> FieldDef {
        FieldDef::discrete("AGECAT", vec!["1".into(), "2".into(), "3".into()])
    }

    #[test]
    fn value_codes_are_one_based() {
        let field = age_category();
        assert_eq!(field.value_code("1"), Some(1));
        assert_eq!(field.value_code("3"), Some(3));
        assert_eq!(field.value_code("9"), None);
        assert_eq!(field.value_at(2), Some("2"));
        assert_eq!(field.value_at(0), None);
    }

    #[test]
    fn nearest_value_snaps_numeric_draws() {
        let field = age_category();
        assert_eq!(field.nearest_value(2.4), Some("2"));
        assert_eq!(field.nearest_value(-7.0), Some("1"));
        assert_eq!(field.nearest_value(99.0), Some("3"));
    }

    #[test]
    fn nearest_value_ignores_non_numeric_codes() {
        let field = FieldDef::discrete("MS", vec!["married".into(), "single".into()]);
        assert_eq!(field.nearest_value(1.0), None);
    }

    #[test]
    fn missing_markers() {
        assert!(is_missing_value(""));
        assert!(is_missing_value("  "));
        assert!(is_missing_value("NaN"));
        assert!(!is_missing_value("0"));
    }
}
