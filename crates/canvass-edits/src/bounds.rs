//! Ratio-bound derivation.
//!
//! Declared bounds on ratios of continuous fields imply further bounds
//! by transitivity: A/B and B/C together bound A/C. The closure over all
//! declared pairs is computed once, checked for contradictions, and can
//! be rendered back into continuous edits.

use canvass_model::{CanvassError, EditRule, FieldIndex, Result};
use tracing::debug;

/// Declared bound on the ratio numerator/denominator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitBound {
    pub numerator: String,
    pub denominator: String,
    pub lower: f64,
    pub upper: f64,
}

impl ExplicitBound {
    pub fn new(numerator: &str, denominator: &str, lower: f64, upper: f64) -> Self {
        Self {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            lower,
            upper,
        }
    }

    fn validate(&self) -> Result<()> {
        let pair = format!("{}/{}", self.numerator, self.denominator);
        if self.numerator.trim().is_empty() || self.denominator.trim().is_empty() {
            return Err(CanvassError::Config(format!("ratio bound {pair} names an empty field")));
        }
        if self.numerator.eq_ignore_ascii_case(&self.denominator) {
            return Err(CanvassError::Config(format!("ratio bound {pair} relates a field to itself")));
        }
        if self.lower.is_nan() || self.upper.is_nan() {
            return Err(CanvassError::Config(format!("ratio bound {pair} is not a number")));
        }
        if self.lower < 0.0 {
            return Err(CanvassError::Config(format!("ratio bound {pair} has a negative lower bound")));
        }
        if self.upper <= 0.0 {
            return Err(CanvassError::Config(format!("ratio bound {pair} has a non-positive upper bound")));
        }
        if self.lower > self.upper {
            return Err(CanvassError::Config(format!(
                "ratio bound {pair} has lower {} above upper {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Transitive closure of the declared ratio bounds. `upper[i][j]` bounds
/// `fields[i]/fields[j]` from above, `lower[i][j]` from below; the
/// diagonal is pinned at 1.
#[derive(Debug, Clone)]
pub struct ImplicitBounds {
    fields: Vec<String>,
    lower: Vec<Vec<f64>>,
    upper: Vec<Vec<f64>>,
}

impl ImplicitBounds {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The derived interval for numerator/denominator, if both fields
    /// appear in any declared bound.
    pub fn bound(&self, numerator: &str, denominator: &str) -> Option<(f64, f64)> {
        let i = self.position(numerator)?;
        let j = self.position(denominator)?;
        Some((self.lower[i][j], self.upper[i][j]))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.eq_ignore_ascii_case(name))
    }

    /// Renders every non-trivial derived bound as a continuous edit that
    /// fires outside the interval. One edit per unordered pair; the
    /// mirrored direction is implied by the closure.
    pub fn to_rules(&self) -> Vec<EditRule> {
        let mut rules = Vec::new();
        for i in 0..self.fields.len() {
            for j in (i + 1)..self.fields.len() {
                let lower = self.lower[i][j];
                let upper = self.upper[i][j];
                if lower <= 0.0 && upper.is_infinite() {
                    continue;
                }
                let num = &self.fields[i];
                let den = &self.fields[j];
                let mut clauses = Vec::new();
                if lower > 0.0 {
                    clauses.push(format!("{num} < {lower} * {den}"));
                }
                if upper.is_finite() {
                    clauses.push(format!("{num} > {upper} * {den}"));
                }
                rules.push(EditRule::Continuous {
                    label: Some(format!("ratio {num}/{den} in [{lower}, {upper}]")),
                    expression: clauses.join(" OR "),
                    fields: vec![num.clone(), den.clone()],
                });
            }
        }
        rules
    }
}

/// Closes the declared bounds under transitivity and inversion.
/// Contradictory declarations, direct or implied, are fatal.
pub fn derive_ratio_bounds(declared: &[ExplicitBound]) -> Result<ImplicitBounds> {
    if declared.is_empty() {
        return Err(CanvassError::Config("no ratio bounds declared".into()));
    }
    let mut index = FieldIndex::default();
    let mut fields: Vec<String> = Vec::new();
    for bound in declared {
        bound.validate()?;
        for name in [&bound.numerator, &bound.denominator] {
            if !index.contains(name) {
                index.insert(name, fields.len());
                fields.push(name.clone());
            }
        }
    }
    let n = fields.len();
    let mut lower = vec![vec![0.0_f64; n]; n];
    let mut upper = vec![vec![f64::INFINITY; n]; n];
    for i in 0..n {
        lower[i][i] = 1.0;
        upper[i][i] = 1.0;
    }

    for bound in declared {
        let Some(i) = index.get(&bound.numerator) else {
            continue;
        };
        let Some(j) = index.get(&bound.denominator) else {
            continue;
        };
        if bound.lower > lower[i][j] {
            lower[i][j] = bound.lower;
        }
        if bound.upper < upper[i][j] {
            upper[i][j] = bound.upper;
        }
    }

    // A bound on i/j inverts into a bound on j/i.
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if lower[i][j] > 0.0 {
                let inverse = 1.0 / lower[i][j];
                if inverse < upper[j][i] {
                    upper[j][i] = inverse;
                }
            }
            if upper[i][j].is_finite() {
                let inverse = 1.0 / upper[i][j];
                if inverse > lower[j][i] {
                    lower[j][i] = inverse;
                }
            }
        }
    }

    // i/j bounded and k/i bounded imply k/j bounded through i.
    for i in 0..n {
        for j in 0..n {
            if !upper[i][j].is_finite() {
                continue;
            }
            for k in 0..n {
                let through = upper[i][j] * upper[k][i];
                if through < upper[k][j] {
                    upper[k][j] = through;
                }
            }
        }
    }

    for i in 0..n {
        for j in 0..n {
            if upper[j][i].is_finite() && upper[j][i] > 0.0 {
                let inverse = 1.0 / upper[j][i];
                if inverse > lower[i][j] {
                    lower[i][j] = inverse;
                }
            }
        }
    }

    let mut conflicts = Vec::new();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if lower[i][j] >= upper[i][j] {
                conflicts.push(format!(
                    "{}/{} squeezed into [{}, {}]",
                    fields[i], fields[j], lower[i][j], upper[i][j]
                ));
            }
        }
    }
    if !conflicts.is_empty() {
        return Err(CanvassError::Config(format!(
            "inconsistent ratio bounds: {}",
            conflicts.join("; ")
        )));
    }

    debug!(fields = n, declared = declared.len(), "ratio bounds closed");
    Ok(ImplicitBounds {
        fields,
        lower,
        upper,
    })
}
