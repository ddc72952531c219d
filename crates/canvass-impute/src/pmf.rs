//! Weighted empirical distributions.
//!
//! Hot-deck is the one built-in method: the fitted model is the cell's
//! own observed value distribution, weighted, and a draw picks a donor
//! value from it. Everything else arrives through the provider registry.

use rand::RngCore;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;

use crate::provider::{CellData, FitError, FittedModel, ModelProvider};

/// Hot-deck donor draws over the cell's factor table.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotDeck;

impl ModelProvider for HotDeck {
    fn is_categorical(&self) -> bool {
        true
    }

    fn fit(&self, cell: &CellData<'_>) -> Result<Box<dyn FittedModel>, FitError> {
        let Some(factors) = cell.factors else {
            return Err(FitError(format!(
                "hot-deck needs a factor table for {}",
                cell.target
            )));
        };
        if cell.values.is_empty() {
            return Err(FitError(format!("no observed rows for {}", cell.target)));
        }
        let mut weights = vec![0.0_f64; factors.len()];
        for (row, value) in cell.values.iter().enumerate() {
            let index = *value as usize;
            let Some(slot) = weights.get_mut(index) else {
                return Err(FitError(format!(
                    "factor code {value} out of range for {}",
                    cell.target
                )));
            };
            *slot += cell.weights.map_or(1.0, |w| w[row]);
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(FitError(format!(
                "all observed weights are zero for {}",
                cell.target
            )));
        }
        Ok(Box::new(Pmf { weights }))
    }
}

/// Fitted hot-deck table: one weight per factor code.
#[derive(Debug, Clone)]
struct Pmf {
    weights: Vec<f64>,
}

impl FittedModel for Pmf {
    fn draw(&self, rng: &mut dyn RngCore) -> f64 {
        // Fit rejected empty and all-zero tables, so the draw cannot
        // miss.
        weighted_draw(&self.weights, rng).map_or(f64::NAN, |index| index as f64)
    }
}

/// One index draw from a weight table. `None` when the table is empty,
/// sums to zero, or holds an invalid weight.
pub(crate) fn weighted_draw(weights: &[f64], rng: &mut dyn RngCore) -> Option<usize> {
    let dist = WeightedIndex::new(weights).ok()?;
    Some(dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn fit_accumulates_weight_per_factor() {
        let factors = strings(&["1", "2", "3"]);
        let cell = CellData {
            target: "A",
            values: &[0.0, 0.0, 2.0],
            weights: Some(&[2.0, 3.0, 5.0]),
            factors: Some(&factors),
            predictors: &[],
        };
        let model = HotDeck.fit(&cell).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let drawn = model.draw(&mut rng);
            // Factor 1 carries no weight and must never be drawn.
            assert!(drawn == 0.0 || drawn == 2.0, "drew {drawn}");
        }
    }

    #[test]
    fn fit_without_factors_is_refused() {
        let cell = CellData {
            target: "A",
            values: &[0.0],
            weights: None,
            factors: None,
            predictors: &[],
        };
        assert!(HotDeck.fit(&cell).is_err());
    }

    #[test]
    fn fit_on_empty_cell_is_refused() {
        let factors = strings(&["1"]);
        let cell = CellData {
            target: "A",
            values: &[],
            weights: None,
            factors: Some(&factors),
            predictors: &[],
        };
        assert!(HotDeck.fit(&cell).is_err());
    }

    #[test]
    fn zero_weight_table_yields_no_draw() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(weighted_draw(&[0.0, 0.0], &mut rng), None);
        assert_eq!(weighted_draw(&[], &mut rng), None);
        assert_eq!(weighted_draw(&[0.0, 4.0], &mut rng), Some(1));
    }

    #[test]
    fn same_seed_same_draws() {
        let factors = strings(&["a", "b", "c"]);
        let cell = CellData {
            target: "X",
            values: &[0.0, 1.0, 2.0, 1.0],
            weights: None,
            factors: Some(&factors),
            predictors: &[],
        };
        let model = HotDeck.fit(&cell).unwrap();
        let draws = |seed: u64| -> Vec<f64> {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..10).map(|_| model.draw(&mut rng)).collect()
        };
        assert_eq!(draws(35), draws(35));
    }
}
