//! Model fitting seam.
//!
//! The orchestrator never sees inside a statistical method: it hands a
//! cell's observed rows to a [`ModelProvider`] and gets back an opaque
//! [`FittedModel`] to draw from. Fitting failure is fatal to the cell,
//! never to the run.

use rand::RngCore;
use thiserror::Error;

/// One cell's fit failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct FitError(pub String);

/// Observed rows of one cell, numeric-encoded for fitting.
#[derive(Debug)]
pub struct CellData<'a> {
    /// Field being imputed.
    pub target: &'a str,
    /// Numeric form of the target per observed row: the factor index
    /// for categorical targets, the parsed value otherwise.
    pub values: &'a [f64],
    /// Row weights, parallel to `values`. `None` means unweighted.
    pub weights: Option<&'a [f64]>,
    /// Factor table for categorical targets, index-aligned with the
    /// codes in `values`.
    pub factors: Option<&'a [String]>,
    /// Predictor columns, each parallel to `values`. Cells that do not
    /// parse numerically are NaN.
    pub predictors: &'a [(String, Vec<f64>)],
}

/// A statistical method the orchestrator can fit per cell.
pub trait ModelProvider: std::fmt::Debug {
    /// Draws are factor indices to be mapped back through the cell's
    /// factor table.
    fn is_categorical(&self) -> bool;

    fn fit(&self, cell: &CellData<'_>) -> Result<Box<dyn FittedModel>, FitError>;
}

/// Fit result; draws are independent given the rng state handed in.
pub trait FittedModel {
    fn draw(&self, rng: &mut dyn RngCore) -> f64;
}
