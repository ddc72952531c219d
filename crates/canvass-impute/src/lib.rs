//! Model-based imputation of missing values.
//!
//! An [`ImputePlan`] names the input table and, per variable, the
//! statistical method, category key and draw count. The [`Imputer`]
//! partitions records into cells, fits the method per cell through a
//! [`ModelProvider`], and draws until each candidate clears the edit
//! rules, shrinking the category key when a cell is too thin. Margin-
//! constrained variables go through the raking path instead. Accepted
//! values land in an append-only output relation keyed by draw index,
//! record id and field name.

mod cell;
pub mod method;
mod orchestrator;
pub mod plan;
pub mod pmf;
pub mod provider;
mod rake;

pub use crate::method::{Method, ProviderRegistry};
pub use crate::orchestrator::{Imputer, RunReport, VariableReport};
pub use crate::plan::{DEFAULT_SEED, ImputePlan, MAX_DRAW_ATTEMPTS, Margin, VariableSpec};
pub use crate::pmf::HotDeck;
pub use crate::provider::{CellData, FitError, FittedModel, ModelProvider};
