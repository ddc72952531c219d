//! Method selection.
//!
//! A variable declares its method by name; the registry maps names to
//! providers. Only hot-deck ships built in. Raking is handled by the
//! orchestrator directly and never resolves to a provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use canvass_model::{CanvassError, Result};
use serde::{Deserialize, Serialize};

use crate::pmf::HotDeck;
use crate::provider::ModelProvider;

/// Declared imputation method of one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    HotDeck,
    Normal,
    LogNormal,
    Ols,
    Logit,
    Probit,
    Poisson,
    KernelDensity,
    Raking,
    /// Externally hosted model, resolved by registry key.
    External(String),
}

impl Method {
    pub fn key(&self) -> &str {
        match self {
            Method::HotDeck => "hot_deck",
            Method::Normal => "normal",
            Method::LogNormal => "log_normal",
            Method::Ols => "ols",
            Method::Logit => "logit",
            Method::Probit => "probit",
            Method::Poisson => "poisson",
            Method::KernelDensity => "kernel_density",
            Method::Raking => "raking",
            Method::External(name) => name,
        }
    }

    pub fn is_raking(&self) -> bool {
        matches!(self, Method::Raking)
    }
}

/// Providers by registry key.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ModelProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            providers: BTreeMap::new(),
        };
        registry.register("hot_deck", Arc::new(HotDeck));
        registry
    }
}

impl ProviderRegistry {
    pub fn register(&mut self, key: &str, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(key.to_string(), provider);
    }

    /// A method without a registered provider is a configuration
    /// problem, surfaced before any fitting starts.
    pub fn resolve(&self, method: &Method) -> Result<Arc<dyn ModelProvider>> {
        let key = method.key();
        self.providers.get(key).map(Arc::clone).ok_or_else(|| {
            CanvassError::Config(format!("no model provider registered for {key}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Method::HotDeck).unwrap();
        assert_eq!(json, "\"hot_deck\"");
        let back: Method = serde_json::from_str("\"kernel_density\"").unwrap();
        assert_eq!(back, Method::KernelDensity);
        let external: Method = serde_json::from_str("{\"external\":\"rlink\"}").unwrap();
        assert_eq!(external, Method::External("rlink".into()));
    }

    #[test]
    fn default_registry_resolves_hot_deck_only() {
        let registry = ProviderRegistry::default();
        assert!(registry.resolve(&Method::HotDeck).is_ok());
        let err = registry.resolve(&Method::Ols).unwrap_err();
        assert!(matches!(err, CanvassError::Config(_)));
    }

    #[test]
    fn registered_external_provider_resolves() {
        let mut registry = ProviderRegistry::default();
        registry.register("rlink", Arc::new(HotDeck));
        assert!(registry.resolve(&Method::External("rlink".into())).is_ok());
    }
}
