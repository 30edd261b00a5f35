//! Configuration loading and store wiring.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{info, warn};

use stockledger_core::paging::MAX_PAGE_LIMIT;

use crate::store::{InMemoryStore, PostgresStore, Store};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Infrastructure settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    /// `USE_PERSISTENT_STORES`: Postgres when true, in-memory otherwise.
    pub use_persistent_stores: bool,
    /// `DATABASE_URL`: required when `use_persistent_stores` is set.
    pub database_url: Option<String>,
    /// `DB_MAX_CONNECTIONS`
    pub db_max_connections: u32,
    /// `STOCKLEDGER_PAGE_LIMIT_MAX`: upper bound on read page size.
    pub page_limit_max: u32,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            page_limit_max: MAX_PAGE_LIMIT,
        }
    }
}

impl InfraConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let use_persistent_stores = lookup("USE_PERSISTENT_STORES")
            .unwrap_or_else(|| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.db_max_connections);

        let page_limit_max = lookup("STOCKLEDGER_PAGE_LIMIT_MAX")
            .and_then(|v| v.parse::<u32>().ok())
            .map(|n| n.clamp(1, MAX_PAGE_LIMIT))
            .unwrap_or(defaults.page_limit_max);

        Self {
            use_persistent_stores,
            database_url,
            db_max_connections,
            page_limit_max,
        }
    }

    /// Construct the configured store.
    ///
    /// The persistent store connects, applies the bundled schema and must be
    /// used from a multi-threaded tokio runtime afterwards.
    pub async fn build_store(&self) -> anyhow::Result<Arc<dyn Store>> {
        if !self.use_persistent_stores {
            if self.database_url.is_some() {
                warn!("DATABASE_URL is set but USE_PERSISTENT_STORES is false; ignoring it");
            }
            info!("using in-memory store");
            return Ok(Arc::new(InMemoryStore::new()));
        }

        let Some(url) = self.database_url.as_deref() else {
            bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        };
        let store = PostgresStore::connect(url, self.db_max_connections)
            .await
            .context("failed to connect to Postgres")?;
        store.migrate().await.context("failed to apply schema")?;
        info!(max_connections = self.db_max_connections, "using Postgres store");
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> InfraConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InfraConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_in_memory() {
        assert_eq!(config(&[]), InfraConfig::default());
    }

    #[test]
    fn parses_persistent_settings() {
        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("STOCKLEDGER_PAGE_LIMIT_MAX", "100"),
        ]);
        assert!(cfg.use_persistent_stores);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(cfg.db_max_connections, 4);
        assert_eq!(cfg.page_limit_max, 100);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "yes please"),
            ("DB_MAX_CONNECTIONS", "0"),
            ("STOCKLEDGER_PAGE_LIMIT_MAX", "100000"),
        ]);
        assert!(!cfg.use_persistent_stores);
        assert_eq!(cfg.db_max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.page_limit_max, MAX_PAGE_LIMIT);
    }

    #[test]
    fn url_without_persistence_still_builds_in_memory() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/stock")]);
        assert!(!cfg.use_persistent_stores);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let store = rt.block_on(cfg.build_store()).unwrap();
        assert!(store.begin().is_ok());
    }

    #[test]
    fn persistent_without_url_fails_to_build() {
        let cfg = config(&[("USE_PERSISTENT_STORES", "true")]);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = rt.block_on(cfg.build_store()).err().unwrap();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
