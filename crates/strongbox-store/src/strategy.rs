//! Dump strategies and the per-engine registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use strongbox_core::{
    ArtifactFormat, CancelSignal, ConfigError, DatastoreConnectionInfo, DumpError, DumpMode, Engine,
};

/// What a finished dump wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub tables: usize,
    pub rows: u64,
}

/// Produces one self-contained artifact for a datastore.
///
/// Implementations write through [`ArtifactWriter`](crate::ArtifactWriter)
/// so that nothing exists at `target` unless the dump completed.
#[async_trait]
pub trait DumpStrategy: Send + Sync {
    fn engine(&self) -> Engine;

    fn mode(&self) -> DumpMode;

    /// Encoding of the artifacts this strategy writes
    fn format(&self) -> ArtifactFormat;

    /// Write a complete artifact to `target`
    async fn dump(&self, target: &Path, cancel: &CancelSignal) -> Result<DumpStats, DumpError>;
}

/// Engine to strategy lookup, populated at boot
#[derive(Default, Clone)]
pub struct DumpRegistry {
    strategies: HashMap<Engine, Arc<dyn DumpStrategy>>,
}

impl DumpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy`, replacing any earlier one for the same engine
    pub fn register(&mut self, strategy: Arc<dyn DumpStrategy>) {
        self.strategies.insert(strategy.engine(), strategy);
    }

    #[must_use]
    pub fn with(mut self, strategy: Arc<dyn DumpStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Strategy for `engine`, or `ConfigError::NoDumpStrategy`
    pub fn get(&self, engine: Engine) -> Result<Arc<dyn DumpStrategy>, ConfigError> {
        self.strategies
            .get(&engine)
            .cloned()
            .ok_or(ConfigError::NoDumpStrategy { engine })
    }

    pub fn engines(&self) -> Vec<Engine> {
        self.strategies.keys().copied().collect()
    }

    /// Registry holding the strategy `mode` selects for the configured
    /// datastore. Unsupported combinations leave the registry empty so the
    /// first backup reports `NoDumpStrategy`.
    pub fn for_datastore(info: &DatastoreConnectionInfo, mode: DumpMode) -> Self {
        let mut registry = Self::new();
        match build_strategy(info, mode) {
            Some(strategy) => registry.register(strategy),
            None => tracing::warn!(
                engine = %info.engine,
                mode = %mode,
                "No dump strategy available for this engine and mode"
            ),
        }
        registry
    }
}

impl std::fmt::Debug for DumpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

fn build_strategy(info: &DatastoreConnectionInfo, mode: DumpMode) -> Option<Arc<dyn DumpStrategy>> {
    match (info.engine, mode) {
        #[cfg(feature = "postgres")]
        (Engine::Postgresql, DumpMode::Driver) => {
            Some(Arc::new(crate::postgres::PostgresDriverDump::new(info.clone())))
        }
        #[cfg(feature = "sqlite")]
        (Engine::Sqlite, DumpMode::Driver) => {
            Some(Arc::new(crate::sqlite::SqliteDriverDump::new(info.clone())))
        }
        (Engine::Postgresql | Engine::Mysql, DumpMode::Native) => {
            Some(Arc::new(crate::native::NativeDump::new(info.clone())))
        }
        _ => None,
    }
}
