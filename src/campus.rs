use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Manages per-campus engines. Each campus gets its own Engine + WAL + compactor.
/// Campus = database name from the pgwire connection.
pub struct CampusManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    lock_timeout: Duration,
}

impl CampusManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, lock_timeout: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            lock_timeout,
        }
    }

    /// Get or lazily create the engine for `campus`.
    pub fn get_or_create(&self, campus: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(campus) {
            return Ok(engine.value().clone());
        }
        if campus.len() > MAX_CAMPUS_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "campus name too long"));
        }
        if self.engines.len() >= MAX_CAMPUSES {
            return Err(io::Error::other("too many campuses"));
        }

        // Sanitize campus name to prevent path traversal
        let safe_name: String = campus
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty campus name"));
        }
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));

        // Two first connections racing for the same campus must share one engine (and WAL).
        let mut created = false;
        let engine = self
            .engines
            .entry(campus.to_string())
            .or_try_insert_with(|| {
                created = true;
                Engine::new(wal_path, self.lock_timeout).map(Arc::new)
            })?
            .value()
            .clone();

        if created {
            tokio::spawn(compactor::run_compactor(
                engine.clone(),
                self.compact_threshold,
                compactor::DEFAULT_COMPACT_INTERVAL,
            ));
            metrics::gauge!(crate::observability::CAMPUSES_ACTIVE).set(self.engines.len() as f64);
            tracing::info!(campus, "campus engine started");
        }
        Ok(engine)
    }
}
