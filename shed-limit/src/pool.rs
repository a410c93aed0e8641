use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ConfigError;
use crate::Shedder;
use crate::ShedderConfig;
use crate::build_shedder;

/// A registry of shedders, one per key.
///
/// Each route, tenant or method gets its own shedder, created on first use from the
/// pool's configuration and kept for the life of the pool.
#[derive(Debug)]
pub struct ShedderPool {
    config: ShedderConfig,
    shedders: RwLock<HashMap<String, Arc<dyn Shedder>>>,
}

impl ShedderPool {
    /// Creates an empty pool.
    ///
    /// The configuration is validated once, here, so that lookups cannot fail.
    pub fn new(config: ShedderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            shedders: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the shedder for `key`, creating it on first use.
    pub fn get_shedder(&self, key: &str) -> Arc<dyn Shedder> {
        if let Some(shedder) = self.shedders.read().get(key) {
            return Arc::clone(shedder);
        }

        let mut shedders = self.shedders.write();
        // Another thread may have won the race for the write lock
        if let Some(shedder) = shedders.get(key) {
            return Arc::clone(shedder);
        }

        let shedder = build_shedder(self.config.clone().with_name(key));
        shedders.insert(key.to_string(), Arc::clone(&shedder));
        tracing::debug!(key, enabled = self.config.enabled, "created shedder");
        shedder
    }

    pub fn len(&self) -> usize {
        self.shedders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shedders.read().is_empty()
    }
}
