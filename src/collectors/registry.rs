use crate::collectors::{
    Collector,
    config::CollectorConfig,
    error::{OrchestratorError, RegistryError},
    register_builtin,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{Span, debug, info, info_span, warn};

/// Builds a collector instance. Receives a span carrying `collector = <name>`
/// as its log context.
pub type Factory = Arc<dyn Fn(&Span) -> anyhow::Result<Arc<dyn Collector>> + Send + Sync>;

struct Entry {
    default_enabled: bool,
    enabled: bool,
    factory: Factory,
}

/// Name -> factory mapping plus the instance cache.
///
/// Populated (and overridden from configuration) once at start, then shared
/// as `Arc<CollectorRegistry>` by every orchestrator. Only the instance cache
/// changes afterwards.
pub struct CollectorRegistry {
    entries: BTreeMap<String, Entry>,
    forced: BTreeSet<String>,
    instances: Mutex<HashMap<String, Arc<dyn Collector>>>,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.names())
            .field("enabled", &self.enabled_names())
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            forced: BTreeSet::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// A registry holding every built-in collector at its default state.
    ///
    /// # Errors
    ///
    /// Returns an error if two built-ins share a name.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// # Errors
    ///
    /// Returns `RegistryError::Duplicate` if `name` is already registered.
    pub fn register<F>(
        &mut self,
        name: &str,
        default_enabled: bool,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&Span) -> anyhow::Result<Arc<dyn Collector>> + Send + Sync + 'static,
    {
        if self.entries.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }

        self.entries.insert(
            name.to_string(),
            Entry {
                default_enabled,
                enabled: default_enabled,
                factory: Arc::new(factory),
            },
        );

        debug!(collector = name, default_enabled, "registered collector");

        Ok(())
    }

    /// `None` if the collector does not exist, otherwise whether it is enabled.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<bool> {
        self.entries.get(name).map(|entry| entry.enabled)
    }

    #[must_use]
    pub fn default_enabled(&self, name: &str) -> Option<bool> {
        self.entries.get(name).map(|entry| entry.default_enabled)
    }

    /// Force a collector on or off, recording the override.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unknown` if `name` is not registered.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;

        entry.enabled = enabled;
        self.forced.insert(name.to_string());

        info!(collector = name, enabled, "collector state forced by configuration");

        Ok(())
    }

    /// Apply every explicit override of `config`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unknown` for an override naming an unknown collector.
    pub fn apply(&mut self, config: &CollectorConfig) -> Result<(), RegistryError> {
        for (name, enabled) in config.overrides() {
            self.set_enabled(name, enabled)?;
        }
        Ok(())
    }

    /// Whether configuration explicitly toggled `name`. Informational only.
    #[must_use]
    pub fn is_forced(&self, name: &str) -> bool {
        self.forced.contains(name)
    }

    #[must_use]
    pub fn forced(&self) -> Vec<&str> {
        self.forced.iter().map(String::as_str).collect()
    }

    /// All registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn enabled_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Collector>>> {
        match self.instances.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("collector instance cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Return the cached instance for `name`, creating it on first use.
    ///
    /// The factory runs under the cache lock so it is never invoked twice
    /// concurrently for the same name. A failed factory is not cached.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Missing` for an unknown name and
    /// `OrchestratorError::Factory` if the factory fails.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<dyn Collector>, OrchestratorError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| OrchestratorError::Missing(name.to_string()))?;

        let mut instances = self.lock_instances();

        if let Some(collector) = instances.get(name) {
            return Ok(Arc::clone(collector));
        }

        let span = info_span!("collector", collector = name);
        let collector = (entry.factory)(&span).map_err(|source| OrchestratorError::Factory {
            name: name.to_string(),
            source,
        })?;

        instances.insert(name.to_string(), Arc::clone(&collector));
        drop(instances);

        debug!(collector = name, "instantiated collector");

        Ok(collector)
    }

    /// Number of instantiated collectors.
    #[must_use]
    pub fn cached_instances(&self) -> usize {
        self.lock_instances().len()
    }
}
