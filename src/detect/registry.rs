use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::{Capability, DetectorBackend};

/// Named set of detector backends, from which exactly one is handed to the pipeline.
///
/// Backends are moved out with `take*` because the pipeline owns its detector.
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a backend under its own name. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        self.register_as(name, Box::new(backend));
    }

    /// Register a backend under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, backend: Box<dyn DetectorBackend>) {
        let name = name.into();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, backend);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Remove and return a backend by name.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn DetectorBackend>> {
        let backend = self.backends.remove(name);
        if backend.is_some() && self.default_name.as_deref() == Some(name) {
            self.default_name = self.backends.keys().next().cloned();
        }
        backend
    }

    /// Remove and return the default backend.
    pub fn take_default(&mut self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.take(&name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))
    }

    /// Remove and return a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn take_for_capability(&mut self, capability: Capability) -> Result<Box<dyn DetectorBackend>> {
        let default_supports = self
            .default_name
            .as_ref()
            .and_then(|name| self.backends.get(name))
            .is_some_and(|backend| backend.supports(capability));
        if default_supports {
            return self.take_default();
        }

        let name = self
            .backends
            .iter()
            .find(|(_, backend)| backend.supports(capability))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("no registered backend supports capability {:?}", capability))?;
        self.take(&name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
