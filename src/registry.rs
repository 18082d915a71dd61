//! Named capability factories.
//!
//! Detectors and trackers hold per-video state, so the registry stores
//! factories rather than instances: every video gets a fresh backend.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::{GroundingDetector, SalientRegionDetector};
use crate::track::{ObjectTracker, TemplateTracker, TemplateTrackerConfig};

/// Builds one backend instance.
pub type Factory<T> = Arc<dyn Fn() -> Result<Box<T>> + Send + Sync>;

/// Thread-safe registry of backend factories keyed by name.
pub struct BackendRegistry<T: ?Sized> {
    factories: HashMap<String, Factory<T>>,
    default_name: Option<String>,
}

impl<T: ?Sized> BackendRegistry<T> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<T>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Factory for `name`, for handing to worker threads.
    pub fn factory(&self, name: &str) -> Result<Factory<T>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("backend '{}' not registered (have: {})", name, self.list().join(", ")))
    }

    pub fn default_factory(&self) -> Result<Factory<T>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no backends registered"))?;
        self.factory(name)
    }

    /// Build a fresh instance of `name`.
    pub fn create(&self, name: &str) -> Result<Box<T>> {
        (self.factory(name)?)()
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T: ?Sized> Default for BackendRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type DetectorRegistry = BackendRegistry<dyn GroundingDetector>;
pub type TrackerRegistry = BackendRegistry<dyn ObjectTracker>;

/// Settings the built-in detector backends need.
#[derive(Clone, Debug, Default)]
pub struct DetectorSettings {
    /// Detection-service URL for the `http` backend.
    pub endpoint: Option<String>,
    pub request_timeout: std::time::Duration,
}

/// Registry with every detector backend compiled into this build.
pub fn builtin_detectors(settings: &DetectorSettings) -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register("cpu", || {
        Ok(Box::new(SalientRegionDetector::new()) as Box<dyn GroundingDetector>)
    });

    #[cfg(feature = "backend-http")]
    {
        let settings = settings.clone();
        registry.register("http", move || {
            let endpoint = settings
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("http detector requires GROUNDING_DETECTOR_ENDPOINT"))?;
            let detector = crate::detect::HttpDetector::new(crate::detect::HttpDetectorConfig {
                endpoint,
                timeout: settings.request_timeout,
            })?;
            Ok(Box::new(detector) as Box<dyn GroundingDetector>)
        });
    }
    #[cfg(not(feature = "backend-http"))]
    let _ = settings;

    registry
}

/// Registry with every tracker backend compiled into this build.
pub fn builtin_trackers(config: TemplateTrackerConfig) -> TrackerRegistry {
    let mut registry = TrackerRegistry::new();
    registry.register("template", move || {
        Ok(Box::new(TemplateTracker::new(config.clone())) as Box<dyn ObjectTracker>)
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registered_is_default() {
        let registry = builtin_detectors(&DetectorSettings::default());
        assert_eq!(registry.default_name(), Some("cpu"));
        let detector = registry.create("cpu").unwrap();
        assert_eq!(detector.name(), "cpu");
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = builtin_trackers(TemplateTrackerConfig::default());
        assert!(registry.create("kcf").is_err());
        assert!(registry.set_default("kcf").is_err());
        assert_eq!(registry.list(), vec!["template".to_string()]);
    }

    #[test]
    fn factories_build_independent_instances() {
        let registry = builtin_trackers(TemplateTrackerConfig::default());
        let factory = registry.default_factory().unwrap();
        let a = factory().unwrap();
        let b = factory().unwrap();
        assert_eq!(a.name(), b.name());
    }
}
