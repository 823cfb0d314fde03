//! Process-wide tracker registry: a `type → factory` map populated at
//! startup by side-effectful adapter registration, spec §4.H.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use super::{Auth, Tracker, TrackerError};
use crate::config::TrackerConfig;

pub type TrackerFactory = fn(&TrackerConfig, Option<Auth>) -> Result<Box<dyn Tracker>, TrackerError>;

#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, TrackerFactory>,
}

impl Registry {
    pub fn register(&mut self, tracker_type: impl Into<String>, factory: TrackerFactory) {
        self.factories.insert(tracker_type.into(), factory);
    }

    pub fn build(&self, config: &TrackerConfig) -> Result<Box<dyn Tracker>, TrackerError> {
        let factory = self
            .factories
            .get(&config.tracker_type)
            .ok_or_else(|| TrackerError::UnknownType(config.tracker_type.clone()))?;
        let auth = Auth::from_env(&config.tracker_type);
        factory(config, auth)
    }
}

fn global() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::default();
        registry.register("mock", |_config, _auth| Ok(Box::new(super::MockTracker::new())));
        registry.register("http", |config, auth| {
            super::HttpTracker::from_config(config, auth).map(|t| Box::new(t) as Box<dyn Tracker>)
        });
        Mutex::new(registry)
    })
}

/// Register an adapter factory under `tracker_type` in the global
/// registry, overwriting any prior registration for that type.
pub fn register(tracker_type: impl Into<String>, factory: TrackerFactory) {
    global().lock().expect("tracker registry poisoned").register(tracker_type, factory);
}

pub fn build(config: &TrackerConfig) -> Result<Box<dyn Tracker>, TrackerError> {
    global().lock().expect("tracker registry poisoned").build(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_type_resolves_by_default() {
        let config = TrackerConfig { tracker_type: "mock".into(), ..Default::default() };
        assert!(build(&config).is_ok());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let config = TrackerConfig { tracker_type: "no-such-tracker".into(), ..Default::default() };
        assert!(build(&config).is_err());
    }
}
