use std::{collections::HashMap, fmt, sync::Arc};

use thiserror::Error;
use tracing::{error, info};

use crate::{
    device::SharedDevice,
    stages::{ClockStage, DepartureBoardStage, MetricsStage, ScrollStage, TerminalStage},
    Stage,
};

pub type StageFactory = Arc<dyn Fn(SharedDevice) -> Box<dyn Stage> + Send + Sync>;

#[derive(Clone)]
pub struct StageDescriptor {
    pub name: String,
    pub factory: StageFactory,
}

impl StageDescriptor {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(SharedDevice) -> Box<dyn Stage> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("stage descriptor has no name")]
    EmptyName,
    #[error("stage `{0}` is already registered")]
    Duplicate(String),
}

/// Stage name to factory table. Built at startup and handed to a `StageController`,
/// which only ever reads it.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_stages() -> Self {
        let mut registry = Self::new();
        for descriptor in [
            StageDescriptor::new(TerminalStage::NAME, |device| {
                Box::new(TerminalStage::new(device))
            }),
            StageDescriptor::new(MetricsStage::NAME, |device| {
                Box::new(MetricsStage::new(device))
            }),
            StageDescriptor::new(ScrollStage::NAME, |device| Box::new(ScrollStage::new(device))),
            StageDescriptor::new(DepartureBoardStage::NAME, |device| {
                Box::new(DepartureBoardStage::new(device))
            }),
            StageDescriptor::new(ClockStage::NAME, |device| Box::new(ClockStage::new(device))),
        ] {
            let _ = registry.register(descriptor);
        }
        registry
    }

    /// Rejected descriptors are logged and skipped; earlier registrations stay intact.
    pub fn register(&mut self, descriptor: StageDescriptor) -> Result<(), RegistryError> {
        // Kept verbatim: dispatch looks names up exactly as events carry them.
        let name = descriptor.name.as_str();
        if name.trim().is_empty() {
            let err = RegistryError::EmptyName;
            error!(%err, "did not add stage");
            return Err(err);
        }
        if self.stages.contains_key(name) {
            let err = RegistryError::Duplicate(name.to_string());
            error!(%err, "did not add stage");
            return Err(err);
        }

        info!(stage = %name, "adding stage");
        self.stages.insert(name.to_string(), descriptor.factory);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StageFactory> {
        self.stages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
