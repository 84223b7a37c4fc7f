//! Plugin registry: maps step type ids and extension handler ids to the
//! factories that build them.
//!
//! The registry is an explicit, process-scoped object passed to every
//! pipeline rather than a global. It is mutable at runtime; interested
//! parties (the extension point table, tooling) register a
//! [`RegistryListener`] to track additions and removals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rowflow_types::StepError;
use serde_json::Value as JsonValue;

use crate::extension::ExtensionHandler;
use crate::step::StepHandler;

/// Builds a step handler instance from its JSON configuration block.
/// One factory per registered step type; invoked once per step copy.
pub trait StepFactory: Send + Sync {
    fn build(&self, config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError>;
}

impl<F> StepFactory for F
where
    F: Fn(&JsonValue) -> Result<Box<dyn StepHandler>, StepError> + Send + Sync,
{
    fn build(&self, config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError> {
        self(config)
    }
}

/// Builds an extension handler. Resolution is deferred until the first
/// event on the handler's extension point fires.
pub trait ExtensionFactory: Send + Sync {
    fn build(&self) -> Result<Arc<dyn ExtensionHandler>, StepError>;
}

impl<F> ExtensionFactory for F
where
    F: Fn() -> Result<Arc<dyn ExtensionHandler>, StepError> + Send + Sync,
{
    fn build(&self) -> Result<Arc<dyn ExtensionHandler>, StepError> {
        self()
    }
}

/// Which registry table a notification concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Step,
    Extension,
}

/// Callbacks fired on registry mutations. Invoked after the registry
/// has released its internal lock, so listeners may call back into it.
pub trait RegistryListener: Send + Sync {
    fn plugin_added(&self, _kind: PluginKind, _id: &str) {}
    fn plugin_removed(&self, _kind: PluginKind, _id: &str) {}
    fn plugin_changed(&self, _kind: PluginKind, _id: &str) {}
}

struct ExtensionEntry {
    event: String,
    factory: Arc<dyn ExtensionFactory>,
}

#[derive(Default)]
struct Tables {
    steps: HashMap<String, Arc<dyn StepFactory>>,
    extensions: HashMap<String, ExtensionEntry>,
}

enum Notification {
    Added(PluginKind, String),
    Removed(PluginKind, String),
    Changed(PluginKind, String),
}

/// Process-scoped plugin registry. All methods take `&self`; the tables
/// sit behind a mutex so registrations may happen while pipelines run.
#[derive(Default)]
pub struct PluginRegistry {
    tables: Mutex<Tables>,
    listeners: Mutex<Vec<Arc<dyn RegistryListener>>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners.lock().expect("listener lock").push(listener);
    }

    /// Register a step type. Re-registering an existing id replaces its
    /// factory and notifies listeners with a change instead of an add.
    pub fn register_step(&self, id: impl Into<String>, factory: Arc<dyn StepFactory>) {
        let id = id.into();
        let replaced = {
            let mut tables = self.tables.lock().expect("registry lock");
            tables.steps.insert(id.clone(), factory).is_some()
        };
        self.notify(if replaced {
            Notification::Changed(PluginKind::Step, id)
        } else {
            Notification::Added(PluginKind::Step, id)
        });
    }

    pub fn unregister_step(&self, id: &str) {
        let removed = {
            let mut tables = self.tables.lock().expect("registry lock");
            tables.steps.remove(id).is_some()
        };
        if removed {
            self.notify(Notification::Removed(PluginKind::Step, id.to_string()));
        }
    }

    #[must_use]
    pub fn resolve_step(&self, id: &str) -> Option<Arc<dyn StepFactory>> {
        let tables = self.tables.lock().expect("registry lock");
        tables.steps.get(id).map(Arc::clone)
    }

    /// Register an extension handler for the named extension point.
    pub fn register_extension(
        &self,
        id: impl Into<String>,
        event: impl Into<String>,
        factory: Arc<dyn ExtensionFactory>,
    ) {
        let id = id.into();
        let replaced = {
            let mut tables = self.tables.lock().expect("registry lock");
            tables
                .extensions
                .insert(
                    id.clone(),
                    ExtensionEntry {
                        event: event.into(),
                        factory,
                    },
                )
                .is_some()
        };
        self.notify(if replaced {
            Notification::Changed(PluginKind::Extension, id)
        } else {
            Notification::Added(PluginKind::Extension, id)
        });
    }

    pub fn unregister_extension(&self, id: &str) {
        let removed = {
            let mut tables = self.tables.lock().expect("registry lock");
            tables.extensions.remove(id).is_some()
        };
        if removed {
            self.notify(Notification::Removed(PluginKind::Extension, id.to_string()));
        }
    }

    #[must_use]
    pub fn resolve_extension(&self, id: &str) -> Option<Arc<dyn ExtensionFactory>> {
        let tables = self.tables.lock().expect("registry lock");
        tables.extensions.get(id).map(|e| Arc::clone(&e.factory))
    }

    /// Extension point the given handler id is registered for.
    #[must_use]
    pub fn extension_event(&self, id: &str) -> Option<String> {
        let tables = self.tables.lock().expect("registry lock");
        tables.extensions.get(id).map(|e| e.event.clone())
    }

    #[must_use]
    pub fn step_ids(&self) -> Vec<String> {
        let tables = self.tables.lock().expect("registry lock");
        let mut ids: Vec<String> = tables.steps.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn extension_ids(&self) -> Vec<String> {
        let tables = self.tables.lock().expect("registry lock");
        let mut ids: Vec<String> = tables.extensions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop every registration and notify listeners of the removals.
    pub fn reset(&self) {
        let (steps, extensions) = {
            let mut tables = self.tables.lock().expect("registry lock");
            let steps: Vec<String> = tables.steps.drain().map(|(id, _)| id).collect();
            let extensions: Vec<String> = tables.extensions.drain().map(|(id, _)| id).collect();
            (steps, extensions)
        };
        for id in steps {
            self.notify(Notification::Removed(PluginKind::Step, id));
        }
        for id in extensions {
            self.notify(Notification::Removed(PluginKind::Extension, id));
        }
    }

    fn notify(&self, notification: Notification) {
        let listeners: Vec<Arc<dyn RegistryListener>> =
            self.listeners.lock().expect("listener lock").clone();
        for listener in listeners {
            match &notification {
                Notification::Added(kind, id) => listener.plugin_added(*kind, id),
                Notification::Removed(kind, id) => listener.plugin_removed(*kind, id),
                Notification::Changed(kind, id) => listener.plugin_changed(*kind, id),
            }
        }
    }
}
