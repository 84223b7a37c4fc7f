//! Extension points: named interception hooks fired at well-known
//! moments of a pipeline run.
//!
//! Handlers are registered in the [`PluginRegistry`](crate::registry::PluginRegistry)
//! and resolved lazily, the first time their extension point fires.
//! Resolution never happens while the callback table lock is held;
//! the invoke path snapshots the table, resolves outside the lock, and
//! writes resolved handlers back. This keeps a handler registration
//! running concurrently with an invoke from deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rowflow_types::ExecutionResult;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::error::EngineError;
use crate::registry::{PluginKind, PluginRegistry, RegistryListener};

/// Fired after a pipeline's steps are initialized, before any runs.
pub const PIPELINE_START: &str = "pipeline-start";
/// Fired after every step thread has finished, with the aggregate result.
pub const PIPELINE_FINISH: &str = "pipeline-finish";

/// Payload passed to extension handlers.
#[derive(Debug)]
pub enum ExtensionContext<'a> {
    PipelineStart {
        pipeline: &'a str,
    },
    PipelineFinish {
        pipeline: &'a str,
        result: &'a ExecutionResult,
    },
    /// Application-defined extension point.
    Custom {
        event: &'a str,
        payload: &'a JsonValue,
    },
}

/// How a handler failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Stop the run: no further handlers fire and the caller sees the
    /// abort as an engine error.
    #[error("aborted: {0}")]
    Abort(String),
    /// Handler-local failure; logged, the remaining handlers still run.
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

/// A callback attached to one extension point.
pub trait ExtensionHandler: Send + Sync {
    fn handle(&self, ctx: &ExtensionContext<'_>) -> Result<(), HandlerError>;
}

struct Entry {
    handler_id: String,
    cached: Option<Arc<dyn ExtensionHandler>>,
}

/// Callback table keyed by extension point name.
///
/// Kept in sync with the plugin registry through the listener
/// interface: registering or removing an extension plugin updates the
/// table without re-scanning.
pub struct ExtensionPointRegistry {
    resolver: Arc<PluginRegistry>,
    table: Mutex<HashMap<String, Vec<Entry>>>,
}

impl ExtensionPointRegistry {
    /// Build the table from the registry's current extension plugins
    /// and subscribe to future changes.
    pub fn attach(resolver: Arc<PluginRegistry>) -> Arc<Self> {
        let registry = Arc::new(Self {
            resolver: Arc::clone(&resolver),
            table: Mutex::new(HashMap::new()),
        });
        for id in resolver.extension_ids() {
            if let Some(event) = resolver.extension_event(&id) {
                registry.add_entry(&event, &id);
            }
        }
        resolver.add_listener(registry.clone());
        registry
    }

    /// Fire every handler attached to `event`, in registration order.
    ///
    /// An [`HandlerError::Abort`] stops the chain and surfaces as an
    /// engine error. Any other handler failure is logged and counts as
    /// that handler's problem; the remaining handlers still run.
    pub fn invoke(&self, event: &str, ctx: &ExtensionContext<'_>) -> Result<(), EngineError> {
        // snapshot under the lock, resolve outside it
        let snapshot: Vec<(String, Option<Arc<dyn ExtensionHandler>>)> = {
            let table = self.table.lock().expect("extension table lock");
            match table.get(event) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.handler_id.clone(), e.cached.clone()))
                    .collect(),
                None => return Ok(()),
            }
        };

        let mut resolved: Vec<(String, Arc<dyn ExtensionHandler>)> = Vec::new();
        let mut runnable: Vec<(String, Arc<dyn ExtensionHandler>)> =
            Vec::with_capacity(snapshot.len());
        for (handler_id, cached) in snapshot {
            match cached {
                Some(handler) => runnable.push((handler_id, handler)),
                None => match self.resolve(&handler_id) {
                    Some(handler) => {
                        resolved.push((handler_id.clone(), Arc::clone(&handler)));
                        runnable.push((handler_id, handler));
                    }
                    None => continue,
                },
            }
        }

        if !resolved.is_empty() {
            let mut table = self.table.lock().expect("extension table lock");
            if let Some(entries) = table.get_mut(event) {
                for (handler_id, handler) in resolved {
                    if let Some(entry) = entries
                        .iter_mut()
                        .find(|e| e.handler_id == handler_id && e.cached.is_none())
                    {
                        entry.cached = Some(handler);
                    }
                }
            }
        }

        let span = tracing::info_span!("extension_point", event);
        let _guard = span.enter();
        for (handler_id, handler) in runnable {
            match handler.handle(ctx) {
                Ok(()) => {}
                Err(HandlerError::Abort(message)) => {
                    tracing::warn!(handler = handler_id, message, "Extension handler aborted run");
                    return Err(EngineError::ExtensionAbort {
                        event: event.to_string(),
                        handler: handler_id,
                        message,
                    });
                }
                Err(HandlerError::Failure(err)) => {
                    tracing::error!(handler = handler_id, error = %err, "Extension handler failed");
                }
            }
        }
        Ok(())
    }

    /// Drop every cached handler instance; the next invoke re-resolves
    /// through the plugin registry.
    pub fn reinitialize(&self) {
        let mut table = self.table.lock().expect("extension table lock");
        for entries in table.values_mut() {
            for entry in entries.iter_mut() {
                entry.cached = None;
            }
        }
    }

    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        let table = self.table.lock().expect("extension table lock");
        table.get(event).map_or(0, Vec::len)
    }

    fn add_entry(&self, event: &str, handler_id: &str) {
        let mut table = self.table.lock().expect("extension table lock");
        let entries = table.entry(event.to_string()).or_default();
        if entries.iter().any(|e| e.handler_id == handler_id) {
            return;
        }
        entries.push(Entry {
            handler_id: handler_id.to_string(),
            cached: None,
        });
    }

    fn resolve(&self, handler_id: &str) -> Option<Arc<dyn ExtensionHandler>> {
        let factory = self.resolver.resolve_extension(handler_id)?;
        match factory.build() {
            Ok(handler) => Some(handler),
            Err(err) => {
                tracing::warn!(handler = handler_id, error = %err, "Extension handler failed to build");
                None
            }
        }
    }
}

impl RegistryListener for ExtensionPointRegistry {
    fn plugin_added(&self, kind: PluginKind, id: &str) {
        if kind != PluginKind::Extension {
            return;
        }
        if let Some(event) = self.resolver.extension_event(id) {
            self.add_entry(&event, id);
        }
    }

    fn plugin_removed(&self, kind: PluginKind, id: &str) {
        if kind != PluginKind::Extension {
            return;
        }
        let mut table = self.table.lock().expect("extension table lock");
        for entries in table.values_mut() {
            entries.retain(|e| e.handler_id != id);
        }
    }

    fn plugin_changed(&self, kind: PluginKind, id: &str) {
        if kind != PluginKind::Extension {
            return;
        }
        let mut table = self.table.lock().expect("extension table lock");
        for entries in table.values_mut() {
            for entry in entries.iter_mut().filter(|e| e.handler_id == id) {
                entry.cached = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ExtensionFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ExtensionHandler for Recording {
        fn handle(&self, _ctx: &ExtensionContext<'_>) -> Result<(), HandlerError> {
            self.log.lock().unwrap().push(self.label);
            Ok(())
        }
    }

    fn recording_factory(
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn ExtensionFactory> {
        Arc::new(move || {
            Ok(Arc::new(Recording {
                label,
                log: Arc::clone(&log),
            }) as Arc<dyn ExtensionHandler>)
        })
    }

    fn start_ctx() -> ExtensionContext<'static> {
        ExtensionContext::PipelineStart { pipeline: "p" }
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let resolver = Arc::new(PluginRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        resolver.register_extension(
            "first",
            PIPELINE_START,
            recording_factory("first", Arc::clone(&log)),
        );
        resolver.register_extension(
            "second",
            PIPELINE_START,
            recording_factory("second", Arc::clone(&log)),
        );
        let points = ExtensionPointRegistry::attach(resolver);
        points.invoke(PIPELINE_START, &start_ctx()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_abort_stops_chain_and_surfaces() {
        struct Aborting;
        impl ExtensionHandler for Aborting {
            fn handle(&self, _ctx: &ExtensionContext<'_>) -> Result<(), HandlerError> {
                Err(HandlerError::Abort("veto".to_string()))
            }
        }
        let resolver = Arc::new(PluginRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        resolver.register_extension(
            "veto",
            PIPELINE_START,
            Arc::new(|| Ok(Arc::new(Aborting) as Arc<dyn ExtensionHandler>)),
        );
        resolver.register_extension(
            "after",
            PIPELINE_START,
            recording_factory("after", Arc::clone(&log)),
        );
        let points = ExtensionPointRegistry::attach(resolver);
        let err = points.invoke(PIPELINE_START, &start_ctx()).unwrap_err();
        assert!(matches!(err, EngineError::ExtensionAbort { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_built_once_across_invokes() {
        struct Quiet;
        impl ExtensionHandler for Quiet {
            fn handle(&self, _ctx: &ExtensionContext<'_>) -> Result<(), HandlerError> {
                Ok(())
            }
        }
        let builds = Arc::new(AtomicUsize::new(0));
        let builds_in_factory = Arc::clone(&builds);
        let resolver = Arc::new(PluginRegistry::new());
        resolver.register_extension(
            "quiet",
            PIPELINE_START,
            Arc::new(move || {
                builds_in_factory.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Quiet) as Arc<dyn ExtensionHandler>)
            }),
        );
        let points = ExtensionPointRegistry::attach(resolver);
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        points.invoke(PIPELINE_START, &start_ctx()).unwrap();
        points.invoke(PIPELINE_START, &start_ctx()).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        points.reinitialize();
        points.invoke(PIPELINE_START, &start_ctx()).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_detaches_handler() {
        let resolver = Arc::new(PluginRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        resolver.register_extension(
            "gone",
            PIPELINE_START,
            recording_factory("gone", Arc::clone(&log)),
        );
        let points = ExtensionPointRegistry::attach(Arc::clone(&resolver));
        assert_eq!(points.handler_count(PIPELINE_START), 1);
        resolver.unregister_extension("gone");
        assert_eq!(points.handler_count(PIPELINE_START), 0);
        points.invoke(PIPELINE_START, &start_ctx()).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }
}
