use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::detect::backends::SyntheticEngine;
use crate::detect::catalog::{CatalogScanner, EngineDescriptor, SYNTHETIC_MODEL};
use crate::detect::engine::{Engine, EngineInfo};
use crate::detect::error::EngineLoadError;
use crate::detect::loader::EngineLoader;

/// Label set installed when an engine exposes none, and on fallback.
pub const FALLBACK_LABEL: &str = "object";

/// The installed engine's identity and derived state, as a value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveSelection {
    pub descriptor: EngineDescriptor,
    pub labels: Vec<String>,
    pub last_error: Option<String>,
}

impl ActiveSelection {
    fn fallback(last_error: Option<String>) -> Self {
        Self {
            descriptor: EngineDescriptor::synthetic(),
            labels: vec![FALLBACK_LABEL.to_string()],
            last_error,
        }
    }
}

/// Engine handle captured together with the selection it belongs to.
///
/// Holding this keeps the engine alive across a concurrent `select`, so an in-flight
/// inference finishes on the engine it started with.
#[derive(Clone)]
pub struct ActiveEngine {
    pub engine: Arc<dyn Engine>,
    pub selection: ActiveSelection,
}

/// Composite, read-only registry snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct RegistryStatus {
    pub active: EngineDescriptor,
    pub labels: Vec<String>,
    pub last_error: Option<String>,
    pub engine_info: Option<EngineInfo>,
    #[serde(rename = "impl")]
    pub implementation: String,
}

struct ActiveState {
    engine: Arc<dyn Engine>,
    selection: ActiveSelection,
    /// False until the first `select` (explicit or bootstrap) completes.
    selected: bool,
}

/// Owns the active engine and mediates every read and switch.
///
/// `state` guards the engine pointer and its derived fields and is only held for
/// copies and swaps. `switch` serializes `select` calls so engine construction happens
/// outside `state` without two switches interleaving.
pub struct EngineRegistry {
    catalog: Vec<EngineDescriptor>,
    loader: Box<dyn EngineLoader>,
    synthetic: Arc<dyn Engine>,
    state: Mutex<ActiveState>,
    switch: Mutex<()>,
}

impl EngineRegistry {
    /// Build a registry over a fixed catalog. The synthetic descriptor is appended if
    /// the catalog lacks it.
    pub fn new<L: EngineLoader + 'static>(mut catalog: Vec<EngineDescriptor>, loader: L) -> Self {
        if !catalog.contains(&EngineDescriptor::synthetic()) {
            catalog.push(EngineDescriptor::synthetic());
        }
        let synthetic: Arc<dyn Engine> = Arc::new(SyntheticEngine::new());
        Self {
            catalog,
            loader: Box::new(loader),
            state: Mutex::new(ActiveState {
                engine: synthetic.clone(),
                selection: ActiveSelection::fallback(None),
                selected: false,
            }),
            synthetic,
            switch: Mutex::new(()),
        }
    }

    /// Scan once and build the registry from the result.
    pub fn from_scanner<L: EngineLoader + 'static>(scanner: &CatalogScanner, loader: L) -> Self {
        Self::new(scanner.scan(), loader)
    }

    /// Replace the synthetic engine instance used for the liveness box and fallback.
    pub fn with_synthetic(mut self, engine: Arc<dyn Engine>) -> Self {
        self.synthetic = engine.clone();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.selection.descriptor.is_synthetic() {
            state.engine = engine;
        }
        self
    }

    /// Cached catalog, in scan order.
    pub fn list_available(&self) -> &[EngineDescriptor] {
        &self.catalog
    }

    pub fn active(&self) -> ActiveSelection {
        self.ensure_selected();
        self.lock_state().selection.clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.active().labels
    }

    /// Capture the active engine and its selection in one step.
    pub fn active_engine(&self) -> ActiveEngine {
        self.ensure_selected();
        let state = self.lock_state();
        ActiveEngine {
            engine: state.engine.clone(),
            selection: state.selection.clone(),
        }
    }

    pub fn synthetic_engine(&self) -> Arc<dyn Engine> {
        self.synthetic.clone()
    }

    /// Switch to `descriptor`, falling back to the synthetic engine if it cannot be
    /// constructed. Never fails; the outcome is in the returned selection.
    pub fn select(&self, descriptor: &EngineDescriptor) -> ActiveSelection {
        let _switch = self.lock_switch();
        self.select_locked(descriptor)
    }

    pub fn status(&self) -> RegistryStatus {
        let ActiveEngine { engine, selection } = self.active_engine();
        let engine_info = match catch_unwind(AssertUnwindSafe(|| engine.describe())) {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => {
                log::debug!("engine describe failed: {}", err);
                None
            }
            Err(_) => {
                log::debug!("engine describe panicked");
                None
            }
        };
        RegistryStatus {
            active: selection.descriptor,
            labels: selection.labels,
            last_error: selection.last_error,
            engine_info,
            implementation: engine.name().to_string(),
        }
    }

    /// Run the startup sweep if nothing has been selected yet.
    ///
    /// Tries real engines in catalog order and keeps the first that loads. When all
    /// fail, the synthetic engine stays active with the last failure recorded.
    pub fn ensure_selected(&self) {
        if self.lock_state().selected {
            return;
        }
        let _switch = self.lock_switch();
        if self.lock_state().selected {
            return;
        }

        let mut attempted = false;
        for descriptor in self.catalog.iter().filter(|d| !d.is_synthetic()) {
            attempted = true;
            if self.select_locked(descriptor).last_error.is_none() {
                return;
            }
        }
        if !attempted {
            self.select_locked(&EngineDescriptor::synthetic());
        } else {
            log::warn!("no real engine could be loaded, serving the synthetic engine");
        }
    }

    fn select_locked(&self, descriptor: &EngineDescriptor) -> ActiveSelection {
        let (engine, selection) = match self.construct(descriptor) {
            Ok(engine) => {
                let labels = derive_labels(engine.as_ref());
                log::info!(
                    "active engine is now {} ({}, {} labels)",
                    descriptor,
                    engine.name(),
                    labels.len()
                );
                let selection = ActiveSelection {
                    descriptor: descriptor.clone(),
                    labels,
                    last_error: None,
                };
                (engine, selection)
            }
            Err(err) => {
                let diagnostic = err.diagnostic();
                log::warn!(
                    "could not load engine {}, falling back to {}: {}",
                    descriptor,
                    EngineDescriptor::synthetic(),
                    diagnostic
                );
                (
                    self.synthetic.clone(),
                    ActiveSelection::fallback(Some(diagnostic)),
                )
            }
        };

        let mut state = self.lock_state();
        state.engine = engine;
        state.selection = selection.clone();
        state.selected = true;
        selection
    }

    fn construct(&self, descriptor: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError> {
        if descriptor.is_synthetic() {
            if descriptor.model_name == SYNTHETIC_MODEL {
                return Ok(self.synthetic.clone());
            }
            return Err(EngineLoadError::UnknownEngine(descriptor.to_string()));
        }
        catch_unwind(AssertUnwindSafe(|| self.loader.load(descriptor))).unwrap_or_else(|_| {
            Err(EngineLoadError::Model(format!(
                "loader panicked while constructing {}",
                descriptor
            )))
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ActiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_switch(&self) -> MutexGuard<'_, ()> {
        self.switch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn derive_labels(engine: &dyn Engine) -> Vec<String> {
    let labels = engine.labels();
    if labels.is_empty() {
        vec![FALLBACK_LABEL.to_string()]
    } else {
        labels.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::detect::engine::EngineInput;
    use crate::detect::error::EngineRuntimeError;
    use crate::detect::result::{DetectionBatch, EngineParams};

    struct Labeled(Vec<String>);

    impl Engine for Labeled {
        fn name(&self) -> &'static str {
            "Labeled"
        }

        fn labels(&self) -> &[String] {
            &self.0
        }

        fn infer(
            &self,
            _input: EngineInput<'_>,
            _params: &EngineParams,
        ) -> Result<DetectionBatch, EngineRuntimeError> {
            Ok(DetectionBatch::empty())
        }

        fn describe(&self) -> Result<Option<EngineInfo>, EngineRuntimeError> {
            Err(EngineRuntimeError::Inference("no info".into()))
        }
    }

    /// Loads only models named `good*`, counting attempts.
    #[derive(Default)]
    struct PickyLoader {
        attempts: Arc<AtomicUsize>,
    }

    impl EngineLoader for PickyLoader {
        fn load(&self, d: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if d.model_name.starts_with("good") {
                Ok(Arc::new(Labeled(vec![d.model_name.clone(), "cat".into()])))
            } else {
                Err(EngineLoadError::Model(format!("cannot load {}", d.model_name)))
            }
        }
    }

    fn yolo(name: &str) -> EngineDescriptor {
        EngineDescriptor::new("yolo", name)
    }

    #[test]
    fn catalog_always_has_synthetic() {
        let registry = EngineRegistry::new(vec![yolo("a")], PickyLoader::default());
        assert_eq!(
            registry.list_available(),
            &[yolo("a"), EngineDescriptor::synthetic()]
        );
    }

    #[test]
    fn bootstrap_prefers_first_loadable_real_engine() {
        let loader = PickyLoader::default();
        let attempts = loader.attempts.clone();
        let registry = EngineRegistry::new(vec![yolo("bad"), yolo("good1"), yolo("good2")], loader);

        let active = registry.active();
        assert_eq!(active.descriptor, yolo("good1"));
        assert_eq!(active.labels, vec!["good1", "cat"]);
        assert_eq!(active.last_error, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        // The sweep runs once.
        registry.active();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bootstrap_keeps_last_real_error_when_all_fail() {
        let registry = EngineRegistry::new(vec![yolo("bad1"), yolo("bad2")], PickyLoader::default());
        let active = registry.active();
        assert!(active.descriptor.is_synthetic());
        assert_eq!(active.labels, vec![FALLBACK_LABEL]);
        assert_eq!(
            active.last_error.as_deref(),
            Some("ModelError: failed to prepare model: cannot load bad2")
        );
    }

    #[test]
    fn bootstrap_without_real_engines_is_clean() {
        let registry = EngineRegistry::new(Vec::new(), PickyLoader::default());
        let active = registry.active();
        assert!(active.descriptor.is_synthetic());
        assert_eq!(active.last_error, None);
    }

    #[test]
    fn explicit_select_skips_bootstrap() {
        let loader = PickyLoader::default();
        let attempts = loader.attempts.clone();
        let registry = EngineRegistry::new(vec![yolo("good1")], loader);
        registry.select(&EngineDescriptor::synthetic());
        assert!(registry.active().descriptor.is_synthetic());
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_synthetic_model_falls_back_with_error() {
        let registry = EngineRegistry::new(Vec::new(), PickyLoader::default());
        let sel = registry.select(&EngineDescriptor::new("synthetic", "spinner"));
        assert_eq!(sel.descriptor, EngineDescriptor::synthetic());
        assert!(sel.last_error.unwrap().starts_with("UnknownEngine"));
    }

    #[test]
    fn status_swallows_describe_failure() {
        let registry = EngineRegistry::new(vec![yolo("good")], PickyLoader::default());
        let status = registry.status();
        assert_eq!(status.active, yolo("good"));
        assert!(status.engine_info.is_none());
        assert_eq!(status.implementation, "Labeled");

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["impl"], "Labeled");
        assert_eq!(value["active"]["engine"], "yolo");
        assert!(value["last_error"].is_null());
    }

    #[test]
    fn injected_synthetic_engine_serves_fallback() {
        let pinned: Arc<dyn Engine> = Arc::new(SyntheticEngine::new().with_clock(|| 0.0));
        let registry = EngineRegistry::new(Vec::new(), PickyLoader::default())
            .with_synthetic(pinned.clone());
        assert!(Arc::ptr_eq(&registry.active_engine().engine, &pinned));

        registry.select(&yolo("bad"));
        let batch = registry
            .active_engine()
            .engine
            .infer(EngineInput::Dims { width: 100, height: 100 }, &EngineParams::default())
            .unwrap();
        assert_eq!(batch.detections[0].bbox.x, 0.0);
    }

    #[test]
    fn panicking_loader_is_a_load_error() {
        struct Panics;
        impl EngineLoader for Panics {
            fn load(&self, _d: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError> {
                panic!("backend exploded")
            }
        }
        let registry = EngineRegistry::new(Vec::new(), Panics);
        let sel = registry.select(&yolo("x"));
        assert!(sel.descriptor.is_synthetic());
        assert!(sel.last_error.unwrap().contains("loader panicked"));
    }
}
