// Prism
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Drives modules from the catalog through loading and initialization.
//!
//! Loads run as tokio tasks; initialization happens in a single drain loop that always
//! picks the first ready module (catalog order) whose dependencies are initialized. Drain
//! requests raised while a drain is active, from a background load completion or from a
//! module calling [`ModuleManager::load_module`] during its own initialization, are served
//! by the active drainer once its current pass ends.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{ModuleCatalog, ModuleId};
use crate::error::{ModularityError, ModuleLoadError, Result};
use crate::events::{Event, EventDispatcher, EventHandler, HandlerId, LoadModuleCompleted};
use crate::info::{InitializationMode, ModuleInfo, ModuleState};
use crate::initializer::{DefaultModuleInitializer, ModuleContext, ModuleInitializer};
use crate::loader::{FileModuleTypeLoader, LoadProgress, ModuleFactory, ModuleTypeLoader};
use crate::options::{LoadFailurePolicy, ModularityOptions};

struct ManagerState {
    catalog: ModuleCatalog,
    catalog_initialized: bool,
    /// Module whose load failure stopped initialization
    halted: Option<String>,
    /// Reasons of failed initializations
    failed: HashMap<ModuleId, String>,
    failures: Vec<ModularityError>,
}

impl ManagerState {
    /// Refuses new work while halted or when `modules` contains a failed module
    fn ensure_startable(&self, modules: &[ModuleId]) -> Result<()> {
        if let Some(module) = &self.halted {
            return Err(ModularityError::Halted { module: module.clone() });
        }
        for id in modules {
            if let (Some(reason), Some(module)) = (self.failed.get(id), self.catalog.module(*id)) {
                return Err(ModularityError::ModuleFailed {
                    module: module.name().to_string(),
                    reason: reason.clone(),
                });
            }
        }
        Ok(())
    }
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    loaders: Vec<Arc<dyn ModuleTypeLoader>>,
    initializer: Arc<dyn ModuleInitializer>,
    factory: Arc<dyn ModuleFactory>,
    events: Arc<EventDispatcher>,
    load_failure_policy: LoadFailurePolicy,
    drain_requested: AtomicBool,
    draining: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    disposed: AtomicBool,
}

impl ManagerInner {
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            for loader in &self.loaders {
                loader.dispose();
            }
            debug!(loaders = self.loaders.len(), "Module type loaders disposed");
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum Staging {
    Ready,
    Load(Arc<dyn ModuleTypeLoader>),
}

/// Builds a [`ModuleManager`]
pub struct ModuleManagerBuilder {
    catalog: ModuleCatalog,
    factory: Arc<dyn ModuleFactory>,
    loaders: Vec<Arc<dyn ModuleTypeLoader>>,
    initializer: Option<Arc<dyn ModuleInitializer>>,
    options: ModularityOptions,
}

impl ModuleManagerBuilder {
    /// Adds a loader; loaders are asked in registration order. Without any, a
    /// [`FileModuleTypeLoader`] is used.
    pub fn with_loader(mut self, loader: Arc<dyn ModuleTypeLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Replaces the [`DefaultModuleInitializer`]
    pub fn with_initializer(mut self, initializer: Arc<dyn ModuleInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_options(mut self, options: ModularityOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> ModuleManager {
        let loaders = if self.loaders.is_empty() {
            vec![Arc::new(FileModuleTypeLoader::default()) as Arc<dyn ModuleTypeLoader>]
        } else {
            self.loaders
        };
        let initializer = self.initializer.unwrap_or_else(|| {
            Arc::new(DefaultModuleInitializer::with_policy(self.factory.clone(), self.options.initialization_error_policy))
        });

        ModuleManager {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState {
                    catalog: self.catalog,
                    catalog_initialized: false,
                    halted: None,
                    failed: HashMap::new(),
                    failures: Vec::new(),
                }),
                loaders,
                initializer,
                factory: self.factory,
                events: Arc::new(EventDispatcher::new()),
                load_failure_policy: self.options.load_failure_policy,
                drain_requested: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

/// Loads and initializes the modules of a catalog. Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ModuleManager {
    inner: Arc<ManagerInner>,
}

impl ModuleManager {
    pub fn builder(catalog: ModuleCatalog, factory: Arc<dyn ModuleFactory>) -> ModuleManagerBuilder {
        ModuleManagerBuilder {
            catalog,
            factory,
            loaders: Vec::new(),
            initializer: None,
            options: ModularityOptions::default(),
        }
    }

    /// Creates a manager with the default loader and initializer
    pub fn new(catalog: ModuleCatalog, factory: Arc<dyn ModuleFactory>) -> Self {
        Self::builder(catalog, factory).build()
    }

    /// Initializes the catalog and starts every module marked `WhenAvailable`, with its dependencies.
    ///
    /// Modules whose types are already available are initialized before this returns; the
    /// others complete in the background, see [`wait_for_idle`](Self::wait_for_idle).
    #[instrument(skip(self))]
    pub fn run(&self) -> Result<()> {
        let modules = {
            let mut state = self.inner.state.lock();
            Self::ensure_catalog_initialized(&mut state)?;
            let when_available: Vec<ModuleId> = state
                .catalog
                .modules()
                .filter(|(_, module)| module.initialization_mode() == InitializationMode::WhenAvailable)
                .map(|(id, _)| id)
                .collect();
            let modules = state.catalog.complete_list_with_dependencies(&when_available)?;
            state.ensure_startable(&modules)?;
            modules
        };

        info!(modules = modules.len(), "Starting modules available at startup");
        self.stage(&modules)?;
        self.pump()
    }

    /// Loads and initializes the module called `name` together with everything it depends on.
    ///
    /// Exactly one catalog entry must carry the name. Modules that are already initialized are
    /// left alone. Fails while initialization is halted, or when a module of the closure
    /// failed to initialize before.
    #[instrument(skip(self))]
    pub fn load_module(&self, name: &str) -> Result<()> {
        let modules = {
            let mut state = self.inner.state.lock();
            Self::ensure_catalog_initialized(&mut state)?;
            let matches = state.catalog.find_all(name);
            if matches.len() != 1 {
                return Err(ModularityError::ModuleNotFound {
                    module: name.to_string(),
                    matches: matches.len(),
                });
            }
            let modules = state.catalog.complete_list_with_dependencies(&matches)?;
            state.ensure_startable(&modules)?;
            modules
        };

        self.stage(&modules)?;
        self.pump()
    }

    /// Waits until no module load is in flight and returns the first failure recorded by a
    /// background completion since the last call
    pub async fn wait_for_idle(&self) -> Result<()> {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        match self.take_failures().into_iter().next() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Removes and returns every recorded background failure
    pub fn take_failures(&self) -> Vec<ModularityError> {
        std::mem::take(&mut self.inner.state.lock().failures)
    }

    /// Whether a load failure stopped further initialization
    pub fn is_halted(&self) -> bool {
        self.inner.state.lock().halted.is_some()
    }

    /// State of the first module called `name`
    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        let state = self.inner.state.lock();
        state.catalog.find(name).and_then(|id| state.catalog.module(id)).map(ModuleInfo::state)
    }

    /// Snapshot of every module descriptor in catalog order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.inner.state.lock().catalog.modules().map(|(_, module)| module.clone()).collect()
    }

    pub fn subscribe<T: Event>(&self, handler: EventHandler<T>) -> HandlerId {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe<T: Event>(&self, handler_id: HandlerId) -> bool {
        self.inner.events.unsubscribe::<T>(handler_id)
    }

    /// Releases the loaders. Also happens when the last handle is dropped.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    fn ensure_catalog_initialized(state: &mut ManagerState) -> Result<()> {
        if !state.catalog_initialized {
            state.catalog.initialize()?;
            state.catalog_initialized = true;
        }
        Ok(())
    }

    /// Moves every `NotStarted` module either straight to `ReadyForInitialization` or into a load.
    /// Nothing is changed when any of the modules cannot be staged.
    fn stage(&self, modules: &[ModuleId]) -> Result<()> {
        let runtime = Handle::try_current().ok();
        let mut loads = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let mut plan = Vec::new();
            for &id in modules {
                let Some(module) = state.catalog.module(id) else {
                    continue;
                };
                if module.state() != ModuleState::NotStarted {
                    continue;
                }
                if self.inner.factory.is_available(module.module_type()) {
                    plan.push((id, Staging::Ready));
                    continue;
                }
                let loader = self
                    .inner
                    .loaders
                    .iter()
                    .find(|loader| loader.can_load(module))
                    .cloned()
                    .ok_or_else(|| ModularityError::ModuleTypeLoaderNotFound {
                        module: module.name().to_string(),
                        location: module.location().map(str::to_string),
                    })?;
                if runtime.is_none() {
                    return Err(ModularityError::RuntimeUnavailable);
                }
                plan.push((id, Staging::Load(loader)));
            }

            for (id, staging) in plan {
                match staging {
                    Staging::Ready => {
                        state.catalog.set_module_state(id, ModuleState::ReadyForInitialization);
                    }
                    Staging::Load(loader) => {
                        state.catalog.set_module_state(id, ModuleState::LoadingTypes);
                        if let Some(module) = state.catalog.module(id) {
                            loads.push((id, module.clone(), loader));
                        }
                    }
                }
            }
        }

        if let Some(runtime) = runtime {
            for (id, module, loader) in loads {
                self.spawn_load(&runtime, id, module, loader);
            }
        }
        Ok(())
    }

    fn spawn_load(&self, runtime: &Handle, id: ModuleId, module: ModuleInfo, loader: Arc<dyn ModuleTypeLoader>) {
        debug!(module = module.name(), location = ?module.location(), "Loading module type");
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let manager = self.clone();
        runtime.spawn(async move {
            let progress = LoadProgress::new(module.name(), manager.inner.events.clone());
            let result = loader.load_module_type(&module, &progress).await;
            manager.on_module_type_loaded(id, &module, result);
            manager.finish_work();
        });
    }

    fn on_module_type_loaded(&self, id: ModuleId, module: &ModuleInfo, result: std::result::Result<(), ModuleLoadError>) {
        match result {
            Ok(()) => {
                self.inner.state.lock().catalog.set_module_state(id, ModuleState::ReadyForInitialization);
                debug!(module = module.name(), "Module type loaded");
                if let Err(failure) = self.pump() {
                    error!(error = %failure, "Module initialization failed after background load");
                    self.inner.state.lock().failures.push(failure);
                }
            }
            Err(load_error) => {
                let event = LoadModuleCompleted::failed(module.name(), load_error);
                self.inner.events.dispatch(&event);
                if event.is_handled() {
                    warn!(module = module.name(), "Module load failure handled by subscriber");
                    return;
                }
                let Some(source) = event.into_error() else {
                    return;
                };
                error!(module = module.name(), error = %source, "Failed to load module type");

                let mut state = self.inner.state.lock();
                if self.inner.load_failure_policy == LoadFailurePolicy::FailFast {
                    state.halted.get_or_insert_with(|| module.name().to_string());
                }
                state.failures.push(ModularityError::ModuleTypeLoading {
                    module: module.name().to_string(),
                    source,
                });
            }
        }
    }

    /// Requests a drain and runs it unless another caller is already draining.
    ///
    /// An active drain counts as in-flight work so [`wait_for_idle`](Self::wait_for_idle)
    /// does not return while a background drainer still has ready modules to initialize.
    fn pump(&self) -> Result<()> {
        self.inner.drain_requested.store(true, Ordering::SeqCst);
        if !self.try_begin_drain() {
            return Ok(());
        }
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        let outcome = loop {
            let mut outcome = Ok(());
            while self.inner.drain_requested.swap(false, Ordering::SeqCst) {
                if let Err(failure) = self.drain() {
                    outcome = Err(failure);
                    break;
                }
            }
            self.inner.draining.store(false, Ordering::SeqCst);

            if outcome.is_err() || !self.inner.drain_requested.load(Ordering::SeqCst) || !self.try_begin_drain() {
                break outcome;
            }
        };

        self.finish_work();
        outcome
    }

    fn try_begin_drain(&self) -> bool {
        self.inner.draining.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    fn finish_work(&self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }

    /// Initializes ready modules until none is left whose dependencies are all initialized
    fn drain(&self) -> Result<()> {
        loop {
            let module = {
                let mut state = self.inner.state.lock();
                if state.halted.is_some() {
                    return Ok(());
                }
                let Some(id) = Self::next_ready(&state.catalog) else {
                    return Ok(());
                };
                state.catalog.set_module_state(id, ModuleState::Initializing);
                match state.catalog.module(id) {
                    Some(module) => (id, module.clone()),
                    None => return Ok(()),
                }
            };
            let (id, module) = module;

            debug!(module = module.name(), "Initializing module");
            let context = ModuleContext::new(module.name(), self.clone());
            if let Err(failure) = self.inner.initializer.initialize(&module, &context) {
                let mut state = self.inner.state.lock();
                state.catalog.set_module_state(id, ModuleState::Failed);
                let reason = match &failure {
                    ModularityError::ModuleInitialize { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                state.failed.insert(id, reason);
                return Err(failure);
            }

            self.inner.state.lock().catalog.set_module_state(id, ModuleState::Initialized);
            info!(module = module.name(), "Module initialized");
            self.inner.events.dispatch(&LoadModuleCompleted::succeeded(module.name()));
        }
    }

    fn next_ready(catalog: &ModuleCatalog) -> Option<ModuleId> {
        catalog
            .modules()
            .filter(|(_, module)| module.state() == ModuleState::ReadyForInitialization)
            .find(|(id, _)| {
                catalog
                    .get_dependent_modules(*id)
                    .into_iter()
                    .all(|dependency| catalog.module(dependency).is_some_and(|d| d.state() == ModuleState::Initialized))
            })
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::Module;
    use crate::loader::ModuleTypeRegistry;

    #[derive(Default)]
    struct NoopModule;

    impl Module for NoopModule {
        fn initialize(&self, _context: &ModuleContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_available_types_initialize_without_runtime() {
        let registry = Arc::new(ModuleTypeRegistry::new());
        registry.register_default::<NoopModule>("Noop");

        let mut catalog = ModuleCatalog::new();
        catalog.add_module(ModuleInfo::new("A", "Noop"));
        catalog.add_module(ModuleInfo::new("B", "Noop").depends_on("A"));

        let manager = ModuleManager::new(catalog, registry);
        manager.run().unwrap();
        assert_eq!(manager.module_state("A"), Some(ModuleState::Initialized));
        assert_eq!(manager.module_state("B"), Some(ModuleState::Initialized));
    }

    #[test]
    fn test_loading_outside_runtime_is_rejected_without_state_change() {
        let registry = Arc::new(ModuleTypeRegistry::new());
        let mut catalog = ModuleCatalog::new();
        catalog.add_module(ModuleInfo::new("A", "Remote").with_location("file://a.pkg"));

        let manager = ModuleManager::new(catalog, registry);
        assert!(matches!(manager.run(), Err(ModularityError::RuntimeUnavailable)));
        assert_eq!(manager.module_state("A"), Some(ModuleState::NotStarted));
    }

    #[test]
    fn test_missing_loader_is_reported() {
        let registry = Arc::new(ModuleTypeRegistry::new());
        let mut catalog = ModuleCatalog::new();
        catalog.add_module(ModuleInfo::new("A", "Remote").with_location("https://example.com/a.pkg"));

        let manager = ModuleManager::new(catalog, registry);
        match manager.run() {
            Err(ModularityError::ModuleTypeLoaderNotFound { module, .. }) => assert_eq!(module, "A"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
