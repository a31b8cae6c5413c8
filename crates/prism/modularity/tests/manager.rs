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

use async_trait::async_trait;
use parking_lot::Mutex;
use prism_modularity::{
    InitializationErrorPolicy, InitializationMode, LoadFailurePolicy, LoadModuleCompleted, LoadProgress, ModularityError,
    ModularityOptions, Module, ModuleCatalog, ModuleContext, ModuleInfo, ModuleInfoGroup, ModuleLoadError, ModuleManager,
    ModuleState, ModuleTypeLoader, ModuleTypeRegistry,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

struct RecordingModule {
    log: Log,
}

impl Module for RecordingModule {
    fn initialize(&self, context: &ModuleContext) -> anyhow::Result<()> {
        self.log.lock().push(context.module_name().to_string());
        Ok(())
    }
}

fn register_recording(registry: &ModuleTypeRegistry, module_type: &str, log: &Log) {
    let log = log.clone();
    registry.register(module_type, move || Ok(Box::new(RecordingModule { log: log.clone() }) as Box<dyn Module>));
}

/// Loads `mem://` modules after a short delay by registering their type
struct DelayedLoader {
    registry: Arc<ModuleTypeRegistry>,
    log: Log,
    loads: AtomicUsize,
}

#[async_trait]
impl ModuleTypeLoader for DelayedLoader {
    fn can_load(&self, module: &ModuleInfo) -> bool {
        module.location().is_some_and(|location| location.starts_with("mem://"))
    }

    async fn load_module_type(&self, module: &ModuleInfo, progress: &LoadProgress) -> Result<(), ModuleLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = module.name().len() as u64 * 3;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        progress.report(1, 1);
        register_recording(&self.registry, module.module_type(), &self.log);
        Ok(())
    }
}

/// Fails every `fail://` module
struct FailingLoader;

#[async_trait]
impl ModuleTypeLoader for FailingLoader {
    fn can_load(&self, module: &ModuleInfo) -> bool {
        module.location().is_some_and(|location| location.starts_with("fail://"))
    }

    async fn load_module_type(&self, module: &ModuleInfo, _progress: &LoadProgress) -> Result<(), ModuleLoadError> {
        Err(ModuleLoadError::InvalidLocation {
            location: module.location().map(str::to_string),
        })
    }
}

fn recorded(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[test]
fn test_run_initializes_when_available_modules_in_dependency_order() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    register_recording(&registry, "Recording", &log);

    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("C", "Recording").depends_on("B"));
    catalog.add_module(ModuleInfo::new("B", "Recording").depends_on("A"));
    catalog.add_module(ModuleInfo::new("A", "Recording"));
    catalog.add_module(ModuleInfo::new("Later", "Recording").with_initialization_mode(InitializationMode::OnDemand));

    let manager = ModuleManager::new(catalog, registry);
    manager.run().unwrap();

    assert_eq!(recorded(&log), vec!["A", "B", "C"]);
    assert_eq!(manager.module_state("Later"), Some(ModuleState::NotStarted));
}

#[test]
fn test_load_module_initializes_closure_once() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    register_recording(&registry, "Recording", &log);

    let mut catalog = ModuleCatalog::new();
    catalog.add_group(
        ModuleInfoGroup::new(InitializationMode::OnDemand)
            .with_module(ModuleInfo::new("Reports", "Recording").depends_on("Data"))
            .with_module(ModuleInfo::new("Data", "Recording")),
    );

    let manager = ModuleManager::new(catalog, registry);
    manager.run().unwrap();
    assert!(recorded(&log).is_empty());

    manager.load_module("Reports").unwrap();
    assert_eq!(recorded(&log), vec!["Data", "Reports"]);

    manager.load_module("Reports").unwrap();
    manager.load_module("Data").unwrap();
    assert_eq!(recorded(&log), vec!["Data", "Reports"]);
}

#[test]
fn test_load_module_requires_a_catalog_entry() {
    let manager = ModuleManager::new(ModuleCatalog::new(), Arc::new(ModuleTypeRegistry::new()));
    match manager.load_module("Missing") {
        Err(ModularityError::ModuleNotFound { module, matches }) => {
            assert_eq!(module, "Missing");
            assert_eq!(matches, 0);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_run_surfaces_catalog_validation_errors() {
    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("A", "AType").depends_on("B"));
    catalog.add_module(ModuleInfo::new("B", "BType").depends_on("A"));

    let manager = ModuleManager::new(catalog, Arc::new(ModuleTypeRegistry::new()));
    assert!(matches!(manager.run(), Err(ModularityError::CyclicDependency { .. })));
}

#[tokio::test]
async fn test_background_loads_complete_in_dependency_order() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    let loader = Arc::new(DelayedLoader {
        registry: registry.clone(),
        log: log.clone(),
        loads: AtomicUsize::new(0),
    });

    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("Shell", "ShellType").with_location("mem://shell").depends_on("Core"));
    catalog.add_module(ModuleInfo::new("Core", "CoreType").with_location("mem://core"));

    let progress = Arc::new(AtomicUsize::new(0));
    let progress_clone = progress.clone();
    let manager = ModuleManager::builder(catalog, registry).with_loader(loader.clone()).build();
    manager.subscribe(Arc::new(move |_: &prism_modularity::ModuleDownloadProgressChanged| {
        progress_clone.fetch_add(1, Ordering::SeqCst);
    }));

    manager.run().unwrap();
    assert_eq!(manager.module_state("Shell"), Some(ModuleState::LoadingTypes));

    manager.wait_for_idle().await.unwrap();
    assert_eq!(recorded(&log), vec!["Core", "Shell"]);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    assert_eq!(progress.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_completion_events_follow_initialization() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    register_recording(&registry, "Recording", &log);

    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("B", "Recording").depends_on("A"));
    catalog.add_module(ModuleInfo::new("A", "Recording"));

    let manager = ModuleManager::new(catalog, registry);
    let completed = Log::default();
    let completed_clone = completed.clone();
    manager.subscribe(Arc::new(move |event: &LoadModuleCompleted| {
        assert!(event.error().is_none());
        completed_clone.lock().push(event.module().to_string());
    }));

    manager.run().unwrap();
    manager.wait_for_idle().await.unwrap();
    assert_eq!(recorded(&completed), vec!["A", "B"]);
}

fn failing_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("Broken", "BrokenType").with_location("fail://broken"));
    catalog.add_module(ModuleInfo::new("Dependent", "Recording").depends_on("Broken"));
    catalog.add_module(ModuleInfo::new("Standalone", "Recording").with_initialization_mode(InitializationMode::OnDemand));
    catalog
}

#[tokio::test]
async fn test_fail_fast_halts_initialization() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    register_recording(&registry, "Recording", &log);

    let manager = ModuleManager::builder(failing_catalog(), registry).with_loader(Arc::new(FailingLoader)).build();
    manager.run().unwrap();

    match manager.wait_for_idle().await {
        Err(ModularityError::ModuleTypeLoading { module, .. }) => assert_eq!(module, "Broken"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(manager.is_halted());

    match manager.load_module("Standalone") {
        Err(ModularityError::Halted { module }) => assert_eq!(module, "Broken"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(manager.run(), Err(ModularityError::Halted { .. })));
    assert_eq!(manager.module_state("Standalone"), Some(ModuleState::NotStarted));
    assert_eq!(manager.module_state("Dependent"), Some(ModuleState::ReadyForInitialization));
    assert!(recorded(&log).is_empty());
}

#[tokio::test]
async fn test_best_effort_keeps_initializing_unrelated_modules() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    register_recording(&registry, "Recording", &log);

    let options = ModularityOptions {
        load_failure_policy: LoadFailurePolicy::BestEffort,
        ..ModularityOptions::default()
    };
    let manager = ModuleManager::builder(failing_catalog(), registry)
        .with_loader(Arc::new(FailingLoader))
        .with_options(options)
        .build();
    manager.run().unwrap();

    assert!(manager.wait_for_idle().await.is_err());
    assert!(!manager.is_halted());

    manager.load_module("Standalone").unwrap();
    assert_eq!(recorded(&log), vec!["Standalone"]);
    assert_eq!(manager.module_state("Broken"), Some(ModuleState::LoadingTypes));
    assert_eq!(manager.module_state("Dependent"), Some(ModuleState::ReadyForInitialization));
}

#[tokio::test]
async fn test_handled_load_failure_is_not_recorded() {
    let registry = Arc::new(ModuleTypeRegistry::new());
    let manager = ModuleManager::builder(failing_catalog(), registry).with_loader(Arc::new(FailingLoader)).build();
    manager.subscribe(Arc::new(|event: &LoadModuleCompleted| {
        if event.error().is_some() {
            event.mark_handled();
        }
    }));

    manager.run().unwrap();
    manager.wait_for_idle().await.unwrap();
    assert!(!manager.is_halted());
}

struct ChainLoadingModule {
    target: &'static str,
    log: Log,
}

impl Module for ChainLoadingModule {
    fn initialize(&self, context: &ModuleContext) -> anyhow::Result<()> {
        self.log.lock().push(context.module_name().to_string());
        context.manager().load_module(self.target)?;
        Ok(())
    }
}

#[test]
fn test_module_may_load_modules_while_initializing() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    register_recording(&registry, "Recording", &log);
    let chain_log = log.clone();
    registry.register("Chain", move || {
        Ok(Box::new(ChainLoadingModule {
            target: "Extra",
            log: chain_log.clone(),
        }) as Box<dyn Module>)
    });

    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("Bootstrap", "Chain"));
    catalog.add_module(ModuleInfo::new("Extra", "Recording").with_initialization_mode(InitializationMode::OnDemand));

    let manager = ModuleManager::new(catalog, registry);
    manager.run().unwrap();

    assert_eq!(recorded(&log), vec!["Bootstrap", "Extra"]);
    assert_eq!(manager.module_state("Extra"), Some(ModuleState::Initialized));
}

struct FailingModule;

impl Module for FailingModule {
    fn initialize(&self, _context: &ModuleContext) -> anyhow::Result<()> {
        anyhow::bail!("database unreachable")
    }
}

#[test]
fn test_initialization_failure_is_propagated() {
    let registry = Arc::new(ModuleTypeRegistry::new());
    registry.register("Failing", || Ok(Box::new(FailingModule) as Box<dyn Module>));
    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("A", "Failing"));

    let manager = ModuleManager::new(catalog, registry);
    match manager.run() {
        Err(ModularityError::ModuleInitialize { module, source }) => {
            assert_eq!(module, "A");
            assert!(source.to_string().contains("database unreachable"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(manager.module_state("A"), Some(ModuleState::Failed));

    match manager.run() {
        Err(ModularityError::ModuleFailed { module, reason }) => {
            assert_eq!(module, "A");
            assert!(reason.contains("database unreachable"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_failed_module_is_not_reported_as_loaded_on_retry() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    registry.register("Failing", || Ok(Box::new(FailingModule) as Box<dyn Module>));
    register_recording(&registry, "Recording", &log);
    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("A", "Failing").with_initialization_mode(InitializationMode::OnDemand));
    catalog.add_module(
        ModuleInfo::new("B", "Recording")
            .depends_on("A")
            .with_initialization_mode(InitializationMode::OnDemand),
    );

    let manager = ModuleManager::new(catalog, registry);
    manager.run().unwrap();

    assert!(matches!(manager.load_module("A"), Err(ModularityError::ModuleInitialize { .. })));
    assert!(matches!(manager.load_module("A"), Err(ModularityError::ModuleFailed { module, .. }) if module == "A"));
    assert!(matches!(manager.load_module("B"), Err(ModularityError::ModuleFailed { module, .. }) if module == "A"));
    assert_eq!(manager.module_state("A"), Some(ModuleState::Failed));
    assert_eq!(manager.module_state("B"), Some(ModuleState::NotStarted));
    assert!(recorded(&log).is_empty());
}

#[test]
fn test_initialization_failure_can_be_logged_and_ignored() {
    let registry = Arc::new(ModuleTypeRegistry::new());
    registry.register("Failing", || Ok(Box::new(FailingModule) as Box<dyn Module>));
    let mut catalog = ModuleCatalog::new();
    catalog.add_module(ModuleInfo::new("A", "Failing"));

    let options = ModularityOptions {
        initialization_error_policy: InitializationErrorPolicy::LogAndContinue,
        ..ModularityOptions::default()
    };
    let manager = ModuleManager::builder(catalog, registry).with_options(options).build();
    manager.run().unwrap();
    assert_eq!(manager.module_state("A"), Some(ModuleState::Initialized));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_respect_dependencies() {
    let log = Log::default();
    let registry = Arc::new(ModuleTypeRegistry::new());
    let loader = Arc::new(DelayedLoader {
        registry: registry.clone(),
        log: log.clone(),
        loads: AtomicUsize::new(0),
    });

    let mut catalog = ModuleCatalog::new();
    let names: Vec<String> = (0..12).map(|i| format!("Module{}", "x".repeat(i))).collect();
    for (i, name) in names.iter().enumerate() {
        let mut info = ModuleInfo::new(name.clone(), format!("{name}Type")).with_location(format!("mem://{name}"));
        if i > 0 {
            info = info.depends_on(names[i / 2].clone());
        }
        catalog.add_module(info);
    }

    let manager = ModuleManager::builder(catalog, registry).with_loader(loader).build();
    manager.run().unwrap();
    manager.wait_for_idle().await.unwrap();

    let order = recorded(&log);
    assert_eq!(order.len(), names.len());
    for (i, name) in names.iter().enumerate().skip(1) {
        let position = order.iter().position(|n| n == name).unwrap();
        let dependency = order.iter().position(|n| n == &names[i / 2]).unwrap();
        assert!(dependency < position, "{name} initialized before its dependency");
    }
}
