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

//! Module type loaders and the factory that instantiates loaded module types

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::ModuleLoadError;
use crate::events::{EventDispatcher, ModuleDownloadProgressChanged};
use crate::info::ModuleInfo;
use crate::initializer::Module;

const FILE_SCHEME: &str = "file://";

/// Reports download progress of one module load to the manager's subscribers
#[derive(Clone)]
pub struct LoadProgress {
    module: String,
    events: Option<Arc<EventDispatcher>>,
}

impl LoadProgress {
    pub fn new(module: impl Into<String>, events: Arc<EventDispatcher>) -> Self {
        Self {
            module: module.into(),
            events: Some(events),
        }
    }

    /// Progress that is not observed by anyone
    pub fn detached(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            events: None,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn report(&self, bytes_received: u64, total_bytes: u64) {
        if let Some(events) = &self.events {
            events.dispatch(&ModuleDownloadProgressChanged {
                module: self.module.clone(),
                bytes_received,
                total_bytes,
            });
        }
    }
}

/// Retrieves the code of a module so its type becomes available to the [`ModuleFactory`]
#[async_trait]
pub trait ModuleTypeLoader: Send + Sync {
    /// Whether this loader understands the module's location
    fn can_load(&self, module: &ModuleInfo) -> bool;

    /// Loads the module's type. The returned future resolves exactly once per call.
    async fn load_module_type(&self, module: &ModuleInfo, progress: &LoadProgress) -> Result<(), ModuleLoadError>;

    /// Releases resources held by the loader
    fn dispose(&self) {}
}

/// Turns a located module package into registered module types
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModuleTypeResolver: Send + Sync {
    async fn resolve(&self, module: &ModuleInfo, package: &Path) -> Result<(), ModuleLoadError>;
}

/// Resolver that only checks the package can be opened
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemTypeResolver;

#[async_trait]
impl ModuleTypeResolver for FileSystemTypeResolver {
    async fn resolve(&self, _module: &ModuleInfo, package: &Path) -> Result<(), ModuleLoadError> {
        tokio::fs::File::open(package).await.map_err(|source| io_error(package, source))?;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ModuleLoadError {
    if source.kind() == ErrorKind::NotFound {
        ModuleLoadError::NotFound { path: path.to_path_buf() }
    } else {
        ModuleLoadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Loads modules whose location is a `file://` reference
pub struct FileModuleTypeLoader {
    resolver: Arc<dyn ModuleTypeResolver>,
    base_dir: Option<PathBuf>,
    /// One cell per package; concurrent loads of a package share its single resolve
    packages: Mutex<HashMap<PathBuf, Arc<OnceCell<()>>>>,
}

impl Default for FileModuleTypeLoader {
    fn default() -> Self {
        Self::new(Arc::new(FileSystemTypeResolver))
    }
}

impl FileModuleTypeLoader {
    pub fn new(resolver: Arc<dyn ModuleTypeResolver>) -> Self {
        Self {
            resolver,
            base_dir: None,
            packages: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves relative `file://` references against `base_dir`
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn package_path(&self, module: &ModuleInfo) -> Option<PathBuf> {
        let raw = module.location()?.strip_prefix(FILE_SCHEME)?;
        if raw.is_empty() {
            return None;
        }
        let path = PathBuf::from(raw);
        match &self.base_dir {
            Some(base) if path.is_relative() => Some(base.join(path)),
            _ => Some(path),
        }
    }

    /// Whether a package has already been loaded by this loader
    pub fn is_loaded(&self, package: &Path) -> bool {
        self.packages.lock().get(package).is_some_and(|cell| cell.initialized())
    }

    async fn resolve_package(&self, module: &ModuleInfo, package: &Path, progress: &LoadProgress) -> Result<(), ModuleLoadError> {
        let metadata = tokio::fs::metadata(package).await.map_err(|source| io_error(package, source))?;
        let total = metadata.len();
        progress.report(0, total);

        self.resolver.resolve(module, package).await?;

        progress.report(total, total);
        info!(module = module.name(), package = %package.display(), bytes = total, "Module package loaded");
        Ok(())
    }
}

#[async_trait]
impl ModuleTypeLoader for FileModuleTypeLoader {
    fn can_load(&self, module: &ModuleInfo) -> bool {
        module.location().is_some_and(|location| location.starts_with(FILE_SCHEME))
    }

    async fn load_module_type(&self, module: &ModuleInfo, progress: &LoadProgress) -> Result<(), ModuleLoadError> {
        let package = self.package_path(module).ok_or_else(|| ModuleLoadError::InvalidLocation {
            location: module.location().map(str::to_string),
        })?;

        let cell = self.packages.lock().entry(package.clone()).or_default().clone();
        if cell.initialized() {
            debug!(module = module.name(), package = %package.display(), "Package already loaded");
            return Ok(());
        }
        // A failed resolve leaves the cell empty so the next load retries it
        cell.get_or_try_init(|| self.resolve_package(module, &package, progress)).await?;
        Ok(())
    }

    fn dispose(&self) {
        self.packages.lock().clear();
    }
}

/// Creates module instances from type names
pub trait ModuleFactory: Send + Sync {
    /// Whether `module_type` can be instantiated without loading anything first
    fn is_available(&self, module_type: &str) -> bool;

    fn create_module(&self, module_type: &str) -> anyhow::Result<Box<dyn Module>>;
}

type ModuleConstructor = Arc<dyn Fn() -> anyhow::Result<Box<dyn Module>> + Send + Sync>;

/// Factory backed by a map of type names to constructors.
///
/// Types can be registered at any time, for example by a [`ModuleTypeResolver`] once the
/// package providing them has been loaded.
#[derive(Default)]
pub struct ModuleTypeRegistry {
    constructors: RwLock<HashMap<String, ModuleConstructor>>,
}

impl ModuleTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, module_type: impl Into<String>, constructor: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        let module_type = module_type.into();
        debug!(module_type = %module_type, "Registered module type");
        self.constructors.write().insert(module_type, Arc::new(constructor));
    }

    /// Registers a module type constructed through `Default`
    pub fn register_default<M>(&self, module_type: impl Into<String>)
    where
        M: Module + Default + 'static,
    {
        self.register(module_type, || Ok(Box::new(M::default()) as Box<dyn Module>));
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl ModuleFactory for ModuleTypeRegistry {
    fn is_available(&self, module_type: &str) -> bool {
        self.constructors.read().contains_key(module_type)
    }

    fn create_module(&self, module_type: &str) -> anyhow::Result<Box<dyn Module>> {
        let constructor = self
            .constructors
            .read()
            .get(module_type)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("module type {module_type} is not registered"))?;
        constructor()
    }
}
