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

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ModularityError, Result};
use crate::info::ModuleInfo;
use crate::loader::ModuleFactory;
use crate::manager::ModuleManager;
use crate::options::InitializationErrorPolicy;

/// A unit of application functionality initialized by the module manager
pub trait Module: Send + Sync {
    fn initialize(&self, context: &ModuleContext) -> anyhow::Result<()>;
}

/// Handed to a module while it initializes
#[derive(Clone)]
pub struct ModuleContext {
    module: String,
    manager: ModuleManager,
}

impl ModuleContext {
    pub(crate) fn new(module: impl Into<String>, manager: ModuleManager) -> Self {
        Self {
            module: module.into(),
            manager,
        }
    }

    /// Name of the module being initialized
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// The manager running the initialization. Loading further modules from here is allowed;
    /// they are initialized once the current module has finished.
    pub fn manager(&self) -> &ModuleManager {
        &self.manager
    }
}

/// Creates and initializes module instances
pub trait ModuleInitializer: Send + Sync {
    fn initialize(&self, module: &ModuleInfo, context: &ModuleContext) -> Result<()>;

    /// Called with every initialization failure; returning `Ok` swallows it
    fn handle_initialization_error(&self, module: &ModuleInfo, error: ModularityError) -> Result<()> {
        let _ = module;
        Err(error)
    }
}

/// Instantiates modules through a [`ModuleFactory`] and keeps the instances alive
pub struct DefaultModuleInitializer {
    factory: Arc<dyn ModuleFactory>,
    policy: InitializationErrorPolicy,
    instances: Mutex<Vec<(String, Arc<dyn Module>)>>,
}

impl DefaultModuleInitializer {
    pub fn new(factory: Arc<dyn ModuleFactory>) -> Self {
        Self::with_policy(factory, InitializationErrorPolicy::default())
    }

    pub fn with_policy(factory: Arc<dyn ModuleFactory>, policy: InitializationErrorPolicy) -> Self {
        Self {
            factory,
            policy,
            instances: Mutex::new(Vec::new()),
        }
    }

    /// Names of the modules whose instances initialized successfully
    pub fn initialized_modules(&self) -> Vec<String> {
        self.instances.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl ModuleInitializer for DefaultModuleInitializer {
    fn initialize(&self, module: &ModuleInfo, context: &ModuleContext) -> Result<()> {
        let outcome = self.factory.create_module(module.module_type()).and_then(|instance| {
            let instance: Arc<dyn Module> = Arc::from(instance);
            instance.initialize(context)?;
            Ok(instance)
        });

        match outcome {
            Ok(instance) => {
                self.instances.lock().push((module.name().to_string(), instance));
                info!(module = module.name(), module_type = module.module_type(), "Module instance initialized");
                Ok(())
            }
            Err(source) => self.handle_initialization_error(
                module,
                ModularityError::ModuleInitialize {
                    module: module.name().to_string(),
                    source,
                },
            ),
        }
    }

    fn handle_initialization_error(&self, module: &ModuleInfo, error: ModularityError) -> Result<()> {
        match self.policy {
            InitializationErrorPolicy::Propagate => Err(error),
            InitializationErrorPolicy::LogAndContinue => {
                warn!(module = module.name(), error = %error, "Ignoring module initialization failure");
                Ok(())
            }
        }
    }
}
