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

//! Dependency-ordered module loading for composite applications.
//!
//! A [`ModuleCatalog`] describes the available modules, the [`ModuleManager`] loads their
//! types through [`ModuleTypeLoader`]s and initializes them in dependency order.

pub mod catalog;
pub mod error;
pub mod events;
pub mod info;
pub mod initializer;
pub mod loader;
pub mod manager;
pub mod options;
pub mod solver;
pub mod source;

pub use catalog::{CatalogItem, GroupId, ModuleCatalog, ModuleCatalogSource, ModuleId};
pub use error::{DuplicateConflict, ModularityError, ModuleLoadError, Result};
pub use events::{Event, EventDispatcher, EventHandler, HandlerId, LoadModuleCompleted, ModuleDownloadProgressChanged};
pub use info::{InitializationMode, ModuleInfo, ModuleInfoGroup, ModuleState};
pub use initializer::{DefaultModuleInitializer, Module, ModuleContext, ModuleInitializer};
pub use loader::{FileModuleTypeLoader, FileSystemTypeResolver, LoadProgress, ModuleFactory, ModuleTypeLoader, ModuleTypeRegistry, ModuleTypeResolver};
pub use manager::{ModuleManager, ModuleManagerBuilder};
pub use options::{InitializationErrorPolicy, LoadFailurePolicy, ModularityOptions};
pub use solver::ModuleDependencySolver;
pub use source::{DirectoryCatalogSource, GroupDefinition, ManifestCatalogSource, ModuleDefinition, ModuleManifest};
