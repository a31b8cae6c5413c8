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

use crate::catalog::ModuleCatalog;
use crate::source::{DirectoryCatalogSource, ManifestCatalogSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the module manager does with a module load failure nobody handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailurePolicy {
    /// Record the failure and stop initializing further modules
    #[default]
    FailFast,
    /// Record the failure and keep initializing modules that do not depend on the failed one
    BestEffort,
}

/// What the default initializer does when a module fails to initialize
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationErrorPolicy {
    #[default]
    Propagate,
    LogAndContinue,
}

/// Modularity settings, usually read from the `[modularity]` table of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModularityOptions {
    pub load_failure_policy: LoadFailurePolicy,
    pub initialization_error_policy: InitializationErrorPolicy,
    /// Manifest describing the module catalog
    pub manifest: Option<PathBuf>,
    /// Directory scanned for `*.module.toml` / `*.module.json` descriptors when no manifest is set
    pub module_directory: Option<PathBuf>,
}

impl ModularityOptions {
    /// Creates the catalog these options point at; an empty code-populated catalog when neither
    /// a manifest nor a module directory is configured
    pub fn catalog(&self) -> ModuleCatalog {
        match (&self.manifest, &self.module_directory) {
            (Some(manifest), _) => ModuleCatalog::with_source(ManifestCatalogSource::new(manifest)),
            (None, Some(directory)) => ModuleCatalog::with_source(DirectoryCatalogSource::new(directory)),
            (None, None) => ModuleCatalog::new(),
        }
    }
}
