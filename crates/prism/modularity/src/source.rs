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

//! Catalog sources reading module descriptors from manifest files and directories

use crate::catalog::{ModuleCatalog, ModuleCatalogSource};
use crate::error::{ModularityError, Result};
use crate::info::{InitializationMode, ModuleInfo, ModuleInfoGroup};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// File name suffixes recognised by [`DirectoryCatalogSource`]
const DESCRIPTOR_SUFFIXES: [&str; 2] = [".module.toml", ".module.json"];

/// Serialized form of a module descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub initialization_mode: Option<InitializationMode>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ModuleDefinition {
    pub fn into_info(self) -> ModuleInfo {
        let mut info = ModuleInfo::new(self.name, self.module_type);
        if let Some(location) = self.location {
            info = info.with_location(location);
        }
        if let Some(mode) = self.initialization_mode {
            info = info.with_initialization_mode(mode);
        }
        for dependency in self.depends_on {
            info = info.depends_on(dependency);
        }
        info
    }
}

/// Serialized form of a module group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub initialization_mode: InitializationMode,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

/// Contents of a module manifest file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
}

impl ModuleManifest {
    /// Reads a manifest, as JSON when the extension is `.json` and as TOML otherwise
    pub fn from_file(path: &Path) -> Result<Self> {
        parse_file(path)
    }

    /// Adds every module and group of the manifest to `catalog`
    pub fn apply(self, catalog: &mut ModuleCatalog) {
        for module in self.modules {
            catalog.add_module(module.into_info());
        }
        for group in self.groups {
            let mut module_group = ModuleInfoGroup::new(group.initialization_mode);
            if let Some(location) = group.location {
                module_group = module_group.with_location(location);
            }
            for module in group.modules {
                module_group.add_module(module.into_info());
            }
            catalog.add_group(module_group);
        }
    }
}

fn parse_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|source| ModularityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content).map_err(|e| ModularityError::manifest(path, e.to_string()))
    } else {
        toml::from_str(&content).map_err(|e| ModularityError::manifest(path, e.to_string()))
    }
}

/// Loads the catalog from a single manifest file
#[derive(Debug, Clone)]
pub struct ManifestCatalogSource {
    path: PathBuf,
}

impl ManifestCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModuleCatalogSource for ManifestCatalogSource {
    fn load(&self, catalog: &mut ModuleCatalog) -> Result<()> {
        let manifest = ModuleManifest::from_file(&self.path)?;
        info!(path = %self.path.display(), modules = manifest.modules.len(), groups = manifest.groups.len(), "Loaded module manifest");
        manifest.apply(catalog);
        Ok(())
    }
}

/// Scans a directory tree for one descriptor file per module.
///
/// A descriptor without a location points at itself, so the file loader treats the
/// descriptor file as the module package.
#[derive(Debug, Clone)]
pub struct DirectoryCatalogSource {
    root: PathBuf,
}

impl DirectoryCatalogSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModuleCatalogSource for DirectoryCatalogSource {
    fn load(&self, catalog: &mut ModuleCatalog) -> Result<()> {
        if !self.root.is_dir() {
            return Err(ModularityError::invalid_argument(format!("{} is not a directory", self.root.display())));
        }

        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| ModularityError::manifest(&self.root, e.to_string()))?;
            let file_name = entry.file_name().to_string_lossy();
            if !entry.file_type().is_file() || !DESCRIPTOR_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix)) {
                continue;
            }

            let mut definition: ModuleDefinition = parse_file(entry.path())?;
            if definition.location.is_none() {
                definition.location = Some(format!("file://{}", entry.path().display()));
            }
            debug!(module = %definition.name, path = %entry.path().display(), "Discovered module descriptor");
            catalog.add_module(definition.into_info());
        }
        Ok(())
    }
}
