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

//! Module catalog.
//!
//! The catalog owns every module descriptor, either standalone or as part of a group,
//! and checks the deployment invariants before anything is loaded. Descriptors live in
//! an arena addressed by [`ModuleId`]; the module manager changes their lifecycle state
//! through those ids only.

use crate::error::{DuplicateConflict, ModularityError, Result};
use crate::info::{InitializationMode, ModuleInfo, ModuleInfoGroup, ModuleState};
use crate::solver::ModuleDependencySolver;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Index of a module descriptor inside its catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

/// Index of a module group inside its catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

/// Top-level entry of the catalog, in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogItem {
    Module(ModuleId),
    Group(GroupId),
}

/// Populates a catalog before it is validated (directory scan, manifest file, code)
#[cfg_attr(test, mockall::automock)]
pub trait ModuleCatalogSource: Send + Sync {
    fn load(&self, catalog: &mut ModuleCatalog) -> Result<()>;
}

#[derive(Debug, Clone)]
struct GroupEntry {
    /// Settings forwarded to modules added later
    template: ModuleInfoGroup,
    members: Vec<ModuleId>,
}

/// Owner of all known module descriptors
#[derive(Default)]
pub struct ModuleCatalog {
    modules: Vec<ModuleInfo>,
    module_groups: Vec<Option<GroupId>>,
    groups: Vec<GroupEntry>,
    items: Vec<CatalogItem>,
    source: Option<Box<dyn ModuleCatalogSource>>,
    loaded: bool,
    validated: bool,
}

impl ModuleCatalog {
    /// Creates an empty catalog populated from code
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog whose modules are loaded from `source` on [`initialize`](Self::initialize)
    pub fn with_source(source: impl ModuleCatalogSource + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::default()
        }
    }

    /// Appends a standalone module
    pub fn add_module(&mut self, module: ModuleInfo) -> ModuleId {
        let id = self.push_module(module, None);
        self.items.push(CatalogItem::Module(id));
        self.validated = false;
        id
    }

    /// Appends a group with all of its modules
    pub fn add_group(&mut self, group: ModuleInfoGroup) -> GroupId {
        let group_id = GroupId(self.groups.len());
        let template = ModuleInfoGroup::new(group.initialization_mode());
        let template = match group.location() {
            Some(location) => template.with_location(location),
            None => template,
        };
        self.groups.push(GroupEntry {
            template,
            members: Vec::new(),
        });
        for module in group.into_modules() {
            let id = self.push_module(module, Some(group_id));
            self.groups[group_id.0].members.push(id);
        }
        self.items.push(CatalogItem::Group(group_id));
        self.validated = false;
        group_id
    }

    /// Adds a module to an existing group, forwarding the group's settings to it
    pub fn add_module_to_group(&mut self, group: GroupId, mut module: ModuleInfo) -> Result<ModuleId> {
        let entry = self
            .groups
            .get(group.0)
            .ok_or_else(|| ModularityError::invalid_argument(format!("unknown module group {}", group.0)))?;
        entry.template.forward(&mut module);
        let id = self.push_module(module, Some(group));
        self.groups[group.0].members.push(id);
        self.validated = false;
        Ok(id)
    }

    fn push_module(&mut self, module: ModuleInfo, group: Option<GroupId>) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(module);
        self.module_groups.push(group);
        id
    }

    /// Groups and standalone modules in insertion order
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    /// All module ids, with groups flattened in place
    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids = Vec::with_capacity(self.modules.len());
        for item in &self.items {
            match item {
                CatalogItem::Module(id) => ids.push(*id),
                CatalogItem::Group(group) => ids.extend(self.groups[group.0].members.iter().copied()),
            }
        }
        ids
    }

    /// All modules, with groups flattened in place
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &ModuleInfo)> + '_ {
        self.module_ids().into_iter().map(move |id| (id, &self.modules[id.0]))
    }

    /// Ids of the groups, in insertion order
    pub fn groups(&self) -> Vec<GroupId> {
        (0..self.groups.len()).map(GroupId).collect()
    }

    /// Modules belonging to a group
    pub fn group_modules(&self, group: GroupId) -> &[ModuleId] {
        self.groups.get(group.0).map(|entry| entry.members.as_slice()).unwrap_or(&[])
    }

    /// Modules that are not part of any group
    pub fn groupless_modules(&self) -> Vec<ModuleId> {
        self.module_ids().into_iter().filter(|id| self.module_groups[id.0].is_none()).collect()
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// First module with the given name
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.modules().find(|(_, module)| module.name() == name).map(|(id, _)| id)
    }

    /// Every module with the given name
    pub fn find_all(&self, name: &str) -> Vec<ModuleId> {
        self.modules().filter(|(_, module)| module.name() == name).map(|(id, _)| id).collect()
    }

    pub(crate) fn set_module_state(&mut self, id: ModuleId, state: ModuleState) -> bool {
        match self.modules.get_mut(id.0) {
            Some(module) => module.advance(state),
            None => false,
        }
    }

    /// Modules that `id` directly depends on, regardless of group boundaries
    pub fn get_dependent_modules(&self, id: ModuleId) -> Vec<ModuleId> {
        let Some(module) = self.module(id) else {
            return Vec::new();
        };
        self.modules()
            .filter(|(_, candidate)| module.dependencies().iter().any(|dependency| dependency == candidate.name()))
            .map(|(candidate_id, _)| candidate_id)
            .collect()
    }

    /// Returns `requested` plus everything they transitively depend on, dependencies first.
    ///
    /// Validates the catalog first if it has not been validated since the last change.
    pub fn complete_list_with_dependencies(&mut self, requested: &[ModuleId]) -> Result<Vec<ModuleId>> {
        if let Some(unknown) = requested.iter().find(|id| id.0 >= self.modules.len()) {
            return Err(ModularityError::invalid_argument(format!("module id {} does not belong to this catalog", unknown.0)));
        }
        if !self.validated {
            self.validate()?;
        }

        let mut complete: Vec<ModuleId> = Vec::new();
        let mut pending: VecDeque<ModuleId> = VecDeque::new();
        for id in requested {
            if !pending.contains(id) {
                pending.push_back(*id);
            }
        }

        while let Some(id) = pending.pop_front() {
            for dependency in self.get_dependent_modules(id) {
                if !complete.contains(&dependency) && !pending.contains(&dependency) {
                    pending.push_back(dependency);
                }
            }
            complete.push(id);
        }

        let order = self.solve_dependencies(&complete)?;
        Ok(order
            .iter()
            .filter_map(|name| complete.iter().copied().find(|id| self.modules[id.0].name() == name))
            .collect())
    }

    /// Loads the catalog from its source (once per catalog) and validates it
    pub fn initialize(&mut self) -> Result<()> {
        if !self.loaded {
            if let Some(source) = self.source.take() {
                let outcome = source.load(self);
                self.source = Some(source);
                outcome?;
            }
            self.loaded = true;
        }
        self.validate()
    }

    /// Checks names, the dependency graph, group boundaries and initialization modes
    pub fn validate(&mut self) -> Result<()> {
        self.validate_unique_modules()?;
        self.validate_dependency_graph()?;
        self.validate_cross_group_dependencies()?;
        self.validate_dependencies_initialization_mode()?;
        self.validated = true;
        debug!(modules = self.modules.len(), groups = self.groups.len(), "Module catalog validated");
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    fn validate_unique_modules(&self) -> Result<()> {
        let mut seen: HashMap<&str, &ModuleInfo> = HashMap::new();
        for (_, module) in self.modules() {
            if let Some(first) = seen.insert(module.name(), module) {
                return Err(ModularityError::DuplicateModule {
                    module: module.name().to_string(),
                    conflict: duplicate_conflict(first, module),
                });
            }
        }
        Ok(())
    }

    fn validate_dependency_graph(&self) -> Result<()> {
        self.solve_dependencies(&self.module_ids()).map(|_| ())
    }

    fn validate_cross_group_dependencies(&self) -> Result<()> {
        let groupless = self.groupless_modules();
        self.validate_dependencies(&groupless)?;
        for entry in &self.groups {
            let mut visible = groupless.clone();
            visible.extend(entry.members.iter().copied());
            self.validate_dependencies(&visible)?;
        }
        Ok(())
    }

    /// Every module in `ids` may only depend on modules in `ids`
    fn validate_dependencies(&self, ids: &[ModuleId]) -> Result<()> {
        let names: HashSet<&str> = ids.iter().map(|id| self.modules[id.0].name()).collect();
        for id in ids {
            let module = &self.modules[id.0];
            if module.dependencies().iter().any(|dependency| !names.contains(dependency.as_str())) {
                return Err(ModularityError::CrossGroupDependency {
                    module: module.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_dependencies_initialization_mode(&self) -> Result<()> {
        for (id, module) in self.modules() {
            if module.initialization_mode() != InitializationMode::WhenAvailable {
                continue;
            }
            let on_demand_dependency = self
                .get_dependent_modules(id)
                .into_iter()
                .any(|dependency| self.modules[dependency.0].initialization_mode() == InitializationMode::OnDemand);
            if on_demand_dependency {
                return Err(ModularityError::InitializationModeMismatch {
                    module: module.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn solve_dependencies(&self, ids: &[ModuleId]) -> Result<Vec<String>> {
        let mut solver = ModuleDependencySolver::new();
        for id in ids {
            solver.add_module(self.modules[id.0].name())?;
        }
        let known: HashSet<&str> = ids.iter().map(|id| self.modules[id.0].name()).collect();
        for id in ids {
            let module = &self.modules[id.0];
            for dependency in module.dependencies() {
                if !known.contains(dependency.as_str()) {
                    return Err(ModularityError::MissingDependency {
                        module: module.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
                solver.add_dependency(module.name(), dependency)?;
            }
        }
        if solver.module_count() == 0 {
            return Ok(Vec::new());
        }
        solver.solve()
    }
}

fn duplicate_conflict(first: &ModuleInfo, second: &ModuleInfo) -> DuplicateConflict {
    let same_type = first.module_type() == second.module_type();
    let same_location = first.location() == second.location();
    match (same_type, same_location) {
        (true, true) => DuplicateConflict::Identical,
        (false, true) => DuplicateConflict::ModuleType {
            first: first.module_type().to_string(),
            second: second.module_type().to_string(),
        },
        (true, false) => DuplicateConflict::Location {
            first: first.location().map(str::to_string),
            second: second.location().map(str::to_string),
        },
        (false, false) => DuplicateConflict::TypeAndLocation,
    }
}
