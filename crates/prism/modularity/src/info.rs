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

//! Module descriptors and groups

use serde::{Deserialize, Serialize};
use std::fmt;

/// When a module is initialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationMode {
    /// Loaded and initialized as soon as the module manager runs
    #[default]
    #[serde(alias = "WhenAvailable")]
    WhenAvailable,

    /// Loaded and initialized only when explicitly requested
    #[serde(alias = "OnDemand")]
    OnDemand,
}

/// Lifecycle of a module. States only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    #[default]
    NotStarted,
    LoadingTypes,
    ReadyForInitialization,
    Initializing,
    Initialized,
    /// Initialization failed; the module is never retried
    Failed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::NotStarted => "not started",
            ModuleState::LoadingTypes => "loading types",
            ModuleState::ReadyForInitialization => "ready for initialization",
            ModuleState::Initializing => "initializing",
            ModuleState::Initialized => "initialized",
            ModuleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Descriptor of one deployable module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    name: String,
    module_type: String,
    location: Option<String>,
    initialization_mode: InitializationMode,
    depends_on: Vec<String>,
    state: ModuleState,
}

impl ModuleInfo {
    /// Creates a descriptor for `name`, instantiated through `module_type`
    pub fn new(name: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_type: module_type.into(),
            location: None,
            initialization_mode: InitializationMode::default(),
            depends_on: Vec::new(),
            state: ModuleState::NotStarted,
        }
    }

    /// Sets the location a loader fetches the module from
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_initialization_mode(mut self, mode: InitializationMode) -> Self {
        self.initialization_mode = mode;
        self
    }

    /// Adds a dependency on another module by name
    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.depends_on.push(module.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn initialization_mode(&self) -> InitializationMode {
        self.initialization_mode
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Moves the module to `next` if that is a later state. Returns whether the state changed.
    pub(crate) fn advance(&mut self, next: ModuleState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Copies group settings onto the module where the module did not set its own
    fn inherit_from(&mut self, location: Option<&str>, mode: InitializationMode) {
        if self.location.is_none() {
            self.location = location.map(str::to_string);
        }
        if self.initialization_mode == InitializationMode::WhenAvailable {
            self.initialization_mode = mode;
        }
    }
}

/// Modules shipped together, sharing a location and an initialization mode
#[derive(Debug, Clone, Default)]
pub struct ModuleInfoGroup {
    location: Option<String>,
    initialization_mode: InitializationMode,
    modules: Vec<ModuleInfo>,
}

impl ModuleInfoGroup {
    pub fn new(initialization_mode: InitializationMode) -> Self {
        Self {
            location: None,
            initialization_mode,
            modules: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Adds a module, forwarding the group's location and initialization mode to it
    pub fn with_module(mut self, module: ModuleInfo) -> Self {
        self.add_module(module);
        self
    }

    pub fn add_module(&mut self, mut module: ModuleInfo) {
        module.inherit_from(self.location.as_deref(), self.initialization_mode);
        self.modules.push(module);
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn initialization_mode(&self) -> InitializationMode {
        self.initialization_mode
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    pub(crate) fn forward(&self, module: &mut ModuleInfo) {
        module.inherit_from(self.location.as_deref(), self.initialization_mode);
    }

    pub(crate) fn into_modules(self) -> Vec<ModuleInfo> {
        self.modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let mut info = ModuleInfo::new("ModuleA", "ModuleAType");
        assert!(info.advance(ModuleState::LoadingTypes));
        assert!(info.advance(ModuleState::ReadyForInitialization));
        assert!(!info.advance(ModuleState::LoadingTypes));
        assert_eq!(info.state(), ModuleState::ReadyForInitialization);
    }

    #[test]
    fn test_group_forwards_location_and_mode() {
        let group = ModuleInfoGroup::new(InitializationMode::OnDemand)
            .with_location("file://bundle.pkg")
            .with_module(ModuleInfo::new("ModuleA", "ModuleAType"))
            .with_module(ModuleInfo::new("ModuleB", "ModuleBType").with_location("file://other.pkg"));

        let modules = group.modules();
        assert_eq!(modules[0].location(), Some("file://bundle.pkg"));
        assert_eq!(modules[0].initialization_mode(), InitializationMode::OnDemand);
        assert_eq!(modules[1].location(), Some("file://other.pkg"));
        assert_eq!(modules[1].initialization_mode(), InitializationMode::OnDemand);
    }

    #[test]
    fn test_group_keeps_explicit_on_demand_mode() {
        let group = ModuleInfoGroup::new(InitializationMode::WhenAvailable)
            .with_module(ModuleInfo::new("ModuleA", "ModuleAType").with_initialization_mode(InitializationMode::OnDemand));
        assert_eq!(group.modules()[0].initialization_mode(), InitializationMode::OnDemand);
    }
}
