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

//! Page registrations consulted by the navigation engine

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{NavigationError, PageFactoryError, Result};
use crate::lifecycle::PageBehaviors;

/// Structure a page is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTemplate {
    Content,
    /// Navigation stack, optionally created with a root page
    Stack { root: Option<String> },
    /// Tabbed page created with the given children
    Tabs { children: Vec<String> },
    Carousel { children: Vec<String> },
    /// Flyout (master/detail) page with an optional flyout pane and initial detail
    Flyout { flyout: Option<String>, detail: Option<String> },
}

impl PageTemplate {
    pub fn is_stack(&self) -> bool {
        matches!(self, PageTemplate::Stack { .. })
    }

    pub fn is_flyout(&self) -> bool {
        matches!(self, PageTemplate::Flyout { .. })
    }
}

/// Per-page navigation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageOptions {
    /// Stacks only: pop to the root before navigating into them
    pub clear_navigation_stack_on_navigation: bool,
    /// Flyouts only: whether the flyout pane stays open after navigating
    pub is_presented_after_navigation: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            clear_navigation_stack_on_navigation: true,
            is_presented_after_navigation: false,
        }
    }
}

/// What the factory knows about a registered name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    /// Type identity used to decide whether an existing page can be reused
    pub page_type: String,
    pub template: PageTemplate,
    pub options: PageOptions,
}

impl PageDescriptor {
    pub fn new(page_type: impl Into<String>, template: PageTemplate) -> Self {
        Self {
            page_type: page_type.into(),
            template,
            options: PageOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PageOptions) -> Self {
        self.options = options;
        self
    }
}

/// Resolves segment names to pages
#[cfg_attr(test, mockall::automock)]
pub trait PageFactory: Send + Sync {
    fn describe(&self, name: &str) -> Option<PageDescriptor>;

    fn create(&self, name: &str) -> std::result::Result<PageBehaviors, PageFactoryError>;
}

type BehaviorConstructor = Arc<dyn Fn() -> anyhow::Result<PageBehaviors> + Send + Sync>;
type DefaultBehaviors = Arc<dyn Fn(&str) -> PageBehaviors + Send + Sync>;

struct Registration {
    descriptor: PageDescriptor,
    constructor: Option<BehaviorConstructor>,
}

/// Name to page table owned by the application's composition root
#[derive(Default)]
pub struct PageRegistry {
    pages: RwLock<HashMap<String, Registration>>,
    default_behaviors: Option<DefaultBehaviors>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviours for pages registered without their own constructor
    pub fn with_default_behaviors<F>(mut self, behaviors: F) -> Self
    where
        F: Fn(&str) -> PageBehaviors + Send + Sync + 'static,
    {
        self.default_behaviors = Some(Arc::new(behaviors));
        self
    }

    pub fn register(&self, name: impl Into<String>, descriptor: PageDescriptor) -> &Self {
        let name = name.into();
        debug!(page = %name, page_type = %descriptor.page_type, "Registered page");
        self.pages.write().insert(
            name,
            Registration {
                descriptor,
                constructor: None,
            },
        );
        self
    }

    /// Registers a page whose behaviours come from `constructor`
    pub fn register_with<F>(&self, name: impl Into<String>, descriptor: PageDescriptor, constructor: F) -> &Self
    where
        F: Fn() -> anyhow::Result<PageBehaviors> + Send + Sync + 'static,
    {
        self.pages.write().insert(
            name.into(),
            Registration {
                descriptor,
                constructor: Some(Arc::new(constructor)),
            },
        );
        self
    }

    pub fn register_content(&self, name: &str) -> &Self {
        self.register(name, PageDescriptor::new(name, PageTemplate::Content))
    }

    pub fn register_stack(&self, name: &str, root: Option<&str>) -> &Self {
        self.register(name, PageDescriptor::new(name, PageTemplate::Stack { root: root.map(str::to_string) }))
    }

    pub fn register_tabs(&self, name: &str, children: &[&str]) -> &Self {
        let children = children.iter().map(|child| child.to_string()).collect();
        self.register(name, PageDescriptor::new(name, PageTemplate::Tabs { children }))
    }

    pub fn register_carousel(&self, name: &str, children: &[&str]) -> &Self {
        let children = children.iter().map(|child| child.to_string()).collect();
        self.register(name, PageDescriptor::new(name, PageTemplate::Carousel { children }))
    }

    pub fn register_flyout(&self, name: &str, flyout: Option<&str>, detail: Option<&str>) -> &Self {
        self.register(
            name,
            PageDescriptor::new(
                name,
                PageTemplate::Flyout {
                    flyout: flyout.map(str::to_string),
                    detail: detail.map(str::to_string),
                },
            ),
        )
    }

    /// Replaces the behaviours constructor of an existing registration
    pub fn set_constructor<F>(&self, name: &str, constructor: F) -> bool
    where
        F: Fn() -> anyhow::Result<PageBehaviors> + Send + Sync + 'static,
    {
        match self.pages.write().get_mut(name) {
            Some(registration) => {
                registration.constructor = Some(Arc::new(constructor));
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.pages.read().contains_key(name)
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = PageDefinition>) -> Self {
        let registry = Self::new();
        registry.add_definitions(definitions);
        registry
    }

    pub fn add_definitions(&self, definitions: impl IntoIterator<Item = PageDefinition>) {
        for definition in definitions {
            let (name, descriptor) = definition.into_descriptor();
            self.register(name, descriptor);
        }
    }

    /// Reads `[[pages]]` definitions from a TOML file
    pub fn load_definitions(path: &Path) -> Result<Vec<PageDefinition>> {
        let content = std::fs::read_to_string(path).map_err(|source| NavigationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: PageDefinitionFile = toml::from_str(&content).map_err(|e| NavigationError::Definitions {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(file.pages)
    }
}

impl PageFactory for PageRegistry {
    fn describe(&self, name: &str) -> Option<PageDescriptor> {
        self.pages.read().get(name).map(|registration| registration.descriptor.clone())
    }

    fn create(&self, name: &str) -> std::result::Result<PageBehaviors, PageFactoryError> {
        let constructor = {
            let pages = self.pages.read();
            let registration = pages.get(name).ok_or_else(|| PageFactoryError::NotRegistered { name: name.to_string() })?;
            registration.constructor.clone()
        };

        match (constructor, &self.default_behaviors) {
            (Some(constructor), _) => constructor().map_err(|source| PageFactoryError::Construction {
                name: name.to_string(),
                source,
            }),
            (None, Some(default_behaviors)) => Ok(default_behaviors(name)),
            (None, None) => Ok(PageBehaviors::default()),
        }
    }
}

/// Container kind of a [`PageDefinition`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKindName {
    #[default]
    Content,
    Stack,
    Tabs,
    Carousel,
    Flyout,
}

/// Serialized page registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDefinition {
    pub name: String,
    /// Type identity; defaults to the name
    #[serde(default, rename = "type")]
    pub page_type: Option<String>,
    #[serde(default)]
    pub kind: PageKindName,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub flyout: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub options: PageOptions,
}

impl PageDefinition {
    fn into_descriptor(self) -> (String, PageDescriptor) {
        let template = match self.kind {
            PageKindName::Content => PageTemplate::Content,
            PageKindName::Stack => PageTemplate::Stack { root: self.root },
            PageKindName::Tabs => PageTemplate::Tabs { children: self.children },
            PageKindName::Carousel => PageTemplate::Carousel { children: self.children },
            PageKindName::Flyout => PageTemplate::Flyout {
                flyout: self.flyout,
                detail: self.detail,
            },
        };
        let page_type = self.page_type.unwrap_or_else(|| self.name.clone());
        (self.name, PageDescriptor::new(page_type, template).with_options(self.options))
    }
}

#[derive(Debug, Deserialize)]
struct PageDefinitionFile {
    #[serde(default)]
    pages: Vec<PageDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_name_is_not_registered() {
        let registry = PageRegistry::new();
        assert!(registry.describe("ViewA").is_none());
        assert!(matches!(registry.create("ViewA"), Err(PageFactoryError::NotRegistered { .. })));
    }

    #[test]
    fn test_constructor_failure_is_construction_error() {
        let registry = PageRegistry::new();
        registry.register_with("Broken", PageDescriptor::new("Broken", PageTemplate::Content), || {
            anyhow::bail!("missing resources")
        });
        match registry.create("Broken") {
            Err(PageFactoryError::Construction { name, source }) => {
                assert_eq!(name, "Broken");
                assert_eq!(source.to_string(), "missing resources");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_definitions_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.toml");
        std::fs::write(
            &path,
            r#"
[[pages]]
name = "ViewA"

[[pages]]
name = "NavigationPage"
kind = "stack"
options = { clear_navigation_stack_on_navigation = false }

[[pages]]
name = "MainTabs"
type = "TabbedPage"
kind = "tabs"
children = ["ViewA"]
"#,
        )
        .unwrap();

        let registry = PageRegistry::from_definitions(PageRegistry::load_definitions(&path).unwrap());
        assert_eq!(registry.describe("ViewA").unwrap().template, PageTemplate::Content);

        let stack = registry.describe("NavigationPage").unwrap();
        assert!(stack.template.is_stack());
        assert!(!stack.options.clear_navigation_stack_on_navigation);
        assert!(!stack.options.is_presented_after_navigation);

        let tabs = registry.describe("MainTabs").unwrap();
        assert_eq!(tabs.page_type, "TabbedPage");
        assert_eq!(tabs.template, PageTemplate::Tabs { children: vec!["ViewA".to_string()] });
    }

    #[test]
    fn test_malformed_definitions_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.toml");
        std::fs::write(&path, "[[pages]]\nkind = \"tabs\"\n").unwrap();
        assert!(matches!(PageRegistry::load_definitions(&path), Err(NavigationError::Definitions { .. })));
    }
}
