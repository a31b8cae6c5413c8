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

//! Lifecycle capabilities of pages and their view-models

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::parameters::NavigationParameters;

/// Hooks a page or its view-model may implement. Every hook defaults to a no-op.
#[async_trait]
pub trait PageLifecycle: Send + Sync {
    /// Asked before navigating away; returning `false` cancels the navigation
    async fn can_navigate(&self, _parameters: &NavigationParameters) -> bool {
        true
    }

    /// Runs once per navigation before the page becomes visible
    async fn initialize(&self, _parameters: &NavigationParameters) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_navigated_from(&self, _parameters: &NavigationParameters) {}

    fn on_navigated_to(&self, _parameters: &NavigationParameters) {}

    /// The page left the tree for good
    fn destroy(&self) {}
}

/// A page without any lifecycle behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPage;

impl PageLifecycle for NoopPage {}

/// A page together with its optional view-model. Hooks visit the page first, then the view-model.
#[derive(Clone)]
pub struct PageBehaviors {
    page: Arc<dyn PageLifecycle>,
    view_model: Option<Arc<dyn PageLifecycle>>,
}

impl Default for PageBehaviors {
    fn default() -> Self {
        Self::new(Arc::new(NoopPage))
    }
}

impl fmt::Debug for PageBehaviors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBehaviors").field("has_view_model", &self.view_model.is_some()).finish()
    }
}

impl PageBehaviors {
    pub fn new(page: Arc<dyn PageLifecycle>) -> Self {
        Self { page, view_model: None }
    }

    pub fn with_view_model(mut self, view_model: Arc<dyn PageLifecycle>) -> Self {
        self.view_model = Some(view_model);
        self
    }

    pub fn page(&self) -> &Arc<dyn PageLifecycle> {
        &self.page
    }

    pub fn view_model(&self) -> Option<&Arc<dyn PageLifecycle>> {
        self.view_model.as_ref()
    }

    fn targets(&self) -> impl Iterator<Item = &Arc<dyn PageLifecycle>> {
        std::iter::once(&self.page).chain(self.view_model.iter())
    }

    /// `false` as soon as the page or its view-model refuses
    pub async fn can_navigate(&self, parameters: &NavigationParameters) -> bool {
        for target in self.targets() {
            if !target.can_navigate(parameters).await {
                return false;
            }
        }
        true
    }

    pub async fn initialize(&self, parameters: &NavigationParameters) -> anyhow::Result<()> {
        for target in self.targets() {
            target.initialize(parameters).await?;
        }
        Ok(())
    }

    pub fn navigated_from(&self, parameters: &NavigationParameters) {
        self.targets().for_each(|target| target.on_navigated_from(parameters));
    }

    pub fn navigated_to(&self, parameters: &NavigationParameters) {
        self.targets().for_each(|target| target.on_navigated_to(parameters));
    }

    pub fn destroy(&self) {
        self.targets().for_each(|target| target.destroy());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        allow: bool,
    }

    #[async_trait]
    impl PageLifecycle for Recorder {
        async fn can_navigate(&self, _parameters: &NavigationParameters) -> bool {
            self.log.lock().push(format!("{}:confirm", self.name));
            self.allow
        }

        fn destroy(&self) {
            self.log.lock().push(format!("{}:destroy", self.name));
        }
    }

    #[tokio::test]
    async fn test_page_is_visited_before_view_model() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviors = PageBehaviors::new(Arc::new(Recorder {
            name: "page",
            log: log.clone(),
            allow: true,
        }))
        .with_view_model(Arc::new(Recorder {
            name: "vm",
            log: log.clone(),
            allow: true,
        }));

        assert!(behaviors.can_navigate(&NavigationParameters::new()).await);
        behaviors.destroy();
        assert_eq!(*log.lock(), vec!["page:confirm", "vm:confirm", "page:destroy", "vm:destroy"]);
    }

    #[tokio::test]
    async fn test_refusal_stops_at_the_page() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviors = PageBehaviors::new(Arc::new(Recorder {
            name: "page",
            log: log.clone(),
            allow: false,
        }))
        .with_view_model(Arc::new(Recorder {
            name: "vm",
            log: log.clone(),
            allow: true,
        }));

        assert!(!behaviors.can_navigate(&NavigationParameters::new()).await);
        assert_eq!(*log.lock(), vec!["page:confirm"]);
    }

    #[tokio::test]
    async fn test_default_behaviors_allow_everything() {
        let behaviors = PageBehaviors::default();
        assert!(behaviors.can_navigate(&NavigationParameters::new()).await);
        assert!(behaviors.initialize(&NavigationParameters::new()).await.is_ok());
    }
}
