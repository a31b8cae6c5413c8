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

//! Module manager events and the dispatcher that delivers them

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::ModuleLoadError;

/// Base trait for all module manager events
pub trait Event: Any + Send + Sync + Debug {}

/// A unique identifier for an event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub usize);

/// Type alias for event handlers
pub type EventHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;

type ErasedHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

// Counter for generating unique handler IDs
static HANDLER_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn generate_handler_id() -> HandlerId {
    HandlerId(HANDLER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Raised once per module when its load either completed or failed
#[derive(Debug)]
pub struct LoadModuleCompleted {
    module: String,
    error: Option<ModuleLoadError>,
    handled: AtomicBool,
}

impl LoadModuleCompleted {
    pub(crate) fn succeeded(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            error: None,
            handled: AtomicBool::new(false),
        }
    }

    pub(crate) fn failed(module: impl Into<String>, error: ModuleLoadError) -> Self {
        Self {
            module: module.into(),
            error: Some(error),
            handled: AtomicBool::new(false),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn error(&self) -> Option<&ModuleLoadError> {
        self.error.as_ref()
    }

    /// Marks the failure as handled so the manager does not apply its failure policy
    pub fn mark_handled(&self) {
        self.handled.store(true, Ordering::SeqCst);
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::SeqCst)
    }

    pub(crate) fn into_error(self) -> Option<ModuleLoadError> {
        self.error
    }
}

impl Event for LoadModuleCompleted {}

/// Progress reported by a loader while it fetches a module package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDownloadProgressChanged {
    pub module: String,
    pub bytes_received: u64,
    pub total_bytes: u64,
}

impl ModuleDownloadProgressChanged {
    pub fn progress_percentage(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        ((self.bytes_received.min(self.total_bytes) * 100) / self.total_bytes) as u8
    }
}

impl Event for ModuleDownloadProgressChanged {}

/// Registers handlers by event type and dispatches events to them synchronously
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<TypeId, HashMap<HandlerId, ErasedHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific event type
    pub fn subscribe<T: Event>(&self, handler: EventHandler<T>) -> HandlerId {
        let handler_id = generate_handler_id();
        let wrapper: ErasedHandler = Arc::new(move |event: &dyn Any| {
            if let Some(concrete) = event.downcast_ref::<T>() {
                handler(concrete);
            }
        });

        self.handlers.write().entry(TypeId::of::<T>()).or_default().insert(handler_id, wrapper);
        handler_id
    }

    /// Unregister a handler by its ID and event type
    pub fn unsubscribe<T: Event>(&self, handler_id: HandlerId) -> bool {
        let type_id = TypeId::of::<T>();
        let mut handlers_map = self.handlers.write();

        if let Some(type_handlers) = handlers_map.get_mut(&type_id) {
            let removed = type_handlers.remove(&handler_id).is_some();
            if type_handlers.is_empty() {
                handlers_map.remove(&type_id);
            }
            removed
        } else {
            false
        }
    }

    /// Delivers `event` to every handler of its type without holding the handler lock
    pub fn dispatch<T: Event>(&self, event: &T) {
        let handlers: Vec<ErasedHandler> = self
            .handlers
            .read()
            .get(&TypeId::of::<T>())
            .map(|type_handlers| type_handlers.values().cloned().collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(event as &dyn Any);
        }
    }

    pub fn handler_count<T: Event>(&self) -> usize {
        self.handlers.read().get(&TypeId::of::<T>()).map_or(0, HashMap::len)
    }
}
