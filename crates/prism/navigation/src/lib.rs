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

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod parameters;
pub mod registry;
pub mod result;
pub mod tree;
pub mod uri;

pub use engine::NavigationEngine;
pub use error::{NavigationError, PageFactoryError, Result};
pub use lifecycle::{NoopPage, PageBehaviors, PageLifecycle};
pub use options::NavigationOptions;
pub use parameters::{NavigationMode, NavigationParameters, keys};
pub use registry::{PageDefinition, PageDescriptor, PageFactory, PageKindName, PageOptions, PageRegistry, PageTemplate};
pub use result::NavigationResult;
pub use tree::{PageId, PageKind, PageNode, PageTree};
pub use uri::{NavigationSegment, NavigationUri, REMOVE_PAGE_SEGMENT};
