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

use std::path::PathBuf;
use thiserror::Error;

use crate::tree::PageId;

pub type Result<T> = std::result::Result<T, NavigationError>;

/// Failure of a [`PageFactory`](crate::registry::PageFactory) to produce a page
#[derive(Error, Debug)]
pub enum PageFactoryError {
    #[error("No page is registered under the name {name}")]
    NotRegistered { name: String },

    #[error("Page {name} could not be constructed: {source}")]
    Construction {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum NavigationError {
    #[error("No page is registered for segment {segment}")]
    NoPageRegistered { segment: String },

    #[error("Failed to create the page for segment {segment}: {source}")]
    PageCreationFailed {
        segment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Page {page} failed to initialize: {source}")]
    PageInitializationFailed {
        page: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Navigation was refused by page {page}")]
    ConfirmNavigationReturnedFalse { page: String },

    #[error("Cannot pop the application main page")]
    CannotPopApplicationMainPage,

    #[error("Cannot go back from the root page of a navigation stack")]
    CannotGoBackFromRoot,

    #[error("Going back to the root requires a navigation stack")]
    GoBackToRootRequiresStack,

    #[error("Removing pages with '../' is only supported within a navigation stack")]
    RelativeNavigationRequiresStack,

    #[error("Cannot remove {requested} pages, only {available} can be removed")]
    RemovePageOutOfRange { requested: usize, available: usize },

    #[error("Page {page} can only be pushed from a page inside a navigation stack")]
    PushRequiresStack { page: String },

    #[error("Page {page} cannot be nested inside {container}")]
    UnsupportedNesting { page: String, container: String },

    #[error("Page template {page} contains itself: {chain}")]
    CyclicPageTemplate { page: String, chain: String },

    #[error("Navigation was superseded by a newer request")]
    Superseded,

    #[error("Invalid navigation uri '{uri}': {message}")]
    InvalidUri { uri: String, message: String },

    #[error("Page {page} is not part of the page tree")]
    UnknownPage { page: PageId },

    #[error("Invalid page definitions {path}: {message}")]
    Definitions { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NavigationError {
    pub fn invalid_uri(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_nesting(page: impl Into<String>, container: impl Into<String>) -> Self {
        Self::UnsupportedNesting {
            page: page.into(),
            container: container.into(),
        }
    }
}

impl From<PageFactoryError> for NavigationError {
    fn from(error: PageFactoryError) -> Self {
        match error {
            PageFactoryError::NotRegistered { name } => Self::NoPageRegistered { segment: name },
            PageFactoryError::Construction { name, source } => Self::PageCreationFailed { segment: name, source },
        }
    }
}
