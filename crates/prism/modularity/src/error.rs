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

//! Error types raised by the module catalog, loaders, initializer and manager

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for modularity operations
pub type Result<T> = std::result::Result<T, ModularityError>;

/// How two descriptors sharing a module name differ from each other
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateConflict {
    /// Both descriptors carry the same type and location
    Identical,
    /// Only the module type differs
    ModuleType { first: String, second: String },
    /// Only the location differs
    Location { first: Option<String>, second: Option<String> },
    /// Type and location both differ
    TypeAndLocation,
}

impl fmt::Display for DuplicateConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateConflict::Identical => write!(f, "identical descriptors"),
            DuplicateConflict::ModuleType { first, second } => write!(f, "module type '{first}' vs '{second}'"),
            DuplicateConflict::Location { first, second } => write!(
                f,
                "location '{}' vs '{}'",
                first.as_deref().unwrap_or("<none>"),
                second.as_deref().unwrap_or("<none>")
            ),
            DuplicateConflict::TypeAndLocation => write!(f, "module type and location differ"),
        }
    }
}

/// Modularity error types
#[derive(Error, Debug)]
pub enum ModularityError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Cyclic dependency found involving module {module}")]
    CyclicDependency { module: String },

    #[error("Module {module} depends on module {dependency}, which is not in the catalog")]
    MissingDependency { module: String, dependency: String },

    #[error("A duplicated module with name {module} has been found ({conflict})")]
    DuplicateModule { module: String, conflict: DuplicateConflict },

    #[error("Module {module} depends on other modules that don't belong to the same group")]
    CrossGroupDependency { module: String },

    #[error("Module {module} is marked for initialization when available, but depends on modules marked for on-demand initialization")]
    InitializationModeMismatch { module: String },

    #[error("Module {module} was not found in the catalog ({matches} matches)")]
    ModuleNotFound { module: String, matches: usize },

    #[error("No module type loader can load module {module} from location {location:?}")]
    ModuleTypeLoaderNotFound { module: String, location: Option<String> },

    #[error("Failed to load the type of module {module}: {source}")]
    ModuleTypeLoading {
        module: String,
        #[source]
        source: ModuleLoadError,
    },

    #[error("Failed to initialize module {module}: {source}")]
    ModuleInitialize {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Module {module} failed to initialize earlier: {reason}")]
    ModuleFailed { module: String, reason: String },

    #[error("Module initialization is halted after module {module} failed to load")]
    Halted { module: String },

    #[error("Module loading requires a running tokio runtime")]
    RuntimeUnavailable,

    #[error("Invalid module manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModularityError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create a manifest error
    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Name of the module the error is about, when there is one
    pub fn module_name(&self) -> Option<&str> {
        match self {
            Self::CyclicDependency { module }
            | Self::MissingDependency { module, .. }
            | Self::DuplicateModule { module, .. }
            | Self::CrossGroupDependency { module }
            | Self::InitializationModeMismatch { module }
            | Self::ModuleNotFound { module, .. }
            | Self::ModuleTypeLoaderNotFound { module, .. }
            | Self::ModuleTypeLoading { module, .. }
            | Self::ModuleInitialize { module, .. }
            | Self::ModuleFailed { module, .. }
            | Self::Halted { module } => Some(module),
            _ => None,
        }
    }
}

/// Errors reported by module type loaders
#[derive(Error, Debug)]
pub enum ModuleLoadError {
    #[error("Location {location:?} is not supported by this loader")]
    InvalidLocation { location: Option<String> },

    #[error("Module package not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error while loading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module type resolution failed: {0}")]
    Resolution(#[from] anyhow::Error),
}
