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

use crate::error::{NavigationError, Result};

/// Outcome of a navigation call
#[derive(Debug)]
pub struct NavigationResult {
    success: bool,
    error: Option<NavigationError>,
}

impl NavigationResult {
    pub fn succeeded() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: NavigationError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&NavigationError> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl From<Result<()>> for NavigationResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::succeeded(),
            Err(error) => Self::failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_conversion() {
        let ok: NavigationResult = Ok(()).into();
        assert!(ok.is_success());
        assert!(ok.into_result().is_ok());

        let failed: NavigationResult = Err(NavigationError::CannotPopApplicationMainPage).into();
        assert!(!failed.is_success());
        assert!(matches!(failed.error(), Some(NavigationError::CannotPopApplicationMainPage)));
    }
}
