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

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::registry::PageRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationOptions {
    /// TOML file with `[[pages]]` definitions
    pub pages: Option<PathBuf>,
}

impl NavigationOptions {
    /// Registry holding the configured page definitions; empty when no file is configured
    pub fn registry(&self) -> Result<PageRegistry> {
        match &self.pages {
            Some(path) => Ok(PageRegistry::from_definitions(PageRegistry::load_definitions(path)?)),
            None => Ok(PageRegistry::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PageFactory;
    use std::io::Write;

    #[test]
    fn test_registry_from_configured_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[[pages]]\nname = \"ViewA\"\n\n[[pages]]\nname = \"NavigationPage\"\nkind = \"stack\"").unwrap();

        let options = NavigationOptions {
            pages: Some(file.path().to_path_buf()),
        };
        let registry = options.registry().unwrap();
        assert!(registry.is_registered("ViewA"));
        assert!(registry.describe("NavigationPage").unwrap().template.is_stack());
    }

    #[test]
    fn test_default_options_give_empty_registry() {
        let registry = NavigationOptions::default().registry().unwrap();
        assert!(!registry.is_registered("ViewA"));
    }
}
