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

//! Parameters passed along a navigation request

use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

/// Parameter names understood by the navigation engine
pub mod keys {
    /// `true` forces a modal push, `false` forces a push within the enclosing stack
    pub const USE_MODAL_NAVIGATION: &str = "useModalNavigation";
    /// Page type of the tab or carousel child to select once navigation completes
    pub const SELECTED_TAB: &str = "selectedTab";
    /// Page to add as a tab when a tabbed page is created; `Stack|View` wraps the view in a stack
    pub const CREATE_TAB: &str = "createTab";
}

/// Direction of the navigation a lifecycle hook is invoked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NavigationMode {
    #[default]
    New,
    Back,
}

/// Ordered key/value pairs; a key may occur more than once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationParameters {
    entries: Vec<(String, String)>,
    mode: NavigationMode,
}

impl NavigationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value&key2=value2` with form-url-encoding
    pub fn from_query(query: &str) -> Self {
        let entries = form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self {
            entries,
            mode: NavigationMode::New,
        }
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.push((key.into(), value.to_string()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.add(key, value);
        self
    }

    /// First value of `key` parsed as `T`
    pub fn get<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get_str(key).and_then(|value| value.parse().ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, value)| value.as_str())
    }

    /// First value of `key` as a boolean, accepting any casing of `true` / `false`
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get_str(key)?;
        if value.eq_ignore_ascii_case("true") {
            Some(true)
        } else if value.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }

    /// Every value of `key` that parses as `T`, in order
    pub fn get_values<T: FromStr>(&self, key: &str) -> Vec<T> {
        self.entries.iter().filter(|(k, _)| k == key).filter_map(|(_, value)| value.parse().ok()).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    pub fn with_mode(mut self, mode: NavigationMode) -> Self {
        self.mode = mode;
        self
    }

    /// These entries followed by the entries of `other`; the mode of `self` is kept
    pub fn merged_with(&self, other: &NavigationParameters) -> Self {
        let mut merged = self.clone();
        merged.entries.extend(other.entries.iter().cloned());
        merged
    }

    pub(crate) fn to_query(&self) -> String {
        form_urlencoded::Serializer::new(String::new()).extend_pairs(self.iter()).finish()
    }
}

impl fmt::Display for NavigationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for NavigationParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut parameters = Self::new();
        for (key, value) in iter {
            parameters.add(key, value);
        }
        parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_keeps_order_and_repeats() {
        let parameters = NavigationParameters::from_query("createTab=A&createTab=NavigationPage%7CB&id=42");
        assert_eq!(parameters.len(), 3);
        assert_eq!(parameters.get_values::<String>(keys::CREATE_TAB), vec!["A", "NavigationPage|B"]);
        assert_eq!(parameters.get::<u32>("id"), Some(42));
        assert_eq!(parameters.get::<u32>("missing"), None);
    }

    #[test]
    fn test_bool_values_ignore_case() {
        let parameters = NavigationParameters::from_query("useModalNavigation=True&other=yes");
        assert_eq!(parameters.get_bool(keys::USE_MODAL_NAVIGATION), Some(true));
        assert_eq!(parameters.get_bool("other"), None);
    }

    #[test]
    fn test_merge_appends_and_keeps_mode() {
        let segment = NavigationParameters::from_query("a=1").with_mode(NavigationMode::Back);
        let call: NavigationParameters = [("a", "2"), ("b", "3")].into_iter().collect();

        let merged = segment.merged_with(&call);
        assert_eq!(merged.get_values::<u8>("a"), vec![1, 2]);
        assert!(merged.contains_key("b"));
        assert_eq!(merged.mode(), NavigationMode::Back);
    }

    #[test]
    fn test_display_encodes_values() {
        let parameters = NavigationParameters::new().with("name", "a b&c");
        assert_eq!(parameters.to_string(), "name=a+b%26c");
    }
}
