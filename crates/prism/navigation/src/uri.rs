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

//! Parsing of navigation uris into segment queues

use percent_encoding::percent_decode_str;
use std::collections::VecDeque;
use std::fmt;
use url::Url;

use crate::error::{NavigationError, Result};
use crate::parameters::{NavigationParameters, keys};

/// Segment standing for "remove the current page from its stack", produced by a leading `../`
pub const REMOVE_PAGE_SEGMENT: &str = "__RemovePage";

const PARENT_PREFIX: &str = "../";

/// One page name of a navigation uri with its inline parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationSegment {
    name: String,
    parameters: NavigationParameters,
}

impl NavigationSegment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: NavigationParameters::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: NavigationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub(crate) fn remove_page() -> Self {
        Self::new(REMOVE_PAGE_SEGMENT)
    }

    /// Parses `name` or `name?key=value&key2=value2`
    pub fn parse(text: &str) -> Result<Self> {
        let (raw_name, query) = match text.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (text, None),
        };
        let name = percent_decode_str(raw_name)
            .decode_utf8()
            .map_err(|e| NavigationError::invalid_uri(text, e.to_string()))?
            .into_owned();
        if name.is_empty() {
            return Err(NavigationError::invalid_uri(text, "segment without a page name"));
        }

        Ok(Self {
            name,
            parameters: query.map(NavigationParameters::from_query).unwrap_or_default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &NavigationParameters {
        &self.parameters
    }

    pub fn is_remove_page(&self) -> bool {
        self.name == REMOVE_PAGE_SEGMENT
    }

    /// Explicit `useModalNavigation` value of this segment
    pub fn use_modal_navigation(&self) -> Option<bool> {
        self.parameters.get_bool(keys::USE_MODAL_NAVIGATION)
    }
}

impl fmt::Display for NavigationSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_remove_page() {
            return f.write_str("..");
        }
        f.write_str(&self.name)?;
        if !self.parameters.is_empty() {
            write!(f, "?{}", self.parameters)?;
        }
        Ok(())
    }
}

/// A parsed navigation uri.
///
/// Absolute uris (leading `/` or a scheme with a host such as `app://host/A/B`) navigate from the
/// application root; relative ones from the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationUri {
    absolute: bool,
    segments: Vec<NavigationSegment>,
}

impl NavigationUri {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(NavigationError::invalid_uri(text, "empty uri"));
        }

        // Scheme forms without `//` (`http:x`) are plain relative segments
        let authority = trimmed.find("://");
        let (absolute, mut path) = match Url::parse(trimmed) {
            Ok(url) if url.has_host() && authority == Some(url.scheme().len()) => {
                // Keep the raw path so parameters of inner segments survive
                let after_scheme = &trimmed[url.scheme().len() + 3..];
                let path = after_scheme.find('/').map_or("", |index| &after_scheme[index..]);
                (true, path)
            }
            _ => (trimmed.starts_with('/'), trimmed),
        };

        let mut segments = Vec::new();
        if !absolute {
            while let Some(rest) = path.strip_prefix(PARENT_PREFIX) {
                segments.push(NavigationSegment::remove_page());
                path = rest;
            }
            if path == ".." {
                segments.push(NavigationSegment::remove_page());
                path = "";
            }
        }

        for part in path.split('/').filter(|part| !part.is_empty()) {
            if part == ".." {
                return Err(NavigationError::invalid_uri(text, "'..' is only allowed at the start of a relative uri"));
            }
            segments.push(NavigationSegment::parse(part)?);
        }

        if segments.is_empty() {
            return Err(NavigationError::invalid_uri(text, "no page segments"));
        }
        Ok(Self { absolute, segments })
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn segments(&self) -> &[NavigationSegment] {
        &self.segments
    }

    pub(crate) fn into_queue(self) -> VecDeque<NavigationSegment> {
        self.segments.into()
    }
}

impl fmt::Display for NavigationUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.is_remove_page() {
                f.write_str("../")?;
                continue;
            }
            if index > 0 && !self.segments[index - 1].is_remove_page() {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for NavigationUri {
    type Err = NavigationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(uri: &NavigationUri) -> Vec<&str> {
        uri.segments().iter().map(NavigationSegment::name).collect()
    }

    #[test]
    fn test_relative_uri_with_parameters() {
        let uri = NavigationUri::parse("TabbedPage?selectedTab=PageMock/PageMock?id=3&name=a%20b").unwrap();
        assert!(!uri.is_absolute());
        assert_eq!(names(&uri), vec!["TabbedPage", "PageMock"]);
        assert_eq!(uri.segments()[0].parameters().get_str(keys::SELECTED_TAB), Some("PageMock"));
        assert_eq!(uri.segments()[1].parameters().get::<u32>("id"), Some(3));
        assert_eq!(uri.segments()[1].parameters().get_str("name"), Some("a b"));
    }

    #[test]
    fn test_absolute_forms() {
        let slash = NavigationUri::parse("/MasterDetailPage-Empty/NavigationPage/ContentPage").unwrap();
        assert!(slash.is_absolute());
        assert_eq!(names(&slash), vec!["MasterDetailPage-Empty", "NavigationPage", "ContentPage"]);

        let scheme = NavigationUri::parse("app://prism/NavigationPage?useModalNavigation=true/ViewA").unwrap();
        assert!(scheme.is_absolute());
        assert_eq!(names(&scheme), vec!["NavigationPage", "ViewA"]);
        assert_eq!(scheme.segments()[0].use_modal_navigation(), Some(true));
    }

    #[test]
    fn test_scheme_without_authority_is_relative() {
        let http = NavigationUri::parse("http:x").unwrap();
        assert!(!http.is_absolute());
        assert_eq!(names(&http), vec!["http:x"]);

        let file = NavigationUri::parse("file:a").unwrap();
        assert!(!file.is_absolute());
        assert_eq!(names(&file), vec!["file:a"]);

        let mixed = NavigationUri::parse("http:example.com/ViewA").unwrap();
        assert!(!mixed.is_absolute());
        assert_eq!(names(&mixed), vec!["http:example.com", "ViewA"]);
    }

    #[test]
    fn test_leading_parent_segments_become_remove_page() {
        let uri = NavigationUri::parse("../../ViewC").unwrap();
        assert_eq!(names(&uri), vec![REMOVE_PAGE_SEGMENT, REMOVE_PAGE_SEGMENT, "ViewC"]);
        assert!(uri.segments()[0].is_remove_page());

        let back = NavigationUri::parse("..").unwrap();
        assert_eq!(names(&back), vec![REMOVE_PAGE_SEGMENT]);
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let uri = NavigationUri::parse("ViewA//ViewB/").unwrap();
        assert_eq!(names(&uri), vec!["ViewA", "ViewB"]);
    }

    #[test]
    fn test_invalid_uris() {
        assert!(matches!(NavigationUri::parse("  "), Err(NavigationError::InvalidUri { .. })));
        assert!(matches!(NavigationUri::parse("/"), Err(NavigationError::InvalidUri { .. })));
        assert!(matches!(NavigationUri::parse("ViewA/../ViewB"), Err(NavigationError::InvalidUri { .. })));
        assert!(matches!(NavigationUri::parse("?id=1"), Err(NavigationError::InvalidUri { .. })));
    }

    #[test]
    fn test_display_round_trips_structure() {
        let uri = NavigationUri::parse("../ViewB?id=1").unwrap();
        assert_eq!(uri.to_string(), "../ViewB?id=1");
        let absolute = NavigationUri::parse("/A/B").unwrap();
        assert_eq!(absolute.to_string(), "/A/B");
    }
}
