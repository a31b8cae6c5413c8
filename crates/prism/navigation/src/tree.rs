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

//! Arena holding the live page tree of the application window.
//!
//! The window has a main page and a stack of modal pages. Every other page hangs below one
//! of those through its container. Pages that are still being built are detached: they have
//! no parent and are neither the main page nor modal. A modal push requested from a detached
//! page is remembered and carried out once that page reaches the window.

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::error::{NavigationError, Result};
use crate::lifecycle::PageBehaviors;
use crate::registry::PageOptions;

/// Index of a page inside its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(usize);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Container structure of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    Content,
    /// Back-stack, bottom first
    Stack { pages: Vec<PageId> },
    Tabs { children: Vec<PageId>, selected: Option<usize> },
    Carousel { children: Vec<PageId>, selected: Option<usize> },
    Flyout {
        flyout: Option<PageId>,
        detail: Option<PageId>,
        is_presented: bool,
    },
}

impl PageKind {
    pub fn label(&self) -> &'static str {
        match self {
            PageKind::Content => "content",
            PageKind::Stack { .. } => "stack",
            PageKind::Tabs { .. } => "tabs",
            PageKind::Carousel { .. } => "carousel",
            PageKind::Flyout { .. } => "flyout",
        }
    }

    fn children(&self) -> Vec<PageId> {
        match self {
            PageKind::Content => Vec::new(),
            PageKind::Stack { pages } => pages.clone(),
            PageKind::Tabs { children, .. } | PageKind::Carousel { children, .. } => children.clone(),
            PageKind::Flyout { flyout, detail, .. } => flyout.iter().chain(detail.iter()).copied().collect(),
        }
    }
}

#[derive(Debug)]
pub struct PageNode {
    name: String,
    page_type: String,
    kind: PageKind,
    parent: Option<PageId>,
    options: PageOptions,
    behaviors: PageBehaviors,
}

impl PageNode {
    /// Registered name the page was created from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_type(&self) -> &str {
        &self.page_type
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<PageId> {
        self.parent
    }

    pub fn options(&self) -> PageOptions {
        self.options
    }

    pub fn behaviors(&self) -> &PageBehaviors {
        &self.behaviors
    }
}

#[derive(Debug, Default)]
pub struct PageTree {
    nodes: Vec<Option<PageNode>>,
    main_page: Option<PageId>,
    modal_stack: Vec<PageId>,
    /// Modal pushes requested from detached pages, keyed by the detached root
    pending_modals: HashMap<PageId, Vec<PageId>>,
}

impl PageTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a detached page
    pub fn insert(&mut self, name: impl Into<String>, page_type: impl Into<String>, kind: PageKind, options: PageOptions, behaviors: PageBehaviors) -> PageId {
        let id = PageId(self.nodes.len());
        self.nodes.push(Some(PageNode {
            name: name.into(),
            page_type: page_type.into(),
            kind,
            parent: None,
            options,
            behaviors,
        }));
        id
    }

    pub fn get(&self, id: PageId) -> Option<&PageNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node(&self, id: PageId) -> Result<&PageNode> {
        self.get(id).ok_or(NavigationError::UnknownPage { page: id })
    }

    fn node_mut(&mut self, id: PageId) -> Result<&mut PageNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut).ok_or(NavigationError::UnknownPage { page: id })
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live pages
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn main_page(&self) -> Option<PageId> {
        self.main_page
    }

    pub fn modal_stack(&self) -> &[PageId] {
        &self.modal_stack
    }

    pub fn name(&self, id: PageId) -> &str {
        self.get(id).map_or("<removed>", PageNode::name)
    }

    pub fn page_type(&self, id: PageId) -> Option<&str> {
        self.get(id).map(PageNode::page_type)
    }

    pub fn kind(&self, id: PageId) -> Option<&PageKind> {
        self.get(id).map(PageNode::kind)
    }

    pub fn parent(&self, id: PageId) -> Option<PageId> {
        self.get(id).and_then(PageNode::parent)
    }

    pub fn is_stack(&self, id: PageId) -> bool {
        matches!(self.kind(id), Some(PageKind::Stack { .. }))
    }

    pub fn is_flyout(&self, id: PageId) -> bool {
        matches!(self.kind(id), Some(PageKind::Flyout { .. }))
    }

    /// Topmost ancestor of a page
    pub fn window_root(&self, id: PageId) -> PageId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Whether the page is reachable from the main page or a modal page
    pub fn is_attached(&self, id: PageId) -> bool {
        let root = self.window_root(id);
        self.main_page == Some(root) || self.modal_stack.contains(&root)
    }

    fn is_window_page(&self, id: PageId) -> bool {
        self.main_page == Some(id) || self.modal_stack.contains(&id)
    }

    fn ensure_detached(&self, id: PageId) -> Result<()> {
        let node = self.node(id)?;
        if node.parent.is_some() || self.is_window_page(id) {
            return Err(NavigationError::unsupported_nesting(&node.name, "a second container"));
        }
        Ok(())
    }

    fn ensure_nestable(&self, container: PageId, page: PageId) -> Result<()> {
        self.ensure_detached(page)?;
        if self.is_flyout(page) {
            return Err(NavigationError::unsupported_nesting(self.name(page), self.name(container)));
        }
        Ok(())
    }

    /// Makes `page` the main page. Returns the pages that left the window, most recent modal first
    /// and the previous main page last.
    pub fn set_main_page(&mut self, page: PageId) -> Result<Vec<PageId>> {
        self.ensure_detached(page)?;
        let mut replaced: Vec<PageId> = self.modal_stack.drain(..).rev().collect();
        replaced.extend(self.main_page.take());
        self.main_page = Some(page);
        self.flush_pending(page);
        Ok(replaced)
    }

    /// Pushes a modal page on top of the window
    pub fn push_modal(&mut self, page: PageId) -> Result<()> {
        self.ensure_detached(page)?;
        self.modal_stack.push(page);
        self.flush_pending(page);
        Ok(())
    }

    /// Pushes `page` modally on behalf of `source`; deferred while `source` is detached
    pub fn push_modal_from(&mut self, source: PageId, page: PageId) -> Result<()> {
        self.node(source)?;
        if self.is_attached(source) {
            return self.push_modal(page);
        }
        self.ensure_detached(page)?;
        let root = self.window_root(source);
        self.pending_modals.entry(root).or_default().push(page);
        Ok(())
    }

    pub fn pop_modal(&mut self) -> Option<PageId> {
        self.modal_stack.pop()
    }

    /// Removes a page from the modal stack wherever it is
    pub fn remove_modal(&mut self, page: PageId) -> bool {
        let before = self.modal_stack.len();
        self.modal_stack.retain(|id| *id != page);
        before != self.modal_stack.len()
    }

    /// Modal pushes waiting for a detached root
    pub fn pending_modals(&self, root: PageId) -> &[PageId] {
        self.pending_modals.get(&root).map_or(&[], Vec::as_slice)
    }

    fn flush_pending(&mut self, root: PageId) {
        if let Some(pages) = self.pending_modals.remove(&root) {
            for page in pages {
                self.modal_stack.push(page);
                self.flush_pending(page);
            }
        }
    }

    /// Called once `child` hangs below a container: its deferred modals follow its new root
    fn reparent_pending(&mut self, child: PageId) {
        let Some(pages) = self.pending_modals.remove(&child) else {
            return;
        };
        let root = self.window_root(child);
        if self.is_attached(root) {
            for page in pages {
                self.modal_stack.push(page);
                self.flush_pending(page);
            }
        } else {
            self.pending_modals.entry(root).or_default().extend(pages);
        }
    }

    fn stack_mut(&mut self, stack: PageId) -> Result<&mut Vec<PageId>> {
        let node = self.node_mut(stack)?;
        let name = node.name.clone();
        match &mut node.kind {
            PageKind::Stack { pages } => Ok(pages),
            _ => Err(NavigationError::unsupported_nesting(name, "a page that is not a navigation stack")),
        }
    }

    /// Pages of a stack, bottom first; empty for other pages
    pub fn stack_pages(&self, stack: PageId) -> &[PageId] {
        match self.kind(stack) {
            Some(PageKind::Stack { pages }) => pages,
            _ => &[],
        }
    }

    pub fn stack_top(&self, stack: PageId) -> Option<PageId> {
        self.stack_pages(stack).last().copied()
    }

    pub fn stack_push(&mut self, stack: PageId, page: PageId) -> Result<()> {
        let len = self.stack_pages(stack).len();
        self.stack_insert(stack, len, page)
    }

    pub fn stack_insert(&mut self, stack: PageId, index: usize, page: PageId) -> Result<()> {
        self.ensure_nestable(stack, page)?;
        let pages = self.stack_mut(stack)?;
        let index = index.min(pages.len());
        pages.insert(index, page);
        self.node_mut(page)?.parent = Some(stack);
        self.reparent_pending(page);
        Ok(())
    }

    /// Detaches `page` from `stack`
    pub fn stack_remove(&mut self, stack: PageId, page: PageId) -> bool {
        let Ok(pages) = self.stack_mut(stack) else {
            return false;
        };
        let before = pages.len();
        pages.retain(|id| *id != page);
        let removed = before != pages.len();
        if removed {
            if let Ok(node) = self.node_mut(page) {
                node.parent = None;
            }
        }
        removed
    }

    pub fn stack_pop(&mut self, stack: PageId) -> Option<PageId> {
        let top = self.stack_top(stack)?;
        self.stack_remove(stack, top).then_some(top)
    }

    /// Pops everything above the root; returns the popped pages, most recent first
    pub fn stack_pop_to_root(&mut self, stack: PageId) -> Vec<PageId> {
        let mut popped = Vec::new();
        while self.stack_pages(stack).len() > 1 {
            match self.stack_pop(stack) {
                Some(page) => popped.push(page),
                None => break,
            }
        }
        popped
    }

    /// Stack that `page` is pushed in: its parent, or the parent of its tabbed or carousel parent
    pub fn enclosing_stack(&self, page: PageId) -> Option<PageId> {
        let parent = self.parent(page)?;
        match self.kind(parent)? {
            PageKind::Stack { .. } => Some(parent),
            PageKind::Tabs { .. } | PageKind::Carousel { .. } => self.parent(parent).filter(|grandparent| self.is_stack(*grandparent)),
            _ => None,
        }
    }

    /// Direct parent of `page` when it is a stack
    pub fn direct_stack(&self, page: PageId) -> Option<PageId> {
        self.parent(page).filter(|parent| self.is_stack(*parent))
    }

    /// Children of a tabbed or carousel page
    pub fn children(&self, container: PageId) -> &[PageId] {
        match self.kind(container) {
            Some(PageKind::Tabs { children, .. } | PageKind::Carousel { children, .. }) => children,
            _ => &[],
        }
    }

    /// Adds a tab or carousel child; the first child becomes the selected one
    pub fn add_child(&mut self, container: PageId, page: PageId) -> Result<()> {
        self.ensure_nestable(container, page)?;
        let node = self.node_mut(container)?;
        let name = node.name.clone();
        match &mut node.kind {
            PageKind::Tabs { children, selected } | PageKind::Carousel { children, selected } => {
                children.push(page);
                selected.get_or_insert(0);
            }
            _ => return Err(NavigationError::unsupported_nesting(name, "a page without tabs")),
        }
        self.node_mut(page)?.parent = Some(container);
        self.reparent_pending(page);
        Ok(())
    }

    pub fn select_child(&mut self, container: PageId, page: PageId) -> bool {
        let Ok(node) = self.node_mut(container) else {
            return false;
        };
        match &mut node.kind {
            PageKind::Tabs { children, selected } | PageKind::Carousel { children, selected } => {
                match children.iter().position(|id| *id == page) {
                    Some(index) => {
                        *selected = Some(index);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    pub fn selected_child(&self, container: PageId) -> Option<PageId> {
        match self.kind(container)? {
            PageKind::Tabs { children, selected } | PageKind::Carousel { children, selected } => selected.and_then(|index| children.get(index).copied()),
            _ => None,
        }
    }

    fn flyout_mut(&mut self, flyout: PageId) -> Result<(&mut Option<PageId>, &mut Option<PageId>, &mut bool)> {
        let node = self.node_mut(flyout)?;
        let name = node.name.clone();
        match &mut node.kind {
            PageKind::Flyout {
                flyout,
                detail,
                is_presented,
            } => Ok((flyout, detail, is_presented)),
            _ => Err(NavigationError::unsupported_nesting(name, "a page that is not a flyout")),
        }
    }

    /// Replaces the detail page; returns the previous detail, now detached
    pub fn set_detail(&mut self, flyout: PageId, page: PageId) -> Result<Option<PageId>> {
        self.ensure_nestable(flyout, page)?;
        let (_, detail, _) = self.flyout_mut(flyout)?;
        let previous = detail.replace(page);
        if let Some(previous) = previous {
            self.node_mut(previous)?.parent = None;
        }
        self.node_mut(page)?.parent = Some(flyout);
        self.reparent_pending(page);
        Ok(previous)
    }

    pub fn set_flyout_pane(&mut self, flyout: PageId, page: PageId) -> Result<()> {
        self.ensure_nestable(flyout, page)?;
        let (pane, _, _) = self.flyout_mut(flyout)?;
        if let Some(previous) = pane.replace(page) {
            self.node_mut(previous)?.parent = None;
        }
        self.node_mut(page)?.parent = Some(flyout);
        Ok(())
    }

    pub fn detail(&self, flyout: PageId) -> Option<PageId> {
        match self.kind(flyout)? {
            PageKind::Flyout { detail, .. } => *detail,
            _ => None,
        }
    }

    pub fn set_presented(&mut self, flyout: PageId, presented: bool) {
        if let Ok((_, _, is_presented)) = self.flyout_mut(flyout) {
            *is_presented = presented;
        }
    }

    pub fn is_presented(&self, flyout: PageId) -> bool {
        matches!(self.kind(flyout), Some(PageKind::Flyout { is_presented: true, .. }))
    }

    /// Page the user sees when `page` is shown
    pub fn visible_leaf(&self, page: PageId) -> PageId {
        let next = match self.kind(page) {
            Some(PageKind::Stack { pages }) => pages.last().copied(),
            Some(PageKind::Tabs { .. } | PageKind::Carousel { .. }) => self.selected_child(page),
            Some(PageKind::Flyout { detail, .. }) => *detail,
            _ => None,
        };
        next.map_or(page, |child| self.visible_leaf(child))
    }

    /// Visible page of the top modal, or of the main page
    pub fn current_page(&self) -> Option<PageId> {
        self.modal_stack.last().copied().or(self.main_page).map(|page| self.visible_leaf(page))
    }

    /// Whether `page` represents the application main page: the main page itself, or a page
    /// sitting at the root position of every container up to the main page
    pub fn is_main_page(&self, page: PageId) -> bool {
        if self.main_page == Some(page) {
            return true;
        }
        let Some(parent) = self.parent(page) else {
            return false;
        };
        let at_root_position = match self.kind(parent) {
            Some(PageKind::Stack { pages }) => pages.first() == Some(&page),
            Some(PageKind::Tabs { .. } | PageKind::Carousel { .. }) => true,
            Some(PageKind::Flyout { detail, .. }) => *detail == Some(page),
            _ => false,
        };
        at_root_position && self.is_main_page(parent)
    }

    /// Pages below and including `page` in destroy order: children before their parent,
    /// most recently added children first, a flyout's pane before its detail.
    /// Modal pushes still pending for `page` come first.
    pub fn destroy_order(&self, page: PageId) -> Vec<PageId> {
        let mut order = Vec::new();
        for pending in self.pending_modals(page).iter().rev() {
            order.extend(self.destroy_order(*pending));
        }
        self.collect_destroy_order(page, &mut order);
        order
    }

    fn collect_destroy_order(&self, page: PageId, order: &mut Vec<PageId>) {
        if let Some(kind) = self.kind(page) {
            let children = match kind {
                PageKind::Flyout { .. } => kind.children(),
                _ => kind.children().into_iter().rev().collect(),
            };
            for child in children {
                self.collect_destroy_order(child, order);
            }
            order.push(page);
        }
    }

    /// Detaches `page` from wherever it hangs
    pub fn detach(&mut self, page: PageId) {
        if self.main_page == Some(page) {
            self.main_page = None;
        }
        self.remove_modal(page);
        for pending in self.pending_modals.values_mut() {
            pending.retain(|id| *id != page);
        }
        let Some(parent) = self.parent(page) else {
            return;
        };
        if let Ok(node) = self.node_mut(parent) {
            match &mut node.kind {
                PageKind::Stack { pages } => pages.retain(|id| *id != page),
                PageKind::Tabs { children, selected } | PageKind::Carousel { children, selected } => {
                    if let Some(index) = children.iter().position(|id| *id == page) {
                        children.remove(index);
                        *selected = match *selected {
                            _ if children.is_empty() => None,
                            Some(current) if current > index => Some(current - 1),
                            Some(current) => Some(current.min(children.len() - 1)),
                            None => None,
                        };
                    }
                }
                PageKind::Flyout { flyout, detail, .. } => {
                    if *flyout == Some(page) {
                        *flyout = None;
                    }
                    if *detail == Some(page) {
                        *detail = None;
                    }
                }
                PageKind::Content => {}
            }
        }
        if let Ok(node) = self.node_mut(page) {
            node.parent = None;
        }
    }

    /// Detaches `page` and drops it with all of its descendants; returns the removed pages in
    /// destroy order
    pub fn remove_subtree(&mut self, page: PageId) -> Vec<PageId> {
        if !self.contains(page) {
            return Vec::new();
        }
        let order = self.destroy_order(page);
        self.detach(page);
        for id in &order {
            self.pending_modals.remove(id);
            self.remove_modal(*id);
            if let Some(slot) = self.nodes.get_mut(id.0) {
                *slot = None;
            }
        }
        order
    }

    /// Drops every candidate that never reached the window, with its descendants
    pub fn prune_detached(&mut self, candidates: &[PageId]) -> Vec<PageId> {
        let mut pruned = Vec::new();
        for page in candidates.iter().rev() {
            if self.contains(*page) && !self.is_attached(*page) {
                pruned.extend(self.remove_subtree(*page));
            }
        }
        pruned
    }

    /// Textual outline of the window
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self.main_page {
            Some(main) => self.render_page(&mut out, main, 0, "main: "),
            None => out.push_str("main: <none>\n"),
        }
        for (index, modal) in self.modal_stack.iter().enumerate() {
            self.render_page(&mut out, *modal, 0, &format!("modal {index}: "));
        }
        out
    }

    fn render_page(&self, out: &mut String, page: PageId, depth: usize, label: &str) {
        let Some(node) = self.get(page) else {
            return;
        };
        let _ = write!(out, "{:indent$}{label}{} [{}]", "", node.name, node.kind.label(), indent = depth * 2);
        if let PageKind::Flyout { is_presented: true, .. } = node.kind {
            out.push_str(" presented");
        }
        out.push('\n');

        match &node.kind {
            PageKind::Content => {}
            PageKind::Stack { pages } => {
                for (index, child) in pages.iter().enumerate() {
                    self.render_page(out, *child, depth + 1, &format!("{index}: "));
                }
            }
            PageKind::Tabs { children, selected } | PageKind::Carousel { children, selected } => {
                for (index, child) in children.iter().enumerate() {
                    let marker = if *selected == Some(index) { "* " } else { "  " };
                    self.render_page(out, *child, depth + 1, marker);
                }
            }
            PageKind::Flyout { flyout, detail, .. } => {
                if let Some(flyout) = flyout {
                    self.render_page(out, *flyout, depth + 1, "flyout: ");
                }
                if let Some(detail) = detail {
                    self.render_page(out, *detail, depth + 1, "detail: ");
                }
            }
        }
    }
}
