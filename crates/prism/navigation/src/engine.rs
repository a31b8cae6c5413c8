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

//! Segment-driven navigation over the page tree.
//!
//! Every handler builds the page for the next segment and processes the rest of the uri
//! against it before attaching it, so a page is complete by the time it becomes visible.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

use crate::error::{NavigationError, Result};
use crate::lifecycle::PageBehaviors;
use crate::parameters::{NavigationMode, NavigationParameters, keys};
use crate::registry::{PageDescriptor, PageFactory, PageTemplate};
use crate::result::NavigationResult;
use crate::tree::{PageId, PageKind, PageTree};
use crate::uri::{NavigationSegment, NavigationUri};

/// Bookkeeping of one public navigation call
struct Request {
    generation: u64,
    created: Vec<PageId>,
    initialized: HashSet<PageId>,
    notified: HashSet<PageId>,
}

/// How the target page joins the tree
enum Attach {
    Nothing,
    SetMainPage,
    Push { current: PageId, use_modal: Option<bool> },
    PopToRoot { stack: PageId },
}

/// Container specific step run between navigated-from and navigated-to
enum Completion {
    Nothing,
    SelectChild { container: PageId },
    SetDetail { flyout: PageId, presented: bool },
    Present { flyout: PageId, presented: bool },
}

pub struct NavigationEngine {
    tree: Arc<Mutex<PageTree>>,
    factory: Arc<dyn PageFactory>,
    generation: AtomicU64,
}

impl NavigationEngine {
    pub fn new(factory: Arc<dyn PageFactory>) -> Self {
        Self::with_tree(factory, Arc::new(Mutex::new(PageTree::new())))
    }

    /// Engine driving an existing tree
    pub fn with_tree(factory: Arc<dyn PageFactory>, tree: Arc<Mutex<PageTree>>) -> Self {
        Self {
            tree,
            factory,
            generation: AtomicU64::new(0),
        }
    }

    pub fn tree(&self) -> &Arc<Mutex<PageTree>> {
        &self.tree
    }

    pub fn current_page(&self) -> Option<PageId> {
        self.tree.lock().current_page()
    }

    pub fn render(&self) -> String {
        self.tree.lock().render()
    }

    /// Navigates from the current page, or from the window root for absolute uris
    pub async fn navigate(&self, uri: &str, parameters: NavigationParameters) -> NavigationResult {
        self.navigate_from(None, uri, parameters, None).await
    }

    pub async fn navigate_with(&self, uri: &str, parameters: NavigationParameters, use_modal: Option<bool>) -> NavigationResult {
        self.navigate_from(None, uri, parameters, use_modal).await
    }

    #[instrument(skip(self, parameters))]
    pub async fn navigate_from(&self, from: Option<PageId>, uri: &str, parameters: NavigationParameters, use_modal: Option<bool>) -> NavigationResult {
        let uri = match NavigationUri::parse(uri) {
            Ok(uri) => uri,
            Err(error) => return NavigationResult::failed(error),
        };
        let mut request = self.begin();
        let result = self.navigate_inner(&mut request, from, uri, &parameters, use_modal).await;
        self.finish(request, "navigate", result)
    }

    pub async fn go_back(&self, parameters: NavigationParameters) -> NavigationResult {
        match self.current_page() {
            Some(page) => self.go_back_from(page, parameters, None).await,
            None => NavigationResult::failed(NavigationError::CannotPopApplicationMainPage),
        }
    }

    #[instrument(skip(self, parameters))]
    pub async fn go_back_from(&self, page: PageId, parameters: NavigationParameters, use_modal: Option<bool>) -> NavigationResult {
        let mut request = self.begin();
        let result = self.go_back_inner(&mut request, page, parameters, use_modal).await;
        self.finish(request, "go back", result)
    }

    #[instrument(skip_all)]
    pub async fn go_back_to_root(&self, parameters: NavigationParameters) -> NavigationResult {
        let mut request = self.begin();
        let result = self.go_back_to_root_inner(&mut request, parameters).await;
        self.finish(request, "go back to root", result)
    }

    fn begin(&self) -> Request {
        Request {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            created: Vec::new(),
            initialized: HashSet::new(),
            notified: HashSet::new(),
        }
    }

    fn finish(&self, request: Request, operation: &str, result: Result<()>) -> NavigationResult {
        match &result {
            Ok(()) => info!(operation, current = ?self.current_page(), "Navigation completed"),
            Err(error) => {
                let pruned = self.tree.lock().prune_detached(&request.created);
                warn!(operation, %error, pruned = pruned.len(), "Navigation failed");
            }
        }
        result.into()
    }

    fn ensure_current(&self, request: &Request) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) != request.generation {
            return Err(NavigationError::Superseded);
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&PageTree) -> R) -> R {
        f(&self.tree.lock())
    }

    fn write<R>(&self, f: impl FnOnce(&mut PageTree) -> R) -> R {
        f(&mut self.tree.lock())
    }

    fn describe(&self, name: &str) -> Result<PageDescriptor> {
        self.factory.describe(name).ok_or_else(|| NavigationError::NoPageRegistered { segment: name.to_string() })
    }

    fn page_type(&self, page: PageId) -> Result<String> {
        self.read(|tree| tree.node(page).map(|node| node.page_type().to_string()))
    }

    fn visible_leaf(&self, page: PageId) -> PageId {
        self.read(|tree| tree.visible_leaf(page))
    }

    async fn navigate_inner(&self, request: &mut Request, from: Option<PageId>, uri: NavigationUri, parameters: &NavigationParameters, use_modal: Option<bool>) -> Result<()> {
        let current = if uri.is_absolute() {
            None
        } else {
            match from {
                Some(page) => Some(self.read(|tree| tree.node(page).map(|_| page))?),
                None => self.current_page(),
            }
        };
        debug!(%uri, ?current, "Navigating");
        self.process(request, current, uri.into_queue(), parameters, use_modal).await
    }

    fn process<'a>(
        &'a self,
        request: &'a mut Request,
        current: Option<PageId>,
        mut queue: VecDeque<NavigationSegment>,
        parameters: &'a NavigationParameters,
        use_modal: Option<bool>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let Some(segment) = queue.pop_front() else {
                return Ok(());
            };
            let use_modal = segment.use_modal_navigation().or(use_modal);

            if segment.is_remove_page() {
                return self.remove_pages(request, current, queue, parameters, use_modal).await;
            }
            let Some(current) = current else {
                return self.navigate_root(request, segment, queue, parameters, use_modal).await;
            };

            let kind = self.read(|tree| tree.node(current).map(|node| node.kind().clone()))?;
            match kind {
                PageKind::Content => self.navigate_content(request, current, segment, queue, parameters, use_modal).await,
                PageKind::Stack { pages } => self.navigate_stack(request, current, pages, segment, queue, parameters).await,
                PageKind::Tabs { .. } | PageKind::Carousel { .. } => self.navigate_tabbed(request, current, segment, queue, parameters, use_modal).await,
                PageKind::Flyout { .. } => self.navigate_flyout(request, current, segment, queue, parameters, use_modal).await,
            }
        }
        .boxed()
    }

    async fn navigate_root(&self, request: &mut Request, segment: NavigationSegment, queue: VecDeque<NavigationSegment>, parameters: &NavigationParameters, use_modal: Option<bool>) -> Result<()> {
        let page = self.create_page(request, &segment, parameters)?;
        self.process(request, Some(page), queue, parameters, use_modal).await?;
        let from = self.current_page();
        self.do_navigate_action(request, from, &segment, page, parameters, Attach::SetMainPage, Completion::Nothing).await
    }

    async fn navigate_content(
        &self,
        request: &mut Request,
        current: PageId,
        segment: NavigationSegment,
        mut queue: VecDeque<NavigationSegment>,
        parameters: &NavigationParameters,
        use_modal: Option<bool>,
    ) -> Result<()> {
        // The top of a stack keeps pushing into that stack in path order
        let top_of = self.read(|tree| tree.direct_stack(current).filter(|stack| tree.stack_top(*stack) == Some(current)));
        if let (Some(stack), false) = (top_of, use_modal == Some(true)) {
            let keep = self.read(|tree| tree.stack_pages(stack).len());
            queue.push_front(segment);
            return self.reverse_navigate(request, stack, queue, keep, parameters).await;
        }

        let page = self.create_page(request, &segment, parameters)?;
        self.process(request, Some(page), queue, parameters, use_modal).await?;
        self.do_navigate_action(request, Some(current), &segment, page, parameters, Attach::Push { current, use_modal }, Completion::Nothing)
            .await
    }

    async fn navigate_stack(
        &self,
        request: &mut Request,
        stack: PageId,
        pages: Vec<PageId>,
        segment: NavigationSegment,
        mut queue: VecDeque<NavigationSegment>,
        parameters: &NavigationParameters,
    ) -> Result<()> {
        let (Some(&root), Some(&top)) = (pages.first(), pages.last()) else {
            queue.push_front(segment);
            return self.reverse_navigate(request, stack, queue, 0, parameters).await;
        };
        let clear = self.read(|tree| tree.node(stack).map(|node| node.options().clear_navigation_stack_on_navigation))?;
        let target_type = self.describe(segment.name())?.page_type;
        let candidate = if clear { root } else { top };

        if self.page_type(candidate)? == target_type {
            debug!(page = %candidate, "Reusing page on stack");
            if !queue.is_empty() {
                let keep = if clear { 1 } else { pages.len() };
                return self.reverse_navigate(request, stack, queue, keep, parameters).await;
            }
            let from = self.visible_leaf(top);
            let attach = if clear && pages.len() > 1 { Attach::PopToRoot { stack } } else { Attach::Nothing };
            return self.do_navigate_action(request, Some(from), &segment, candidate, parameters, attach, Completion::Nothing).await;
        }

        let keep = if clear { 0 } else { pages.len() };
        queue.push_front(segment);
        self.reverse_navigate(request, stack, queue, keep, parameters).await
    }

    /// Builds a run of stack pages in path order. Pages of the stack past `keep` are removed
    /// once the new pages are in place. The first segment that must be shown modally, and
    /// everything after it, continues from the new top with modal navigation forced.
    async fn reverse_navigate(&self, request: &mut Request, stack: PageId, mut segments: VecDeque<NavigationSegment>, keep: usize, parameters: &NavigationParameters) -> Result<()> {
        let mut collected = Vec::new();
        while let Some(segment) = segments.front() {
            if segment.is_remove_page() {
                break;
            }
            let explicit = segment.use_modal_navigation();
            let template = self.describe(segment.name())?.template;
            if explicit == Some(true) || (explicit.is_none() && template.is_flyout()) {
                break;
            }
            if let Some(segment) = segments.pop_front() {
                collected.push(segment);
            }
        }

        let previous = self.read(|tree| tree.stack_pages(stack).to_vec());
        let from = previous.last().map(|top| self.visible_leaf(*top));
        if collected.is_empty() {
            return self.process(request, Some(from.unwrap_or(stack)), segments, parameters, Some(true)).await;
        }

        let mut built = Vec::with_capacity(collected.len());
        for segment in &collected {
            let page = self.create_page(request, segment, parameters)?;
            let page_parameters = segment.parameters().merged_with(parameters).with_mode(NavigationMode::New);
            built.push((page, page_parameters));
        }

        if let (Some(from), Some((_, first_parameters))) = (from, built.first()) {
            self.confirm(request, from, first_parameters).await?;
        }
        for (page, page_parameters) in &built {
            self.initialize(request, *page, page_parameters).await?;
        }

        let removed = self.write(|tree| {
            for (page, _) in &built {
                tree.stack_push(stack, *page)?;
            }
            let removed: Vec<PageId> = previous.iter().skip(keep).rev().copied().collect();
            for page in &removed {
                tree.stack_remove(stack, *page);
            }
            Ok::<_, NavigationError>(removed)
        })?;

        let Some((new_top, top_parameters)) = built.last() else {
            return Ok(());
        };
        if let Some(from) = from {
            self.notify_from(from, top_parameters);
        }
        self.notify_to(request, *new_top, top_parameters);
        self.destroy_subtrees(&removed);

        self.process(request, Some(*new_top), segments, parameters, Some(true)).await
    }

    async fn navigate_tabbed(
        &self,
        request: &mut Request,
        container: PageId,
        segment: NavigationSegment,
        queue: VecDeque<NavigationSegment>,
        parameters: &NavigationParameters,
        use_modal: Option<bool>,
    ) -> Result<()> {
        let target_type = self.describe(segment.name())?.page_type;
        let (matching, selected) = self.read(|tree| {
            let matching = tree.children(container).iter().find_map(|child| {
                if tree.page_type(*child) == Some(target_type.as_str()) {
                    return Some((*child, *child));
                }
                tree.stack_top(*child).filter(|top| tree.page_type(*top) == Some(target_type.as_str())).map(|top| (*child, top))
            });
            (matching, tree.selected_child(container))
        });

        match matching {
            Some((child, target)) => {
                self.process(request, Some(target), queue, parameters, use_modal).await?;
                let from = selected.filter(|selected| *selected != child).map(|selected| self.visible_leaf(selected));
                self.do_navigate_action(request, from, &segment, child, parameters, Attach::Nothing, Completion::SelectChild { container })
                    .await
            }
            None => {
                let page = self.create_page(request, &segment, parameters)?;
                self.process(request, Some(page), queue, parameters, use_modal).await?;
                let from = self.visible_leaf(container);
                self.do_navigate_action(
                    request,
                    Some(from),
                    &segment,
                    page,
                    parameters,
                    Attach::Push { current: container, use_modal },
                    Completion::Nothing,
                )
                .await
            }
        }
    }

    async fn navigate_flyout(
        &self,
        request: &mut Request,
        flyout: PageId,
        segment: NavigationSegment,
        queue: VecDeque<NavigationSegment>,
        parameters: &NavigationParameters,
        use_modal: Option<bool>,
    ) -> Result<()> {
        let descriptor = self.describe(segment.name())?;
        let (detail, presented) = self.read(|tree| {
            tree.node(flyout)
                .map(|node| (tree.detail(flyout), node.options().is_presented_after_navigation))
        })?;
        let detail_modal = use_modal.or(Some(!descriptor.template.is_stack()));

        let Some(detail) = detail else {
            let page = self.create_page(request, &segment, parameters)?;
            self.process(request, Some(page), queue, parameters, detail_modal).await?;
            return self
                .do_navigate_action(request, None, &segment, page, parameters, Attach::Nothing, Completion::SetDetail { flyout, presented })
                .await;
        };

        if use_modal == Some(true) {
            let page = self.create_page(request, &segment, parameters)?;
            self.process(request, Some(page), queue, parameters, use_modal).await?;
            let from = self.visible_leaf(flyout);
            return self
                .do_navigate_action(
                    request,
                    Some(from),
                    &segment,
                    page,
                    parameters,
                    Attach::Push { current: flyout, use_modal },
                    Completion::Nothing,
                )
                .await;
        }

        if self.can_reuse_detail(detail, &descriptor, &queue)? {
            debug!(page = %detail, "Reusing flyout detail");
            self.process(request, Some(detail), queue, parameters, use_modal).await?;
            return self
                .do_navigate_action(request, None, &segment, detail, parameters, Attach::Nothing, Completion::Present { flyout, presented })
                .await;
        }

        let from = self.visible_leaf(detail);
        let page = self.create_page(request, &segment, parameters)?;
        self.process(request, Some(page), queue, parameters, detail_modal).await?;
        self.do_navigate_action(request, Some(from), &segment, page, parameters, Attach::Nothing, Completion::SetDetail { flyout, presented })
            .await
    }

    fn can_reuse_detail(&self, detail: PageId, descriptor: &PageDescriptor, queue: &VecDeque<NavigationSegment>) -> Result<bool> {
        let (detail_type, is_stack, clear, root) = self.read(|tree| {
            tree.node(detail).map(|node| {
                let root = tree.stack_pages(detail).first().and_then(|root| tree.page_type(*root)).map(str::to_string);
                (node.page_type().to_string(), tree.is_stack(detail), node.options().clear_navigation_stack_on_navigation, root)
            })
        })?;
        if detail_type != descriptor.page_type {
            return Ok(false);
        }
        if !is_stack {
            return Ok(true);
        }
        if !descriptor.template.is_stack() {
            return Ok(false);
        }
        match queue.front() {
            None => Ok(false),
            Some(_) if !clear => Ok(true),
            Some(next) => Ok(root.is_some_and(|root| self.factory.describe(next.name()).is_some_and(|next| next.page_type == root))),
        }
    }

    /// Removes `count` pages ending at `current` from its stack, then either continues with
    /// the rest of the uri or goes back to the page below the removed ones
    async fn remove_pages(
        &self,
        request: &mut Request,
        current: Option<PageId>,
        mut queue: VecDeque<NavigationSegment>,
        parameters: &NavigationParameters,
        use_modal: Option<bool>,
    ) -> Result<()> {
        let current = current.ok_or(NavigationError::RelativeNavigationRequiresStack)?;
        let mut count = 1;
        while queue.front().is_some_and(NavigationSegment::is_remove_page) {
            queue.pop_front();
            count += 1;
        }

        let (stack, pages) = self
            .read(|tree| tree.direct_stack(current).map(|stack| (stack, tree.stack_pages(stack).to_vec())))
            .ok_or(NavigationError::RelativeNavigationRequiresStack)?;
        let index = pages.iter().position(|page| *page == current).ok_or(NavigationError::UnknownPage { page: current })?;

        if !queue.is_empty() {
            if count > index + 1 {
                return Err(NavigationError::RemovePageOutOfRange {
                    requested: count,
                    available: index + 1,
                });
            }
            self.process(request, Some(current), queue, parameters, use_modal).await?;
            let removed: Vec<PageId> = pages[index + 1 - count..=index].iter().rev().copied().collect();
            self.detach_from_stack(stack, &removed);
            self.destroy_subtrees(&removed);
            return Ok(());
        }

        if count > index {
            return Err(NavigationError::RemovePageOutOfRange { requested: count, available: index });
        }
        let back = parameters.clone().with_mode(NavigationMode::Back);
        self.confirm(request, current, &back).await?;

        let removed: Vec<PageId> = pages[index + 1 - count..=index].iter().rev().copied().collect();
        self.detach_from_stack(stack, &removed);
        self.notify_from(current, &back);
        let target = self.visible_leaf(pages[index - count]);
        self.notify_to(request, target, &back);
        self.destroy_subtrees(&removed);
        Ok(())
    }

    async fn go_back_inner(&self, request: &mut Request, page: PageId, parameters: NavigationParameters, use_modal: Option<bool>) -> Result<()> {
        let back = parameters.with_mode(NavigationMode::Back);
        self.read(|tree| tree.node(page).map(|_| ()))?;
        self.confirm(request, page, &back).await?;

        let popped = self.write(|tree| pop_for_back(tree, page, use_modal))?;
        debug!(page = %page, popped = %popped, "Popped page");
        self.notify_from(page, &back);
        if let Some(current) = self.current_page() {
            self.notify_to(request, current, &back);
        }
        self.destroy_subtrees(&[popped]);
        Ok(())
    }

    async fn go_back_to_root_inner(&self, request: &mut Request, parameters: NavigationParameters) -> Result<()> {
        let back = parameters.with_mode(NavigationMode::Back);
        let page = self.current_page().ok_or(NavigationError::GoBackToRootRequiresStack)?;
        let stack = self
            .read(|tree| if tree.is_stack(page) { Some(page) } else { tree.enclosing_stack(page) })
            .ok_or(NavigationError::GoBackToRootRequiresStack)?;
        self.confirm(request, page, &back).await?;

        let popped = self.write(|tree| tree.stack_pop_to_root(stack));
        for removed in &popped {
            self.notify_from(*removed, &back);
            self.destroy_subtrees(&[*removed]);
        }
        if let Some(root) = self.read(|tree| tree.stack_pages(stack).first().copied()) {
            self.notify_to(request, root, &back);
        }
        Ok(())
    }

    /// Confirm, initialize, attach, navigated-from, completion, navigated-to
    #[allow(clippy::too_many_arguments)]
    async fn do_navigate_action(
        &self,
        request: &mut Request,
        from: Option<PageId>,
        segment: &NavigationSegment,
        to: PageId,
        parameters: &NavigationParameters,
        attach: Attach,
        completion: Completion,
    ) -> Result<()> {
        let parameters = segment.parameters().merged_with(parameters).with_mode(NavigationMode::New);
        if let Some(from) = from {
            self.confirm(request, from, &parameters).await?;
        }
        self.initialize(request, to, &parameters).await?;

        let mut released = self.write(|tree| apply_attach(tree, to, attach))?;
        if let Some(from) = from {
            self.notify_from(from, &parameters);
        }
        released.extend(self.write(|tree| apply_completion(tree, to, completion, &parameters))?);
        self.notify_to(request, to, &parameters);
        self.destroy_subtrees(&released);
        Ok(())
    }

    async fn confirm(&self, request: &Request, page: PageId, parameters: &NavigationParameters) -> Result<()> {
        let (name, behaviors) = self.read(|tree| tree.node(page).map(|node| (node.name().to_string(), node.behaviors().clone())))?;
        let allowed = behaviors.can_navigate(parameters).await;
        self.ensure_current(request)?;
        if !allowed {
            return Err(NavigationError::ConfirmNavigationReturnedFalse { page: name });
        }
        Ok(())
    }

    /// Initializes `page` and the pages shown with it, each once per request
    async fn initialize(&self, request: &mut Request, page: PageId, parameters: &NavigationParameters) -> Result<()> {
        let targets = self.read(|tree| {
            let mut targets = vec![page];
            targets.extend(tree.stack_top(page));
            for child in tree.children(page) {
                targets.push(*child);
                targets.extend(tree.stack_top(*child));
            }
            collect_behaviors(tree, &targets)
        });

        for (id, name, behaviors) in targets {
            if !request.initialized.insert(id) {
                continue;
            }
            behaviors
                .initialize(parameters)
                .await
                .map_err(|source| NavigationError::PageInitializationFailed { page: name, source })?;
            self.ensure_current(request)?;
        }
        Ok(())
    }

    fn notify_from(&self, page: PageId, parameters: &NavigationParameters) {
        let targets = self.read(|tree| collect_behaviors(tree, &visible_chain(tree, page)));
        for (_, _, behaviors) in targets {
            behaviors.navigated_from(parameters);
        }
    }

    fn notify_to(&self, request: &mut Request, page: PageId, parameters: &NavigationParameters) {
        let targets = self.read(|tree| collect_behaviors(tree, &visible_chain(tree, page)));
        for (id, _, behaviors) in targets {
            if request.notified.insert(id) {
                behaviors.navigated_to(parameters);
            }
        }
    }

    fn detach_from_stack(&self, stack: PageId, pages: &[PageId]) {
        self.write(|tree| {
            for page in pages {
                tree.stack_remove(stack, *page);
            }
        });
    }

    /// Removes each root with its descendants and destroys them in teardown order
    fn destroy_subtrees(&self, roots: &[PageId]) {
        let doomed = self.write(|tree| {
            let mut doomed = Vec::new();
            for root in roots {
                let order = tree.destroy_order(*root);
                doomed.extend(collect_behaviors(tree, &order));
                tree.remove_subtree(*root);
            }
            doomed
        });
        for (id, name, behaviors) in doomed {
            debug!(page = %name, %id, "Destroying page");
            behaviors.destroy();
        }
    }

    fn create_page(&self, request: &mut Request, segment: &NavigationSegment, parameters: &NavigationParameters) -> Result<PageId> {
        let page = self.create_named(request, segment.name())?;
        let merged = segment.parameters().merged_with(parameters);
        self.apply_tab_parameters(request, page, &merged)?;
        Ok(page)
    }

    /// Creates a detached page along with the pages its template declares
    fn create_named(&self, request: &mut Request, name: &str) -> Result<PageId> {
        self.create_expanded(request, name, &mut Vec::new())
    }

    /// `expanding` holds the templates currently being built, outermost first
    fn create_expanded(&self, request: &mut Request, name: &str, expanding: &mut Vec<String>) -> Result<PageId> {
        if expanding.iter().any(|outer| outer == name) {
            let mut chain = expanding.clone();
            chain.push(name.to_string());
            return Err(NavigationError::CyclicPageTemplate {
                page: name.to_string(),
                chain: chain.join(" -> "),
            });
        }
        let descriptor = self.describe(name)?;
        let behaviors = self.factory.create(name)?;
        let kind = match &descriptor.template {
            PageTemplate::Content => PageKind::Content,
            PageTemplate::Stack { .. } => PageKind::Stack { pages: Vec::new() },
            PageTemplate::Tabs { .. } => PageKind::Tabs {
                children: Vec::new(),
                selected: None,
            },
            PageTemplate::Carousel { .. } => PageKind::Carousel {
                children: Vec::new(),
                selected: None,
            },
            PageTemplate::Flyout { .. } => PageKind::Flyout {
                flyout: None,
                detail: None,
                is_presented: false,
            },
        };
        let page = self.write(|tree| tree.insert(name, descriptor.page_type.clone(), kind, descriptor.options, behaviors));
        request.created.push(page);
        debug!(page = name, id = %page, "Created page");

        expanding.push(name.to_string());
        match descriptor.template {
            PageTemplate::Content => {}
            PageTemplate::Stack { root } => {
                if let Some(root) = root {
                    let child = self.create_expanded(request, &root, expanding)?;
                    self.write(|tree| tree.stack_push(page, child))?;
                }
            }
            PageTemplate::Tabs { children } | PageTemplate::Carousel { children } => {
                for child in children {
                    let child = self.create_expanded(request, &child, expanding)?;
                    self.write(|tree| tree.add_child(page, child))?;
                }
            }
            PageTemplate::Flyout { flyout, detail } => {
                if let Some(pane) = flyout {
                    let pane = self.create_expanded(request, &pane, expanding)?;
                    self.write(|tree| tree.set_flyout_pane(page, pane))?;
                }
                if let Some(detail) = detail {
                    let detail = self.create_expanded(request, &detail, expanding)?;
                    self.write(|tree| tree.set_detail(page, detail))?;
                }
            }
        }
        expanding.pop();
        Ok(page)
    }

    /// `createTab` adds children to a new tabbed or carousel page, `selectedTab` picks one
    fn apply_tab_parameters(&self, request: &mut Request, page: PageId, parameters: &NavigationParameters) -> Result<()> {
        let tabbed = self.read(|tree| matches!(tree.kind(page), Some(PageKind::Tabs { .. } | PageKind::Carousel { .. })));
        if !tabbed {
            return Ok(());
        }

        for value in parameters.get_values::<String>(keys::CREATE_TAB) {
            let child = match value.split_once('|') {
                Some((stack, view)) => {
                    let stack = self.create_named(request, stack)?;
                    let view = self.create_named(request, view)?;
                    self.write(|tree| tree.stack_push(stack, view))?;
                    stack
                }
                None => self.create_named(request, &value)?,
            };
            self.write(|tree| tree.add_child(page, child))?;
        }

        if let Some(selected) = parameters.get_str(keys::SELECTED_TAB) {
            self.write(|tree| select_tab(tree, page, selected));
        }
        Ok(())
    }
}

fn collect_behaviors(tree: &PageTree, pages: &[PageId]) -> Vec<(PageId, String, PageBehaviors)> {
    pages
        .iter()
        .filter_map(|id| tree.get(*id).map(|node| (*id, node.name().to_string(), node.behaviors().clone())))
        .collect()
}

/// `page` followed by the stack tops and selected children shown through it
fn visible_chain(tree: &PageTree, page: PageId) -> Vec<PageId> {
    let mut chain = vec![page];
    let mut current = page;
    loop {
        let next = match tree.kind(current) {
            Some(PageKind::Stack { pages }) => pages.last().copied(),
            Some(PageKind::Tabs { .. } | PageKind::Carousel { .. }) => tree.selected_child(current),
            _ => None,
        };
        match next {
            Some(next) => {
                chain.push(next);
                current = next;
            }
            None => return chain,
        }
    }
}

fn matches_name(tree: &PageTree, page: PageId, name: &str) -> bool {
    tree.get(page).is_some_and(|node| node.name() == name || node.page_type() == name)
}

/// Selects the child named by `View` or `Stack|View`
fn select_tab(tree: &mut PageTree, container: PageId, value: &str) -> bool {
    let (stack_name, view) = match value.split_once('|') {
        Some((stack, view)) => (Some(stack), view),
        None => (None, value),
    };
    let found = tree.children(container).iter().copied().find(|child| {
        let top_matches = tree.stack_top(*child).is_some_and(|top| matches_name(tree, top, view));
        match stack_name {
            Some(stack) => matches_name(tree, *child, stack) && top_matches,
            None => matches_name(tree, *child, view) || top_matches,
        }
    });
    found.is_some_and(|child| tree.select_child(container, child))
}

fn push(tree: &mut PageTree, current: PageId, page: PageId, use_modal: Option<bool>) -> Result<()> {
    let stack = if tree.is_stack(current) { Some(current) } else { tree.enclosing_stack(current) };
    if use_modal.unwrap_or(stack.is_none()) {
        debug!(page = %page, source = %current, "Pushing modal page");
        return tree.push_modal_from(current, page);
    }
    match stack {
        Some(stack) => tree.stack_push(stack, page),
        None => Err(NavigationError::PushRequiresStack { page: tree.name(page).to_string() }),
    }
}

fn apply_attach(tree: &mut PageTree, page: PageId, attach: Attach) -> Result<Vec<PageId>> {
    match attach {
        Attach::Nothing => Ok(Vec::new()),
        Attach::SetMainPage => tree.set_main_page(page),
        Attach::Push { current, use_modal } => push(tree, current, page, use_modal).map(|()| Vec::new()),
        Attach::PopToRoot { stack } => Ok(tree.stack_pop_to_root(stack)),
    }
}

fn apply_completion(tree: &mut PageTree, page: PageId, completion: Completion, parameters: &NavigationParameters) -> Result<Vec<PageId>> {
    match completion {
        Completion::Nothing => Ok(Vec::new()),
        Completion::SelectChild { container } => {
            tree.select_child(container, page);
            Ok(Vec::new())
        }
        Completion::SetDetail { flyout, presented } => {
            let previous = tree.set_detail(flyout, page)?;
            tree.set_presented(flyout, presented);
            Ok(previous.into_iter().collect())
        }
        Completion::Present { flyout, presented } => {
            tree.set_presented(flyout, presented);
            if let Some(selected) = parameters.get_str(keys::SELECTED_TAB) {
                select_tab(tree, page, selected);
            }
            Ok(Vec::new())
        }
    }
}

fn refusal(tree: &PageTree, page: PageId) -> NavigationError {
    if tree.is_main_page(page) {
        NavigationError::CannotPopApplicationMainPage
    } else {
        NavigationError::CannotGoBackFromRoot
    }
}

/// Pops whatever going back from `page` removes; the tree is untouched on error
fn pop_for_back(tree: &mut PageTree, page: PageId, use_modal: Option<bool>) -> Result<PageId> {
    let stack = if tree.is_stack(page) { Some(page) } else { tree.enclosing_stack(page) };
    let depth = stack.map_or(0, |stack| tree.stack_pages(stack).len());

    if use_modal.unwrap_or(depth <= 1) {
        let root = tree.window_root(page);
        if tree.modal_stack().contains(&root) {
            tree.remove_modal(root);
            return Ok(root);
        }
        return Err(refusal(tree, page));
    }

    match stack {
        Some(stack) if depth > 1 => tree.stack_pop(stack).ok_or_else(|| refusal(tree, page)),
        _ => Err(refusal(tree, page)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageFactoryError;
    use crate::lifecycle::PageLifecycle;
    use crate::registry::MockPageFactory;
    use async_trait::async_trait;

    fn content(name: &str) -> Option<PageDescriptor> {
        Some(PageDescriptor::new(name, PageTemplate::Content))
    }

    #[tokio::test]
    async fn test_construction_failure_is_reported() {
        let mut factory = MockPageFactory::new();
        factory.expect_describe().returning(|name: &str| content(name));
        factory.expect_create().returning(|name: &str| {
            Err(PageFactoryError::Construction {
                name: name.to_string(),
                source: anyhow::anyhow!("constructor panicked"),
            })
        });

        let engine = NavigationEngine::new(Arc::new(factory));
        let result = engine.navigate("ViewA", NavigationParameters::new()).await;
        assert!(!result.is_success());
        assert!(matches!(result.error(), Some(NavigationError::PageCreationFailed { segment, .. }) if segment == "ViewA"));
        assert!(engine.tree().lock().is_empty());
    }

    #[tokio::test]
    async fn test_partially_built_pages_are_pruned() {
        let mut factory = MockPageFactory::new();
        factory.expect_describe().returning(|name: &str| match name {
            "Tabs" => Some(PageDescriptor::new(
                name,
                PageTemplate::Tabs {
                    children: vec!["ViewA".to_string(), "Missing".to_string()],
                },
            )),
            "ViewA" => content(name),
            _ => None,
        });
        factory.expect_create().returning(|_| Ok(PageBehaviors::default()));

        let engine = NavigationEngine::new(Arc::new(factory));
        let result = engine.navigate("Tabs", NavigationParameters::new()).await;
        assert!(matches!(result.error(), Some(NavigationError::NoPageRegistered { segment }) if segment == "Missing"));
        assert!(engine.tree().lock().is_empty());
    }

    #[tokio::test]
    async fn test_cyclic_templates_are_rejected() {
        let mut factory = MockPageFactory::new();
        factory.expect_describe().returning(|name: &str| match name {
            "Loop" => Some(PageDescriptor::new(name, PageTemplate::Stack { root: Some("Loop".to_string()) })),
            "Outer" => Some(PageDescriptor::new(
                name,
                PageTemplate::Tabs {
                    children: vec!["Inner".to_string()],
                },
            )),
            "Inner" => Some(PageDescriptor::new(name, PageTemplate::Stack { root: Some("Outer".to_string()) })),
            _ => None,
        });
        factory.expect_create().returning(|_| Ok(PageBehaviors::default()));
        let engine = NavigationEngine::new(Arc::new(factory));

        let result = engine.navigate("Loop", NavigationParameters::new()).await;
        assert!(matches!(result.error(), Some(NavigationError::CyclicPageTemplate { page, chain }) if page == "Loop" && chain == "Loop -> Loop"));
        assert!(engine.tree().lock().is_empty());

        let result = engine.navigate("Outer", NavigationParameters::new()).await;
        assert!(matches!(result.error(), Some(NavigationError::CyclicPageTemplate { chain, .. }) if chain == "Outer -> Inner -> Outer"));
        assert!(engine.tree().lock().is_empty());
    }

    struct FailingInit;

    #[async_trait]
    impl PageLifecycle for FailingInit {
        async fn initialize(&self, _parameters: &NavigationParameters) -> anyhow::Result<()> {
            anyhow::bail!("no data")
        }
    }

    #[tokio::test]
    async fn test_initialization_failure_names_the_page() {
        let mut factory = MockPageFactory::new();
        factory.expect_describe().returning(|name: &str| content(name));
        factory.expect_create().returning(|_| Ok(PageBehaviors::new(Arc::new(FailingInit))));

        let engine = NavigationEngine::new(Arc::new(factory));
        let result = engine.navigate("ViewA", NavigationParameters::new()).await;
        assert!(matches!(result.error(), Some(NavigationError::PageInitializationFailed { page, .. }) if page == "ViewA"));
        assert_eq!(engine.current_page(), None);
    }

    #[tokio::test]
    async fn test_invalid_uri_is_a_failed_result() {
        let engine = NavigationEngine::new(Arc::new(MockPageFactory::new()));
        let result = engine.navigate("  ", NavigationParameters::new()).await;
        assert!(matches!(result.error(), Some(NavigationError::InvalidUri { .. })));
    }

    #[test]
    fn test_back_refusal_leaves_tree_untouched() {
        let mut tree = PageTree::new();
        let nav = tree.insert("NavigationPage", "NavigationPage", PageKind::Stack { pages: Vec::new() }, Default::default(), Default::default());
        let root = tree.insert("ViewA", "ViewA", PageKind::Content, Default::default(), Default::default());
        tree.stack_push(nav, root).unwrap();
        tree.set_main_page(nav).unwrap();

        let before = tree.render();
        assert!(matches!(pop_for_back(&mut tree, root, None), Err(NavigationError::CannotPopApplicationMainPage)));
        assert!(matches!(pop_for_back(&mut tree, root, Some(false)), Err(NavigationError::CannotPopApplicationMainPage)));
        assert_eq!(tree.render(), before);
    }
}
