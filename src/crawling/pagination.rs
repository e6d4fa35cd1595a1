//! Pull-based pagination over one seed
//!
//! [`PaginationWalker::next_page`] yields pages in cursor order until a
//! termination condition fires. Conditions are checked in order: item cap,
//! page cap, end of listing, then fetch failure. The caller reports how many
//! records it actually emitted from each page via
//! [`PaginationWalker::record_emitted`], since dedup and caps happen
//! downstream.
//!
//! Public search pages have no paging. When such a page holds fewer users
//! than the seed still needs, its creator links are fetched one by one as
//! profile lookups before the walk ends; a failed link is skipped.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::crawling::normalizer::{PayloadShape, RawPage};
use crate::crawling::orchestrator::RequestOrchestrator;
use crate::domain::{HarvestError, PageCursor, RequestTask, Seed, SeedRef, TaskTarget};
use crate::infrastructure::config::CursorMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkLimits {
    pub max_items: Option<u64>,
    pub end_page: Option<u32>,
}

/// Why a walk ended
#[derive(Debug, Clone)]
pub enum WalkStop {
    MaxItems,
    EndPage,
    Exhausted,
    RepeatedCursor,
    Failed(HarvestError),
    Cancelled,
}

impl WalkStop {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub const fn error(&self) -> Option<&HarvestError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for WalkStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxItems => write!(f, "max_items"),
            Self::EndPage => write!(f, "end_page"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::RepeatedCursor => write!(f, "repeated_cursor"),
            Self::Failed(error) => write!(f, "failed:{}", error.kind()),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One fetched page
#[derive(Debug)]
pub struct WalkPage {
    pub page_index: u32,
    pub attempts: u32,
    pub status: u16,
    pub page: RawPage,
}

pub struct PaginationWalker {
    orchestrator: Arc<RequestOrchestrator>,
    seed: Seed,
    seed_ref: SeedRef,
    limits: WalkLimits,
    cursor: PageCursor,
    page_index: u32,
    emitted: u64,
    seen_tokens: HashSet<String>,
    repeated_cursor: bool,
    /// Creator links still to be fetched from a public search page
    pending_profiles: VecDeque<String>,
    stop: Option<WalkStop>,
}

impl PaginationWalker {
    #[must_use]
    pub fn new(
        orchestrator: Arc<RequestOrchestrator>,
        seed: Seed,
        seed_ref: SeedRef,
        limits: WalkLimits,
    ) -> Self {
        Self {
            orchestrator,
            seed,
            seed_ref,
            limits,
            cursor: PageCursor::First,
            page_index: 0,
            emitted: 0,
            seen_tokens: HashSet::new(),
            repeated_cursor: false,
            pending_profiles: VecDeque::new(),
            stop: None,
        }
    }

    /// Continue a previous traversal from `cursor` at `page_index`
    #[must_use]
    pub fn resume_from(mut self, cursor: PageCursor, page_index: u32) -> Self {
        if let PageCursor::Token(token) = &cursor {
            self.seen_tokens.insert(token.clone());
        }
        self.cursor = cursor;
        self.page_index = page_index;
        self
    }

    #[must_use]
    pub const fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    #[must_use]
    pub const fn page_index(&self) -> u32 {
        self.page_index
    }

    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    #[must_use]
    pub const fn stop_reason(&self) -> Option<&WalkStop> {
        self.stop.as_ref()
    }

    /// Records remaining before the per-seed cap; `None` when uncapped
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.limits.max_items.map(|max| max.saturating_sub(self.emitted))
    }

    pub fn record_emitted(&mut self, count: u64) {
        self.emitted += count;
    }

    /// Fetch the next page, or `None` once the walk has stopped
    pub async fn next_page(&mut self) -> Option<WalkPage> {
        if self.stop.is_some() {
            return None;
        }

        if self.limits.max_items.is_some_and(|max| self.emitted >= max) {
            return self.finish(WalkStop::MaxItems);
        }
        let linked_index = self.page_index.saturating_sub(1);
        while let Some(link) = self.pending_profiles.pop_front() {
            let task = RequestTask::new(
                TaskTarget::ProfileUrl(link.clone()),
                self.seed_ref.clone(),
                linked_index,
            );
            match self.orchestrator.fetch(task).await {
                Ok(payload) => {
                    let page = RawPage::parse(&payload.body);
                    debug!("📄 {} linked profile {} has {} entries", self.seed_ref, link, page.len());
                    return Some(WalkPage {
                        page_index: linked_index,
                        attempts: payload.attempts,
                        status: payload.status,
                        page,
                    });
                }
                Err(HarvestError::Cancelled) => return self.finish(WalkStop::Cancelled),
                Err(error) if error.is_run_fatal() => return self.finish(WalkStop::Failed(error)),
                Err(error) => warn!("⚠️ {} skipping linked profile {}: {}", self.seed_ref, link, error),
            }
        }
        if self.limits.end_page.is_some_and(|end| self.page_index >= end) {
            return self.finish(WalkStop::EndPage);
        }

        let target = match &self.cursor {
            PageCursor::First => self.seed.initial_target(),
            PageCursor::Token(token) => TaskTarget::Cursor(token.clone()),
            PageCursor::Offset(offset) => match &self.seed {
                Seed::Keyword(query) => TaskTarget::Keyword {
                    query: query.clone(),
                    offset: *offset,
                },
                _ => return self.finish(WalkStop::Exhausted),
            },
            PageCursor::Done => {
                let reason = if self.repeated_cursor {
                    WalkStop::RepeatedCursor
                } else {
                    WalkStop::Exhausted
                };
                return self.finish(reason);
            }
        };

        let task = RequestTask::new(target, self.seed_ref.clone(), self.page_index);
        match self.orchestrator.fetch(task).await {
            Ok(payload) => {
                let mut page = RawPage::parse(&payload.body);
                self.cursor = self.next_cursor(&payload.task.target, &page);
                self.queue_profile_links(&mut page);
                let page_index = self.page_index;
                self.page_index += 1;
                debug!(
                    "📄 {} page {} has {} entries (next: {:?})",
                    self.seed_ref,
                    page_index,
                    page.len(),
                    self.cursor
                );
                Some(WalkPage {
                    page_index,
                    attempts: payload.attempts,
                    status: payload.status,
                    page,
                })
            }
            Err(HarvestError::Cancelled) => self.finish(WalkStop::Cancelled),
            Err(error) => self.finish(WalkStop::Failed(error)),
        }
    }

    /// Keep a public search page's creator links when its users fall short
    /// of what the seed still needs
    fn queue_profile_links(&mut self, page: &mut RawPage) {
        let links = std::mem::take(&mut page.profile_links);
        if !self.seed.is_listing() || page.shape != PayloadShape::Hydrated || links.is_empty() {
            return;
        }
        let short = self.remaining().is_none_or(|left| (page.len() as u64) < left);
        if short {
            info!(
                "🔀 {} search page has {} users; following {} creator links",
                self.seed_ref,
                page.len(),
                links.len()
            );
            self.pending_profiles.extend(links);
        }
    }

    fn next_cursor(&mut self, target: &TaskTarget, page: &RawPage) -> PageCursor {
        // public pages are a single unpaged result
        if !self.seed.is_listing() || page.is_empty() || page.shape == PayloadShape::Hydrated {
            return PageCursor::Done;
        }

        let endpoints = self.orchestrator.endpoints();
        match endpoints.cursor_mode() {
            CursorMode::NextHref => match &page.next_href {
                Some(href) if self.seen_tokens.insert(href.clone()) => PageCursor::Token(href.clone()),
                Some(href) => {
                    info!("🔁 {} repeated cursor {}; treating as end of listing", self.seed_ref, href);
                    self.repeated_cursor = true;
                    PageCursor::Done
                }
                None => PageCursor::Done,
            },
            CursorMode::Offset => {
                let page_size = endpoints.page_size();
                let current = match target {
                    TaskTarget::Keyword { offset, .. } => *offset,
                    _ => 0,
                };
                if page.len() < page_size as usize {
                    PageCursor::Done
                } else {
                    PageCursor::Offset(current.saturating_add(page_size))
                }
            }
        }
    }

    fn finish(&mut self, reason: WalkStop) -> Option<WalkPage> {
        debug!("🏁 {} walk stopped: {}", self.seed_ref, reason);
        self.stop = Some(reason);
        None
    }
}
