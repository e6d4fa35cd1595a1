//! # Crawl Task Definitions
//!
//! Seeds, request tasks and cursors. A task is a self-contained description
//! of one logical fetch; the orchestrator only bumps its attempt counter.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for request tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Starting point of one traversal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Seed {
    /// Search query; produces a paginated listing
    Keyword(String),
    /// Absolute or site-relative profile URL
    ProfileUrl(String),
    /// Numeric backend user id
    ProfileId(u64),
}

impl Seed {
    /// First request target for this seed
    #[must_use]
    pub fn initial_target(&self) -> TaskTarget {
        match self {
            Self::Keyword(query) => TaskTarget::Keyword {
                query: query.clone(),
                offset: 0,
            },
            Self::ProfileUrl(url) => TaskTarget::ProfileUrl(url.clone()),
            Self::ProfileId(id) => TaskTarget::ProfileId(*id),
        }
    }

    /// Whether the seed yields a multi-page listing
    #[must_use]
    pub const fn is_listing(&self) -> bool {
        matches!(self, Self::Keyword(_))
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(query) => write!(f, "keyword:{query}"),
            Self::ProfileUrl(url) => write!(f, "profile:{url}"),
            Self::ProfileId(id) => write!(f, "user:{id}"),
        }
    }
}

/// Reference back to the seed a task originated from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedRef {
    pub index: usize,
    pub label: String,
}

impl SeedRef {
    #[must_use]
    pub fn new(index: usize, seed: &Seed) -> Self {
        Self {
            index,
            label: seed.to_string(),
        }
    }
}

impl fmt::Display for SeedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.label)
    }
}

/// Backend endpoint family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    ProfileLookup,
    KeywordSearch,
    CursorPage,
}

/// What a single request asks the backend for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskTarget {
    ProfileId(u64),
    ProfileUrl(String),
    Keyword { query: String, offset: u32 },
    /// Opaque continuation token handed out by the backend
    Cursor(String),
}

impl TaskTarget {
    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        match self {
            Self::ProfileId(_) | Self::ProfileUrl(_) => EndpointKind::ProfileLookup,
            Self::Keyword { .. } => EndpointKind::KeywordSearch,
            Self::Cursor(_) => EndpointKind::CursorPage,
        }
    }
}

/// One unit of work for the request orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTask {
    pub task_id: TaskId,
    pub target: TaskTarget,
    /// Attempts made so far (1-based once dispatched)
    pub attempt: u32,
    pub seed: SeedRef,
    /// Zero-based page position within the seed's traversal
    pub page_index: u32,
}

impl RequestTask {
    #[must_use]
    pub fn new(target: TaskTarget, seed: SeedRef, page_index: u32) -> Self {
        Self {
            task_id: TaskId::new(),
            target,
            attempt: 0,
            seed,
            page_index,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        self.target.kind()
    }
}

/// Where to resume a listing traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageCursor {
    First,
    Token(String),
    Offset(u32),
    Done,
}
