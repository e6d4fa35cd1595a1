//! Domain module - records, tasks and the error taxonomy
//!
//! Everything the acquisition pipeline passes between stages lives here:
//! - `artist`: the canonical `ArtistRecord` emitted to the export artifact
//! - `task`: seeds, request tasks and page cursors
//! - `errors`: the `HarvestError` taxonomy shared by every stage

pub mod artist;
pub mod errors;
pub mod task;

pub use artist::{ArtistRecord, Badges, Visual};
pub use errors::{FetchOutcome, HarvestError};
pub use task::{EndpointKind, PageCursor, RequestTask, Seed, SeedRef, TaskId, TaskTarget};
