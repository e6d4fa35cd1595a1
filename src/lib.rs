//! Artist Harvester - creator profile acquisition pipeline
//!
//! Harvests SoundCloud creator profiles from keyword searches, profile URLs
//! and user ids through a rate-limited, proxy-rotating request layer, and
//! streams a deduplicated JSON dataset to disk.

pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use crawling::{Harvester, RunSummary};
pub use domain::{ArtistRecord, HarvestError, Seed};
pub use infrastructure::HarvestConfig;
