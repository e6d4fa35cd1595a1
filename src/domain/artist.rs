//! # Artist Record
//!
//! The canonical output unit of a harvest run. Field order matches the
//! exported JSON layout, and every field is always present in the output:
//! nullable strings serialize as `null`, counters default to `0`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One creator profile as written to the export artifact.
///
/// Built once by the normalizer and never mutated afterwards; stages hand it
/// along by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub avatar_url: Option<String>,
    pub badges: Badges,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub followers_count: u64,
    pub followings_count: u64,
    pub full_name: Option<String>,
    pub id: u64,
    pub likes_count: u64,
    pub permalink_url: Option<String>,
    pub playlist_count: u64,
    pub reposts_count: u64,
    pub track_count: u64,
    pub username: Option<String>,
    pub verified: bool,
    pub visuals: Vec<Visual>,
}

/// Fixed badge flags, each `false` unless the backend says otherwise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badges {
    pub pro: bool,
    pub pro_unlimited: bool,
    pub verified: bool,
}

/// Profile banner image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visual {
    pub urn: Option<String>,
    pub entry_time: u64,
    pub visual_url: String,
}

impl ArtistRecord {
    /// Minimal record with every optional field empty.
    #[must_use]
    pub fn with_id(id: u64) -> Self {
        Self {
            avatar_url: None,
            badges: Badges::default(),
            city: None,
            country_code: None,
            created_at: None,
            followers_count: 0,
            followings_count: 0,
            full_name: None,
            id,
            likes_count: 0,
            permalink_url: None,
            playlist_count: 0,
            reposts_count: 0,
            track_count: 0,
            username: None,
            verified: false,
            visuals: Vec::new(),
        }
    }
}
