//! # Response Normalizer
//!
//! Raw payloads are parsed once into [`RawPage`], an optional-field
//! intermediate of [`RawUser`]s. Typed defaults are applied only in
//! [`ResponseNormalizer::normalize`]: absent numbers become `0`, absent
//! strings stay `null`, absent booleans become `false`.
//!
//! Public HTML pages are read through their hydration block first, then
//! through plain markup ([`markup`]): creator links on search results and
//! app-link meta tags on profile pages.

pub mod hydration;
pub mod markup;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{ArtistRecord, Badges, HarvestError, Visual};

/// Loosely typed user object as the backend sends it.
///
/// Every field is kept as raw JSON so a mistyped optional field never costs
/// the whole entry; conversion happens in [`ResponseNormalizer::normalize`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUser {
    pub id: Option<Value>,
    pub kind: Option<Value>,
    pub username: Option<Value>,
    pub full_name: Option<Value>,
    pub permalink_url: Option<Value>,
    pub avatar_url: Option<Value>,
    pub city: Option<Value>,
    pub country_code: Option<Value>,
    pub created_at: Option<Value>,
    pub followers_count: Option<Value>,
    pub followings_count: Option<Value>,
    pub likes_count: Option<Value>,
    pub playlist_count: Option<Value>,
    pub reposts_count: Option<Value>,
    pub track_count: Option<Value>,
    pub verified: Option<Value>,
    /// `{pro, pro_unlimited, verified}`
    pub badges: Option<Value>,
    /// `{urn, visuals: [...]}`
    pub visuals: Option<Value>,
}

/// One collection entry: decoded, or kept as the decode failure
#[derive(Debug, Clone)]
pub enum RawEntry {
    User(Box<RawUser>),
    Undecodable(String),
}

impl RawEntry {
    fn decode(value: Value) -> Self {
        match serde_json::from_value::<RawUser>(value) {
            Ok(user) => Self::User(Box::new(user)),
            Err(e) => Self::Undecodable(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{collection, next_href}`
    Listing,
    /// Single user object from a lookup
    Profile,
    /// Public HTML page (hydration block and/or creator links)
    Hydrated,
    /// HTML profile page read from its meta tags
    MetaTags,
    /// Nothing usable in the body
    Malformed,
}

/// A single backend page, parsed but not yet normalized
#[derive(Debug, Clone)]
pub struct RawPage {
    pub shape: PayloadShape,
    pub entries: Vec<RawEntry>,
    pub next_href: Option<String>,
    /// Site-relative creator links found in the markup but not in `entries`
    pub profile_links: Vec<String>,
    pub malformed: Option<String>,
}

impl RawPage {
    /// Parse a response body of any supported shape.
    ///
    /// Never fails: a body that cannot be read becomes a `Malformed` page,
    /// which the normalizer counts as one dropped entry.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => Self::from_json(value),
                Err(e) => Self::malformed(format!("invalid JSON payload: {e}")),
            };
        }

        Self::from_html(body)
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Object(mut object) => {
                if let Some(collection) = object.remove("collection") {
                    let entries = match collection {
                        Value::Array(items) => items.into_iter().map(RawEntry::decode).collect(),
                        Value::Null => Vec::new(),
                        _ => return Self::malformed("collection is not an array"),
                    };
                    let next_href = object
                        .remove("next_href")
                        .and_then(|v| v.as_str().map(str::to_string))
                        .filter(|href| !href.is_empty());
                    Self {
                        shape: PayloadShape::Listing,
                        entries,
                        next_href,
                        profile_links: Vec::new(),
                        malformed: None,
                    }
                } else {
                    Self::single(PayloadShape::Profile, Value::Object(object))
                }
            }
            Value::Array(items) => Self {
                shape: PayloadShape::Listing,
                entries: items.into_iter().map(RawEntry::decode).collect(),
                next_href: None,
                profile_links: Vec::new(),
                malformed: None,
            },
            _ => Self::malformed("payload is not an object"),
        }
    }

    fn from_html(html: &str) -> Self {
        let blocks = hydration::extract_blocks(html).unwrap_or_default();
        if let Some(user) = hydration::find_user_block(&blocks) {
            return Self::single(PayloadShape::Hydrated, user.clone());
        }
        if let Some(user) = markup::meta_user(html) {
            return Self::single(PayloadShape::MetaTags, user);
        }

        let users = hydration::find_user_list(&blocks);
        let known: Vec<&str> = users
            .iter()
            .copied()
            .filter_map(|user| user.get("permalink_url").and_then(Value::as_str))
            .collect();
        let profile_links: Vec<String> = markup::profile_links(html)
            .into_iter()
            .filter(|path| !known.iter().any(|url| url.trim_end_matches('/').ends_with(path.as_str())))
            .collect();

        if blocks.is_empty() && profile_links.is_empty() {
            return Self::malformed("payload is neither JSON nor a readable page");
        }
        Self {
            shape: PayloadShape::Hydrated,
            entries: users.into_iter().cloned().map(RawEntry::decode).collect(),
            next_href: None,
            profile_links,
            malformed: None,
        }
    }

    fn single(shape: PayloadShape, value: Value) -> Self {
        Self {
            shape,
            entries: vec![RawEntry::decode(value)],
            next_href: None,
            profile_links: Vec::new(),
            malformed: None,
        }
    }

    fn malformed(reason: impl Into<String>) -> Self {
        Self {
            shape: PayloadShape::Malformed,
            entries: Vec::new(),
            next_href: None,
            profile_links: Vec::new(),
            malformed: Some(reason.into()),
        }
    }

    /// Entries in the page, decodable or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Records from one page plus the entries that could not be used
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<ArtistRecord>,
    /// One `HarvestError::Normalization` per dropped entry
    pub errors: Vec<HarvestError>,
    /// Non-user entries skipped without counting as errors
    pub ignored: usize,
}

impl NormalizedBatch {
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.errors.len()
    }

    fn drop_entry(&mut self, reason: String) {
        debug!("📝 Dropping entry: {}", reason);
        self.errors.push(HarvestError::Normalization(reason));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseNormalizer;

impl ResponseNormalizer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    pub fn normalize(&self, page: RawPage) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        if let Some(reason) = page.malformed {
            batch.drop_entry(format!("malformed page: {reason}"));
            return batch;
        }

        for entry in page.entries {
            let user = match entry {
                RawEntry::User(user) => user,
                RawEntry::Undecodable(reason) => {
                    batch.drop_entry(format!("undecodable entry: {reason}"));
                    continue;
                }
            };

            if text(user.kind.as_ref()).is_some_and(|kind| kind != "user") {
                batch.ignored += 1;
                continue;
            }

            match Self::to_record(*user) {
                Some(record) => batch.records.push(record),
                None => batch.drop_entry("entry without a usable id".to_string()),
            }
        }
        batch
    }

    fn to_record(user: RawUser) -> Option<ArtistRecord> {
        let id = parse_id(user.id.as_ref()?)?;
        let badges = user.badges.as_ref();
        let badge = |name: &str| flag(badges.and_then(|b| b.get(name)));

        Some(ArtistRecord {
            avatar_url: text(user.avatar_url.as_ref()),
            badges: Badges {
                pro: badge("pro"),
                pro_unlimited: badge("pro_unlimited"),
                verified: badge("verified"),
            },
            city: text(user.city.as_ref()),
            country_code: text(user.country_code.as_ref()),
            created_at: text(user.created_at.as_ref())
                .as_deref()
                .and_then(parse_timestamp),
            followers_count: count(user.followers_count.as_ref()),
            followings_count: count(user.followings_count.as_ref()),
            full_name: text(user.full_name.as_ref()),
            id,
            likes_count: count(user.likes_count.as_ref()),
            permalink_url: text(user.permalink_url.as_ref()),
            playlist_count: count(user.playlist_count.as_ref()),
            reposts_count: count(user.reposts_count.as_ref()),
            track_count: count(user.track_count.as_ref()),
            username: text(user.username.as_ref()),
            verified: flag(user.verified.as_ref()),
            visuals: user
                .visuals
                .as_ref()
                .and_then(|v| v.get("visuals"))
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(parse_visual).collect())
                .unwrap_or_default(),
        })
    }
}

fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strings pass through; anything else is `null`
fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Booleans, or `"true"`/`"false"` strings; anything else is `false`
fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Lenient counter: numbers or numeric strings, negatives and garbage to 0
fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .map_or(0, |n| u64::try_from(n).unwrap_or(0)),
        _ => 0,
    }
}

/// RFC 3339, or the legacy `2014/06/18 11:41:33 +0000` form
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S %z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_visual(value: &Value) -> Option<Visual> {
    let visual_url = value.get("visual_url")?.as_str()?.to_string();
    Some(Visual {
        urn: value.get("urn").and_then(Value::as_str).map(str::to_string),
        entry_time: count(value.get("entry_time")),
        visual_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn normalize(body: &str) -> NormalizedBatch {
        ResponseNormalizer::new().normalize(RawPage::parse(body))
    }

    #[test]
    fn full_user_object() {
        let body = json!({
            "id": 123, "kind": "user", "username": "nova", "full_name": "Nova K",
            "permalink_url": "https://soundcloud.com/nova", "avatar_url": "https://i1/a.jpg",
            "city": "Berlin", "country_code": "DE",
            "created_at": "2014-06-18T11:41:33Z",
            "followers_count": 10, "followings_count": 2, "likes_count": 3,
            "playlist_count": 4, "reposts_count": 5, "track_count": 6,
            "verified": true,
            "badges": {"pro": true, "pro_unlimited": false, "verified": true},
            "visuals": {"urn": "soundcloud:users:123", "visuals": [
                {"urn": "soundcloud:visuals:1", "entry_time": 0, "visual_url": "https://i1/v.jpg"},
                {"urn": "soundcloud:visuals:2", "entry_time": 5}
            ]}
        })
        .to_string();

        let batch = normalize(&body);
        assert_eq!(batch.dropped(), 0);
        let record = &batch.records[0];
        assert_eq!(record.id, 123);
        assert_eq!(record.username.as_deref(), Some("nova"));
        assert_eq!(record.country_code.as_deref(), Some("DE"));
        assert_eq!(record.track_count, 6);
        assert!(record.verified);
        assert!(record.badges.pro && record.badges.verified && !record.badges.pro_unlimited);
        assert_eq!(record.visuals.len(), 1);
        assert_eq!(record.visuals[0].visual_url, "https://i1/v.jpg");
        assert_eq!(record.created_at.unwrap().to_rfc3339(), "2014-06-18T11:41:33+00:00");
    }

    #[test]
    fn missing_fields_get_typed_defaults() {
        let batch = normalize(r#"{"id": "77"}"#);
        let record = &batch.records[0];
        assert_eq!(record, &ArtistRecord::with_id(77));
    }

    #[test]
    fn lenient_counts_and_legacy_timestamps() {
        let batch = normalize(
            r#"{"id": 1, "followers_count": -4, "likes_count": "12", "track_count": "n/a",
                "reposts_count": 2.0, "created_at": "2014/06/18 11:41:33 +0000"}"#,
        );
        let record = &batch.records[0];
        assert_eq!(record.followers_count, 0);
        assert_eq!(record.likes_count, 12);
        assert_eq!(record.track_count, 0);
        assert_eq!(record.reposts_count, 2);
        assert_eq!(
            record.created_at,
            Some("2014-06-18T11:41:33Z".parse().unwrap())
        );

        let garbled = normalize(r#"{"id": 2, "created_at": "yesterday"}"#);
        assert_eq!(garbled.records[0].created_at, None);
    }

    #[test]
    fn listing_drops_bad_entries_and_skips_non_users() {
        let body = json!({
            "collection": [
                {"id": 1, "kind": "user"},
                {"kind": "user", "username": "no-id"},
                {"id": 3, "kind": "track"},
                "not an object",
                {"id": 5}
            ],
            "next_href": "https://api-v2.soundcloud.com/search/users?offset=10"
        })
        .to_string();

        let page = RawPage::parse(&body);
        assert_eq!(page.shape, PayloadShape::Listing);
        assert!(page.next_href.is_some());
        assert_eq!(page.len(), 5);

        let batch = ResponseNormalizer::new().normalize(page);
        let ids: Vec<u64> = batch.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert_eq!(batch.dropped(), 2);
        assert!(batch.errors.iter().all(|e| e.kind() == "normalization"));
        assert_eq!(batch.ignored, 1);
    }

    #[test]
    fn mistyped_optional_fields_fall_back_to_defaults() {
        let body = json!({
            "collection": [
                {"id": 4, "username": 12345},
                {"id": 5, "verified": "true", "badges": {"pro": "yes", "verified": true}},
                {"id": 6, "city": 0, "badges": [], "visuals": {"visuals": "none"}},
                {"id": 7, "kind": 3, "created_at": 1_400_000_000}
            ]
        })
        .to_string();

        let batch = normalize(&body);
        assert_eq!(batch.dropped(), 0);
        let ids: Vec<u64> = batch.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 5, 6, 7]);

        assert_eq!(batch.records[0].username, None);
        assert!(batch.records[1].verified);
        assert!(!batch.records[1].badges.pro);
        assert!(batch.records[1].badges.verified);
        assert_eq!(batch.records[2].city, None);
        assert!(batch.records[2].visuals.is_empty());
        assert_eq!(batch.records[3].created_at, None);
    }

    #[test]
    fn empty_listing_and_null_cursor() {
        let page = RawPage::parse(r#"{"collection": [], "next_href": null}"#);
        assert_eq!(page.shape, PayloadShape::Listing);
        assert!(page.is_empty());
        assert!(page.next_href.is_none());
    }

    #[test]
    fn hydrated_profile_page() {
        let html = r#"<script>window.__sc_hydration = [{"hydratable":"user","data":{"id":9,"kind":"user","username":"h"}}];</script>"#;
        let page = RawPage::parse(html);
        assert_eq!(page.shape, PayloadShape::Hydrated);
        let batch = ResponseNormalizer::new().normalize(page);
        assert_eq!(batch.records[0].id, 9);
    }

    #[test]
    fn profile_page_without_hydration_reads_meta_tags() {
        let html = r#"<html><head>
            <meta property="og:url" content="https://soundcloud.com/quiet-one">
            <meta property="al:android:url" content="soundcloud://users:555">
        </head><body>JavaScript required</body></html>"#;
        let page = RawPage::parse(html);
        assert_eq!(page.shape, PayloadShape::MetaTags);

        let batch = ResponseNormalizer::new().normalize(page);
        let record = &batch.records[0];
        assert_eq!(record.id, 555);
        assert_eq!(record.username.as_deref(), Some("quiet-one"));
        assert_eq!(record.followers_count, 0);
    }

    #[test]
    fn search_page_keeps_unhydrated_creator_links() {
        let html = r#"<script>window.__sc_hydration = [{"hydratable":"search","data":{"collection":[
                {"id": 1, "kind": "user", "permalink_url": "https://soundcloud.com/first"}
            ]}}];</script>
            <div><a href="/first">First</a><a href="/second">Second</a></div>"#;
        let page = RawPage::parse(html);
        assert_eq!(page.shape, PayloadShape::Hydrated);
        assert_eq!(page.len(), 1);
        assert_eq!(page.profile_links, vec!["/second"]);
    }

    #[test]
    fn unreadable_body_counts_as_one_drop() {
        let batch = normalize("<html>rate limited</html>");
        assert!(batch.records.is_empty());
        assert_eq!(batch.dropped(), 1);

        let batch = normalize("{ torn");
        assert_eq!(batch.dropped(), 1);
    }

    proptest! {
        #[test]
        fn counters_are_never_negative(followers in any::<i64>(), tracks in any::<i64>()) {
            let body = json!({"id": 1, "followers_count": followers, "track_count": tracks.to_string()})
                .to_string();
            let record = &normalize(&body).records[0];
            prop_assert_eq!(record.followers_count, u64::try_from(followers).unwrap_or(0));
            prop_assert_eq!(record.track_count, u64::try_from(tracks).unwrap_or(0));
        }
    }
}
