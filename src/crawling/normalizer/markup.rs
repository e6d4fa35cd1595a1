//! Plain-markup fallbacks for public pages
//!
//! Used when a page's hydration block has no usable user data: profile links
//! from the server-rendered search results, and a minimal user object from a
//! profile page's meta tags. Meta data is only trusted when the app-link tag
//! carries the numeric user id.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value, json};

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));
static NOSCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("noscript").expect("valid noscript selector"));
static META_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[property][content]").expect("valid meta selector"));
static APP_LINK_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^soundcloud://users:(\d+)$").expect("valid app-link pattern"));
static PERMALINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid permalink pattern"));

const SITE_HOSTS: &[&str] = &["soundcloud.com", "www.soundcloud.com", "m.soundcloud.com"];

/// First path segments that are site sections rather than creators
const RESERVED_SEGMENTS: &[&str] = &[
    "apps", "charts", "connect", "creators", "discover", "feed", "go", "help", "imprint", "jobs",
    "login", "logout", "messages", "mobile", "notifications", "pages", "people", "popular",
    "premium", "pro", "search", "settings", "signin", "signup", "stations", "stream", "tags",
    "terms-of-use", "upload", "you",
];

/// Creator profile links in document order, as site-relative `/<permalink>`
/// paths, without duplicates.
///
/// Server-rendered results sit inside `<noscript>`, which parses as raw text,
/// so its contents are parsed again as a fragment.
#[must_use]
pub fn profile_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut hrefs = link_targets(&document);
    for noscript in document.select(&NOSCRIPT_SELECTOR) {
        let fragment = Html::parse_fragment(&noscript.text().collect::<String>());
        hrefs.extend(link_targets(&fragment));
    }

    let mut seen = HashSet::new();
    hrefs
        .iter()
        .filter_map(|href| profile_path(href))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn link_targets(document: &Html) -> Vec<String> {
    document
        .select(&LINK_SELECTOR)
        .filter_map(|element| element.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// `/<permalink>` for a link to a creator's profile page
fn profile_path(href: &str) -> Option<String> {
    let href = href.trim();
    let path = match href.split_once("://") {
        Some((_, rest)) => {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            if !SITE_HOSTS.contains(&host.to_ascii_lowercase().as_str()) {
                return None;
            }
            path
        }
        None => href.strip_prefix('/')?,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segment = path.strip_suffix('/').unwrap_or(path);

    let reserved = RESERVED_SEGMENTS.contains(&segment.to_ascii_lowercase().as_str());
    (!reserved && PERMALINK.is_match(segment)).then(|| format!("/{segment}"))
}

/// Minimal user object from a profile page's Open Graph / app-link tags
#[must_use]
pub fn meta_user(html: &str) -> Option<Value> {
    let document = Html::parse_document(html);
    let mut properties = Map::new();
    for element in document.select(&META_SELECTOR) {
        let element = element.value();
        if let (Some(property), Some(content)) = (element.attr("property"), element.attr("content")) {
            properties
                .entry(property.to_string())
                .or_insert_with(|| Value::String(content.trim().to_string()));
        }
    }
    let property = |name: &str| properties.get(name).and_then(Value::as_str);

    let id = ["al:ios:url", "al:android:url", "twitter:app:url:iphone"]
        .into_iter()
        .filter_map(property)
        .find_map(|link| APP_LINK_USER.captures(link))
        .and_then(|captures| captures.get(1))
        .and_then(|id| id.as_str().parse::<u64>().ok())?;

    let permalink_url = property("og:url");
    let username = permalink_url
        .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
        .filter(|segment| PERMALINK.is_match(segment));

    let mut user = json!({ "id": id, "kind": "user" });
    let fields = [
        ("username", username),
        ("full_name", property("og:title")),
        ("permalink_url", permalink_url),
        ("avatar_url", property("og:image")),
        ("followers_count", property("soundcloud:follower_count")),
    ];
    if let Some(object) = user.as_object_mut() {
        for (field, value) in fields {
            if let Some(value) = value {
                object.insert(field.to_string(), Value::String(value.to_string()));
            }
        }
    }
    Some(user)
}
