//! `window.__sc_hydration` extraction
//!
//! Public profile and search pages embed their initial state as a JSON array
//! of `{hydratable, data}` blocks. Only the first JSON value after the
//! assignment is read, so trailing script text never breaks parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static HYDRATION_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"window\.__sc_hydration\s*=\s*").expect("valid hydration assignment pattern")
});

/// Parsed hydration blocks, or `None` when the page carries none
#[must_use]
pub fn extract_blocks(html: &str) -> Option<Vec<Value>> {
    let assignment = HYDRATION_ASSIGNMENT.find(html)?;
    let rest = html[assignment.end()..].trim_start();
    if !rest.starts_with('[') {
        return None;
    }

    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    match stream.next()? {
        Ok(Value::Array(blocks)) => Some(blocks),
        _ => None,
    }
}

/// `data` of the block whose `hydratable` is `"user"` (profile pages)
#[must_use]
pub fn find_user_block(blocks: &[Value]) -> Option<&Value> {
    blocks
        .iter()
        .find(|block| block.get("hydratable").and_then(Value::as_str) == Some("user"))
        .and_then(|block| block.get("data"))
        .filter(|data| data.is_object())
}

/// User-shaped entries from listing blocks (search pages)
#[must_use]
pub fn find_user_list(blocks: &[Value]) -> Vec<&Value> {
    let mut users = Vec::new();
    for data in blocks.iter().filter_map(|block| block.get("data")) {
        match data {
            Value::Object(object) => {
                if let Some(Value::Array(collection)) = object.get("collection") {
                    users.extend(collection.iter().filter(|entry| is_user(entry)));
                } else if is_user(data) {
                    users.push(data);
                }
            }
            Value::Array(entries) => users.extend(entries.iter().filter(|entry| is_user(entry))),
            _ => {}
        }
    }
    users
}

fn is_user(value: &Value) -> bool {
    value.get("kind").and_then(Value::as_str) == Some("user")
}
