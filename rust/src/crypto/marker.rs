//! Recognition of `ENC(...)` markers inside setting values. Only strings that
//! match the anchored pattern in full count; there is no escaping.

use once_cell::sync::Lazy;
use regex::Regex;

const MARKER_PREFIX: &str = "ENC(";
const MARKER_SUFFIX: &str = ")";

static MARKER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ENC\(.*\)$").expect("MARKER_REGEX should compile - this is a bug"));

pub fn is_marker(value: &str) -> bool {
    MARKER_REGEX.is_match(value)
}

/// Returns the token wrapped by a marker, or `None` when `value` is not one.
pub fn marker_payload(value: &str) -> Option<&str> {
    if !is_marker(value) {
        return None;
    }
    Some(&value[MARKER_PREFIX.len()..value.len() - MARKER_SUFFIX.len()])
}

pub fn wrap_marker(token: &str) -> String {
    format!("{MARKER_PREFIX}{token}{MARKER_SUFFIX}")
}
