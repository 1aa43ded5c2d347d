//! Scalar cleaning and parsing helpers used by the record normalizer.
//!
//! Every helper here is total: malformed input maps to `None` ("unknown")
//! instead of an error, so one bad selector result never aborts a record.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::Url;
use std::borrow::Cow;
use unicode_normalization::UnicodeNormalization;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Values the site renders in place of an unknown age.
const AGE_SENTINELS: [&str; 4] = ["-", "\u{2013}", "\u{2014}", "â€“"];

/// Pseudo-link the site uses for unlinked placeholders.
pub const JAVASCRIPT_VOID: &str = "javascript:;";

/// Clean scraped text: NFKD, drop word joiners, backslashes and square
/// brackets left over from markup stripping, trim.
///
/// Idempotent: `clean_text(&clean_text(s)) == clean_text(s)`.
pub fn clean_text(text: &str) -> String {
    // Decompose again: dropping a character can leave combining marks out
    // of canonical order.
    text.nfkd()
        .filter(|c| !matches!(c, '\u{2060}' | '\\' | '[' | ']'))
        .nfkd()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Decode the HTML entities that survive selector extraction. Unknown
/// entities are left as written.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(text)
}

/// Unescape + clean, returning `None` for text that ends up empty.
pub fn clean_field(raw: Option<&str>) -> Option<String> {
    let cleaned = clean_text(&unescape_html(raw?));
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Trimmed, non-empty copy of a raw value.
pub fn non_empty(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS`, falling back to a date-only value at
/// midnight. Anything else is unknown.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT) {
        return Some(dt);
    }
    let date_part = raw.split_whitespace().next()?;
    NaiveDate::parse_from_str(date_part, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Convert a unix timestamp in milliseconds (as text) to UTC wall-clock time.
pub fn parse_unix_millis(raw: &str) -> Option<NaiveDateTime> {
    let millis: i64 = raw.trim().parse().ok()?;
    let secs = millis.div_euclid(1000);
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// Age cell to years. Dash sentinels and non-numeric text are unknown.
pub fn normalize_age(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || AGE_SENTINELS.contains(&raw) {
        return None;
    }
    raw.split_whitespace().next()?.parse().ok()
}

/// Split `raw` on `separator` into exactly `expected` trimmed parts. Missing
/// or empty parts are `None`.
pub fn split_parts(raw: &str, separator: char, expected: usize) -> Vec<Option<String>> {
    let parts: Vec<&str> = raw.split(separator).collect();
    (0..expected)
        .map(|i| parts.get(i).and_then(|p| non_empty(Some(p))))
        .collect()
}

/// Parse a `"2:1"` score cell into both sides.
pub fn split_score(raw: &str) -> (Option<u32>, Option<u32>) {
    let parts = split_parts(raw, ':', 2);
    let side = |i: usize| parts[i].as_deref().and_then(parse_score);
    (side(0), side(1))
}

pub fn parse_score(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// Digits-only count, e.g. viewer numbers rendered as "12 345".
pub fn parse_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Reduce the score header ("Online, Best of 3") to the format ("Best of 3").
pub fn normalize_match_format(raw: &str) -> Option<String> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim();
    let format = match cleaned.find('B') {
        Some(idx) => &cleaned[idx..],
        None => cleaned,
    };
    non_empty(Some(format))
}

/// Join description fragments with spaces, gluing sentence continuations
/// that start with '.' directly onto the previous fragment.
pub fn join_fragments(fragments: &[&str]) -> String {
    let mut out = String::new();
    for fragment in fragments.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        if !out.is_empty() && !fragment.starts_with('.') {
            out.push(' ');
        }
        out.push_str(fragment);
    }
    out
}

/// Resolve a possibly-relative link against `base`. Empty strings and the
/// site's `javascript:;` pseudo-links are unknown.
pub fn resolve_url(base: &str, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == JAVASCRIPT_VOID {
        return None;
    }
    if let Ok(absolute) = Url::parse(raw) {
        return Some(absolute.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(raw)
        .ok()
        .map(|u| u.to_string())
}

/// Last path segment of a URL ("/en/csgo/team/natus-vincere" -> "natus-vincere").
pub fn last_path_segment(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    non_empty(path.trim_end_matches('/').rsplit('/').next())
}
