//! Text-level helpers shared by the encoder and decoder.

use tracing::warn;

/// Separator between string-array elements on the wire.
pub const STRING_SEPARATOR: char = '\r';

/// Separator between numeric array elements and between shape extents.
pub const NUMBER_SEPARATOR: char = ' ';

/// Tolerant boolean parser.
///
/// Accepts, case-insensitively, `t`/`true`, `f`/`false` (anything starting with
/// those letters), and any numeric text, which is true when its truncated value
/// is non-zero. Unrecognised text reads as `true`; legacy writers relied on that.
#[must_use]
pub fn parse_bool(text: &str) -> bool {
    let lowered = text.trim().to_ascii_lowercase();
    if lowered.starts_with('t') {
        return true;
    }
    if lowered.starts_with('f') || lowered == "0" {
        return false;
    }
    match lowered.parse::<f64>() {
        Ok(number) if !number.is_nan() => number.trunc() != 0.0,
        _ => {
            warn!("unrecognised boolean text '{}', reading as true", text);
            true
        }
    }
}

/// Wire form of a boolean.
#[must_use]
pub fn format_bool(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// Wire form of a float that always reads back exactly.
#[must_use]
pub fn format_f64(value: f64) -> String {
    format!("{value:?}")
}

/// Wire form of a single-precision float.
#[must_use]
pub fn format_f32(value: f32) -> String {
    format!("{value:?}")
}

/// Escapes the characters that would break a carriage-return joined array.
#[must_use]
pub fn escape_element(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape_element`]. Unknown escapes are kept verbatim.
#[must_use]
pub fn unescape_element(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Joins string-array elements for the wire.
pub fn join_strings<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    items
        .into_iter()
        .map(escape_element)
        .collect::<Vec<_>>()
        .join("\r")
}

/// Splits a string-array payload into its elements.
///
/// Legacy writers wrapped each element in single quotes; those are stripped.
#[must_use]
pub fn split_strings(text: &str) -> Vec<String> {
    text.split(STRING_SEPARATOR)
        .map(|item| unescape_element(item.trim_matches('\'')))
        .collect()
}
