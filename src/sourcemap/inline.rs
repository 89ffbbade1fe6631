//! Inline `sourceMappingURL` data-URI comments

use super::SourceMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use thiserror::Error;

const INLINE_PREFIX: &str = "//# sourceMappingURL=data:application/json;charset=utf-8;base64,";

static INLINE_MAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:\r?\n)?^[ \t]*(?://[#@]|/\*[#@])[ \t]*sourceMappingURL=data:application/json;(?:charset=[^;,]+;)?base64,([^\s*]*)[ \t]*(?:\*/)?[ \t]*\r?$",
    )
    .expect("inline source map regex is valid")
});

/// Why an inline map could not be read
#[derive(Error, Debug)]
pub enum InlineMapError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload is not a source map: {0}")]
    Json(#[from] serde_json::Error),
}

/// Find and decode the last inline map comment in `code`
///
/// Returns `None` when the code carries no inline map at all.
pub fn extract_inline_map(code: &str) -> Option<Result<SourceMap, InlineMapError>> {
    let payload = INLINE_MAP
        .captures_iter(code)
        .last()?
        .get(1)
        .map_or("", |m| m.as_str());

    Some(decode_payload(payload))
}

fn decode_payload(payload: &str) -> Result<SourceMap, InlineMapError> {
    let bytes = STANDARD.decode(payload)?;
    let json = String::from_utf8(bytes)?;
    Ok(SourceMap::from_json(&json)?)
}

/// Remove every inline map comment line from `code`
///
/// Only the comment and the line break in front of it go; everything else,
/// trailing whitespace included, is left as the transformer wrote it.
pub fn strip_inline_map(code: &str) -> Cow<'_, str> {
    INLINE_MAP.replace_all(code, "")
}

/// Append `map` as an inline comment, replacing any existing one
pub fn append_inline_map(code: &str, map: &SourceMap) -> Result<String, serde_json::Error> {
    let json = map.to_json()?;
    let body = strip_inline_map(code);
    Ok(format!("{body}\n{INLINE_PREFIX}{}", STANDARD.encode(json)))
}
