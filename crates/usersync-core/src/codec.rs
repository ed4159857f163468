//! Payload transforms applied between the flat files and the store.
//!
//! Every function here is pure: no shared state, safe to call from any
//! number of workers at once.
//!
//! - [`compress`] / [`decompress`] -- gzip + base64 behind a `GZIP:` tag
//! - [`decode_stored`] -- decompress-if-tagged with a corrupt-payload policy
//! - [`filter`] -- drop whole top-level sections by name
//! - [`cap`] -- hard byte limit on what gets stored

use std::collections::BTreeMap;
use std::io::{Read as _, Write as _};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Deserialize;

use crate::error::CodecError;

/// Literal prefix marking a compressed payload.
pub const COMPRESSION_TAG: &str = "GZIP:";

/// What to do when a stored payload carries the tag but does not decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPayloadPolicy {
    /// Surface the [`CodecError`] to the caller.
    #[default]
    Fail,
    /// Log a warning and hand back the undecoded text.
    Passthrough,
}

/// Gzip the payload and encode it as tagged base64 text.
///
/// # Errors
///
/// Returns [`CodecError::Compress`] if the encoder fails.
pub fn compress(payload: &str) -> Result<String, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload.as_bytes())
        .map_err(|source| CodecError::Compress { source })?;
    let bytes = encoder
        .finish()
        .map_err(|source| CodecError::Compress { source })?;

    let mut encoded = String::from(COMPRESSION_TAG);
    STANDARD.encode_string(bytes, &mut encoded);
    Ok(encoded)
}

/// Whether `payload` carries the compression tag. Only the prefix is
/// inspected.
pub fn is_compressed(payload: &str) -> bool {
    payload.starts_with(COMPRESSION_TAG)
}

/// Strip the tag, decode and inflate.
///
/// # Errors
///
/// Returns [`CodecError`] if the tag is missing or the remainder is not a
/// base64-encoded gzip stream of UTF-8 text.
pub fn decompress(encoded: &str) -> Result<String, CodecError> {
    let body = encoded
        .strip_prefix(COMPRESSION_TAG)
        .ok_or(CodecError::MissingTag)?;
    let bytes = STANDARD.decode(body.trim_end())?;
    if bytes.is_empty() {
        return Err(CodecError::Inflate {
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty gzip stream"),
        });
    }

    let mut inflated = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|source| CodecError::Inflate { source })?;
    Ok(String::from_utf8(inflated)?)
}

/// Decode a payload as read from the store: decompress it when tagged,
/// pass it through untouched otherwise.
///
/// # Errors
///
/// Returns [`CodecError`] for a corrupt tagged payload under
/// [`CorruptPayloadPolicy::Fail`].
pub fn decode_stored(raw: &str, policy: CorruptPayloadPolicy) -> Result<String, CodecError> {
    if !is_compressed(raw) {
        return Ok(raw.to_owned());
    }
    match decompress(raw) {
        Ok(decoded) => Ok(decoded),
        Err(err) => match policy {
            CorruptPayloadPolicy::Fail => Err(err),
            CorruptPayloadPolicy::Passthrough => {
                tracing::warn!(error = %err, bytes = raw.len(), "Corrupt compressed payload; using raw text");
                Ok(raw.to_owned())
            }
        },
    }
}

/// Keep/drop decision per top-level section name.
///
/// Sections not named here are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SectionPolicy {
    sections: BTreeMap<String, bool>,
}

impl SectionPolicy {
    /// An empty policy that keeps everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether `section` is kept.
    pub fn set(&mut self, section: &str, keep: bool) {
        self.sections.insert(section.to_owned(), keep);
    }

    /// Builder form of [`set`](Self::set) with `keep = false`.
    #[must_use]
    pub fn dropping(mut self, section: &str) -> Self {
        self.set(section, false);
        self
    }

    /// Whether `section` survives filtering.
    pub fn retains(&self, section: &str) -> bool {
        self.sections.get(section).copied().unwrap_or(true)
    }

    /// True when no section is marked for removal.
    pub fn drops_nothing(&self) -> bool {
        self.sections.values().all(|keep| *keep)
    }
}

impl FromIterator<(String, bool)> for SectionPolicy {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self {
            sections: iter.into_iter().collect(),
        }
    }
}

/// Remove the sections `policy` drops.
///
/// A section starts at an unindented `key:` line and runs until the next
/// one. Blank lines, indented lines, column-0 comments and column-0
/// sequence items belong to the section above them. Lines before the first
/// key are always kept. Retained lines are copied byte for byte.
pub fn filter(payload: &str, policy: &SectionPolicy) -> String {
    if policy.drops_nothing() {
        return payload.to_owned();
    }

    let mut out = String::with_capacity(payload.len());
    let mut keeping = true;
    for line in payload.split_inclusive('\n') {
        if let Some(key) = section_key(line) {
            keeping = policy.retains(key);
        }
        if keeping {
            out.push_str(line);
        }
    }
    out
}

/// Top-level section names in document order.
pub fn section_names(payload: &str) -> Vec<String> {
    payload
        .split_inclusive('\n')
        .filter_map(section_key)
        .map(str::to_owned)
        .collect()
}

/// Result of [`cap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capped {
    /// The possibly shortened payload.
    pub payload: String,
    /// Number of bytes cut off the end.
    pub dropped: usize,
}

impl Capped {
    /// Whether anything was cut.
    pub const fn is_truncated(&self) -> bool {
        self.dropped > 0
    }
}

/// Cut `payload` to at most `max_bytes` bytes. `0` disables the limit.
///
/// The cut is not section-aware; it only backs off far enough to land on a
/// UTF-8 character boundary.
pub fn cap(payload: &str, max_bytes: usize) -> Capped {
    if max_bytes == 0 || payload.len() <= max_bytes {
        return Capped {
            payload: payload.to_owned(),
            dropped: 0,
        };
    }

    let mut end = max_bytes;
    while !payload.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    let kept = payload.get(..end).unwrap_or_default();
    Capped {
        payload: kept.to_owned(),
        dropped: payload.len().saturating_sub(kept.len()),
    }
}

/// The section key a line opens, if it opens one.
fn section_key(line: &str) -> Option<&str> {
    let content = line.trim_end_matches(['\n', '\r']);
    let first = content.chars().next()?;
    if first.is_whitespace() || first == '#' || first == '-' {
        return None;
    }

    // Quoted keys may themselves contain ':'.
    let search_from = if first == '"' || first == '\'' {
        let closing = content.get(1..)?.find(first)?;
        closing.checked_add(2)?
    } else {
        0
    };
    let colon = search_from.checked_add(content.get(search_from..)?.find(':')?)?;
    let after = content.get(colon.checked_add(1)?..)?;
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }

    let key = content.get(..colon)?.trim_end();
    let key = match first {
        '"' | '\'' => key
            .strip_prefix(first)
            .and_then(|k| k.strip_suffix(first))
            .unwrap_or(key),
        _ => key,
    };
    if key.is_empty() { None } else { Some(key) }
}
