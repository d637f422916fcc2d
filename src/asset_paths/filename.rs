use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static CHUNK_PLACEHOLDERS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\[(name|id|chunkhash)\]").expect("invalid placeholder regex"));
static BASENAME: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(^|/)([^/]*(?:\?|$))").expect("invalid basename regex"));
static SKIN_INSERTION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(.+[\\/])?([^.]+\.)").expect("invalid filename regex"));
static CHUNKHASH: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)\[chunkhash(?::(\d+))?\]").expect("invalid chunkhash regex"));
static CONTENTHASH: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)\[contenthash(?::(\d+))?\]").expect("invalid contenthash regex")
});
static NAME: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)\[name\]").expect("invalid name regex"));

/// Derive the filename template for non-runtime chunks.
///
/// Templates that already vary per chunk are reused as is; otherwise `[id].` is
/// prefixed to the basename so every chunk gets a distinct file.
pub fn derive_chunk_filename(filename: &str) -> Cow<'_, str> {
  if CHUNK_PLACEHOLDERS.is_match(filename) {
    Cow::Borrowed(filename)
  } else {
    BASENAME.replacen(filename, 1, "${1}[id].${2}")
  }
}

/// Insert `skin@` in front of the template's basename.
///
/// `css/[name].css` with skin `dark` becomes `css/dark@[name].css`. The base skin and
/// templates without a dotted basename are returned unchanged.
pub fn insert_skin<'a>(template: &'a str, skin: &str) -> Cow<'a, str> {
  if skin.is_empty() {
    return Cow::Borrowed(template);
  }
  match split_skin_point(template) {
    Some((prefix, rest)) => Cow::Owned(format!("{prefix}{skin}@{rest}")),
    None => Cow::Borrowed(template),
  }
}

/// Split a template at the point where a skin prefix is inserted.
pub fn split_skin_point(template: &str) -> Option<(&str, &str)> {
  let captures = SKIN_INSERTION.captures(template)?;
  let at = captures.get(2)?.start();
  Some(template.split_at(at))
}

/// Whether the template references `[chunkhash]` in any form.
pub fn uses_chunk_hash(template: &str) -> bool {
  CHUNKHASH.is_match(template)
}

/// Whether the template references `[contenthash]` in any form.
pub fn uses_content_hash(template: &str) -> bool {
  CONTENTHASH.is_match(template)
}

/// Whether the template references `[name]`.
pub fn uses_name(template: &str) -> bool {
  NAME.is_match(template)
}
