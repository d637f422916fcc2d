use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::hash::shorten;
use crate::models::Chunk;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)\[(id|name|hash|chunkhash|contenthash)(?::(\d+))?\]")
    .expect("invalid placeholder regex")
});

/// Values substituted into a filename template.
///
/// Build-time data yields literal strings, while the runtime generator yields
/// JavaScript expressions spliced into a string literal.
pub trait PathData {
  /// Value for `[id]`.
  fn id(&self) -> Cow<'_, str>;
  /// Value for `[name]`.
  fn name(&self) -> Cow<'_, str>;
  /// Value for `[hash]` / `[hash:N]`.
  fn full_hash(&self, length: Option<usize>) -> Cow<'_, str>;
  /// Value for `[chunkhash]` / `[chunkhash:N]`.
  fn chunk_hash(&self, length: Option<usize>) -> Cow<'_, str>;
  /// Value for `[contenthash]` / `[contenthash:N]`.
  fn content_hash(&self, length: Option<usize>) -> Cow<'_, str>;
}

/// Substitute every placeholder in `template`.
pub fn render_path(template: &str, data: &impl PathData) -> String {
  PLACEHOLDER
    .replace_all(template, |captures: &Captures| {
      let length = captures
        .get(2)
        .and_then(|value| value.as_str().parse::<usize>().ok());
      let value = match captures[1].to_ascii_lowercase().as_str() {
        "id" => data.id(),
        "name" => data.name(),
        "hash" => data.full_hash(length),
        "chunkhash" => data.chunk_hash(length),
        _ => data.content_hash(length),
      };
      value.into_owned()
    })
    .into_owned()
}

/// Literal path data for one concrete chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPathData<'a> {
  /// Chunk being named.
  pub chunk: &'a Chunk,
  /// Full compilation hash.
  pub full_hash: &'a str,
  /// CSS content hash of the chunk.
  pub content_hash: &'a str,
}

fn maybe_shorten(value: &str, length: Option<usize>) -> Cow<'_, str> {
  Cow::Borrowed(match length {
    Some(length) => shorten(value, length),
    None => value,
  })
}

impl PathData for ChunkPathData<'_> {
  fn id(&self) -> Cow<'_, str> {
    Cow::Borrowed(&self.chunk.id)
  }

  fn name(&self) -> Cow<'_, str> {
    Cow::Borrowed(self.chunk.name_or_id())
  }

  fn full_hash(&self, length: Option<usize>) -> Cow<'_, str> {
    maybe_shorten(self.full_hash, length)
  }

  fn chunk_hash(&self, length: Option<usize>) -> Cow<'_, str> {
    maybe_shorten(&self.chunk.hash, length)
  }

  fn content_hash(&self, length: Option<usize>) -> Cow<'_, str> {
    maybe_shorten(self.content_hash, length)
  }
}
