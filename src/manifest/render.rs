//! Concatenate ordered CSS modules into one stylesheet.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};

use crate::models::CssModule;

static SIMPLE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\s*@import url\([^)]*\)\s*;?\s*$").expect("invalid import regex")
});
static IMPORT_TERMINATOR: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r";|\s*$").expect("invalid terminator regex"));

const EXTERNAL_PREFIX: &str = "@import url";

/// A piece of the rendered stylesheet together with its source attribution.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSegment {
  /// Generated glue text without an origin.
  Raw(String),
  /// Module text attributed to the module as a whole.
  Original {
    /// Module text.
    content: String,
    /// Readable module identifier.
    name: String,
  },
  /// Module text carrying the loader's source map.
  Mapped {
    /// Module text.
    content: String,
    /// Readable module identifier.
    name: String,
    /// Source map as produced upstream.
    map: serde_json::Value,
  },
}

impl SourceSegment {
  /// Text contributed by the segment.
  pub fn text(&self) -> &str {
    match self {
      Self::Raw(text) => text,
      Self::Original { content, .. } | Self::Mapped { content, .. } => content,
    }
  }
}

/// Rendered stylesheet as an ordered list of attributed segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedAsset {
  /// Hoisted `@import` statements followed by the module blocks.
  pub segments: Vec<SourceSegment>,
}

impl RenderedAsset {
  /// Final stylesheet text.
  pub fn source(&self) -> String {
    self.segments.iter().map(SourceSegment::text).collect()
  }

  /// Length of the final stylesheet text in bytes.
  pub fn size(&self) -> usize {
    self.segments.iter().map(|segment| segment.text().len()).sum()
  }
}

/// Whether the module is a bare external `@import url(...)` statement.
pub fn is_external(module: &CssModule) -> bool {
  module.content.trim_start().starts_with(EXTERNAL_PREFIX)
}

/// Splice a media condition into an `@import` statement.
///
/// Only a single `url(...)` without an existing media list is rewritten; the media text
/// replaces the terminating `;` (or the end of the statement). Anything else is returned
/// unchanged.
pub fn splice_import_media(statement: &str, media: &str) -> String {
  if !SIMPLE_IMPORT.is_match(statement) {
    tracing::debug!(statement, media, "import already carries a media list, leaving as is");
    return statement.to_string();
  }
  IMPORT_TERMINATOR
    .replacen(statement, 1, NoExpand(media))
    .into_owned()
}

/// Render modules in the given order.
///
/// External imports are hoisted in front of everything else. Other modules are wrapped in
/// `@media` when they carry a condition and are each followed by a newline.
pub fn render_content_asset<'a>(modules: impl IntoIterator<Item = &'a CssModule>) -> RenderedAsset {
  let mut externals = Vec::new();
  let mut body = Vec::new();

  for module in modules {
    if is_external(module) {
      let statement = match module.media.as_deref() {
        Some(media) => splice_import_media(&module.content, media),
        None => module.content.clone(),
      };
      externals.push(SourceSegment::Raw(format!("{statement}\n")));
      continue;
    }

    if let Some(media) = &module.media {
      body.push(SourceSegment::Raw(format!("@media {media} {{\n")));
    }

    let name = module.readable_identifier();
    body.push(match &module.source_map {
      Some(map) => SourceSegment::Mapped {
        content: module.content.clone(),
        name,
        map: map.clone(),
      },
      None => SourceSegment::Original {
        content: module.content.clone(),
        name,
      },
    });
    body.push(SourceSegment::Raw("\n".into()));

    if module.media.is_some() {
      body.push(SourceSegment::Raw("}\n".into()));
    }
  }

  externals.append(&mut body);
  RenderedAsset {
    segments: externals,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wraps_media_modules() {
    let module = CssModule::new("./print.css", "body{color:red}").with_media("print");
    let asset = render_content_asset([&module]);
    assert_eq!(asset.source(), "@media print {\nbody{color:red}\n}\n");
  }

  #[test]
  fn hoists_imports_with_spliced_media() {
    let first = CssModule::new("./a.css", "a{}");
    let import = CssModule::new("./b.css", "@import url(x.css);").with_media("screen");
    let last = CssModule::new("./c.css", "c{}");

    let asset = render_content_asset([&first, &import, &last]);
    assert_eq!(asset.source(), "@import url(x.css)screen\na{}\nc{}\n");
  }

  #[test]
  fn imports_keep_their_original_text() {
    let import = CssModule::new("./b.css", "  @import url(x.css);\n");
    let asset = render_content_asset([&import]);
    assert_eq!(asset.source(), "  @import url(x.css);\n\n");

    let screen = CssModule::new("./c.css", "@import url(y.css);\n").with_media("screen");
    let asset = render_content_asset([&screen]);
    assert_eq!(asset.source(), "@import url(y.css)screen\n\n");
  }

  #[test]
  fn import_with_existing_media_list_passes_through() {
    assert_eq!(
      splice_import_media("@import url(x.css) print;", "screen"),
      "@import url(x.css) print;"
    );
    assert_eq!(splice_import_media("@import url(x.css)", "screen"), "@import url(x.css)screen");
  }

  #[test]
  fn attributes_segments_to_modules() {
    let plain = CssModule::new("./a.css", "a{}");
    let mapped = CssModule::new("./b.css", "b{}").with_source_map(serde_json::json!({"version": 3}));

    let asset = render_content_asset([&plain, &mapped]);
    assert_eq!(asset.segments, vec![
      SourceSegment::Original {
        content: "a{}".into(),
        name: "css ./a.css".into(),
      },
      SourceSegment::Raw("\n".into()),
      SourceSegment::Mapped {
        content: "b{}".into(),
        name: "css ./b.css".into(),
        map: serde_json::json!({"version": 3}),
      },
      SourceSegment::Raw("\n".into()),
    ]);
    assert_eq!(asset.size(), asset.source().len());
  }

  #[test]
  fn only_leading_imports_are_external() {
    assert!(!is_external(&CssModule::new("./a.css", "a{} @import url(x.css);")));
    assert!(!is_external(&CssModule::new("./a.css", "@import 'x.css';")));
  }
}
