//! Data structures describing the compilation handed to the extractor and the artifacts it returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::HashSink;
use crate::manifest::render::RenderedAsset;
use crate::manifest::skins::skin_from_request;

/// Identifier of a chunk as it appears in generated runtime code.
pub type ChunkId = String;

/// One extracted CSS module.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CssModule {
  /// Full request identifier, including loaders and query string.
  pub identifier: String,
  /// Disambiguates several CSS modules produced by one request.
  #[serde(default)]
  pub identifier_index: usize,
  /// Stylesheet text.
  pub content: String,
  /// Media condition the content applies to.
  #[serde(default)]
  pub media: Option<String>,
  /// Source map attached by the upstream loader, kept opaque.
  #[serde(default)]
  pub source_map: Option<serde_json::Value>,
  /// Explicit skin tag; derived from the request's `skin` query when absent.
  #[serde(default)]
  pub skin: Option<String>,
}

impl CssModule {
  /// Create a module without media, source map or explicit skin.
  pub fn new(identifier: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      identifier: identifier.into(),
      identifier_index: 0,
      content: content.into(),
      media: None,
      source_map: None,
      skin: None,
    }
  }

  /// Attach a media condition.
  pub fn with_media(mut self, media: impl Into<String>) -> Self {
    self.media = Some(media.into());
    self
  }

  /// Attach a source map.
  pub fn with_source_map(mut self, map: serde_json::Value) -> Self {
    self.source_map = Some(map);
    self
  }

  /// Set the skin tag explicitly.
  pub fn with_skin(mut self, skin: impl Into<String>) -> Self {
    self.skin = Some(skin.into());
    self
  }

  /// Skin tag of the module; the empty string is the base skin.
  pub fn skin(&self) -> &str {
    match self.skin.as_deref() {
      Some(skin) => skin,
      None => skin_from_request(&self.identifier),
    }
  }

  /// Unique identifier including the index.
  pub fn full_identifier(&self) -> String {
    format!("css {} {}", self.identifier, self.identifier_index)
  }

  /// Whether a module reference from a chunk or chunk group names this module.
  ///
  /// A bare request identifier names every CSS module of that request; a full
  /// identifier (`css <request> <index>`) names exactly one.
  pub fn is_named_by(&self, reference: &str) -> bool {
    if reference == self.identifier {
      return true;
    }
    reference
      .strip_prefix("css ")
      .and_then(|rest| rest.rsplit_once(' '))
      .is_some_and(|(identifier, index)| {
        identifier == self.identifier && index.parse::<usize>() == Ok(self.identifier_index)
      })
  }

  /// Whether both values are the same module, request and index alike.
  pub fn same_module(&self, other: &CssModule) -> bool {
    self.identifier == other.identifier && self.identifier_index == other.identifier_index
  }

  /// Human readable identifier used in warnings and source attributions.
  pub fn readable_identifier(&self) -> String {
    if self.identifier_index == 0 {
      format!("css {}", self.identifier)
    } else {
      format!("css {} ({})", self.identifier, self.identifier_index)
    }
  }

  /// Resource path without loaders or query, used for split-chunk conditions.
  pub fn name_for_condition(&self) -> &str {
    let resource = self.identifier.rsplit('!').next().unwrap_or(&self.identifier);
    match resource.find('?') {
      Some(idx) => &resource[..idx],
      None => resource,
    }
  }

  /// Size of the stylesheet text in bytes.
  pub fn size(&self) -> usize {
    self.content.len()
  }

  /// Fold this module's contribution into a content hash.
  pub fn update_hash(&self, sink: &mut impl HashSink) {
    sink.update(self.full_identifier().as_bytes());
    sink.update(self.content.as_bytes());
    sink.update(self.media.as_deref().unwrap_or_default().as_bytes());
    if let Some(map) = &self.source_map {
      sink.update(map.to_string().as_bytes());
    }
  }
}

/// A build group producing one logical output artifact.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Chunk {
  /// Chunk identifier.
  pub id: ChunkId,
  /// Optional chunk name used for `[name]`.
  pub name: Option<String>,
  /// Identifiers of the chunks merged into this one; defaults to `[id]`.
  pub ids: Vec<ChunkId>,
  /// Module references in chunk order, bare requests or full identifiers.
  /// Non-CSS modules are ignored.
  pub modules: Vec<String>,
  /// Indices into [`Compilation::chunk_groups`] of the groups containing this chunk.
  pub groups: Vec<usize>,
  /// Chunk hash computed by the host.
  pub hash: String,
  /// Whether this chunk carries the runtime and therefore the CSS loader.
  pub has_runtime: bool,
  /// Chunks loaded on demand from this chunk.
  pub async_chunks: Vec<ChunkId>,
}

impl Chunk {
  /// Value substituted for `[name]`, falling back to the id.
  pub fn name_or_id(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.id)
  }

  /// Ids installed when this chunk is evaluated.
  pub fn installed_ids(&self) -> Vec<&str> {
    if self.ids.is_empty() {
      vec![self.id.as_str()]
    } else {
      self.ids.iter().map(String::as_str).collect()
    }
  }
}

/// A downstream consumer imposing a desired module order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChunkGroup {
  /// Entry point or async import name.
  pub name: Option<String>,
  /// Module references in the group's desired (post-order) sequence.
  pub modules: Vec<String>,
}

/// Everything the extractor reads from one host compilation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Compilation {
  /// Full compilation hash for `[hash]`.
  pub hash: String,
  /// Extracted CSS modules.
  pub modules: Vec<CssModule>,
  /// Chunks in host order.
  pub chunks: Vec<Chunk>,
  /// Chunk groups referenced by [`Chunk::groups`].
  pub chunk_groups: Vec<ChunkGroup>,
}

impl Compilation {
  /// CSS modules named by a reference, in compilation order.
  pub fn modules_named<'a>(&'a self, reference: &'a str) -> impl Iterator<Item = &'a CssModule> + 'a {
    self
      .modules
      .iter()
      .filter(move |module| module.is_named_by(reference))
  }

  /// Look up a chunk by id.
  pub fn chunk(&self, id: &str) -> Option<&Chunk> {
    self.chunks.iter().find(|chunk| chunk.id == id)
  }

  /// CSS modules of a chunk in chunk order.
  ///
  /// A module referenced more than once is yielded once, at its first reference.
  pub fn css_modules<'a>(&'a self, chunk: &'a Chunk) -> impl Iterator<Item = &'a CssModule> + 'a {
    let mut seen: Vec<&CssModule> = Vec::new();
    chunk
      .modules
      .iter()
      .flat_map(move |reference| self.modules_named(reference))
      .filter(move |module| {
        if seen.iter().any(|known| known.same_module(module)) {
          false
        } else {
          seen.push(*module);
          true
        }
      })
  }

  /// Whether the chunk contains at least one CSS module.
  pub fn has_css(&self, chunk: &Chunk) -> bool {
    self.css_modules(chunk).next().is_some()
  }
}

/// One stylesheet to emit, produced per chunk and skin.
#[derive(Debug, Clone)]
pub struct RenderManifestEntry {
  /// Chunk the stylesheet belongs to.
  pub chunk_id: ChunkId,
  /// Skin tag, empty for the base stylesheet.
  pub skin: String,
  /// Stable asset identifier, `<plugin>.<chunk>[@skin]`.
  pub identifier: String,
  /// Filename template with the skin prefix applied.
  pub filename_template: String,
  /// Filename after placeholder substitution.
  pub filename: String,
  /// Content hash of the chunk's CSS modules.
  pub content_hash: String,
  /// Rendered stylesheet.
  pub asset: RenderedAsset,
}

/// Serializable summary of one emitted stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
  /// Stable asset identifier.
  pub identifier: String,
  /// Chunk the stylesheet belongs to.
  pub chunk_id: ChunkId,
  /// Skin tag, empty for the base stylesheet.
  pub skin: String,
  /// Output filename.
  pub filename: String,
  /// Content hash of the chunk's CSS modules.
  pub content_hash: String,
  /// Stylesheet size in bytes.
  pub size: usize,
}

impl From<&RenderManifestEntry> for AssetSummary {
  fn from(entry: &RenderManifestEntry) -> Self {
    Self {
      identifier: entry.identifier.clone(),
      chunk_id: entry.chunk_id.clone(),
      skin: entry.skin.clone(),
      filename: entry.filename.clone(),
      content_hash: entry.content_hash.clone(),
      size: entry.asset.size(),
    }
  }
}

/// Runtime source fragments spliced into a runtime chunk's bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeFragments {
  /// Declaration of the installed-chunk state table.
  pub local_vars: String,
  /// Body of the chunk-ensure handler that loads CSS.
  pub require_ensure: String,
}

/// Complete output of one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractArtifacts {
  /// Stylesheets to emit.
  pub assets: Vec<RenderManifestEntry>,
  /// Runtime fragments keyed by runtime chunk.
  pub runtime: BTreeMap<ChunkId, RuntimeFragments>,
  /// CSS content hash of every chunk.
  pub content_hashes: BTreeMap<ChunkId, String>,
}

impl ExtractArtifacts {
  /// Summaries of the emitted stylesheets, in emission order.
  pub fn summary(&self) -> Vec<AssetSummary> {
    self.assets.iter().map(AssetSummary::from).collect()
  }
}
