//! Extraction orchestrator dispatching the build phases over one compilation.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::asset_paths::{
  ChunkPathData, render_path, split_skin_point, uses_chunk_hash, uses_content_hash, uses_name,
};
use crate::config::PluginOptions;
use crate::hash::HashSink;
use crate::manifest::generation::{chunk_content_hash, render_chunk};
use crate::manifest::skins::{SkinTable, group_skins};
use crate::models::{Chunk, ChunkId, Compilation, CssModule, ExtractArtifacts, RenderManifestEntry, RuntimeFragments};
use crate::runtime::codegen::{js_json, js_string};
use crate::runtime::loader::{self, LoaderSpec};
use crate::runtime::maps::{ChunkMaps, RuntimePathData, async_chunks};
use crate::runtime::state::{ChunkHref, LoaderManifest};

/// Generic build result type used across the crate.
pub type BuildResult<T> = Result<T, BuildError>;

/// Inconsistencies in the compilation handed to the extractor.
#[derive(Debug, Error)]
pub enum BuildError {
  /// A chunk names a chunk group index that does not exist.
  #[error("chunk {chunk} refers to unknown chunk group #{group}")]
  UnknownChunkGroup {
    /// Referring chunk.
    chunk: ChunkId,
    /// Missing group index.
    group: usize,
  },
  /// A runtime chunk lists an async chunk that does not exist.
  #[error("chunk {chunk} refers to unknown async chunk {target}")]
  UnknownChunk {
    /// Referring chunk.
    chunk: ChunkId,
    /// Missing chunk id.
    target: ChunkId,
  },
  /// Runtime data could not be turned into a JavaScript literal.
  #[error("failed to serialize runtime data: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Receiver of non-fatal build diagnostics such as order conflicts.
pub trait WarningSink {
  /// Record one warning.
  fn warn(&mut self, message: String);
}

impl WarningSink for Vec<String> {
  fn warn(&mut self, message: String) {
    self.push(message);
  }
}

/// Forwards warnings to `tracing` at WARN level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWarnings;

impl WarningSink for TracingWarnings {
  fn warn(&mut self, message: String) {
    tracing::warn!("{message}");
  }
}

/// Points of the host build at which the extractor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
  /// Digest the CSS modules of every chunk.
  ContentHash,
  /// Render stylesheets per chunk and skin.
  RenderManifest,
  /// Fold loader inputs into a runtime chunk's hash.
  HashForChunk,
  /// Declare the installed-chunk table.
  LocalVars,
  /// Emit the chunk-ensure handler.
  RequireEnsure,
}

impl fmt::Display for BuildPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::ContentHash => "content-hash",
      Self::RenderManifest => "render-manifest",
      Self::HashForChunk => "hash-for-chunk",
      Self::LocalVars => "local-vars",
      Self::RequireEnsure => "require-ensure",
    })
  }
}

/// High-level helper running every extraction phase over a compilation.
pub struct ExtractBuilder<'a> {
  options: &'a PluginOptions,
}

impl<'a> ExtractBuilder<'a> {
  /// Create a builder for the provided options.
  pub fn new(options: &'a PluginOptions) -> Self {
    Self { options }
  }

  /// Options the builder was created with.
  pub fn options(&self) -> &PluginOptions {
    self.options
  }

  /// Run every phase in host order and collect the artifacts.
  pub fn build(
    &self,
    compilation: &Compilation,
    warnings: &mut impl WarningSink,
  ) -> BuildResult<ExtractArtifacts> {
    let mut artifacts = ExtractArtifacts::default();

    tracing::debug!(phase = %BuildPhase::ContentHash, chunks = compilation.chunks.len());
    for chunk in &compilation.chunks {
      if compilation.has_css(chunk) {
        let hash = self.content_hash(compilation, chunk);
        artifacts.content_hashes.insert(chunk.id.clone(), hash);
      }
    }

    tracing::debug!(phase = %BuildPhase::RenderManifest);
    for chunk in &compilation.chunks {
      let entries = self.render_manifest(compilation, chunk, &artifacts.content_hashes, warnings)?;
      artifacts.assets.extend(entries);
    }

    for chunk in compilation.chunks.iter().filter(|chunk| chunk.has_runtime) {
      let local_vars = self.local_vars(compilation, chunk)?;
      let require_ensure = self.require_ensure(compilation, chunk, &artifacts.content_hashes)?;
      if let (Some(local_vars), Some(require_ensure)) = (local_vars, require_ensure) {
        artifacts.runtime.insert(chunk.id.clone(), RuntimeFragments {
          local_vars,
          require_ensure,
        });
      }
    }

    tracing::debug!(
      assets = artifacts.assets.len(),
      runtimes = artifacts.runtime.len(),
      "extraction finished"
    );
    Ok(artifacts)
  }

  /// Content hash of a chunk's CSS modules.
  pub fn content_hash(&self, compilation: &Compilation, chunk: &Chunk) -> String {
    chunk_content_hash(&self.options.hash, compilation, chunk)
  }

  /// Manifest entries of one chunk; empty when the chunk has no CSS.
  pub fn render_manifest(
    &self,
    compilation: &Compilation,
    chunk: &Chunk,
    content_hashes: &BTreeMap<ChunkId, String>,
    warnings: &mut impl WarningSink,
  ) -> BuildResult<Vec<RenderManifestEntry>> {
    if !compilation.has_css(chunk) {
      return Ok(Vec::new());
    }
    let content_hash = match content_hashes.get(&chunk.id) {
      Some(hash) => hash.clone(),
      None => self.content_hash(compilation, chunk),
    };
    render_chunk(self.options, compilation, chunk, &content_hash, warnings)
  }

  /// Fold the chunk maps the loader depends on into the runtime chunk's hash.
  ///
  /// Only the maps referenced by the chunk filename template contribute.
  pub fn hash_for_chunk(
    &self,
    compilation: &Compilation,
    runtime: &Chunk,
    content_hashes: &BTreeMap<ChunkId, String>,
    sink: &mut impl HashSink,
  ) -> BuildResult<()> {
    let template = self.options.chunk_filename();
    let maps = ChunkMaps::collect(compilation, runtime, content_hashes)?;
    tracing::debug!(phase = %BuildPhase::HashForChunk, chunk = %runtime.id);

    if uses_chunk_hash(&template) {
      sink.update(js_json(&maps.hash)?.as_bytes());
    }
    if uses_content_hash(&template) {
      sink.update(js_json(&maps.content_hash)?.as_bytes());
    }
    if uses_name(&template) {
      sink.update(js_json(&maps.name)?.as_bytes());
    }
    Ok(())
  }

  /// Async chunks of `runtime` that have a stylesheet.
  pub fn css_chunks<'c>(&self, compilation: &'c Compilation, runtime: &Chunk) -> BuildResult<Vec<&'c Chunk>> {
    Ok(
      async_chunks(compilation, runtime)?
        .into_iter()
        .filter(|chunk| compilation.has_css(chunk))
        .collect(),
    )
  }

  /// Skin table over the async chunks of `runtime`.
  pub fn skin_table(&self, compilation: &Compilation, runtime: &Chunk) -> BuildResult<Option<SkinTable>> {
    let chunks = async_chunks(compilation, runtime)?;
    Ok(group_skins(chunks.into_iter().map(|chunk| {
      (
        chunk.id.clone(),
        compilation.css_modules(chunk).map(CssModule::skin),
      )
    })))
  }

  /// Declaration of the installed-chunk table, `None` when no async chunk has CSS.
  pub fn local_vars(&self, compilation: &Compilation, runtime: &Chunk) -> BuildResult<Option<String>> {
    if self.css_chunks(compilation, runtime)?.is_empty() {
      return Ok(None);
    }
    tracing::debug!(phase = %BuildPhase::LocalVars, chunk = %runtime.id);
    Ok(Some(loader::local_vars(&runtime.installed_ids())))
  }

  /// Chunk-ensure handler loading stylesheets, `None` when no async chunk has CSS.
  pub fn require_ensure(
    &self,
    compilation: &Compilation,
    runtime: &Chunk,
    content_hashes: &BTreeMap<ChunkId, String>,
  ) -> BuildResult<Option<String>> {
    let css_chunks = self.css_chunks(compilation, runtime)?;
    if css_chunks.is_empty() {
      return Ok(None);
    }
    tracing::debug!(phase = %BuildPhase::RequireEnsure, chunk = %runtime.id);

    let maps = ChunkMaps::collect(compilation, runtime, content_hashes)?;
    let path_data = RuntimePathData::new(&compilation.hash, &maps);
    let link_href_path = render_path(&js_string(&self.options.chunk_filename()), &path_data);
    let skins = self.skin_table(compilation, runtime)?;

    let spec = LoaderSpec {
      css_chunks: css_chunks.iter().map(|chunk| chunk.id.as_str()).collect(),
      link_href_path,
      public_path: self.options.public_path_expr(),
      cross_origin: self.options.cross_origin_loading.as_deref(),
      skins: skins.as_ref(),
      skin_field: &self.options.skin_field,
      default_skin: &self.options.default_skin,
    };
    Ok(Some(loader::require_ensure(&spec)?))
  }

  /// Loader inputs for the executable model, resolved for one page.
  pub fn loader_manifest(
    &self,
    compilation: &Compilation,
    runtime: &Chunk,
    content_hashes: &BTreeMap<ChunkId, String>,
    public_path: &str,
    origin: &str,
  ) -> BuildResult<LoaderManifest> {
    let template = self.options.chunk_filename();
    let (path_template, hash_template) = split_skin_point(&template).unwrap_or(("", template.as_ref()));

    let mut hrefs = BTreeMap::new();
    for chunk in self.css_chunks(compilation, runtime)? {
      let content_hash = content_hashes
        .get(&chunk.id)
        .cloned()
        .unwrap_or_else(|| self.content_hash(compilation, chunk));
      let data = ChunkPathData {
        chunk,
        full_hash: &compilation.hash,
        content_hash: &content_hash,
      };
      hrefs.insert(chunk.id.clone(), ChunkHref {
        path: render_path(path_template, &data),
        hash: render_path(hash_template, &data),
      });
    }

    Ok(LoaderManifest {
      public_path: public_path.to_string(),
      origin: origin.to_string(),
      cross_origin: self.options.cross_origin_loading.clone(),
      hrefs,
      skins: self.skin_table(compilation, runtime)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hash::{ContentHasher, HashOptions};
  use crate::models::ChunkGroup;
  use crate::runtime::state::{LoadStatus, LoaderRuntime, StyleDocument, TagEvent, TagId, LinkTag};
  use crate::selection::SkinSelection;

  fn compilation() -> Compilation {
    Compilation {
      hash: "0123456789abcdef".into(),
      modules: vec![
        CssModule::new("./main.css", "body{}"),
        CssModule::new("./page.css", ".page{}"),
        CssModule::new("./page.css?skin=dark", ".page{color:#fff}"),
        CssModule::new("./admin.css", ".admin{}"),
      ],
      chunks: vec![
        Chunk {
          id: "main".into(),
          name: Some("main".into()),
          modules: vec!["./main.js".into(), "./main.css".into()],
          groups: vec![0],
          hash: "mainhash".into(),
          has_runtime: true,
          async_chunks: vec!["1".into(), "2".into(), "3".into()],
          ..Chunk::default()
        },
        Chunk {
          id: "1".into(),
          name: Some("page".into()),
          modules: vec!["./page.css".into(), "./page.css?skin=dark".into()],
          hash: "pagehash".into(),
          ..Chunk::default()
        },
        Chunk {
          id: "2".into(),
          modules: vec!["./admin.css".into()],
          hash: "adminhash".into(),
          ..Chunk::default()
        },
        Chunk {
          id: "3".into(),
          modules: vec!["./lazy.js".into()],
          hash: "lazyhash".into(),
          ..Chunk::default()
        },
      ],
      chunk_groups: vec![ChunkGroup {
        name: Some("main".into()),
        modules: vec!["./main.css".into(), "./main.js".into()],
      }],
    }
  }

  fn options() -> PluginOptions {
    PluginOptions {
      filename: "css/[name].css".into(),
      ..PluginOptions::default()
    }
  }

  #[test]
  fn build_emits_assets_per_skin_and_runtime_fragments() {
    let options = options();
    let compilation = compilation();
    let mut warnings: Vec<String> = Vec::new();

    let artifacts = ExtractBuilder::new(&options)
      .build(&compilation, &mut warnings)
      .unwrap();

    let files: Vec<&str> = artifacts
      .assets
      .iter()
      .map(|entry| entry.filename.as_str())
      .collect();
    assert_eq!(files, vec!["css/main.css", "css/page.css", "css/dark@page.css", "css/2.css"]);
    assert!(warnings.is_empty());
    assert_eq!(artifacts.content_hashes.len(), 3);
    assert!(!artifacts.content_hashes.contains_key("3"));

    let runtime = &artifacts.runtime["main"];
    assert!(runtime.local_vars.contains("\"main\": 0"));
    assert!(runtime.require_ensure.contains("var cssChunks = {\"1\":1,\"2\":1};"));
    assert!(runtime.require_ensure.contains("var skins = [\"\",\"dark\"];"));
  }

  #[test]
  fn build_keeps_every_module_of_a_shared_request() {
    let options = options();
    let mut compilation = compilation();
    let mut print = CssModule::new("css-loader!./page.css", ".page{color:blue}").with_media("print");
    print.identifier_index = 1;
    compilation.modules.push(CssModule::new("css-loader!./page.css", ".page{color:red}"));
    compilation.modules.push(print);
    compilation.chunks[2].modules = vec!["css-loader!./page.css".into()];

    let artifacts = ExtractBuilder::new(&options)
      .build(&compilation, &mut Vec::<String>::new())
      .unwrap();

    let admin = artifacts
      .assets
      .iter()
      .find(|entry| entry.chunk_id == "2")
      .unwrap();
    assert_eq!(
      admin.asset.source(),
      ".page{color:red}\n@media print {\n.page{color:blue}\n}\n"
    );
  }

  #[test]
  fn runtime_without_css_chunks_gets_no_fragments() {
    let options = options();
    let mut compilation = compilation();
    compilation.chunks[0].async_chunks = vec!["3".into()];

    let artifacts = ExtractBuilder::new(&options)
      .build(&compilation, &mut Vec::<String>::new())
      .unwrap();
    assert!(artifacts.runtime.is_empty());
  }

  #[test]
  fn unknown_async_chunk_fails_the_build() {
    let options = options();
    let mut compilation = compilation();
    compilation.chunks[0].async_chunks.push("missing".into());

    let err = ExtractBuilder::new(&options)
      .build(&compilation, &mut Vec::<String>::new())
      .unwrap_err();
    assert!(matches!(err, BuildError::UnknownChunk { .. }));
    assert_eq!(err.to_string(), "chunk main refers to unknown async chunk missing");
  }

  #[test]
  fn hash_for_chunk_depends_on_referenced_maps_only() {
    let compilation = compilation();
    let digest = |options: &PluginOptions, compilation: &Compilation| {
      let builder = ExtractBuilder::new(options);
      let mut hasher = ContentHasher::new(&HashOptions::default());
      builder
        .hash_for_chunk(compilation, &compilation.chunks[0], &BTreeMap::new(), &mut hasher)
        .unwrap();
      hasher.digest()
    };

    let by_name = options();
    let mut renamed = compilation.clone();
    renamed.chunks[1].name = Some("other".into());
    assert_ne!(digest(&by_name, &compilation), digest(&by_name, &renamed));

    let mut rehashed = compilation.clone();
    rehashed.chunks[1].hash = "changed".into();
    assert_eq!(digest(&by_name, &compilation), digest(&by_name, &rehashed));

    let by_chunk_hash = PluginOptions {
      chunk_filename: Some("[id].[chunkhash].css".into()),
      ..PluginOptions::default()
    };
    assert_ne!(digest(&by_chunk_hash, &compilation), digest(&by_chunk_hash, &rehashed));
  }

  #[test]
  fn phases_have_stable_names() {
    assert_eq!(BuildPhase::ContentHash.to_string(), "content-hash");
    assert_eq!(BuildPhase::RequireEnsure.to_string(), "require-ensure");
  }

  #[derive(Default)]
  struct Page {
    links: Vec<(TagId, LinkTag)>,
  }

  impl StyleDocument for Page {
    fn existing_hrefs(&self, rel: &str) -> Vec<String> {
      self
        .links
        .iter()
        .filter(|(_, tag)| tag.rel == rel)
        .map(|(_, tag)| tag.href.clone())
        .collect()
    }

    fn append_link(&mut self, tag: LinkTag) -> TagId {
      let id = self.links.len() + 1;
      self.links.push((id, tag));
      id
    }

    fn remove_tag(&mut self, tag: TagId) {
      self.links.retain(|(id, _)| *id != tag);
    }
  }

  #[test]
  fn loader_manifest_drives_the_runtime_model() {
    let options = options();
    let compilation = compilation();
    let builder = ExtractBuilder::new(&options);

    let manifest = builder
      .loader_manifest(&compilation, &compilation.chunks[0], &BTreeMap::new(), "/assets/", "https://app.test")
      .unwrap();
    assert_eq!(manifest.hrefs.len(), 2);
    assert_eq!(manifest.hrefs["1"].href("dark"), "css/dark@page.css");
    assert_eq!(manifest.hrefs["2"].href(""), "css/2.css");

    let mut runtime = LoaderRuntime::new(
      manifest,
      Page::default(),
      SkinSelection::new(None, "default"),
      compilation.chunks[0].installed_ids(),
    );
    let handle = runtime.request_load("1").unwrap();
    let hrefs: Vec<(String, bool)> = runtime
      .document()
      .links
      .iter()
      .map(|(_, tag)| (tag.href.clone(), tag.disabled))
      .collect();
    assert_eq!(hrefs, vec![
      ("/assets/css/page.css".to_string(), false),
      ("/assets/css/dark@page.css".to_string(), true),
    ]);

    runtime.complete(1, TagEvent::Load);
    assert_eq!(handle.status(), LoadStatus::Loaded);
  }
}
