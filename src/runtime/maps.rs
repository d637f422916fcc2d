//! Per-chunk lookup tables embedded in the loader and the path expressions built from them.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::asset_paths::PathData;
use crate::builder::{BuildError, BuildResult};
use crate::hash::shorten;
use crate::models::{Chunk, ChunkId, Compilation};
use crate::runtime::codegen::{js_json, js_string};

/// Hash, content hash and name of every chunk loadable from a runtime chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMaps {
  /// Chunk hash by chunk id.
  pub hash: BTreeMap<ChunkId, String>,
  /// CSS content hash by chunk id, only for chunks with CSS.
  pub content_hash: BTreeMap<ChunkId, String>,
  /// Chunk name by chunk id, only for named chunks.
  pub name: BTreeMap<ChunkId, String>,
}

impl ChunkMaps {
  /// Collect the maps over the async chunks of `runtime`.
  pub fn collect(
    compilation: &Compilation,
    runtime: &Chunk,
    content_hashes: &BTreeMap<ChunkId, String>,
  ) -> BuildResult<Self> {
    let mut maps = Self::default();
    for chunk in async_chunks(compilation, runtime)? {
      maps.hash.insert(chunk.id.clone(), chunk.hash.clone());
      if let Some(content_hash) = content_hashes.get(&chunk.id) {
        maps.content_hash.insert(chunk.id.clone(), content_hash.clone());
      }
      if let Some(name) = &chunk.name {
        maps.name.insert(chunk.id.clone(), name.clone());
      }
    }
    Ok(maps)
  }
}

/// Resolve the async chunk ids of `runtime`, in declaration order.
pub fn async_chunks<'a>(compilation: &'a Compilation, runtime: &Chunk) -> BuildResult<Vec<&'a Chunk>> {
  runtime
    .async_chunks
    .iter()
    .map(|id| {
      compilation.chunk(id).ok_or_else(|| BuildError::UnknownChunk {
        chunk: runtime.id.clone(),
        target: id.clone(),
      })
    })
    .collect()
}

/// Whether every entry maps its key to itself.
pub fn is_identity_map(map: &BTreeMap<ChunkId, String>) -> bool {
  map.iter().all(|(key, value)| key == value)
}

/// Entries whose value differs from their key; identity entries fall back to `chunkId` anyway.
pub fn non_identity_entries(map: &BTreeMap<ChunkId, String>) -> BTreeMap<&str, &str> {
  map
    .iter()
    .filter(|(key, value)| key != value)
    .map(|(key, value)| (key.as_str(), value.as_str()))
    .collect()
}

/// Values truncated to `length` characters.
pub fn shortened(map: &BTreeMap<ChunkId, String>, length: usize) -> BTreeMap<ChunkId, String> {
  map
    .iter()
    .map(|(key, value)| (key.clone(), shorten(value, length).to_string()))
    .collect()
}

/// JavaScript expression looking `chunkId` up in `map`, falling back to the id itself.
pub fn lookup_expr(map: &BTreeMap<ChunkId, String>) -> serde_json::Result<String> {
  if is_identity_map(map) {
    return Ok("chunkId".into());
  }
  Ok(format!("({}[chunkId] || chunkId)", js_json(&non_identity_entries(map))?))
}

/// Compact form of [`lookup_expr`], recognised by the skin loader as the name slot.
pub fn compact_lookup_expr(map: &BTreeMap<ChunkId, String>) -> serde_json::Result<String> {
  if is_identity_map(map) {
    return Ok("chunkId".into());
  }
  Ok(format!("({}[chunkId]||chunkId)", js_json(&non_identity_entries(map))?))
}

/// Path data producing JavaScript string-concatenation fragments.
///
/// Rendering a quoted template with it yields an expression such as
/// `"css/" +chunkId+ ".css"` evaluated by the loader at runtime.
#[derive(Debug)]
pub struct RuntimePathData<'a> {
  full_hash: &'a str,
  maps: &'a ChunkMaps,
}

impl<'a> RuntimePathData<'a> {
  /// Path data over the given compilation hash and chunk maps.
  pub fn new(full_hash: &'a str, maps: &'a ChunkMaps) -> Self {
    Self { full_hash, maps }
  }

  fn splice(expr: serde_json::Result<String>) -> Cow<'static, str> {
    match expr {
      Ok(expr) => Cow::Owned(format!("\" + {expr} + \"")),
      Err(err) => {
        tracing::warn!(error = %err, "falling back to chunk id in loader path");
        Cow::Borrowed("\" + chunkId + \"")
      }
    }
  }

  fn hashed(map: &BTreeMap<ChunkId, String>, length: Option<usize>) -> Cow<'static, str> {
    match length {
      Some(length) => Self::splice(lookup_expr(&shortened(map, length))),
      None => Self::splice(lookup_expr(map)),
    }
  }
}

impl PathData for RuntimePathData<'_> {
  fn id(&self) -> Cow<'_, str> {
    Cow::Borrowed("\" + chunkId + \"")
  }

  fn name(&self) -> Cow<'_, str> {
    match compact_lookup_expr(&self.maps.name) {
      Ok(expr) => Cow::Owned(format!("\" +{expr}+ \"")),
      Err(_) => Cow::Borrowed("\" +chunkId+ \""),
    }
  }

  fn full_hash(&self, length: Option<usize>) -> Cow<'_, str> {
    let hash = match length {
      Some(length) => shorten(self.full_hash, length),
      None => self.full_hash,
    };
    Cow::Owned(format!("\" + {} + \"", js_string(hash)))
  }

  fn chunk_hash(&self, length: Option<usize>) -> Cow<'_, str> {
    Self::hashed(&self.maps.hash, length)
  }

  fn content_hash(&self, length: Option<usize>) -> Cow<'_, str> {
    Self::hashed(&self.maps.content_hash, length)
  }
}
