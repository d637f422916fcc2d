//! Build the render manifest: one stylesheet per chunk and skin.

use indexmap::IndexMap;

use crate::PLUGIN_NAME;
use crate::asset_paths::{ChunkPathData, insert_skin, render_path};
use crate::builder::{BuildError, BuildResult, WarningSink};
use crate::config::PluginOptions;
use crate::hash::{ContentHasher, HashOptions};
use crate::manifest::order::{OrderConflict, OrderResolver};
use crate::manifest::render::render_content_asset;
use crate::models::{Chunk, Compilation, CssModule, RenderManifestEntry};

/// Split a chunk's CSS modules by skin, keeping chunk order inside each skin.
///
/// Skins appear in the order their first module does. A module listed twice in the chunk
/// is kept once; modules sharing a request but not an index are distinct.
pub fn modules_by_skin<'a>(
  compilation: &'a Compilation,
  chunk: &'a Chunk,
) -> IndexMap<&'a str, Vec<&'a CssModule>> {
  let mut skins: IndexMap<&str, Vec<&CssModule>> = IndexMap::new();
  for module in compilation.css_modules(chunk) {
    let list = skins.entry(module.skin()).or_default();
    if !list
      .iter()
      .any(|known| known.same_module(module))
    {
      list.push(module);
    }
  }
  skins
}

/// Order one skin's modules so that every chunk group's desired order is honoured where possible.
///
/// Chunks without groups keep their chunk order. Conflicts are reported to `warnings`
/// unless `ignore_order` is set; the forced order is used either way.
pub fn order_modules<'a>(
  compilation: &Compilation,
  chunk: &Chunk,
  modules: &[&'a CssModule],
  ignore_order: bool,
  warnings: &mut impl WarningSink,
) -> BuildResult<Vec<&'a CssModule>> {
  if chunk.groups.is_empty() {
    return Ok(modules.to_vec());
  }

  let mut resolver = OrderResolver::new(modules.len());
  for &group_index in &chunk.groups {
    let group = compilation
      .chunk_groups
      .get(group_index)
      .ok_or_else(|| BuildError::UnknownChunkGroup {
        chunk: chunk.id.clone(),
        group: group_index,
      })?;
    let name = group
      .name
      .clone()
      .unwrap_or_else(|| format!("#{group_index}"));
    resolver.add_consumer(
      name,
      group.modules.iter().flat_map(move |reference| {
        modules
          .iter()
          .enumerate()
          .filter(move |(_, module)| module.is_named_by(reference))
          .map(|(index, _)| index)
      }),
    );
  }

  let resolved = resolver.resolve();
  if !ignore_order {
    for conflict in &resolved.conflicts {
      warnings.warn(format_conflict(chunk, modules, conflict));
    }
  }

  Ok(resolved.modules.iter().map(|&index| modules[index]).collect())
}

/// Human readable description of a forced placement.
pub fn format_conflict(chunk: &Chunk, modules: &[&CssModule], conflict: &OrderConflict) -> String {
  let mut lines = vec![
    format!("chunk {} [{PLUGIN_NAME}]", chunk.name_or_id()),
    "Conflicting order. Following module has been added:".to_string(),
    format!(" * {}", modules[conflict.module].readable_identifier()),
    "despite it was not able to fulfill desired ordering with these modules:".to_string(),
  ];
  for unmet in &conflict.unmet {
    lines.push(format!(" * {}", modules[unmet.module].readable_identifier()));
    lines.push(format!(
      "   - couldn't fulfill desired order of chunk group(s) {}",
      unmet.violated.join(", ")
    ));
    if !unmet.fulfilled.is_empty() {
      lines.push(format!(
        "   - while fulfilling desired order of chunk group(s) {}",
        unmet.fulfilled.join(", ")
      ));
    }
  }
  lines.join("\n")
}

/// Content hash over every CSS module of a chunk.
pub fn chunk_content_hash(options: &HashOptions, compilation: &Compilation, chunk: &Chunk) -> String {
  let mut hasher = ContentHasher::new(options);
  for module in compilation.css_modules(chunk) {
    module.update_hash(&mut hasher);
  }
  hasher.digest()
}

/// Produce the manifest entries of one chunk, one per skin.
pub fn render_chunk(
  options: &PluginOptions,
  compilation: &Compilation,
  chunk: &Chunk,
  content_hash: &str,
  warnings: &mut impl WarningSink,
) -> BuildResult<Vec<RenderManifestEntry>> {
  let template = if chunk.has_runtime {
    options.module_filename().to_string()
  } else {
    options.chunk_filename().into_owned()
  };
  let path_data = ChunkPathData {
    chunk,
    full_hash: &compilation.hash,
    content_hash,
  };

  let mut entries = Vec::new();
  for (skin, modules) in modules_by_skin(compilation, chunk) {
    let ordered = order_modules(compilation, chunk, &modules, options.ignore_order, warnings)?;
    let filename_template = insert_skin(&template, skin).into_owned();
    let filename = render_path(&filename_template, &path_data);
    let identifier = if skin.is_empty() {
      format!("{PLUGIN_NAME}.{}", chunk.id)
    } else {
      format!("{PLUGIN_NAME}.{}@{skin}", chunk.id)
    };

    entries.push(RenderManifestEntry {
      chunk_id: chunk.id.clone(),
      skin: skin.to_string(),
      identifier,
      filename_template,
      filename,
      content_hash: content_hash.to_string(),
      asset: render_content_asset(ordered),
    });
  }
  Ok(entries)
}
