//! Skin (variant) discovery and the compact skin table shipped to the runtime.
//!
//! Chunks are clustered by the exact set of skins their modules use. The most common set
//! becomes the reference and every other cluster is described by the skins it lacks or
//! adds relative to it, so the runtime only needs the reference list plus sparse diffs.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;

use crate::models::ChunkId;

static SKIN_QUERY: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)(?:\?|%3F|&|%26)skin(?:=|%3D)([^|&% ]*)(?:\||%7C)?([^&% ]*)")
    .expect("invalid skin regex")
});

/// Skin named by the request's `skin` query parameter, or the empty base skin.
pub fn skin_from_request(request: &str) -> &str {
  SKIN_QUERY
    .captures(request)
    .and_then(|captures| captures.get(1))
    .map_or("", |skin| skin.as_str())
}

/// Skins a cluster lacks or adds relative to the reference cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkinDiff {
  /// Reference skins missing from the cluster.
  #[serde(rename = "l", skip_serializing_if = "Option::is_none")]
  pub lacking: Option<Vec<String>>,
  /// Skins the cluster has that the reference does not.
  #[serde(rename = "e", skip_serializing_if = "Option::is_none")]
  pub extra: Option<Vec<String>>,
}

/// Skin lists of every chunk, expressed relative to a reference cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkinTable {
  /// Skin list of the reference cluster, in canonical order.
  pub skins: Vec<String>,
  /// Non-reference chunk → cluster id (1-based). `None` when every chunk matches the reference.
  pub map: Option<BTreeMap<ChunkId, usize>>,
  /// Cluster id → diff against the reference.
  pub info: Option<BTreeMap<usize, SkinDiff>>,
}

impl SkinTable {
  /// Reconstruct the ordered skin list of a chunk.
  ///
  /// Reference skins come first, minus the lacking ones, followed by the extra skins.
  pub fn effective_skins(&self, chunk: &str) -> Vec<&str> {
    let diff = self
      .map
      .as_ref()
      .and_then(|map| map.get(chunk))
      .and_then(|cluster| self.info.as_ref()?.get(cluster));

    let Some(diff) = diff else {
      return self.skins.iter().map(String::as_str).collect();
    };

    let lacking = diff.lacking.as_deref().unwrap_or_default();
    let mut skins: Vec<&str> = self
      .skins
      .iter()
      .filter(|skin| !lacking.contains(skin))
      .map(String::as_str)
      .collect();
    skins.extend(diff.extra.iter().flatten().map(String::as_str));
    skins
  }
}

/// Cluster chunks by skin set and diff every cluster against the most common one.
///
/// `chunks` yields, per chunk, the skin of each of its modules in module order; the empty
/// string stands for the base skin. Returns `None` when no chunk uses a named skin.
pub fn group_skins<C, S, T>(chunks: C) -> Option<SkinTable>
where
  C: IntoIterator<Item = (ChunkId, S)>,
  S: IntoIterator<Item = T>,
  T: AsRef<str>,
{
  let mut canonical: Vec<String> = Vec::new();
  let mut clusters: IndexMap<Vec<String>, Vec<ChunkId>> = IndexMap::new();
  let mut named = false;

  for (chunk, skins) in chunks {
    let mut chunk_skins: Vec<String> = Vec::new();
    for skin in skins {
      let skin = skin.as_ref();
      named |= !skin.is_empty();
      let rank = match canonical.iter().position(|known| known == skin) {
        Some(rank) => rank,
        None => {
          canonical.push(skin.to_string());
          canonical.len() - 1
        }
      };
      if chunk_skins.iter().any(|known| known == skin) {
        continue;
      }
      // keep the chunk list in canonical relative order
      let at = chunk_skins
        .iter()
        .rposition(|known| canonical.iter().position(|c| c == known) < Some(rank))
        .map_or(0, |index| index + 1);
      chunk_skins.insert(at, skin.to_string());
    }

    if !chunk_skins.is_empty() {
      clusters.entry(chunk_skins).or_default().push(chunk);
    }
  }

  if !named {
    return None;
  }

  let mut reference_index = 0;
  for (index, members) in clusters.values().enumerate() {
    if members.len() > clusters[reference_index].len() {
      reference_index = index;
    }
  }
  let (reference, _) = clusters.shift_remove_index(reference_index)?;

  if clusters.is_empty() {
    return Some(SkinTable {
      skins: reference,
      map: None,
      info: None,
    });
  }

  let mut map = BTreeMap::new();
  let mut info = BTreeMap::new();
  for (index, (cluster_skins, members)) in clusters.into_iter().enumerate() {
    let id = index + 1;
    for chunk in members {
      map.insert(chunk, id);
    }

    let mut lacking = Vec::new();
    let mut extra = Vec::new();
    for skin in &canonical {
      match (cluster_skins.contains(skin), reference.contains(skin)) {
        (true, false) => extra.push(skin.clone()),
        (false, true) => lacking.push(skin.clone()),
        _ => {}
      }
    }
    info.insert(id, SkinDiff {
      lacking: (!lacking.is_empty()).then_some(lacking),
      extra: (!extra.is_empty()).then_some(extra),
    });
  }

  Some(SkinTable {
    skins: reference,
    map: Some(map),
    info: Some(info),
  })
}
