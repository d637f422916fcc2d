//! Executable model of the stylesheet loader's state machine.
//!
//! The generated JavaScript and this module implement the same protocol. The model runs
//! against any [`StyleDocument`], which lets hosts and tests drive loads, load events and
//! failures deterministically without a browser.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;

use crate::manifest::skins::SkinTable;
use crate::models::ChunkId;
use crate::selection::SkinPreference;

/// Error code attached to failed stylesheet loads.
pub const CSS_CHUNK_LOAD_FAILED: &str = "CSS_CHUNK_LOAD_FAILED";

const STYLESHEET: &str = "stylesheet";
const ALTERNATE_STYLESHEET: &str = "alternate stylesheet";

/// Handle of a tag inserted into a [`StyleDocument`].
pub type TagId = usize;

/// A `<link>` tag the loader asks the document to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTag {
  /// Absolute or public-path-prefixed stylesheet URL.
  pub href: String,
  /// `stylesheet` or `alternate stylesheet`.
  pub rel: String,
  /// Skin name for skinned stylesheets.
  pub title: Option<String>,
  /// Alternate skins are fetched but not applied.
  pub disabled: bool,
  /// CORS mode for cross-origin requests.
  pub cross_origin: Option<String>,
}

/// Outcome reported by the document for an inserted tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagEvent {
  /// The stylesheet was fetched and parsed.
  Load,
  /// The fetch failed.
  Error,
}

/// The page the loader inserts stylesheets into.
pub trait StyleDocument {
  /// `data-href` (or `href`) of every `<link rel="{rel}">` and `<style>` tag.
  fn existing_hrefs(&self, rel: &str) -> Vec<String>;
  /// Append a link tag to the document head.
  fn append_link(&mut self, tag: LinkTag) -> TagId;
  /// Remove a previously appended tag.
  fn remove_tag(&mut self, tag: TagId);
}

/// URL of a chunk stylesheet split at the point where a skin prefix goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkHref {
  /// Directory part, up to the basename.
  pub path: String,
  /// Basename and anything after it.
  pub hash: String,
}

impl ChunkHref {
  /// Relative href of the stylesheet for `skin`; the empty skin is the base file.
  pub fn href(&self, skin: &str) -> String {
    if skin.is_empty() {
      format!("{}{}", self.path, self.hash)
    } else {
      format!("{}{skin}@{}", self.path, self.hash)
    }
  }
}

/// Everything the loader knows at page start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderManifest {
  /// Prefix prepended to every relative href.
  pub public_path: String,
  /// Origin of the page, used to decide on `crossOrigin`.
  pub origin: String,
  /// `crossOrigin` value for cross-origin stylesheets.
  pub cross_origin: Option<String>,
  /// Stylesheet location of every chunk that has CSS.
  pub hrefs: BTreeMap<ChunkId, ChunkHref>,
  /// Skin table of the runtime chunk, if any chunk is skinned.
  pub skins: Option<SkinTable>,
}

/// Typed failure delivered to the requesters of a failed load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Loading CSS chunk {chunk_id} failed.\n({request})")]
pub struct LoadError {
  /// Chunk whose stylesheet failed.
  pub chunk_id: ChunkId,
  /// URL of the failed request.
  pub request: String,
}

impl LoadError {
  /// Machine readable error kind.
  pub fn code(&self) -> &'static str {
    CSS_CHUNK_LOAD_FAILED
  }
}

/// Observable status of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
  /// Still waiting for tag events.
  Pending,
  /// Every required stylesheet is applied.
  Loaded,
  /// A required stylesheet failed.
  Failed(LoadError),
}

/// Shared completion handle returned to every requester of one load.
#[derive(Debug, Clone)]
pub struct LoadHandle(Rc<RefCell<LoadStatus>>);

impl LoadHandle {
  fn new(status: LoadStatus) -> Self {
    Self(Rc::new(RefCell::new(status)))
  }

  /// Current status.
  pub fn status(&self) -> LoadStatus {
    self.0.borrow().clone()
  }

  /// Whether both handles observe the same load.
  pub fn shares(&self, other: &LoadHandle) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  fn settle(&self, status: LoadStatus) {
    *self.0.borrow_mut() = status;
  }
}

/// Per-chunk loader state; chunks without an entry are unloaded.
#[derive(Debug, Clone)]
pub enum ChunkState {
  /// A load is in flight.
  Pending(LoadHandle),
  /// The stylesheets are in the document.
  Loaded,
}

#[derive(Debug)]
struct InsertedTag {
  chunk: ChunkId,
  request: String,
  alternate: bool,
  handle: LoadHandle,
}

#[derive(Debug)]
struct InFlight {
  handle: LoadHandle,
  outstanding: usize,
}

/// Stylesheet loader over a document and a skin preference.
pub struct LoaderRuntime<D, P> {
  manifest: LoaderManifest,
  document: D,
  preference: P,
  installed: HashMap<ChunkId, ChunkState>,
  in_flight: HashMap<ChunkId, InFlight>,
  tags: HashMap<TagId, InsertedTag>,
}

impl<D: StyleDocument, P: SkinPreference> LoaderRuntime<D, P> {
  /// Create the loader; `initial` chunks are already part of the page.
  pub fn new<I, S>(manifest: LoaderManifest, document: D, preference: P, initial: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<ChunkId>,
  {
    Self {
      manifest,
      document,
      preference,
      installed: initial
        .into_iter()
        .map(|chunk| (chunk.into(), ChunkState::Loaded))
        .collect(),
      in_flight: HashMap::new(),
      tags: HashMap::new(),
    }
  }

  /// The document the loader writes to.
  pub fn document(&self) -> &D {
    &self.document
  }

  /// State of a chunk, `None` when unloaded.
  pub fn state(&self, chunk: &str) -> Option<&ChunkState> {
    self.installed.get(chunk)
  }

  /// Ensure the stylesheets of `chunk` are loaded.
  ///
  /// Returns `None` for chunks without CSS. Concurrent requests share one handle.
  pub fn request_load(&mut self, chunk: &str) -> Option<LoadHandle> {
    match self.installed.get(chunk) {
      Some(ChunkState::Loaded) => return Some(LoadHandle::new(LoadStatus::Loaded)),
      Some(ChunkState::Pending(handle)) => return Some(handle.clone()),
      None => {}
    }
    let href = self.manifest.hrefs.get(chunk)?.clone();

    let handle = LoadHandle::new(LoadStatus::Pending);
    let mut outstanding = 0;
    for skin in self.skins_for(chunk) {
      let alternate = !skin.is_empty() && skin != self.preference.active_skin();
      if self.insert(chunk, &href.href(&skin), &skin, alternate, &handle) && !alternate {
        outstanding += 1;
      }
    }

    if outstanding == 0 {
      tracing::debug!(chunk, "stylesheets already present");
      self.installed.insert(chunk.to_string(), ChunkState::Loaded);
      handle.settle(LoadStatus::Loaded);
    } else {
      self
        .installed
        .insert(chunk.to_string(), ChunkState::Pending(handle.clone()));
      self.in_flight.insert(chunk.to_string(), InFlight {
        handle: handle.clone(),
        outstanding,
      });
    }
    Some(handle)
  }

  /// Deliver a load or error event for a tag inserted earlier.
  pub fn complete(&mut self, tag: TagId, event: TagEvent) {
    let Some(inserted) = self.tags.remove(&tag) else {
      return;
    };

    if event == TagEvent::Error {
      self.document.remove_tag(tag);
      if inserted.alternate {
        tracing::warn!(
          chunk = %inserted.chunk,
          request = %inserted.request,
          "alternate skin failed to load"
        );
        return;
      }
    }
    if inserted.alternate {
      return;
    }

    let Some(load) = self.in_flight.get_mut(&inserted.chunk) else {
      return;
    };
    // events of an earlier, already failed attempt must not touch a retry
    if !load.handle.shares(&inserted.handle) {
      return;
    }

    match event {
      TagEvent::Load => {
        load.outstanding -= 1;
        if load.outstanding == 0 {
          load.handle.settle(LoadStatus::Loaded);
          self.in_flight.remove(&inserted.chunk);
          self.installed.insert(inserted.chunk, ChunkState::Loaded);
        }
      }
      TagEvent::Error => {
        tracing::debug!(chunk = %inserted.chunk, request = %inserted.request, "stylesheet failed");
        load.handle.settle(LoadStatus::Failed(LoadError {
          chunk_id: inserted.chunk.clone(),
          request: inserted.request,
        }));
        self.in_flight.remove(&inserted.chunk);
        self.installed.remove(&inserted.chunk);
      }
    }
  }

  fn skins_for(&self, chunk: &str) -> Vec<String> {
    let skins: Vec<String> = self
      .manifest
      .skins
      .as_ref()
      .map(|table| {
        table
          .effective_skins(chunk)
          .into_iter()
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default();
    if skins.is_empty() {
      vec![String::new()]
    } else {
      skins
    }
  }

  /// Insert one link tag unless an equal one exists. Returns whether a tag was inserted.
  fn insert(&mut self, chunk: &str, href: &str, skin: &str, alternate: bool, handle: &LoadHandle) -> bool {
    let full_href = format!("{}{href}", self.manifest.public_path);
    let rel = if alternate { ALTERNATE_STYLESHEET } else { STYLESHEET };

    if self
      .document
      .existing_hrefs(rel)
      .iter()
      .any(|existing| existing == href || *existing == full_href)
    {
      return false;
    }

    let cross_origin = self
      .manifest
      .cross_origin
      .clone()
      .filter(|_| !self.is_same_origin(&full_href));
    let tag = self.document.append_link(LinkTag {
      href: full_href.clone(),
      rel: rel.to_string(),
      title: (!skin.is_empty()).then(|| skin.to_string()),
      disabled: alternate,
      cross_origin,
    });
    self.tags.insert(tag, InsertedTag {
      chunk: chunk.to_string(),
      request: full_href,
      alternate,
      handle: handle.clone(),
    });
    true
  }

  /// Mirrors the browser resolving `tag.href` against the page before the origin test.
  fn is_same_origin(&self, href: &str) -> bool {
    let origin = self.manifest.origin.as_str();
    if let Some(authority) = href.strip_prefix("//") {
      let host = origin.split_once("://").map_or(origin, |(_, host)| host);
      return authority.starts_with(&format!("{host}/"));
    }
    if !has_scheme(href) {
      return true;
    }
    href.starts_with(&format!("{origin}/"))
  }
}

/// Whether the URL starts with `<scheme>://`.
fn has_scheme(href: &str) -> bool {
  href.split_once("://").is_some_and(|(scheme, _)| {
    scheme.starts_with(|c: char| c.is_ascii_alphabetic())
      && scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::selection::SkinSelection;

  #[derive(Default)]
  struct FakeDocument {
    links: Vec<(TagId, LinkTag)>,
    styles: Vec<String>,
    appended: usize,
  }

  impl StyleDocument for FakeDocument {
    fn existing_hrefs(&self, rel: &str) -> Vec<String> {
      self
        .links
        .iter()
        .filter(|(_, tag)| tag.rel == rel)
        .map(|(_, tag)| tag.href.clone())
        .chain(self.styles.iter().cloned())
        .collect()
    }

    fn append_link(&mut self, tag: LinkTag) -> TagId {
      self.appended += 1;
      self.links.push((self.appended, tag));
      self.appended
    }

    fn remove_tag(&mut self, tag: TagId) {
      self.links.retain(|(id, _)| *id != tag);
    }
  }

  fn manifest() -> LoaderManifest {
    LoaderManifest {
      public_path: "/static/".into(),
      origin: "https://app.test".into(),
      cross_origin: None,
      hrefs: BTreeMap::from([
        ("1".to_string(), ChunkHref {
          path: "css/".into(),
          hash: "page.css".into(),
        }),
        ("2".to_string(), ChunkHref {
          path: "css/".into(),
          hash: "admin.css".into(),
        }),
      ]),
      skins: None,
    }
  }

  fn runtime(manifest: LoaderManifest) -> LoaderRuntime<FakeDocument, SkinSelection> {
    LoaderRuntime::new(
      manifest,
      FakeDocument::default(),
      SkinSelection::new(Some("dark".into()), "default"),
      ["main"],
    )
  }

  fn last_tag(runtime: &LoaderRuntime<FakeDocument, SkinSelection>) -> TagId {
    runtime.document().links.last().map(|(id, _)| *id).unwrap()
  }

  #[test]
  fn concurrent_requests_share_one_insertion() {
    let mut runtime = runtime(manifest());

    let first = runtime.request_load("1").unwrap();
    let second = runtime.request_load("1").unwrap();
    assert!(first.shares(&second));
    assert_eq!(runtime.document().links.len(), 1);
    assert_eq!(first.status(), LoadStatus::Pending);

    runtime.complete(last_tag(&runtime), TagEvent::Load);
    assert_eq!(second.status(), LoadStatus::Loaded);
    assert!(matches!(runtime.state("1"), Some(ChunkState::Loaded)));

    let again = runtime.request_load("1").unwrap();
    assert_eq!(again.status(), LoadStatus::Loaded);
    assert_eq!(runtime.document().appended, 1);
  }

  #[test]
  fn failed_load_can_be_retried() {
    let mut runtime = runtime(manifest());

    let handle = runtime.request_load("1").unwrap();
    runtime.complete(last_tag(&runtime), TagEvent::Error);

    let LoadStatus::Failed(error) = handle.status() else {
      panic!("load should have failed");
    };
    assert_eq!(error.code(), CSS_CHUNK_LOAD_FAILED);
    assert_eq!(error.request, "/static/css/page.css");
    assert!(runtime.document().links.is_empty());
    assert!(runtime.state("1").is_none());

    let retry = runtime.request_load("1").unwrap();
    assert!(!retry.shares(&handle));
    assert_eq!(retry.status(), LoadStatus::Pending);
    assert_eq!(runtime.document().appended, 2);
  }

  #[test]
  fn existing_stylesheet_is_not_inserted_again() {
    let mut runtime = runtime(manifest());
    runtime.document.styles.push("css/page.css".into());

    let handle = runtime.request_load("1").unwrap();
    assert_eq!(handle.status(), LoadStatus::Loaded);
    assert_eq!(runtime.document().appended, 0);
  }

  #[test]
  fn chunks_without_css_and_initial_chunks_need_no_load() {
    let mut runtime = runtime(manifest());
    assert!(runtime.request_load("3").is_none());
    assert_eq!(runtime.request_load("main").unwrap().status(), LoadStatus::Loaded);
    assert_eq!(runtime.document().appended, 0);
  }

  #[test]
  fn cross_origin_is_set_for_foreign_hosts_only() {
    let mut manifest = manifest();
    manifest.cross_origin = Some("anonymous".into());
    manifest.public_path = "https://cdn.test/".into();
    let mut remote = runtime(manifest.clone());
    remote.request_load("1");
    assert_eq!(remote.document().links[0].1.cross_origin.as_deref(), Some("anonymous"));

    manifest.public_path = "https://app.test/".into();
    let mut local = runtime(manifest.clone());
    local.request_load("1");
    assert_eq!(local.document().links[0].1.cross_origin, None);

    manifest.public_path = "//cdn.test/".into();
    let mut protocol_relative = runtime(manifest);
    protocol_relative.request_load("1");
    assert_eq!(
      protocol_relative.document().links[0].1.cross_origin.as_deref(),
      Some("anonymous")
    );
  }

  #[test]
  fn relative_public_path_is_same_origin() {
    for public_path in ["", "static/", "./", "/static/"] {
      let mut manifest = manifest();
      manifest.cross_origin = Some("anonymous".into());
      manifest.public_path = public_path.into();
      let mut runtime = runtime(manifest);
      runtime.request_load("1");

      let tag = &runtime.document().links[0].1;
      assert_eq!(tag.href, format!("{public_path}css/page.css"));
      assert_eq!(tag.cross_origin, None, "public path {public_path:?}");
    }
  }

  fn skinned_manifest() -> LoaderManifest {
    LoaderManifest {
      skins: Some(SkinTable {
        skins: vec!["".into(), "dark".into(), "light".into()],
        map: Some(BTreeMap::from([("2".to_string(), 1)])),
        info: Some(BTreeMap::from([(1, crate::manifest::skins::SkinDiff {
          lacking: Some(vec!["light".into()]),
          extra: None,
        })])),
      }),
      ..manifest()
    }
  }

  #[test]
  fn skinned_chunk_inserts_primary_and_alternate_tags() {
    let mut runtime = runtime(skinned_manifest());
    let handle = runtime.request_load("1").unwrap();

    let tags: Vec<(TagId, LinkTag)> = runtime.document().links.clone();
    assert_eq!(tags.len(), 3);
    assert_eq!(tags[0].1.href, "/static/css/page.css");
    assert_eq!(tags[0].1.title, None);
    assert_eq!(tags[1].1.href, "/static/css/dark@page.css");
    assert_eq!(tags[1].1.rel, "stylesheet");
    assert!(!tags[1].1.disabled);
    assert_eq!(tags[2].1.href, "/static/css/light@page.css");
    assert_eq!(tags[2].1.rel, "alternate stylesheet");
    assert!(tags[2].1.disabled);

    runtime.complete(tags[2].0, TagEvent::Error);
    assert_eq!(handle.status(), LoadStatus::Pending);
    runtime.complete(tags[0].0, TagEvent::Load);
    assert_eq!(handle.status(), LoadStatus::Pending);
    runtime.complete(tags[1].0, TagEvent::Load);
    assert_eq!(handle.status(), LoadStatus::Loaded);
    assert_eq!(runtime.document().links.len(), 2);
  }

  #[test]
  fn cluster_diff_limits_skins() {
    let mut runtime = runtime(skinned_manifest());
    runtime.request_load("2");

    let hrefs: Vec<&str> = runtime
      .document()
      .links
      .iter()
      .map(|(_, tag)| tag.href.as_str())
      .collect();
    assert_eq!(hrefs, vec!["/static/css/admin.css", "/static/css/dark@admin.css"]);
  }

  #[test]
  fn late_events_of_failed_attempt_do_not_touch_retry() {
    let mut runtime = runtime(skinned_manifest());
    let first = runtime.request_load("1").unwrap();
    let old: Vec<TagId> = runtime.document().links.iter().map(|(id, _)| *id).collect();

    runtime.complete(old[1], TagEvent::Error);
    assert!(matches!(first.status(), LoadStatus::Failed(_)));

    let retry = runtime.request_load("1").unwrap();
    runtime.complete(old[0], TagEvent::Error);
    assert_eq!(retry.status(), LoadStatus::Pending);
    assert!(matches!(runtime.state("1"), Some(ChunkState::Pending(_))));
  }
}
