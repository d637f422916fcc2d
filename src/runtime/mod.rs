//! Browser-side stylesheet loading: the generated JavaScript and its executable model.

pub mod codegen;
pub mod loader;
pub mod maps;
pub mod state;

pub use codegen::{CodeBuilder, js_json, js_string};
pub use loader::{LoaderSpec, local_vars, require_ensure};
pub use maps::{ChunkMaps, RuntimePathData, is_identity_map, non_identity_entries};
pub use state::{
  CSS_CHUNK_LOAD_FAILED, ChunkHref, ChunkState, LinkTag, LoadError, LoadHandle, LoadStatus,
  LoaderManifest, LoaderRuntime, StyleDocument, TagEvent, TagId,
};
