//! Helpers for turning filename templates into stylesheet paths.
//!
//! `filename` holds the template rewrites (chunk filename derivation, skin prefixes) and
//! `template` performs placeholder substitution. Both the manifest generator and the
//! runtime generator go through these so emitted files and loader requests agree.

mod filename;
mod template;

pub use filename::{
  derive_chunk_filename, insert_skin, split_skin_point, uses_chunk_hash, uses_content_hash,
  uses_name,
};
pub use template::{ChunkPathData, PathData, render_path};
