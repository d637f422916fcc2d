#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod asset_paths;
pub mod builder;
pub mod config;
pub mod hash;
pub mod manifest;
pub mod models;
pub mod runtime;
pub mod selection;

/// Name used in asset identifiers, warnings and generated comments.
pub const PLUGIN_NAME: &str = "css-chunk-extract";

pub use builder::{BuildError, BuildPhase, BuildResult, ExtractBuilder, TracingWarnings, WarningSink};
pub use config::{ConfigError, PluginOptions};
pub use models::{Chunk, ChunkGroup, Compilation, CssModule, ExtractArtifacts, RenderManifestEntry};
pub use selection::{SkinPreference, SkinSelection};
