//! Plugin options and their discovery from configuration files.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset_paths::derive_chunk_filename;
use crate::hash::HashOptions;

/// Configuration file names tried by [`PluginOptions::discover`], in order.
pub const DEFAULT_CONFIG_FILES: [&str; 3] = [
  "css-extract.config.json",
  "css-extract.config.yaml",
  "css-extract.config.yml",
];

/// Filename template used when none is configured.
pub const DEFAULT_FILENAME: &str = "[name].css";

/// Environment variable overriding [`PluginOptions::skin_field`].
pub const SKIN_FIELD_ENV: &str = "SKIN_FIELD";

/// Environment variable overriding [`PluginOptions::default_skin`].
pub const SKIN_ENV: &str = "SKIN";

/// Errors raised while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The file could not be read.
  #[error("failed to read {}: {source}", path.display())]
  Io {
    /// Offending path.
    path: PathBuf,
    /// Underlying I/O error.
    source: std::io::Error,
  },
  /// The JSON file is malformed.
  #[error("failed to parse {}: {source}", path.display())]
  Json {
    /// Offending path.
    path: PathBuf,
    /// Underlying parse error.
    source: serde_json::Error,
  },
  /// The YAML file is malformed.
  #[error("failed to parse {}: {source}", path.display())]
  Yaml {
    /// Offending path.
    path: PathBuf,
    /// Underlying parse error.
    source: serde_yaml::Error,
  },
}

/// Options controlling file naming, ordering diagnostics and the generated loader.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginOptions {
  /// Filename template for stylesheets of runtime chunks.
  pub filename: String,
  /// Filename template for stylesheets of on-demand chunks; derived from `filename` when unset.
  pub chunk_filename: Option<String>,
  /// Overrides `filename` for runtime chunks.
  pub module_filename: Option<String>,
  /// Resolve order conflicts silently.
  pub ignore_order: bool,
  /// `crossOrigin` value assigned to cross-origin stylesheet links.
  pub cross_origin_loading: Option<String>,
  /// Global property holding the active skin at runtime.
  pub skin_field: String,
  /// Skin assumed when the runtime property is unset.
  pub default_skin: String,
  /// Name of the host's require function; `<require_fn>.p` is the public path.
  pub require_fn: String,
  /// Content hash configuration.
  pub hash: HashOptions,
}

impl Default for PluginOptions {
  fn default() -> Self {
    Self {
      filename: DEFAULT_FILENAME.into(),
      chunk_filename: None,
      module_filename: None,
      ignore_order: false,
      cross_origin_loading: None,
      skin_field: "__SKIN__".into(),
      default_skin: "default".into(),
      require_fn: "__webpack_require__".into(),
      hash: HashOptions::default(),
    }
  }
}

impl PluginOptions {
  /// Attempt to load options from the first configuration file found in `dir`.
  ///
  /// Missing or unreadable files fall back to the defaults so a build can always proceed.
  pub fn discover(dir: &Path) -> Self {
    for name in DEFAULT_CONFIG_FILES {
      let candidate = dir.join(name);
      if !candidate.is_file() {
        continue;
      }
      match Self::from_path(&candidate) {
        Ok(options) => return options,
        Err(err) => {
          tracing::warn!(error = %err, "ignoring invalid configuration");
          break;
        }
      }
    }
    Self::default()
  }

  /// Read options from a JSON or YAML file, chosen by extension.
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    let is_yaml = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
      serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
      })
    } else {
      serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
      })
    }
  }

  /// Apply the `SKIN_FIELD` and `SKIN` environment overrides.
  pub fn with_env_overrides(self) -> Self {
    self.with_overrides(|key| std::env::var(key).ok())
  }

  fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(field) = lookup(SKIN_FIELD_ENV).filter(|value| !value.is_empty()) {
      self.skin_field = field;
    }
    if let Some(skin) = lookup(SKIN_ENV).filter(|value| !value.is_empty()) {
      self.default_skin = skin;
    }
    self
  }

  /// Filename template for runtime chunks.
  pub fn module_filename(&self) -> &str {
    self.module_filename.as_deref().unwrap_or(&self.filename)
  }

  /// Filename template for on-demand chunks.
  pub fn chunk_filename(&self) -> Cow<'_, str> {
    match &self.chunk_filename {
      Some(template) => Cow::Borrowed(template),
      None => derive_chunk_filename(&self.filename),
    }
  }

  /// JavaScript expression evaluating to the public path.
  pub fn public_path_expr(&self) -> String {
    format!("{}.p", self.require_fn)
  }
}
