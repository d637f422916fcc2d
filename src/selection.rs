//! Active skin selection used by the loader model.

use crate::config::PluginOptions;

/// Source of the skin the page currently wants applied.
pub trait SkinPreference {
  /// Name of the active skin.
  fn active_skin(&self) -> &str;
}

/// Page-level skin choice with a configured fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinSelection {
  active: Option<String>,
  fallback: String,
}

impl SkinSelection {
  /// Selection with an optional explicit skin and the fallback used when it is unset.
  pub fn new(active: Option<String>, fallback: impl Into<String>) -> Self {
    Self {
      active: active.filter(|skin| !skin.is_empty()),
      fallback: fallback.into(),
    }
  }

  /// Selection falling back to the configured default skin.
  pub fn from_options(options: &PluginOptions, active: Option<String>) -> Self {
    Self::new(active, options.default_skin.clone())
  }

  /// Change the active skin; `None` restores the fallback.
  pub fn select(&mut self, skin: Option<String>) {
    self.active = skin.filter(|skin| !skin.is_empty());
  }
}

impl SkinPreference for SkinSelection {
  fn active_skin(&self) -> &str {
    self.active.as_deref().unwrap_or(&self.fallback)
  }
}

impl SkinPreference for &str {
  fn active_skin(&self) -> &str {
    self
  }
}
