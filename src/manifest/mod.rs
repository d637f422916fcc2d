//! Stylesheet generation broken into focused submodules for easier testing.

pub mod generation;
pub mod order;
pub mod render;
pub mod skins;

pub use generation::{chunk_content_hash, modules_by_skin, order_modules, render_chunk};
pub use order::{ModuleOrder, OrderConflict, OrderResolver, UnmetOrder};
pub use render::{RenderedAsset, SourceSegment, render_content_asset};
pub use skins::{SkinDiff, SkinTable, group_skins, skin_from_request};
